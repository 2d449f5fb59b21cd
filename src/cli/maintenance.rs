//! CLI maintenance commands: `sweep` and `evict`.

use anyhow::Result;

use cairn::config::CairnConfig;

/// Run the retention sweep and report what it removed.
pub async fn sweep(config: &CairnConfig, dry_run: bool) -> Result<()> {
    let engine = crate::server::open_engine(config).await?;
    let result = engine.retention_sweep(dry_run).await?;
    engine.close().await?;

    println!(
        "Retention: {} day(s), cutoff {}",
        config.retention.retention_days,
        result.cutoff.to_rfc3339()
    );

    if result.candidates.is_empty() {
        println!("No expired content found.");
    } else if dry_run {
        println!(
            "Found {} candidate(s) for removal (dry run, nothing deleted):\n",
            result.candidates.len()
        );
        println!("{:<38} {:<26} {}", "ID", "Timestamp", "Preview");
        println!("{}", "-".repeat(90));
        for c in &result.candidates {
            println!("{:<38} {:<26} {}", c.id, c.timestamp.to_rfc3339(), c.preview);
        }
    } else {
        println!("Deleted {} expired record(s).", result.deleted);
    }

    if !result.orphans.is_clean() {
        println!(
            "Orphans repaired: {} vector(s), {} index node(s), {} tag row(s)",
            result.orphans.vectors_removed, result.orphans.nodes_removed, result.orphans.tags_removed
        );
        if !result.orphans.content_without_vectors.is_empty() {
            println!(
                "  {} content record(s) have no vector and are not searchable by similarity",
                result.orphans.content_without_vectors.len()
            );
        }
    }

    Ok(())
}

/// Enforce the configured capacity immediately.
pub async fn evict(config: &CairnConfig) -> Result<()> {
    let engine = crate::server::open_engine(config).await?;
    let result = engine.enforce_capacity().await?;
    engine.close().await?;

    if result.evicted.is_empty() {
        println!("Store is within capacity ({}).", result.capacity);
    } else {
        println!("Evicted {} record(s) to stay within capacity {}:", result.evicted.len(), result.capacity);
        for id in &result.evicted {
            println!("  {id}");
        }
    }
    Ok(())
}
