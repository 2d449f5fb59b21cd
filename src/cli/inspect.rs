//! CLI `inspect` command: display full details for one record.

use anyhow::Result;

use cairn::config::CairnConfig;

/// Inspect a single record by id and display full details.
pub async fn inspect(config: &CairnConfig, id: &str) -> Result<()> {
    let engine = crate::server::open_engine(config).await?;
    let record = engine.fetch(id).await?;
    let has_vector = engine.fetch_embedding(id).await?.is_some();
    engine.close().await?;

    let Some(r) = record else {
        anyhow::bail!("no record with id {id}");
    };

    println!("Record: {}", r.id);
    println!("{}", "=".repeat(50));
    println!("  Source:         {}", serde_json::to_string(&r.source)?);
    println!("  Timestamp:      {}", r.timestamp.to_rfc3339());
    println!("  User created:   {}", r.user_created);
    println!("  Indexed:        {}", if has_vector { "yes" } else { "no (missing vector)" });
    println!("  Access count:   {}", r.access_count);
    if let Some(ref la) = r.last_accessed {
        println!("  Last accessed:  {la}");
    }
    println!("  Created:        {}", r.created_at);
    println!("  Updated:        {}", r.updated_at);
    if !r.tags.is_empty() {
        println!("  Tags:           {}", r.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    if !r.metadata.is_empty() {
        println!("  Metadata:       {}", serde_json::to_string_pretty(&r.metadata)?);
    }
    println!();
    println!("Text:");
    println!("  {}", r.text);

    Ok(())
}
