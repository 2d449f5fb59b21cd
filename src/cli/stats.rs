use anyhow::Result;

use cairn::config::CairnConfig;

use super::doctor::format_bytes;

/// Display store statistics in the terminal.
pub async fn stats(config: &CairnConfig, json: bool) -> Result<()> {
    let engine = crate::server::open_engine(config).await?;
    let response = engine.stats().await?;
    engine.close().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("Store Statistics");
    println!("{}", "=".repeat(40));
    println!("  Content records:     {}", response.total_content);
    println!("  Vectors:             {}", response.total_vectors);
    println!("  Index nodes:         {}", response.index_nodes);
    println!("  User created:        {}", response.user_created);
    println!();

    println!("By Source:");
    for (source, count) in &response.by_source {
        println!("  {:<16} {}", source, count);
    }
    println!();

    if !response.by_tag.is_empty() {
        println!("By Tag:");
        for (tag, count) in &response.by_tag {
            println!("  {:<20} {}", tag, count);
        }
        println!();
    }

    if !response.most_accessed.is_empty() {
        println!("Most Accessed:");
        for entry in &response.most_accessed {
            println!("  {:<38} {}", entry.id, entry.access_count);
        }
        println!();
    }

    println!("Database size:         {}", format_bytes(response.db_size_bytes));
    if let Some(oldest) = response.oldest {
        println!("Oldest record:         {}", oldest.to_rfc3339());
    }
    if let Some(newest) = response.newest {
        println!("Newest record:         {}", newest.to_rfc3339());
    }

    Ok(())
}
