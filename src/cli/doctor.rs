//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use cairn::config::CairnConfig;
use cairn::db;

/// Run database diagnostics and print a health report.
///
/// Opens the file directly rather than through the engine so that orphans are
/// reported before the startup sweep would repair them.
pub fn doctor(config: &CairnConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `cairn serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Cairn Health Report");
    println!("===================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Embedding dimension:");
    match report.dimension {
        Some(stored) => {
            println!("  Stored:          {stored}");
            println!("  Configured:      {}", config.storage.dimension);
            if stored != config.storage.dimension {
                println!("  WARNING: dimension mismatch! The engine will refuse to open this store.");
            } else {
                println!("  Status:          OK (match)");
            }
        }
        None => println!("  Stored:          (not set)"),
    }
    println!();
    println!("Row counts:");
    println!("  Content:         {}", report.content_count);
    println!("  Vectors:         {}", report.vector_count);
    println!("  Index nodes:     {}", report.node_count);
    println!();
    println!("Consistency:");
    println!("  Orphan vectors:  {}", report.orphan_vectors);
    println!("  Orphan nodes:    {}", report.orphan_nodes);
    println!("  Missing vectors: {}", report.missing_vectors);
    if report.orphan_vectors + report.orphan_nodes > 0 {
        println!("  Orphans are removed automatically the next time the engine opens.");
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.cairn/cairn.db");
        println!("  2. Or start fresh by moving the damaged file aside.");
    }

    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
