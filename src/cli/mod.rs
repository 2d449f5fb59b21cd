pub mod doctor;
pub mod inspect;
pub mod maintenance;
pub mod search;
pub mod stats;

use cairn::memory::truncate_preview;
use cairn::memory::types::RankedResult;

/// Characters of text shown per result line.
const PREVIEW_CHARS: usize = 120;

/// Print ranked results as a numbered list.
fn print_results(results: &[RankedResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let tags = if result.tags.is_empty() {
            String::new()
        } else {
            format!(
                " #{}",
                result.tags.iter().cloned().collect::<Vec<_>>().join(" #")
            )
        };
        println!(
            "  {}. [{}] {} (score: {:.4}, {}){}",
            i + 1,
            result.source.kind(),
            result.id,
            result.score,
            result.timestamp.format("%Y-%m-%d %H:%M"),
            tags,
        );
        println!("     {}", truncate_preview(&result.text, PREVIEW_CHARS));
        println!();
    }
}
