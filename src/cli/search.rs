//! CLI `search` and `query` commands.

use anyhow::Result;

use cairn::config::CairnConfig;

use super::print_results;

/// Run a search from the terminal. `keyword` skips the vector half.
pub async fn search(config: &CairnConfig, query: &str, limit: Option<usize>, keyword: bool) -> Result<()> {
    let engine = crate::server::open_engine(config).await?;
    let limit = limit.unwrap_or(config.retrieval.default_limit);

    let results = if keyword {
        engine.keyword_search(query, limit).await?
    } else {
        engine.hybrid_search(query, None, limit).await?
    };
    print_results(&results);

    engine.close().await?;
    Ok(())
}

/// Run a cue-phrase query from the terminal.
pub async fn query(config: &CairnConfig, text: &str, limit: Option<usize>) -> Result<()> {
    let engine = crate::server::open_engine(config).await?;
    let limit = limit.unwrap_or(config.retrieval.default_limit);

    let results = engine.intelligent_query(text, limit).await?;
    print_results(&results);

    engine.close().await?;
    Ok(())
}
