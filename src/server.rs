//! MCP server initialization for stdio and Streamable HTTP transports.
//!
//! [`serve_stdio`] and [`serve_http`] open the engine once and hand clones of it
//! to the MCP tool handler.

use anyhow::Result;
use cairn::config::CairnConfig;
use cairn::embedding;
use cairn::{EngineSettings, MemoryEngine};
use rmcp::ServiceExt;
use std::sync::Arc;

use crate::tools::CairnTools;

/// Shared setup: create the embedding provider and open the engine.
pub async fn open_engine(config: &CairnConfig) -> Result<MemoryEngine> {
    let db_path = config.resolved_db_path();
    let provider = embedding::create_provider(&config.embedding, config.storage.dimension)?;
    let embedder: Arc<dyn embedding::EmbeddingProvider> = Arc::from(provider);
    tracing::info!(provider = %config.embedding.provider, "embedding provider ready");

    let engine = MemoryEngine::open(&db_path, EngineSettings::from_config(config), embedder).await?;
    tracing::info!(db = %db_path.display(), "database ready");
    Ok(engine)
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: CairnConfig) -> Result<()> {
    tracing::info!("starting Cairn MCP server on stdio");

    let engine = open_engine(&config).await?;
    let tools = CairnTools::new(engine.clone(), Arc::new(config));

    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    engine.close().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: CairnConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Cairn MCP server on HTTP");

    let engine = open_engine(&config).await?;
    let config = Arc::new(config);

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        {
            let engine = engine.clone();
            move || Ok(CairnTools::new(engine.clone(), config.clone()))
        },
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    engine.close().await?;
    Ok(())
}
