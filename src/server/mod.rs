/// HTTP API Server module for dbvault
/// Exposes the orchestration facade as REST endpoints

pub mod handlers;
pub mod routes;

pub use routes::create_router;

use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;

use crate::core::Orchestrator;

pub async fn run(orchestrator: Orchestrator, host: String, port: u16, enable_cors: bool) -> anyhow::Result<()> {
    let catalog = orchestrator.catalog_path().display().to_string();
    let output_dir = orchestrator.executor_options().output_dir.display().to_string();
    let app = create_router(orchestrator, enable_cors);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    println!("🚀 dbvault server");
    println!("   🔌 API:     http://{}/api", addr);
    println!("   📒 Catalog: {}", catalog);
    println!("   📦 Output:  {}", output_dir);
    println!();
    println!("📚 API Endpoints:");
    println!("   GET    /api/health               - Health check");
    println!("   GET    /api/targets              - List targets");
    println!("   POST   /api/targets              - Register target");
    println!("   GET    /api/targets/:id          - Show target");
    println!("   DELETE /api/targets/:id          - Remove target");
    println!("   POST   /api/targets/:id/backup   - Run backup");
    println!("   GET    /api/runs?target_id=N     - Backup history");
    println!("   POST   /adddb | GET /getdb | POST /backup (legacy)");
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, cors = enable_cors, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
