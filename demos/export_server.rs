//! REST API server demo
//!
//! Runs the export pipeline behind the REST API, mounted under `/api/v1`.
//!
//! ```text
//! cargo run --example export_server -- [config.json]
//! ```
//!
//! The upstream image API can also be set with `GALLERY_EXPORT_UPSTREAM`.
//! Log verbosity follows `RUST_LOG` (default: `info`).
//!
//! After starting, you can:
//! - View Swagger UI at http://localhost:6790/swagger-ui
//! - Start an export via POST http://localhost:6790/api/v1/exports
//! - Poll status via GET http://localhost:6790/api/v1/exports/{task_id}
//! - Download via GET http://localhost:6790/api/v1/export/{task_id}

use axum::Router;
use gallery_export::api::create_router;
use gallery_export::{Config, Exporter, run_with_shutdown};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str::<Config>(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    if let Ok(upstream) = std::env::var("GALLERY_EXPORT_UPSTREAM") {
        config.upstream.base_url = upstream;
    }

    let exporter = Exporter::new(config.clone()).await?;
    let cleanup = exporter.start_cleanup_service();

    let bind_address = config.api.bind_address;
    let app = Router::new().nest(
        "/api/v1",
        create_router(Arc::new(exporter.clone()), Arc::new(config)),
    );
    let listener = TcpListener::bind(bind_address).await?;

    println!("Starting gallery-export REST API server");
    println!("Swagger UI: http://{}/api/v1/swagger-ui", bind_address);
    println!("API Base:   http://{}/api/v1", bind_address);
    println!();
    println!("Example commands:");
    println!("  # Start an export and follow its progress");
    println!("  curl -N -X POST http://{}/api/v1/exports \\", bind_address);
    println!("    -H 'Content-Type: application/json' \\");
    println!(
        "    -d '{{\"credential\": \"sk-live-0123456789abcdef\", \"include_metadata\": true, \"include_thumbnails\": true}}'"
    );
    println!();
    println!("  # Download the archive once ready");
    println!("  curl -OJ http://{}/api/v1/export/<task_id>", bind_address);

    let server_exporter = exporter.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_exporter.wait_for_shutdown().await })
            .await
    });

    run_with_shutdown(exporter).await?;
    server.await??;
    cleanup.await?;

    Ok(())
}
