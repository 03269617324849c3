mod config;
mod error;
mod handlers;
mod models;
mod services;
#[cfg(feature = "http-server")]
mod server; // HTTP API (structured estimate, playground, health)

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::AppConfig;
use services::{GeminiService, TextGenerator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("🚀 Starting Calorie Estimate Service...");

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("❌ Configuration error: {}", e);
        e
    })?;

    let gemini: Arc<dyn TextGenerator> = Arc::new(GeminiService::new(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
    ));
    log::info!("✅ Gemini service initialized with model: {}", config.model);

    #[cfg(feature = "http-server")]
    {
        let app = server::create_router(gemini);

        let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;
        log::info!("🌐 HTTP server listening on {}", config.bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                log::info!("🛑 Shutting down...");
            })
            .await?;
    }

    #[cfg(not(feature = "http-server"))]
    {
        let meal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
        let estimator = handlers::StructuredEstimator::new(gemini);
        let estimate = estimator.estimate(&meal).await?;
        println!("{}", serde_json::to_string_pretty(&estimate)?);
    }

    Ok(())
}
