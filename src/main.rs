mod config;
mod handlers;
mod models;
mod services;
#[cfg(feature = "web-server")]
mod web; // Browser front-end + JSON/SSE API

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::Config;
use services::{AIService, GeminiClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables (RUST_LOG may come from .env)
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("🚀 Starting Nutri-Lens...");

    // Missing API key is fatal
    let config = Config::from_env()?;

    let gemini = GeminiClient::new(config.api_key.clone(), config.model.clone())
        .with_base_url(config.base_url.clone());
    log::info!("✅ Gemini client initialized with model: {}", gemini.model());
    let ai: Arc<dyn AIService> = Arc::new(gemini);

    #[cfg(feature = "web-server")]
    {
        let app = web::create_router(ai.clone());
        let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
        log::info!("🌐 Web server listening on http://{}", config.bind_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ Web server stopped: {}", e);
            }
        });
    }

    #[cfg(not(feature = "web-server"))]
    {
        let _ = &ai;
        log::warn!("⚠️ Built without the web-server feature; nothing to serve");
    }

    log::info!("🎉 Nutri-Lens is ready!");

    tokio::signal::ctrl_c().await?;
    log::info!("🛑 Shutting down...");

    Ok(())
}
