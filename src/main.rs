mod config;
mod db;
mod error;
mod llm;
mod rate_limit;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{GraphConfig, TimelineConfig, WhatsAppConfig};
use crate::llm::LlmChat;
use crate::rate_limit::RateLimiter;
use crate::services::mailbox::MailboxClient;
use crate::services::summary::SummaryConfig;
use crate::services::whatsapp::WhatsAppClient;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| config::DEFAULT_PORT.to_string())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");

    // Optional integrations: a missing or broken config disables the feature.
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; AI summaries disabled");
            None
        }
    };

    let whatsapp = match WhatsAppConfig::from_env().map(WhatsAppClient::new) {
        Some(Ok(client)) => {
            tracing::info!(phone_number_id = %client.config().phone_number_id, "WhatsApp client initialized");
            Some(client)
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "WhatsApp client failed to build; WhatsApp disabled");
            None
        }
        None => {
            tracing::warn!("WHATSAPP_ACCESS_TOKEN/WHATSAPP_PHONE_NUMBER_ID not set; WhatsApp disabled");
            None
        }
    };

    let mailbox = match GraphConfig::from_env().map(MailboxClient::new) {
        Some(Ok(client)) => {
            tracing::info!(mailbox = %client.config().mailbox, "Graph mailbox initialized");
            Some(client)
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Graph client failed to build; mailbox disabled");
            None
        }
        None => {
            tracing::warn!("GRAPH_* not set; mailbox disabled");
            None
        }
    };

    let timeline = TimelineConfig::from_env();
    tracing::info!(batch_size = timeline.batch_size, page_size = timeline.page_size, "timeline config");

    let state = state::AppState::new(pool, timeline)
        .with_whatsapp(whatsapp)
        .with_mailbox(mailbox)
        .with_llm(llm)
        .with_summary(SummaryConfig::from_env(), RateLimiter::from_env());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "lexcrm listening");
    axum::serve(listener, app).await.expect("server failed");
}
