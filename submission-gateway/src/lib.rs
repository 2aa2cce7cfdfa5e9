pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics_defs;
pub mod record_store;
mod service;

use crate::config::Config;
use crate::errors::SubmissionGatewayError;
use crate::gateway::Gateway;
use crate::record_store::{AirtableClient, RecordStore};
use crate::service::GatewayService;
use dedup_cache::DedupCache;
use http::HeaderValue;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

pub async fn run(config: Config) -> Result<(), SubmissionGatewayError> {
    config.validate()?;

    let allowed_origin = HeaderValue::from_str(&config.allowed_origin)?;
    let cache = Arc::new(DedupCache::from_config(&config.dedup)?);
    if !cache.has_durable_tier() {
        tracing::warn!("No durable dedup store configured, deduplication is per process");
    }

    let record_store: Option<Arc<dyn RecordStore>> = match config.airtable.credentials() {
        Some(credentials) => Some(Arc::new(AirtableClient::new(
            &config.airtable,
            &credentials,
        )?)),
        None => {
            tracing::error!("Airtable credentials are not configured, submissions will fail");
            None
        }
    };

    let gateway = Arc::new(Gateway::new(cache, record_store, allowed_origin));
    let ready_gateway = gateway.clone();

    let gateway_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        GatewayService::new(gateway),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, SubmissionGatewayError>::new(move || ready_gateway.is_ready()),
    );

    tokio::try_join!(gateway_task, admin_task)?;
    Ok(())
}
