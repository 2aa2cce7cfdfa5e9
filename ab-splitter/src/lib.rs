pub mod config;
pub mod errors;
pub mod metrics_defs;
mod service;
pub mod splitter;
pub mod variant;

use crate::config::Config;
use crate::errors::SplitterError;
use crate::service::SplitterService;
use crate::splitter::Splitter;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::time::Duration;

pub async fn run(config: Config) -> Result<(), SplitterError> {
    config.validate()?;

    tracing::info!(assets_url = %config.assets_url, "Forwarding to asset origin");
    let splitter = Splitter::new(
        config.assets_url.clone(),
        Duration::from_secs(config.timeout_secs),
    );

    let splitter_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        SplitterService::new(splitter),
    );
    // Stateless, so always ready once listening.
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, SplitterError>::new(|| true),
    );

    tokio::try_join!(splitter_task, admin_task)?;
    Ok(())
}
