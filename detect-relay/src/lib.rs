pub mod config;
mod dispatcher;
pub mod errors;
mod extractor;
pub mod metrics_defs;
mod normalizer;
mod params;
pub mod probe;
pub mod relay;
mod service;
mod temp_files;

#[cfg(test)]
mod testutils;

pub use errors::RelayError;

use service::RelayService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;

pub async fn run(config: config::Config) -> Result<(), RelayError> {
    config.validate()?;

    let client = reqwest::Client::builder().build()?;
    let relay = relay::Relay::new(&config, client)?;

    tracing::info!(
        route = %config.route_path,
        upstream = %config.upstream.base_url,
        readiness = config.readiness.enabled,
        "starting detect relay"
    );

    let relay_service = RelayService::new(relay, &config.route_path);
    let relay_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        relay_service,
    );

    match &config.admin_listener {
        Some(admin) => {
            // Both listeners live and die together, so serving at all means ready
            let admin_task = run_http_service(
                &admin.host,
                admin.port,
                AdminService::<_, RelayError>::new(|| true),
            );
            tokio::try_join!(relay_task, admin_task)?;
        }
        None => relay_task.await?,
    }

    Ok(())
}
