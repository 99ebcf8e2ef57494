//! # Bulwark API Server
//!
//! Hosts the rate limiter: builds the stores and services, runs scheduled
//! maintenance and serves the administration API.

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

#[cfg(feature = "scheduler")]
mod background;
mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env();

    tracing::info!(
        "Starting Bulwark API Server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::new(&config).await?;
    state.limiter.init().await;

    #[cfg(feature = "scheduler")]
    let mut scheduler = start_scheduler(&state).await;

    let server_state = state.clone();
    HttpServer::new(move || {
        let state = server_state.clone();
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, &state))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    #[cfg(feature = "scheduler")]
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler shutdown failed");
        }
    }

    state.limiter.shutdown().await;
    Ok(())
}

/// Maintenance is best-effort; a scheduler that fails to start is logged.
#[cfg(feature = "scheduler")]
async fn start_scheduler(state: &AppState) -> Option<background::scheduler::Scheduler> {
    use background::scheduler::{Scheduler, SchedulerConfig};

    let config = SchedulerConfig::from_env();
    if !config.enabled {
        tracing::info!("Scheduler disabled");
        return None;
    }

    let result = async {
        let scheduler = Scheduler::new(config).await?;
        scheduler
            .add_rate_limit_maintenance(state.limiter.clone())
            .await?;
        scheduler.start().await?;
        Ok::<_, tokio_cron_scheduler::JobSchedulerError>(scheduler)
    }
    .await;

    match result {
        Ok(scheduler) => Some(scheduler),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start scheduler");
            None
        }
    }
}
