use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use screening_api::{config::Config, configure, AppState};
use screening_core::{SearchOrchestrator, SystemClock};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("screening_api=info,screening_core=info,actix_web=info")
    });
    if config.server.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Sanctions Screening API...");
    if config.screening.storage.is_none() {
        warn!("Object storage not configured, evidence is kept in memory only");
    }
    if config.screening.summarizer.usable_api_key().is_none() {
        info!("No summarizer API key, narratives use the template");
    }

    let clock = Arc::new(SystemClock);
    let orchestrator = match SearchOrchestrator::from_config(&config.screening, clock) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            error!("Failed to initialize screening components: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    // Load the consolidated list before taking traffic; a failure leaves the first search to retry
    match orchestrator.list_cache().warm_start().await {
        Ok(snapshot) => info!(
            "Consolidated list ready: {} records fetched at {}",
            snapshot.entries, snapshot.fetched_at
        ),
        Err(e) => warn!("Consolidated list warm start failed: {}", e),
    }

    let state = AppState { orchestrator };
    let bind_address = config.bind_address();
    info!("Starting HTTP server on {}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}
