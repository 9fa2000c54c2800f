use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

use turnstile_gate::config::GateConfig;
use turnstile_gate::gate::GateMiddleware;
use turnstile_gate::handlers;
use turnstile_gate::logging;
use turnstile_gate::turnstile::{TurnstileClient, Verifier};

const APP_NAME: &str = "turnstile-gate";

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Refuse to start without the Turnstile keys
    let config = GateConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    logging::init_from_config(APP_NAME, &config).map_err(io::Error::other)?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        brand = config.brand.key,
        cookie_domain = ?config.cookies.domain,
        upstream = ?config.upstream,
        "Starting Turnstile gate"
    );
    if !config.cookies.secure {
        tracing::warn!("Cookies are issued without the Secure flag");
    }

    let bind_addr = config.bind_addr.clone();
    let workers = config.workers;
    let config = web::Data::new(config);

    HttpServer::new(move || {
        // awc clients are per worker
        let verifier: Arc<dyn Verifier> = Arc::new(TurnstileClient::new(&config.turnstile));
        App::new()
            .wrap(GateMiddleware::new())
            .wrap(TracingLogger::default())
            .app_data(config.clone())
            .app_data(web::Data::from(verifier))
            .configure(handlers::routes(config.static_dir.clone()))
    })
    .bind(bind_addr)?
    .client_request_timeout(Duration::from_secs(60))
    .workers(workers)
    .run()
    .await
}
