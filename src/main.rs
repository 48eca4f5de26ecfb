use actix_web::{middleware::Logger, web, App, HttpServer};
use chatrelay::api::middleware::ApiKeyAuth;
use chatrelay::broadcast::Broadcaster;
use chatrelay::cli::{commands::{Cli, Commands}, run_cli};
use chatrelay::config::AppConfig;
use chatrelay::llm::UpstreamFactory;
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if !matches!(cli.command, Commands::Serve) {
        if let Err(e) = run_cli(cli.command, config).await {
            error!("{}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("Starting chatrelay server...");

    let upstream = match UpstreamFactory::create_default(&config) {
        Some(u) => u,
        None => {
            error!("Unknown upstream provider '{}'", config.upstream.provider);
            std::process::exit(1);
        }
    };

    let broadcaster = Broadcaster::create(
        config.broadcast.client_buffer,
        Duration::from_secs(config.broadcast.ping_interval_secs.max(1)),
    );

    let (host, port) = config.bind_address();
    if config.auth.enabled() {
        info!("Client authentication enabled ({} key(s))", config.auth.api_keys.len());
    }
    info!("Server listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(Arc::clone(&broadcaster)))
            .app_data(web::Data::new(upstream.clone()))
            .wrap(ApiKeyAuth)
            .wrap(Logger::default())
            .configure(chatrelay::api::routes::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
