use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use visits_service::config::Config;
use visits_service::handlers;
use visits_service::logging;
use visits_service::services::{FetchPipeline, MatomoClient, RabbitMqManager, VisitConsumer};

#[actix_web::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    tracing::info!("Starting visits-service");

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database pool created successfully");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations completed successfully");

    // Broker supervision: connects, re-asserts topology and reconnects for
    // the life of the process.
    let broker = Arc::new(RabbitMqManager::new(config.rabbitmq.clone()));
    tokio::spawn(Arc::clone(&broker).run());

    let matomo =
        MatomoClient::new(config.matomo.clone()).context("Failed to build Matomo client")?;
    let pipeline = FetchPipeline::new(
        matomo,
        db_pool.clone(),
        Arc::clone(&broker),
        config.pipeline.dedup_capacity,
    );
    tokio::spawn(pipeline.run());

    let consumer = VisitConsumer::new(Arc::clone(&broker));
    tokio::spawn(consumer.run());

    tracing::info!(
        "Starting HTTP server on {}:{}",
        config.app.host,
        config.app.http_port
    );

    let bind_addr = (config.app.host.clone(), config.app.http_port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(db_pool.clone()))
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(|| async { "READY" }))
            .configure(handlers::visits::configure)
    })
    .bind(bind_addr)
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")
}
