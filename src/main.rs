mod auth;
mod availability;
mod booking;
mod catalog;
mod clients;
mod config;
mod db;
mod deposit;
mod email;
mod error;
mod leads;
mod lifecycle;
mod messaging;
mod models;
mod payments;
mod profiles;
mod realtime;
mod routes;
mod state;
mod templates;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::{config::Config, email::Mailer, payments::PaystackClient, state::AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::from_env();
    db::ensure_sqlite_dir(&config.database_url)?;

    // Booking transactions write first, so concurrent bookers wait here for the lock.
    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;

    let mailer = Mailer::new(config.email.clone());
    if !mailer.enabled() {
        log::warn!("EMAIL_API_KEY or EMAIL_FROM not set. Emails will be skipped.");
    }

    let state = AppState {
        db: pool.clone(),
        events: realtime::channel(),
        gateway: Arc::new(PaystackClient::new(config.paystack.clone())),
        mailer,
        public_base_url: config.public_base_url.clone(),
    };

    let address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting Botglam on http://{address} (public URL {})", config.public_base_url);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
