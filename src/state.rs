use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{email::Mailer, payments::PaymentGateway, realtime::ChangeEvent};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ChangeEvent>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub mailer: Mailer,
    /// Absolute origin for links in emails and gateway callbacks, no trailing slash.
    pub public_base_url: String,
}

impl AppState {
    pub fn link(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path.trim_start_matches('/'))
    }
}
