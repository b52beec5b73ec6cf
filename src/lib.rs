//! Library entrypoint for MarketAlerts.
//!
//! Integration tests under `tests/` import the app state, routers,
//! controllers and the alert engine from here.

pub mod config;
pub mod error;
pub mod models;

#[path = "middleware/auth.rs"]
pub mod auth;
pub mod events;

pub mod services;

pub mod controllers;
pub mod routes;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn services::store::Store>,
    pub settings: config::Settings,
    pub events_tx: tokio::sync::broadcast::Sender<String>,
}
