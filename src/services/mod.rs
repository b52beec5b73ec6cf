pub mod polygon;
pub mod quote_fetcher;

pub mod evaluator;
pub mod frequency;

pub mod store;
pub mod memory_store;
pub mod mongo_store;
pub mod trigger;

pub mod email;
pub mod dispatcher;

pub mod alert_processor;
pub mod alert_monitor;

pub mod alerts_service;
pub mod notifications_service;
