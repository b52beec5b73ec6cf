use std::{net::SocketAddr, sync::Arc};

use mongodb::Client;
use tracing_subscriber::EnvFilter;

use marketalerts::{
    config::{self, StoreBackend},
    routes,
    services::{
        alert_monitor::spawn_alert_scheduler,
        alert_processor::AlertProcessor,
        dispatcher::NotificationDispatcher,
        email::HttpEmailTransport,
        memory_store::MemoryStore,
        mongo_store::MongoStore,
        polygon::PolygonClient,
        quote_fetcher::{QuoteBatchFetcher, SymbolClassifier},
        store::Store,
    },
    AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = config::load();

    let store: Arc<dyn Store> = match settings.store_backend {
        StoreBackend::Mongo => {
            let client = Client::with_uri_str(&settings.mongodb_uri)
                .await
                .expect("Failed to connect to MongoDB");
            let mongo = MongoStore::new(client.database(&settings.mongodb_db));
            if let Err(e) = mongo.ensure_indexes().await {
                tracing::warn!(error = %e, "could not ensure indexes");
            }
            Arc::new(mongo)
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let (events_tx, _events_rx) = tokio::sync::broadcast::channel::<String>(100);

    let provider = Arc::new(PolygonClient::new(
        settings.polygon_api_key.clone(),
        settings.polygon_base_url.clone(),
        settings.provider_timeout,
    ));
    let fetcher = QuoteBatchFetcher::new(
        provider,
        SymbolClassifier::new(settings.crypto_symbol_prefix.clone()),
        settings.provider_timeout,
    );
    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&store),
        Arc::new(HttpEmailTransport::from_settings(&settings)),
        settings.email_timeout,
        settings.frontend_url.clone(),
    )
    .with_events(events_tx.clone());

    let processor = AlertProcessor::new(Arc::clone(&store), fetcher, dispatcher, settings.alert_workers)
        .with_events(events_tx.clone());
    spawn_alert_scheduler(Arc::new(processor), settings.alert_interval);

    let state = AppState {
        store,
        settings: settings.clone(),
        events_tx,
    };

    let app = routes::app(state);

    let ip = settings
        .host
        .parse::<std::net::IpAddr>()
        .expect("HOST must be an IP address");
    let addr = SocketAddr::from((ip, settings.port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind listener");
    axum::serve(listener, app).await.expect("server error");
}
