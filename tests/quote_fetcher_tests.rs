mod common;

use std::sync::Arc;
use std::time::Duration;

use marketalerts::{
    error::ProviderError,
    models::AssetClass,
    services::quote_fetcher::{QuoteBatchFetcher, SymbolClassifier},
};

use common::{quote, FakeProvider};

fn fetcher(provider: Arc<FakeProvider>, timeout: Duration) -> QuoteBatchFetcher {
    QuoteBatchFetcher::new(provider, SymbolClassifier::default(), timeout)
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn classifies_by_crypto_prefix() {
    let c = SymbolClassifier::default();
    assert_eq!(c.classify("X:BTCUSD"), AssetClass::Crypto);
    assert_eq!(c.classify("x:ethusd"), AssetClass::Crypto);
    assert_eq!(c.classify("AAPL"), AssetClass::Equity);
    assert_eq!(c.classify("BRK.B"), AssetClass::Equity);
}

#[test]
fn partition_dedups_and_uppercases() {
    let c = SymbolClassifier::default();
    let parts = c.partition(&symbols(&["aapl", "AAPL", " msft ", "X:BTCUSD", ""]));

    assert_eq!(parts.len(), 2);
    assert_eq!(parts[&AssetClass::Equity], symbols(&["AAPL", "MSFT"]));
    assert_eq!(parts[&AssetClass::Crypto], symbols(&["X:BTCUSD"]));
}

#[tokio::test]
async fn at_most_one_call_per_asset_class() {
    let provider = Arc::new(FakeProvider::new());
    for s in ["AAPL", "MSFT", "TSLA", "NVDA", "X:BTCUSD", "X:ETHUSD"] {
        provider.set_quote(quote(s, 100.0, 1_000));
    }

    let f = fetcher(provider.clone(), Duration::from_secs(2));
    let quotes = f
        .fetch_quotes(&symbols(&["AAPL", "MSFT", "TSLA", "NVDA", "X:BTCUSD", "X:ETHUSD", "AAPL"]))
        .await;

    assert_eq!(quotes.len(), 6);
    assert_eq!(provider.call_count(), 2);

    let calls = provider.calls();
    let equity = calls.iter().find(|(c, _)| *c == AssetClass::Equity).unwrap();
    assert_eq!(equity.1, symbols(&["AAPL", "MSFT", "NVDA", "TSLA"]));
}

#[tokio::test]
async fn single_class_makes_single_call() {
    let provider = Arc::new(FakeProvider::new());
    provider.set_quote(quote("AAPL", 100.0, 1_000));

    let f = fetcher(provider.clone(), Duration::from_secs(2));
    f.fetch_quotes(&symbols(&["AAPL"])).await;

    assert_eq!(provider.call_count(), 1);
    assert_eq!(provider.calls()[0].0, AssetClass::Equity);
}

#[tokio::test]
async fn no_symbols_no_calls() {
    let provider = Arc::new(FakeProvider::new());
    let f = fetcher(provider.clone(), Duration::from_secs(2));

    assert!(f.fetch_quotes(&Vec::<String>::new()).await.is_empty());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn failed_class_does_not_affect_the_other() {
    let provider = Arc::new(FakeProvider::new());
    provider.set_quote(quote("AAPL", 100.0, 1_000));
    provider.set_quote(quote("X:BTCUSD", 60_000.0, 10));
    provider.fail(AssetClass::Crypto);

    let f = fetcher(provider.clone(), Duration::from_secs(2));
    let mut batches = f.start(&symbols(&["AAPL", "X:BTCUSD"]));

    let mut seen = Vec::new();
    while let Some(batch) = batches.next().await {
        match batch.asset_class {
            AssetClass::Equity => assert!(batch.quotes.as_ref().unwrap().contains_key("AAPL")),
            AssetClass::Crypto => assert!(matches!(batch.quotes, Err(ProviderError::Status { .. }))),
        }
        seen.push(batch.asset_class);
    }
    assert_eq!(seen.len(), 2);

    let merged = f.fetch_quotes(&symbols(&["AAPL", "X:BTCUSD"])).await;
    assert!(merged.contains_key("AAPL"));
    assert!(!merged.contains_key("X:BTCUSD"));
}

#[tokio::test]
async fn missing_symbol_is_simply_absent() {
    let provider = Arc::new(FakeProvider::new());
    provider.set_quote(quote("AAPL", 100.0, 1_000));

    let f = fetcher(provider.clone(), Duration::from_secs(2));
    let quotes = f.fetch_quotes(&symbols(&["AAPL", "ZZZZ"])).await;

    assert!(quotes.contains_key("AAPL"));
    assert!(!quotes.contains_key("ZZZZ"));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let provider = Arc::new(FakeProvider::with_delay(Duration::from_secs(5)));
    provider.set_quote(quote("AAPL", 100.0, 1_000));

    let f = fetcher(provider.clone(), Duration::from_millis(50));
    let mut batches = f.start(&symbols(&["AAPL"]));

    let batch = batches.next().await.unwrap();
    assert!(matches!(batch.quotes, Err(ProviderError::Timeout { .. })));
    assert!(batches.next().await.is_none());
}
