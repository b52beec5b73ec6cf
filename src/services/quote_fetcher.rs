//! Batched quote resolution: at most one upstream call per asset class per
//! pass, no matter how many rules point at a symbol.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::{
    error::ProviderError,
    models::{AssetClass, Quote},
};

use super::polygon::MarketDataProvider;

/// Decides which asset class a symbol belongs to.
#[derive(Debug, Clone)]
pub struct SymbolClassifier {
    crypto_prefix: String,
}

impl SymbolClassifier {
    pub fn new(crypto_prefix: impl Into<String>) -> Self {
        Self {
            crypto_prefix: crypto_prefix.into().to_uppercase(),
        }
    }

    pub fn classify(&self, symbol: &str) -> AssetClass {
        if !self.crypto_prefix.is_empty() && symbol.to_uppercase().starts_with(&self.crypto_prefix) {
            AssetClass::Crypto
        } else {
            AssetClass::Equity
        }
    }

    /// Splits symbols into per-class sorted lists; empty classes are left out.
    pub fn partition<'a, I>(&self, symbols: I) -> HashMap<AssetClass, Vec<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut sets: HashMap<AssetClass, BTreeSet<String>> = HashMap::new();
        for s in symbols {
            let sym = s.trim().to_uppercase();
            if sym.is_empty() {
                continue;
            }
            sets.entry(self.classify(&sym)).or_default().insert(sym);
        }
        sets.into_iter()
            .map(|(class, set)| (class, set.into_iter().collect()))
            .collect()
    }
}

impl Default for SymbolClassifier {
    fn default() -> Self {
        Self::new("X:")
    }
}

/// One asset class's batch result.
#[derive(Debug)]
pub struct QuoteBatch {
    pub asset_class: AssetClass,
    pub symbols: Vec<String>,
    pub quotes: Result<HashMap<String, Quote>, ProviderError>,
}

/// In-flight batch calls; [`QuoteBatches::next`] yields each class as soon
/// as its call finishes.
pub struct QuoteBatches {
    tasks: JoinSet<QuoteBatch>,
    pending: HashMap<tokio::task::Id, (AssetClass, Vec<String>)>,
}

impl QuoteBatches {
    pub async fn next(&mut self) -> Option<QuoteBatch> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(match joined {
            Ok((id, batch)) => {
                self.pending.remove(&id);
                batch
            }
            Err(e) => {
                let (asset_class, symbols) = self
                    .pending
                    .remove(&e.id())
                    .unwrap_or((AssetClass::Equity, Vec::new()));
                QuoteBatch {
                    asset_class,
                    symbols,
                    quotes: Err(ProviderError::Task {
                        asset_class: asset_class.as_str(),
                        reason: e.to_string(),
                    }),
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct QuoteBatchFetcher {
    provider: Arc<dyn MarketDataProvider>,
    classifier: SymbolClassifier,
    timeout: Duration,
}

impl QuoteBatchFetcher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        classifier: SymbolClassifier,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            classifier,
            timeout,
        }
    }

    pub fn classifier(&self) -> &SymbolClassifier {
        &self.classifier
    }

    /// Starts one upstream call per non-empty asset class and returns
    /// without waiting for them.
    pub fn start<'a, I>(&self, symbols: I) -> QuoteBatches
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for (asset_class, symbols) in self.classifier.partition(symbols) {
            let provider = Arc::clone(&self.provider);
            let timeout = self.timeout;
            let task_symbols = symbols.clone();

            let handle = tasks.spawn(async move {
                let call = provider.get_multiple_quotes(asset_class, &task_symbols);
                let quotes = match tokio::time::timeout(timeout, call).await {
                    Ok(res) => res,
                    Err(_) => Err(ProviderError::Timeout {
                        asset_class: asset_class.as_str(),
                        elapsed: timeout,
                    }),
                };
                QuoteBatch {
                    asset_class,
                    symbols: task_symbols,
                    quotes,
                }
            });
            pending.insert(handle.id(), (asset_class, symbols));
        }

        QuoteBatches { tasks, pending }
    }

    /// Resolves every symbol it can. A failed asset class is logged and
    /// contributes nothing; the other class is unaffected.
    pub async fn fetch_quotes<'a, I>(&self, symbols: I) -> HashMap<String, Quote>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut batches = self.start(symbols);
        let mut out = HashMap::new();

        while let Some(batch) = batches.next().await {
            match batch.quotes {
                Ok(quotes) => out.extend(quotes),
                Err(e) => tracing::warn!(
                    asset_class = batch.asset_class.as_str(),
                    symbols = batch.symbols.len(),
                    error = %e,
                    "quote batch failed"
                ),
            }
        }

        out
    }
}
