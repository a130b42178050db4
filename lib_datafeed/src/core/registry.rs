//! # Provider Registry
//!
//! Provider instances keyed by logical connection ID, in an explicit map
//! owned by whoever creates the registry. Consumers `acquire` a provider and
//! `release` it when done; the last release starts a linger period, after
//! which the provider is disconnected and dropped. Acquiring again during the
//! linger period cancels the teardown.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::configs::ProviderConfig;
use crate::core::statistics::Statistics;
use crate::errors::{ProviderError, Result};
use crate::providers::{DataProvider, build_provider};

/// A provider shared between the registry and its consumers.
pub type SharedProvider = Arc<tokio::sync::Mutex<Box<dyn DataProvider>>>;

struct Entry {
    provider: SharedProvider,
    stats: watch::Receiver<Statistics>,
    refs: u32,
    linger: CancellationToken,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

pub struct ProviderRegistry {
    entries: Entries,
    linger: Duration,
}

impl ProviderRegistry {
    pub fn new(linger: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            linger,
        }
    }

    /// Adds `provider` under `id` with no references. A provider previously
    /// registered under the same ID is returned so the caller can disconnect it.
    pub fn register(&self, id: &str, provider: Box<dyn DataProvider>) -> Option<SharedProvider> {
        let stats = provider.watch_statistics();
        let entry = Entry {
            provider: Arc::new(tokio::sync::Mutex::new(provider)),
            stats,
            refs: 0,
            linger: CancellationToken::new(),
        };
        let previous = lock(&self.entries).insert(id.to_string(), entry);
        debug!(id, replaced = previous.is_some(), "Provider registered");
        previous.map(|old| {
            old.linger.cancel();
            old.provider
        })
    }

    /// Builds the provider `config` selects and registers it under `id`.
    pub fn register_config(&self, id: &str, config: &ProviderConfig) -> Result<Option<SharedProvider>> {
        Ok(self.register(id, build_provider(config)?))
    }

    pub fn get(&self, id: &str) -> Option<SharedProvider> {
        lock(&self.entries).get(id).map(|entry| entry.provider.clone())
    }

    /// Takes a reference on `id`, cancelling a pending teardown.
    pub fn acquire(&self, id: &str) -> Result<SharedProvider> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))?;
        entry.refs += 1;
        if entry.refs == 1 {
            entry.linger.cancel();
            entry.linger = CancellationToken::new();
        }
        Ok(entry.provider.clone())
    }

    /// Drops a reference on `id`. The last one schedules teardown after the
    /// linger period.
    pub fn release(&self, id: &str) {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }

        let token = entry.linger.clone();
        let id = id.to_string();
        let shared = Arc::clone(&self.entries);
        let linger = self.linger;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%id, "No runtime for linger, dropping provider immediately");
            entries.remove(&id);
            return;
        };
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(%id, "Linger cancelled"),
                _ = tokio::time::sleep(linger) => {
                    let expired = {
                        let mut entries = lock(&shared);
                        let idle = entries
                            .get(&id)
                            .is_some_and(|entry| entry.refs == 0 && !entry.linger.is_cancelled());
                        if idle { entries.remove(&id) } else { None }
                    };
                    if let Some(entry) = expired {
                        info!(%id, "Linger expired, disconnecting provider");
                        entry.provider.lock().await.disconnect().await;
                    }
                }
            }
        });
    }

    /// Unregisters `id` and disconnects its provider.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = lock(&self.entries).remove(id);
        match removed {
            Some(entry) => {
                entry.linger.cancel();
                entry.provider.lock().await.disconnect().await;
                info!(id, "Provider removed");
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.entries).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn refs(&self, id: &str) -> Option<u32> {
        lock(&self.entries).get(id).map(|entry| entry.refs)
    }

    /// Current counters of every registered provider. Never waits on a
    /// provider that is busy fetching.
    pub fn statistics(&self) -> BTreeMap<String, Statistics> {
        lock(&self.entries)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.stats.borrow().clone()))
            .collect()
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}
