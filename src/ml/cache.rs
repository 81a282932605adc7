//! City-keyed model cache
//!
//! The cache owns every model it hands out. A model is built at most once per
//! city (until invalidated): concurrent first requests for the same city wait
//! on that city's slot while one of them trains, while other cities proceed
//! independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::error::PredictionError;

/// A city-keyed source of models (trained on demand, or loaded from storage).
pub trait ModelProvider<M>: Send + Sync {
    /// Build or load the model for `city`.
    fn provide(&self, city: &str) -> Result<M, PredictionError>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

impl<M, P: ModelProvider<M> + ?Sized> ModelProvider<M> for Box<P> {
    fn provide(&self, city: &str) -> Result<M, PredictionError> {
        (**self).provide(city)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

type Slot<M> = Arc<Mutex<Option<Arc<M>>>>;

/// Memoizes one model per city for the life of the cache.
///
/// Entries are keyed by city name only; a dataset change is not observed
/// until the entry is invalidated.
pub struct ModelCache<M> {
    provider: Box<dyn ModelProvider<M>>,
    slots: Mutex<HashMap<String, Slot<M>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Whether `slot` holds a model, without waiting on a build in progress.
fn is_filled<M>(slot: &Slot<M>) -> bool {
    match slot.try_lock() {
        Ok(entry) => entry.is_some(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
        Err(TryLockError::WouldBlock) => false,
    }
}

impl<M> ModelCache<M> {
    pub fn new(provider: impl ModelProvider<M> + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached model for `city`, building it on a miss.
    ///
    /// Failures are not cached, so a later call retries.
    pub fn get_or_train(&self, city: &str) -> Result<Arc<M>, PredictionError> {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(city.to_string()).or_default())
        };

        // Held across training: serializes check-train-store for this city only.
        let mut entry = lock(&slot);
        if let Some(model) = entry.as_ref() {
            tracing::debug!("Model cache hit for {}", city);
            return Ok(Arc::clone(model));
        }

        tracing::info!("Building model for {} via {}", city, self.provider.name());
        match self.provider.provide(city) {
            Ok(model) => {
                let model = Arc::new(model);
                *entry = Some(Arc::clone(&model));
                Ok(model)
            }
            Err(e) => {
                match &e {
                    PredictionError::InsufficientData { .. } => {
                        tracing::warn!("Not caching model for {}: {}", city, e)
                    }
                    _ => tracing::error!("Failed to build model for {}: {}", city, e),
                }
                Err(e)
            }
        }
    }

    /// The cached model for `city`, without building one.
    pub fn cached(&self, city: &str) -> Option<Arc<M>> {
        let slot = lock(&self.slots).get(city).cloned()?;
        let entry = lock(&slot);
        entry.clone()
    }

    /// Drop the cached model for `city`. Returns whether one was cached.
    pub fn invalidate(&self, city: &str) -> bool {
        let Some(slot) = lock(&self.slots).remove(city) else {
            return false;
        };
        let was_cached = lock(&slot).is_some();
        if was_cached {
            tracing::info!("Invalidated cached model for {}", city);
        }
        was_cached
    }

    /// Drop every cached model.
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    /// Number of cities with a cached model.
    pub fn len(&self) -> usize {
        self.cached_cities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cities with a cached model, sorted. A city still training counts as
    /// not cached, and the call never waits on it.
    pub fn cached_cities(&self) -> Vec<String> {
        // Snapshot the slots so the map lock is not held while probing them.
        let slots: Vec<(String, Slot<M>)> = lock(&self.slots)
            .iter()
            .map(|(city, slot)| (city.clone(), Arc::clone(slot)))
            .collect();

        let mut cities: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| is_filled(slot))
            .map(|(city, _)| city)
            .collect();
        cities.sort();
        cities
    }
}

impl<M> std::fmt::Debug for ModelCache<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("provider", &self.provider.name())
            .field("cached", &self.cached_cities())
            .finish()
    }
}
