//! Model registry: at most one resident model per artifact path.
//!
//! Concurrent loads of one path join a single in-flight attempt: the strategy
//! chain runs once and every caller that joined sees its outcome, success or
//! failure. Callers arriving after the attempt finished start a fresh one
//! unless the model is now resident. Distinct paths load in parallel.
//! Residency is bounded by `max_models` with least-recently-used eviction.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::MlError;
use crate::model::LoadedModel;

type LoadResult = Result<Arc<LoadedModel>, Arc<MlError>>;

/// One load attempt shared by every caller that joined it.
type InFlight = Arc<OnceCell<LoadResult>>;

struct Entry {
    model: Arc<LoadedModel>,
    /// Nanoseconds since the registry epoch; bumped under a read lock.
    last_used: AtomicU64,
}

#[derive(Default)]
struct State {
    models: HashMap<PathBuf, Entry>,
    active: Option<PathBuf>,
}

/// Process-wide cache of loaded models.
pub struct ModelRegistry {
    max_models: usize,
    epoch: Instant,
    state: RwLock<State>,
    in_flight: Mutex<HashMap<PathBuf, InFlight>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("max_models", &self.max_models)
            .finish_non_exhaustive()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Canonical registry key for an artifact path.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl ModelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            max_models: config.max_models.max(1),
            epoch: Instant::now(),
            state: RwLock::new(State::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn touch(&self, entry: &Entry) -> Arc<LoadedModel> {
        entry.last_used.fetch_max(self.now(), Ordering::Relaxed);
        entry.model.clone()
    }

    /// Return the cached model for `path`, or run `load` once among
    /// concurrent callers and cache its success.
    ///
    /// The boolean is `true` when this caller did not run `load` itself.
    /// Callers that joined a failing attempt receive the same error. Failures
    /// are not cached; the next call after the attempt settles retries.
    pub async fn load_with<F, Fut>(
        &self,
        path: &Path,
        load: F,
    ) -> Result<(Arc<LoadedModel>, bool), MlError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<LoadedModel, MlError>>,
    {
        let key = normalize_path(path);
        if let Some(model) = self.hit(&key).await {
            return Ok((model, true));
        }

        let flight: InFlight = {
            let mut flights = self.in_flight.lock().await;
            // Attempts abandoned by cancelled callers hold no other reference.
            flights.retain(|_, f| Arc::strong_count(f) > 1);
            flights.entry(key.clone()).or_default().clone()
        };

        let ran = AtomicBool::new(false);
        let result = {
            let (ran, key) = (&ran, &key);
            flight
                .get_or_init(|| async move {
                    // A previous attempt may have settled between the cache
                    // check and joining this one.
                    if let Some(model) = self.hit(key).await {
                        return Ok(model);
                    }
                    ran.store(true, Ordering::Relaxed);
                    match load(key.clone()).await {
                        Ok(model) => {
                            let model = Arc::new(model);
                            self.insert(key.clone(), model.clone()).await;
                            Ok(model)
                        }
                        Err(e) => Err(Arc::new(e)),
                    }
                })
                .await
                .clone()
        };

        {
            let mut flights = self.in_flight.lock().await;
            if flights.get(&key).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
                flights.remove(&key);
            }
        }

        let ran = ran.into_inner();
        match result {
            Ok(model) => {
                if !ran {
                    debug!(path = %key.display(), "Load joined an in-flight attempt");
                }
                Ok((model, !ran))
            }
            Err(e) => Err(e.duplicate()),
        }
    }

    /// Cached lookup that also makes `key` the active model.
    async fn hit(&self, key: &Path) -> Option<Arc<LoadedModel>> {
        let mut state = self.state.write().await;
        let model = self.touch(state.models.get(key)?);
        state.active = Some(key.to_path_buf());
        Some(model)
    }

    async fn insert(&self, key: PathBuf, model: Arc<LoadedModel>) {
        let mut state = self.state.write().await;
        while state.models.len() >= self.max_models && !state.models.contains_key(&key) {
            let Some(oldest) = state
                .models
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(p, _)| p.clone())
            else {
                break;
            };
            state.models.remove(&oldest);
            info!(path = %oldest.display(), "Evicted least recently used model");
        }
        state.models.insert(
            key.clone(),
            Entry {
                model,
                last_used: AtomicU64::new(self.now()),
            },
        );
        state.active = Some(key);
    }

    /// The model for `path`, if resident.
    pub async fn get(&self, path: &Path) -> Option<Arc<LoadedModel>> {
        let key = normalize_path(path);
        let state = self.state.read().await;
        Some(self.touch(state.models.get(&key)?))
    }

    /// The most recently loaded model.
    pub async fn active(&self) -> Option<Arc<LoadedModel>> {
        let state = self.state.read().await;
        let key = state.active.as_ref()?;
        Some(self.touch(state.models.get(key)?))
    }

    /// Number of load attempts currently in flight.
    pub async fn pending_loads(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn active_path(&self) -> Option<PathBuf> {
        self.state.read().await.active.clone()
    }

    pub async fn is_loaded(&self, path: &Path) -> bool {
        let key = normalize_path(path);
        self.state.read().await.models.contains_key(&key)
    }

    /// Drop a resident model. Returns whether one was removed.
    pub async fn unload(&self, path: &Path) -> bool {
        let key = normalize_path(path);
        let mut state = self.state.write().await;
        let removed = state.models.remove(&key).is_some();
        if removed && state.active.as_deref() == Some(key.as_path()) {
            state.active = None;
        }
        if removed {
            info!(path = %key.display(), "Model unloaded");
        }
        removed
    }

    /// Resident paths, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.read().await.models.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.models.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.models.is_empty()
    }

    pub fn max_models(&self) -> usize {
        self.max_models
    }
}
