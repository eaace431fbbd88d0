//! Concurrency behaviour of the classifier service.

mod common;

use common::*;
use cytoserve_core::{ClassifierService, ServiceError};
use cytoserve_ml::loader::{LoadContext, LoadStrategy, StrategyOutcome};
use cytoserve_ml::{FallbackClassifier, InputShape, MlConfig, MlError, ModelLoader};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Counts how often the chain actually runs.
#[derive(Debug)]
struct CountingStrategy {
    runs: Arc<AtomicUsize>,
}

impl LoadStrategy for CountingStrategy {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn attempt(&self, ctx: &LoadContext) -> StrategyOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        StrategyOutcome::loaded(
            Arc::new(FallbackClassifier::new(ctx.num_classes, InputShape::square(16))),
            None,
        )
    }
}

fn counting_service(runs: Arc<AtomicUsize>) -> Arc<ClassifierService> {
    let config = MlConfig::default();
    let loader = ModelLoader::new(config.loader.clone(), config.class_labels.len())
        .with_strategies(vec![Arc::new(CountingStrategy { runs })]);
    Arc::new(ClassifierService::new(config).unwrap().with_loader(loader))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_of_one_path_run_chain_once() {
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "shared.safetensors");
    let runs = Arc::new(AtomicUsize::new(0));
    let service = counting_service(runs.clone());

    let loads = (0..8).map(|_| {
        let service = service.clone();
        let path = path.clone();
        tokio::spawn(async move { service.load_model(&path).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(loads)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.cached).count(), 1);
    let first = &outcomes[0].model;
    assert!(outcomes.iter().all(|o| Arc::ptr_eq(&o.model, first)));
}

/// Outlives the loader timeout.
#[derive(Debug)]
struct StallingStrategy {
    runs: Arc<AtomicUsize>,
}

impl LoadStrategy for StallingStrategy {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn attempt(&self, _ctx: &LoadContext) -> StrategyOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(400));
        StrategyOutcome::Failed("too slow".into())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_share_one_timeout() {
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "stalls.safetensors");
    let runs = Arc::new(AtomicUsize::new(0));
    let config = MlConfig::default();
    let loader = ModelLoader::new(config.loader.clone(), config.class_labels.len())
        .with_strategies(vec![Arc::new(StallingStrategy { runs: runs.clone() })])
        .with_timeout(Duration::from_millis(100));
    let service = Arc::new(ClassifierService::new(config).unwrap().with_loader(loader));

    let loads = (0..4).map(|_| {
        let service = service.clone();
        let path = path.clone();
        tokio::spawn(async move { service.load_model(&path).await })
    });
    let outcomes = futures::future::join_all(loads).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    for joined in outcomes {
        let err = joined.unwrap().unwrap_err();
        assert!(matches!(err, ServiceError::Ml(MlError::LoadTimeout(_))));
    }
    assert!(service.registry().is_empty().await);
    assert_eq!(service.registry().pending_loads().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_predictions_share_one_model() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "cells.safetensors",
        &pooled_description(16, CLASSES, false),
        &pooled_weights(CLASSES),
        None,
    );
    let service = make_service(MlConfig::default());
    service.load_model(&path).await.unwrap();

    let image = png_base64(32, 24);
    let predictions = (0..16).map(|_| {
        let service = service.clone();
        let image = image.clone();
        tokio::spawn(async move { service.predict(image, None).await })
    });
    let results: Vec<_> = futures::future::join_all(predictions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let first = &results[0];
    for result in &results {
        assert_eq!(result.label, first.label);
        assert_eq!(result.probabilities, first.probabilities);
        assert!(!result.degraded);
    }
}

#[tokio::test]
async fn test_failed_load_is_retried() {
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "junk.safetensors");
    let mut config = MlConfig::default();
    config.loader.allow_degraded = false;
    let service = make_service(config);

    for _ in 0..2 {
        let err = service.load_model(&path).await.unwrap_err();
        assert!(matches!(err, ServiceError::Ml(MlError::UnsupportedSchema(_))));
    }
    assert!(service.registry().is_empty().await);
}

#[tokio::test]
async fn test_warm_start_loads_configured_model() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "startup.safetensors",
        &pooled_description(16, CLASSES, false),
        &pooled_weights(CLASSES),
        None,
    );
    let config = MlConfig {
        model_path: Some(path),
        ..Default::default()
    };
    let service = make_service(config);
    let outcome = service.warm_start().await.unwrap().unwrap();
    assert_eq!(outcome.model.strategy, "direct");
    assert!(service.status().await.loaded);
}

#[tokio::test]
async fn test_lru_eviction_through_service() {
    let dir = TempDir::new().unwrap();
    let mut config = MlConfig::default();
    config.registry.max_models = 1;
    let service = make_service(config);

    let a = write_garbage(dir.path(), "a.safetensors");
    let b = write_garbage(dir.path(), "b.safetensors");
    service.load_model(&a).await.unwrap();
    service.load_model(&b).await.unwrap();

    assert_eq!(service.registry().len().await, 1);
    assert!(!service.registry().is_loaded(&a).await);
    assert!(service.unload(&b).await);
    assert!(!service.status().await.loaded);
}
