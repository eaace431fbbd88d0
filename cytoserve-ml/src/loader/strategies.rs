//! The four loading strategies, in chain order.
//!
//! Strategies never raise: every failure is a [`StrategyOutcome::Failed`]
//! carrying the reason, which only advances the chain.

use std::sync::Arc;
use tracing::{debug, info};

use super::{LoadContext, LoadStrategy, StrategyOutcome};
use crate::artifact::has_container_marker;
use crate::fallback::FallbackClassifier;
use crate::model::InputShape;
use crate::runtime::{Architecture, BindPolicy, template};
use crate::sanitize::sanitize;

/// Parse the embedded description as-is and bind every tensor strictly.
#[derive(Debug, Default)]
pub struct DirectStrategy;

impl LoadStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn attempt(&self, ctx: &LoadContext) -> StrategyOutcome {
        let artifact = match ctx.artifact() {
            Ok(artifact) => artifact,
            Err(reason) => return StrategyOutcome::Failed(reason.to_string()),
        };
        let Some(description) = &artifact.inspection.description else {
            return StrategyOutcome::Failed("artifact has no architecture description".into());
        };

        let result = Architecture::from_description(description).and_then(|arch| {
            let mut net = arch.build()?;
            let report = net.bind(&artifact.weights, BindPolicy::Strict)?;
            Ok((net, report))
        });
        match result {
            Ok((net, report)) => StrategyOutcome::loaded(Arc::new(net), Some(report)),
            Err(e) => StrategyOutcome::Failed(e.to_string()),
        }
    }
}

/// Sanitize the description, then bind whatever matches by name and shape.
#[derive(Debug, Default)]
pub struct SanitizedStrategy;

impl LoadStrategy for SanitizedStrategy {
    fn name(&self) -> &'static str {
        "sanitized"
    }

    fn attempt(&self, ctx: &LoadContext) -> StrategyOutcome {
        let artifact = match ctx.artifact() {
            Ok(artifact) => artifact,
            Err(reason) => return StrategyOutcome::Failed(reason.to_string()),
        };
        let Some(description) = &artifact.inspection.description else {
            return StrategyOutcome::Failed("artifact has no architecture description".into());
        };

        let (clean, edits) = sanitize(description);
        debug!(edits = edits.len(), "Sanitized description");

        let result = Architecture::from_description(&clean).and_then(|arch| {
            let mut net = arch.build()?;
            let report = net.bind(&artifact.weights, BindPolicy::SkipMismatch)?;
            Ok((net, report))
        });
        match result {
            Ok((_, report)) if report.bound == 0 => StrategyOutcome::Failed(format!(
                "no tensors bound ({} expected, {} missing, {} mismatched)",
                report.expected,
                report.missing.len(),
                report.mismatched.len()
            )),
            Ok((net, report)) => {
                info!(
                    bound = report.bound,
                    expected = report.expected,
                    "Sanitized description bound {}/{} tensors",
                    report.bound,
                    report.expected
                );
                StrategyOutcome::loaded(Arc::new(net), Some(report))
            }
            Err(e) => StrategyOutcome::Failed(e.to_string()),
        }
    }
}

/// Rebuild a fixed CNN sized for the class count and try candidate input
/// resolutions until one binds without shape mismatches.
#[derive(Debug, Default)]
pub struct TemplateStrategy;

impl LoadStrategy for TemplateStrategy {
    fn name(&self) -> &'static str {
        "template"
    }

    fn attempt(&self, ctx: &LoadContext) -> StrategyOutcome {
        let artifact = match ctx.artifact() {
            Ok(artifact) => artifact,
            Err(reason) => return StrategyOutcome::Failed(reason.to_string()),
        };
        if artifact.weights.is_empty() {
            return StrategyOutcome::Failed("artifact holds no readable tensors".into());
        }

        let mut rejected = Vec::new();
        for &resolution in &ctx.config.template_resolutions {
            let arch = template(ctx.num_classes, resolution);
            let params = match arch.expected_params() {
                Ok(params) => params,
                Err(e) => {
                    rejected.push(format!("{resolution}: {e}"));
                    continue;
                }
            };

            // Shape-check against the stored tensors before allocating anything.
            let mut matched = 0;
            let mut mismatched = 0;
            for (name, shape) in &params {
                match artifact.weights.get(name) {
                    Some(stored) if stored.dims() == shape.as_slice() => matched += 1,
                    Some(_) => mismatched += 1,
                    None => {}
                }
            }
            if matched == 0 || mismatched > 0 {
                rejected.push(format!("{resolution}: {matched} matched, {mismatched} mismatched"));
                continue;
            }

            let result = arch.build().and_then(|mut net| {
                let report = net.bind(&artifact.weights, BindPolicy::SkipMismatch)?;
                Ok((net, report))
            });
            match result {
                Ok((net, report)) => {
                    info!(resolution, bound = report.bound, "Template resolution accepted");
                    return StrategyOutcome::loaded(Arc::new(net), Some(report));
                }
                Err(e) => rejected.push(format!("{resolution}: {e}")),
            }
        }

        StrategyOutcome::Failed(format!(
            "no candidate resolution fits the stored weights [{}]",
            rejected.join("; ")
        ))
    }
}

/// Confirm the file is a weight container at all and serve the fallback
/// model from it.
#[derive(Debug, Default)]
pub struct InspectionOnlyStrategy;

impl LoadStrategy for InspectionOnlyStrategy {
    fn name(&self) -> &'static str {
        "inspection_only"
    }

    fn attempt(&self, ctx: &LoadContext) -> StrategyOutcome {
        match has_container_marker(&ctx.path) {
            Ok(true) => StrategyOutcome::loaded(
                Arc::new(FallbackClassifier::new(
                    ctx.num_classes,
                    InputShape::square(ctx.config.fallback_resolution),
                )),
                None,
            ),
            Ok(false) => StrategyOutcome::Failed("no weight-table marker found".into()),
            Err(e) => StrategyOutcome::Failed(e.to_string()),
        }
    }
}

/// The default chain, in priority order.
pub fn default_chain() -> Vec<Arc<dyn LoadStrategy>> {
    vec![
        Arc::new(DirectStrategy),
        Arc::new(SanitizedStrategy),
        Arc::new(TemplateStrategy),
        Arc::new(InspectionOnlyStrategy),
    ]
}
