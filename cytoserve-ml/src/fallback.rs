//! Fallback model: a deterministic stand-in installed when no loading
//! strategy produced a real network.
//!
//! The output is derived from coarse image statistics through a seeded PRNG.
//! It is a valid probability distribution and is stable for identical
//! inputs, but carries no predictive meaning; it always reports degraded.

use candle_core::{DType, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::MlError;
use crate::model::{Classifier, InputShape};

/// Additive margin given to the seed-selected class before renormalizing.
pub const BOOST_MARGIN: f64 = 0.5;

/// Deterministic pseudo-classifier.
#[derive(Debug, Clone)]
pub struct FallbackClassifier {
    num_classes: usize,
    input: InputShape,
}

impl FallbackClassifier {
    pub fn new(num_classes: usize, input: InputShape) -> Self {
        Self {
            num_classes: num_classes.max(1),
            input,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Scores for an `[H, W, C]` image stored row-major.
    pub fn scores(&self, pixels: &[f32], shape: InputShape) -> Vec<f32> {
        let seed = seed_from_features(&region_features(pixels, shape));
        let mut rng = StdRng::seed_from_u64(seed);
        let mut raw: Vec<f64> = (0..self.num_classes).map(|_| rng.r#gen::<f64>()).collect();
        raw[(seed % self.num_classes as u64) as usize] += BOOST_MARGIN;
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|v| (v / total) as f32).collect()
    }
}

impl Classifier for FallbackClassifier {
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>, MlError> {
        let expected = self.input.batch_dims();
        if input.dims() != expected.as_slice() {
            return Err(MlError::ShapeMismatch {
                expected,
                actual: input.dims().to_vec(),
            });
        }
        let pixels = input.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(self.scores(&pixels, self.input))
    }

    fn input_shape(&self) -> InputShape {
        self.input
    }

    fn is_degraded(&self) -> bool {
        true
    }
}

/// Row and column bounds `(r0, r1, c0, c1)` of the five regions: the four
/// quadrants, then a centered window of half the height and width.
fn regions(h: usize, w: usize) -> [(usize, usize, usize, usize); 5] {
    let (mh, mw) = (h / 2, w / 2);
    let (qh, qw) = (h / 4, w / 4);
    [
        (0, mh, 0, mw),
        (0, mh, mw, w),
        (mh, h, 0, mw),
        (mh, h, mw, w),
        (qh, qh + mh, qw, qw + mw),
    ]
}

/// Per-channel means followed by the overall standard deviation, for each
/// region in order.
pub fn region_features(pixels: &[f32], shape: InputShape) -> Vec<f64> {
    let InputShape {
        height: h,
        width: w,
        channels: c,
    } = shape;
    let mut features = Vec::with_capacity(5 * (c + 1));

    for (r0, r1, c0, c1) in regions(h, w) {
        let mut sums = vec![0.0f64; c];
        let mut all_sum = 0.0f64;
        let mut all_sq = 0.0f64;
        let mut count = 0usize;
        for row in r0..r1 {
            for col in c0..c1 {
                let base = (row * w + col) * c;
                for ch in 0..c {
                    let v = pixels.get(base + ch).copied().unwrap_or(0.0) as f64;
                    sums[ch] += v;
                    all_sum += v;
                    all_sq += v * v;
                }
                count += 1;
            }
        }
        if count == 0 {
            features.extend(std::iter::repeat_n(0.0, c + 1));
            continue;
        }
        let n = count as f64;
        features.extend(sums.iter().map(|s| s / n));
        let values = n * c as f64;
        let mean = all_sum / values;
        let variance = (all_sq / values - mean * mean).max(0.0);
        features.push(variance.sqrt());
    }
    features
}

/// Collapse features to the PRNG seed: `|sum * 1000|`, truncated.
pub fn seed_from_features(features: &[f64]) -> u64 {
    let scalar: f64 = features.iter().sum();
    let scaled = (scalar * 1000.0).abs();
    if scaled.is_finite() { scaled as u64 } else { 0 }
}
