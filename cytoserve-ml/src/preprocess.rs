//! Image preprocessing: base64 payload → normalized `[1, H, W, C]` tensor.
//!
//! One canonical policy: center-crop to a square on the shorter side, then
//! resample to the model resolution with a Lanczos3 filter. Non-square
//! images are never stretched.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::MlError;
use crate::model::InputShape;

const DATA_URI_MARKER: &str = "base64,";

/// Turns request payloads into model-ready tensors.
#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Decode a base64 payload (optionally a data URI) into a tensor shaped
    /// for `shape`.
    pub fn prepare(&self, payload: &str, shape: InputShape) -> Result<Tensor, MlError> {
        let bytes = decode_payload(payload, self.config.max_payload_bytes)?;
        prepare_bytes(&bytes, shape)
    }
}

/// Strip any data-URI prefix and whitespace, then base64-decode.
pub fn decode_payload(payload: &str, max_bytes: usize) -> Result<Vec<u8>, MlError> {
    let data = match payload.find(DATA_URI_MARKER) {
        Some(pos) => &payload[pos + DATA_URI_MARKER.len()..],
        None => payload,
    };
    let data: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if data.is_empty() {
        return Err(MlError::image("empty image payload"));
    }
    if data.len() > max_bytes {
        return Err(MlError::image(format!(
            "payload of {} bytes exceeds the {max_bytes} byte limit",
            data.len()
        )));
    }

    STANDARD
        .decode(&data)
        .or_else(|_| STANDARD_NO_PAD.decode(&data))
        .or_else(|_| URL_SAFE.decode(&data))
        .or_else(|_| URL_SAFE_NO_PAD.decode(&data))
        .map_err(|e| MlError::image(format!("invalid base64: {e}")))
}

/// Decode image bytes and canonicalize them into a tensor for `shape`.
pub fn prepare_bytes(bytes: &[u8], shape: InputShape) -> Result<Tensor, MlError> {
    if shape.is_empty() {
        return Err(MlError::inference(format!("model declares an empty input shape {shape}")));
    }
    let decoded =
        image::load_from_memory(bytes).map_err(|e| MlError::image(format!("unreadable image: {e}")))?;
    let (w, h) = decoded.dimensions();
    debug!(width = w, height = h, target = %shape, "Decoded image");

    let square = center_crop(&decoded);
    let data: Vec<f32> = match shape.channels {
        1 => {
            let gray = square.to_luma8();
            let resized = imageops::resize(&gray, shape.width as u32, shape.height as u32, FilterType::Lanczos3);
            resized.into_raw().into_iter().map(|v| v as f32 / 255.0).collect()
        }
        3 => {
            let rgb = square.to_rgb8();
            let resized = imageops::resize(&rgb, shape.width as u32, shape.height as u32, FilterType::Lanczos3);
            resized.into_raw().into_iter().map(|v| v as f32 / 255.0).collect()
        }
        other => {
            return Err(MlError::inference(format!(
                "unsupported model input channel count {other}"
            )));
        }
    };

    Ok(Tensor::from_vec(data, shape.batch_dims(), &Device::Cpu)?)
}

/// Centered square crop on the shorter side.
fn center_crop(img: &DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w == h {
        return img.clone();
    }
    let side = w.min(h);
    let x = (w - side) / 2;
    let y = (h - side) / 2;
    img.crop_imm(x, y, side, side)
}
