//! Artifact inspection: read-only access to safetensors model containers.
//!
//! A container is an 8-byte little-endian header length, a JSON header that
//! describes every stored tensor, and the raw tensor bytes. The header's
//! `__metadata__` string map is the attribute slot that may carry an embedded
//! architecture description (`model_config`), the label order the artifact
//! was trained with (`class_labels`) and the producing tool (`producer`).
//!
//! Inspection never assumes which schema version wrote the description; it
//! only decodes it to JSON and leaves interpretation to the loader.

use candle_core::{DType, Device, Tensor};
use safetensors::tensor::{Metadata, TensorView};
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::MlError;

/// Metadata key holding the architecture description.
pub const MODEL_CONFIG_KEY: &str = "model_config";
/// Metadata key holding the training-time label order (JSON array).
pub const CLASS_LABELS_KEY: &str = "class_labels";
/// Metadata key naming the tool that wrote the artifact.
pub const PRODUCER_KEY: &str = "producer";

/// Dtype and shape of a stored tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: String,
    pub shape: Vec<usize>,
}

/// Normalized tensor name → spec, ordered by name.
pub type WeightInventory = BTreeMap<String, TensorSpec>;

/// Everything inspection learns about an artifact without reconstructing it.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInspection {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Decoded architecture description, if the slot exists and holds JSON.
    pub description: Option<serde_json::Value>,
    pub inventory: WeightInventory,
    /// Label order declared by the artifact itself.
    pub class_labels: Option<Vec<String>>,
    pub producer: Option<String>,
    /// Non-fatal oddities found while reading.
    pub warnings: Vec<String>,
}

impl ArtifactInspection {
    pub fn tensor_count(&self) -> usize {
        self.inventory.len()
    }
}

/// Named runtime tensors decoded from an artifact, keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct WeightStore {
    tensors: HashMap<String, Tensor>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A tensor to be written into a new artifact.
#[derive(Debug, Clone)]
pub struct RawTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl RawTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            values,
        }
    }

    /// A tensor of the given shape filled with `value`.
    pub fn filled(name: impl Into<String>, shape: Vec<usize>, value: f32) -> Self {
        let count = shape.iter().product();
        Self::new(name, shape, vec![value; count])
    }
}

/// Reduce a stored tensor name to `<layer>/<param>`.
///
/// Accepts HDF5-style names such as `model_weights/conv2d/conv2d/kernel:0`.
pub fn normalize_weight_name(name: &str) -> String {
    let trimmed = match name.rsplit_once(':') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => name,
    };
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    match segments.len() {
        0 => String::new(),
        1 => segments[0].to_string(),
        n => format!("{}/{}", segments[n - 2], segments[n - 1]),
    }
}

/// Inspect an artifact: description, inventory and declared labels.
pub fn inspect(path: &Path) -> Result<ArtifactInspection, MlError> {
    let bytes = read_container(path)?;
    let (_, metadata) = parse_header(path, &bytes)?;
    Ok(build_inspection(path, bytes.len() as u64, &metadata))
}

/// Inspect an artifact and decode its tensors in the same read.
pub fn inspect_with_weights(path: &Path) -> Result<(ArtifactInspection, WeightStore), MlError> {
    let bytes = read_container(path)?;
    let (_, metadata) = parse_header(path, &bytes)?;
    let mut inspection = build_inspection(path, bytes.len() as u64, &metadata);

    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| MlError::invalid_artifact(path, e.to_string()))?;
    let mut store = WeightStore::new();
    for (raw_name, view) in tensors.tensors() {
        let Some(dtype) = runtime_dtype(view.dtype()) else {
            inspection.warnings.push(format!(
                "tensor '{raw_name}' has unsupported dtype {:?}; ignored",
                view.dtype()
            ));
            continue;
        };
        let name = normalize_weight_name(&raw_name);
        if store.get(&name).is_some() {
            inspection
                .warnings
                .push(format!("duplicate tensor name '{name}' (from '{raw_name}'); ignored"));
            continue;
        }
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), &Device::Cpu)?
            .to_dtype(DType::F32)?;
        store.insert(name, tensor);
    }

    for warning in &inspection.warnings {
        warn!(path = %path.display(), "{warning}");
    }
    debug!(
        path = %path.display(),
        tensors = store.len(),
        has_description = inspection.description.is_some(),
        "Artifact decoded"
    );
    Ok((inspection, store))
}

/// Structural check for the container's weight-table marker: a header
/// length that fits inside the file, followed by a JSON object.
///
/// Does not parse the header, so it accepts containers that full inspection
/// rejects.
pub fn has_container_marker(path: &Path) -> Result<bool, MlError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut prefix = [0u8; 8];
    if file.read_exact(&mut prefix).is_err() {
        return Ok(false);
    }
    let header_len = u64::from_le_bytes(prefix);
    if header_len == 0 || header_len.saturating_add(8) > file_len {
        return Ok(false);
    }

    let mut first = [0u8; 1];
    file.read_exact(&mut first)?;
    Ok(first[0] == b'{')
}

/// Write an artifact with the given tensors and metadata entries.
pub fn write_artifact(
    path: &Path,
    tensors: &[RawTensor],
    metadata: HashMap<String, String>,
) -> Result<(), MlError> {
    let mut buffers = Vec::with_capacity(tensors.len());
    for tensor in tensors {
        let expected: usize = tensor.shape.iter().product();
        if expected != tensor.values.len() {
            return Err(MlError::invalid_artifact(
                path,
                format!(
                    "tensor '{}' has {} values for shape {:?}",
                    tensor.name,
                    tensor.values.len(),
                    tensor.shape
                ),
            ));
        }
        let bytes: Vec<u8> = tensor.values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push(bytes);
    }

    let mut views = Vec::with_capacity(tensors.len());
    for (tensor, bytes) in tensors.iter().zip(&buffers) {
        let view = TensorView::new(Dtype::F32, tensor.shape.clone(), bytes)
            .map_err(|e| MlError::invalid_artifact(path, e.to_string()))?;
        views.push((tensor.name.clone(), view));
    }

    let info = if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    };
    let serialized = safetensors::serialize(views, &info)
        .map_err(|e| MlError::invalid_artifact(path, e.to_string()))?;
    std::fs::write(path, serialized)?;
    Ok(())
}

fn read_container(path: &Path) -> Result<Vec<u8>, MlError> {
    if !path.exists() {
        return Err(MlError::ArtifactNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(MlError::invalid_artifact(path, "not a regular file"));
    }
    Ok(std::fs::read(path)?)
}

fn parse_header(path: &Path, bytes: &[u8]) -> Result<(usize, Metadata), MlError> {
    SafeTensors::read_metadata(bytes).map_err(|e| MlError::invalid_artifact(path, e.to_string()))
}

fn build_inspection(path: &Path, size_bytes: u64, metadata: &Metadata) -> ArtifactInspection {
    let mut warnings = Vec::new();

    let mut inventory = WeightInventory::new();
    for (raw_name, info) in metadata.tensors() {
        inventory.insert(
            normalize_weight_name(&raw_name),
            TensorSpec {
                dtype: format!("{:?}", info.dtype),
                shape: info.shape.clone(),
            },
        );
    }

    let entries = metadata.metadata().clone().unwrap_or_default();

    let description = entries.get(MODEL_CONFIG_KEY).and_then(|raw| {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warnings.push(format!("'{MODEL_CONFIG_KEY}' is not valid JSON: {e}"));
                None
            }
        }
    });

    let class_labels = entries.get(CLASS_LABELS_KEY).and_then(|raw| {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(labels) => Some(labels),
            Err(e) => {
                warnings.push(format!("'{CLASS_LABELS_KEY}' is not a JSON string array: {e}"));
                None
            }
        }
    });

    ArtifactInspection {
        path: path.to_path_buf(),
        size_bytes,
        description,
        inventory,
        class_labels,
        producer: entries.get(PRODUCER_KEY).cloned(),
        warnings,
    }
}

fn runtime_dtype(dtype: Dtype) -> Option<DType> {
    match dtype {
        Dtype::F32 => Some(DType::F32),
        Dtype::F16 => Some(DType::F16),
        Dtype::BF16 => Some(DType::BF16),
        Dtype::F64 => Some(DType::F64),
        _ => None,
    }
}
