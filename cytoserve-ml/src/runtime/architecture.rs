//! Architecture descriptions: parsing and shape planning.
//!
//! Accepts the Keras-style JSON that artifacts embed
//! (`{"class_name": "Sequential", "config": {"layers": [...]}}`). Only
//! linear stacks are reconstructed; `Functional` models are read layer by
//! layer in declaration order.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::layers::{Activation, Layer, LayerKind, Pad4, ones, zeros};
use super::net::SequentialNet;
use super::schema::find_unsupported;
use crate::error::MlError;
use crate::model::InputShape;

const MODEL_CLASSES: &[&str] = &["Sequential", "Functional", "Model"];

/// Convolution / pooling padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
}

impl Padding {
    fn parse(value: Option<&str>) -> Result<Self, MlError> {
        match value.unwrap_or("valid") {
            "valid" => Ok(Self::Valid),
            "same" => Ok(Self::Same),
            other => Err(MlError::UnsupportedLayer(format!("padding '{other}'"))),
        }
    }
}

/// Parameter-free description of one layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    Input,
    Conv2d {
        filters: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: Padding,
        activation: Activation,
        use_bias: bool,
    },
    MaxPool {
        pool: (usize, usize),
        strides: (usize, usize),
    },
    AvgPool {
        pool: (usize, usize),
        strides: (usize, usize),
    },
    GlobalAvgPool,
    Flatten,
    Dense {
        units: usize,
        activation: Activation,
        use_bias: bool,
    },
    Dropout,
    Activation(Activation),
    Rescaling {
        scale: f64,
        offset: f64,
    },
    BatchNorm {
        epsilon: f64,
        center: bool,
        scale: bool,
    },
}

/// A named layer in an architecture.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDef {
    pub name: String,
    pub spec: LayerSpec,
}

impl LayerDef {
    pub fn new(name: impl Into<String>, spec: LayerSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

/// Activation shape between layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    Spatial { h: usize, w: usize, c: usize },
    Flat(usize),
}

impl FeatureShape {
    fn channels(&self) -> usize {
        match self {
            Self::Spatial { c, .. } => *c,
            Self::Flat(n) => *n,
        }
    }
}

/// A parsed, parameter-free network description.
#[derive(Debug, Clone, PartialEq)]
pub struct Architecture {
    pub name: String,
    pub input_shape: InputShape,
    pub layers: Vec<LayerDef>,
}

/// One layer after shape planning.
#[derive(Debug, Clone)]
struct PlannedLayer {
    def: LayerDef,
    input: FeatureShape,
    output: FeatureShape,
    pad: Pad4,
}

#[derive(Deserialize)]
struct RawLayer {
    class_name: String,
    #[serde(default)]
    config: Value,
}

/// Integer or `[a, b]` pair, as Keras writes kernel sizes and strides.
#[derive(Deserialize)]
#[serde(untagged)]
enum Pair {
    One(usize),
    Two(Vec<usize>),
}

impl Pair {
    fn resolve(&self, field: &str) -> Result<(usize, usize), MlError> {
        match self {
            Self::One(n) => Ok((*n, *n)),
            Self::Two(v) if v.len() == 2 => Ok((v[0], v[1])),
            Self::Two(v) => Err(MlError::invalid_description(format!(
                "{field} must have 2 entries, got {}",
                v.len()
            ))),
        }
    }
}

#[derive(Deserialize)]
struct ConvConfig {
    filters: usize,
    kernel_size: Pair,
    #[serde(default)]
    strides: Option<Pair>,
    #[serde(default)]
    padding: Option<String>,
    #[serde(default)]
    activation: Option<String>,
    #[serde(default = "default_true")]
    use_bias: bool,
    #[serde(default)]
    data_format: Option<String>,
    #[serde(default)]
    dilation_rate: Option<Pair>,
}

#[derive(Deserialize)]
struct PoolConfig {
    #[serde(default)]
    pool_size: Option<Pair>,
    #[serde(default)]
    strides: Option<Pair>,
    #[serde(default)]
    padding: Option<String>,
    #[serde(default)]
    data_format: Option<String>,
}

#[derive(Deserialize)]
struct DenseConfig {
    units: usize,
    #[serde(default)]
    activation: Option<String>,
    #[serde(default = "default_true")]
    use_bias: bool,
}

#[derive(Deserialize)]
struct ActivationConfig {
    activation: String,
}

#[derive(Deserialize)]
struct RescalingConfig {
    scale: f64,
    #[serde(default)]
    offset: f64,
}

#[derive(Deserialize)]
struct BatchNormConfig {
    #[serde(default = "default_bn_epsilon")]
    epsilon: f64,
    #[serde(default = "default_true")]
    center: bool,
    #[serde(default = "default_true")]
    scale: bool,
}

fn default_true() -> bool {
    true
}

fn default_bn_epsilon() -> f64 {
    1e-3
}

fn layer_config<T: for<'de> Deserialize<'de>>(
    class_name: &str,
    config: &Value,
) -> Result<T, MlError> {
    serde_json::from_value(config.clone())
        .map_err(|e| MlError::invalid_description(format!("{class_name} config: {e}")))
}

fn reject_channels_first(class_name: &str, data_format: Option<&str>) -> Result<(), MlError> {
    match data_format {
        None | Some("channels_last") => Ok(()),
        Some(other) => Err(MlError::UnsupportedLayer(format!(
            "{class_name} with data_format '{other}'"
        ))),
    }
}

fn parse_layer(raw: &RawLayer) -> Result<LayerSpec, MlError> {
    let class = raw.class_name.as_str();
    let config = &raw.config;
    let spec = match class {
        "InputLayer" => LayerSpec::Input,
        "Conv2D" => {
            let c: ConvConfig = layer_config(class, config)?;
            reject_channels_first(class, c.data_format.as_deref())?;
            if let Some(d) = &c.dilation_rate
                && d.resolve("dilation_rate")? != (1, 1)
            {
                return Err(MlError::UnsupportedLayer("dilated Conv2D".into()));
            }
            let (sh, sw) = match &c.strides {
                Some(s) => s.resolve("strides")?,
                None => (1, 1),
            };
            if sh != sw {
                return Err(MlError::UnsupportedLayer(format!(
                    "Conv2D with non-square strides ({sh}, {sw})"
                )));
            }
            LayerSpec::Conv2d {
                filters: c.filters,
                kernel: c.kernel_size.resolve("kernel_size")?,
                stride: sh,
                padding: Padding::parse(c.padding.as_deref())?,
                activation: Activation::parse(c.activation.as_deref())?,
                use_bias: c.use_bias,
            }
        }
        "MaxPooling2D" | "AveragePooling2D" => {
            let c: PoolConfig = layer_config(class, config)?;
            reject_channels_first(class, c.data_format.as_deref())?;
            if Padding::parse(c.padding.as_deref())? != Padding::Valid {
                return Err(MlError::UnsupportedLayer(format!("{class} with same padding")));
            }
            let pool = match &c.pool_size {
                Some(p) => p.resolve("pool_size")?,
                None => (2, 2),
            };
            let strides = match &c.strides {
                Some(s) => s.resolve("strides")?,
                None => pool,
            };
            if class == "MaxPooling2D" {
                LayerSpec::MaxPool { pool, strides }
            } else {
                LayerSpec::AvgPool { pool, strides }
            }
        }
        "GlobalAveragePooling2D" => LayerSpec::GlobalAvgPool,
        "Flatten" => LayerSpec::Flatten,
        "Dense" => {
            let c: DenseConfig = layer_config(class, config)?;
            LayerSpec::Dense {
                units: c.units,
                activation: Activation::parse(c.activation.as_deref())?,
                use_bias: c.use_bias,
            }
        }
        "Dropout" => LayerSpec::Dropout,
        "Activation" => {
            let c: ActivationConfig = layer_config(class, config)?;
            LayerSpec::Activation(Activation::parse(Some(&c.activation))?)
        }
        "Rescaling" => {
            let c: RescalingConfig = layer_config(class, config)?;
            LayerSpec::Rescaling {
                scale: c.scale,
                offset: c.offset,
            }
        }
        "BatchNormalization" => {
            let c: BatchNormConfig = layer_config(class, config)?;
            LayerSpec::BatchNorm {
                epsilon: c.epsilon,
                center: c.center,
                scale: c.scale,
            }
        }
        other => return Err(MlError::UnsupportedLayer(other.to_string())),
    };
    Ok(spec)
}

/// `[H, W, C]` from a JSON shape, with an optional leading batch entry.
fn shape_from_json(value: &Value, has_batch: bool) -> Result<InputShape, MlError> {
    let dims: Vec<Option<usize>> = serde_json::from_value(value.clone())
        .map_err(|e| MlError::invalid_description(format!("input shape: {e}")))?;
    let dims = if has_batch { dims.get(1..).unwrap_or(&[]) } else { &dims[..] };
    match dims {
        [Some(h), Some(w), Some(c)] if *h > 0 && *w > 0 && *c > 0 => Ok(InputShape::new(*h, *w, *c)),
        _ => Err(MlError::invalid_description(format!(
            "input shape must be three positive dims, got {value}"
        ))),
    }
}

fn snake_case(class_name: &str) -> String {
    let mut out = String::new();
    for (i, ch) in class_name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

impl Architecture {
    /// Parse an embedded description.
    ///
    /// Fails with `UnsupportedField` before any parsing when the description
    /// carries a field the runtime does not understand.
    pub fn from_description(description: &Value) -> Result<Self, MlError> {
        if let Some((field, path)) = find_unsupported(description) {
            return Err(MlError::UnsupportedField { field, path });
        }

        let (name, model_config) = match description.get("class_name").and_then(Value::as_str) {
            Some(class) if MODEL_CLASSES.contains(&class) => {
                let config = description
                    .get("config")
                    .ok_or_else(|| MlError::invalid_description("model has no config"))?;
                (
                    config
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("sequential")
                        .to_string(),
                    config,
                )
            }
            Some(class) => {
                return Err(MlError::UnsupportedLayer(format!("model class '{class}'")));
            }
            None => ("sequential".to_string(), description),
        };

        let raw_layers: Vec<RawLayer> = match model_config.get("layers") {
            Some(layers) => serde_json::from_value(layers.clone())
                .map_err(|e| MlError::invalid_description(format!("layers: {e}")))?,
            None => return Err(MlError::invalid_description("description has no layers")),
        };
        if raw_layers.is_empty() {
            return Err(MlError::invalid_description("description has no layers"));
        }

        let mut input_shape = None;
        let mut layers = Vec::with_capacity(raw_layers.len());
        let mut seen = HashSet::new();
        for (i, raw) in raw_layers.iter().enumerate() {
            if input_shape.is_none()
                && let Some(shape) = raw.config.get("input_shape")
            {
                input_shape = Some(shape_from_json(shape, false)?);
            }
            let spec = parse_layer(raw)?;
            if spec == LayerSpec::Input {
                continue;
            }
            let name = raw
                .config
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{i}", snake_case(&raw.class_name)));
            if !seen.insert(name.clone()) {
                return Err(MlError::invalid_description(format!(
                    "duplicate layer name '{name}'"
                )));
            }
            layers.push(LayerDef::new(name, spec));
        }

        let input_shape = match input_shape {
            Some(shape) => shape,
            None => match model_config
                .get("build_input_shape")
                .or_else(|| model_config.pointer("/build_config/input_shape"))
            {
                Some(shape) => shape_from_json(shape, true)?,
                None => return Err(MlError::invalid_description("no input shape declared")),
            },
        };

        Ok(Self {
            name,
            input_shape,
            layers,
        })
    }

    /// Propagate shapes through every layer.
    fn plan(&self) -> Result<Vec<PlannedLayer>, MlError> {
        let mut current = FeatureShape::Spatial {
            h: self.input_shape.height,
            w: self.input_shape.width,
            c: self.input_shape.channels,
        };
        let mut planned = Vec::with_capacity(self.layers.len());

        for def in &self.layers {
            let mut pad = (0, 0, 0, 0);
            let output = match (&def.spec, current) {
                (
                    LayerSpec::Conv2d {
                        filters,
                        kernel: (kh, kw),
                        stride,
                        padding,
                        ..
                    },
                    FeatureShape::Spatial { h, w, .. },
                ) => {
                    if *stride == 0 || *filters == 0 {
                        return Err(MlError::invalid_description(format!(
                            "{}: zero stride or filters",
                            def.name
                        )));
                    }
                    let (oh, ow) = match padding {
                        Padding::Valid => (
                            valid_out(h, *kh, *stride, &def.name)?,
                            valid_out(w, *kw, *stride, &def.name)?,
                        ),
                        Padding::Same => {
                            let oh = h.div_ceil(*stride);
                            let ow = w.div_ceil(*stride);
                            let ph = ((oh - 1) * stride + kh).saturating_sub(h);
                            let pw = ((ow - 1) * stride + kw).saturating_sub(w);
                            pad = (ph / 2, ph - ph / 2, pw / 2, pw - pw / 2);
                            (oh, ow)
                        }
                    };
                    FeatureShape::Spatial {
                        h: oh,
                        w: ow,
                        c: *filters,
                    }
                }
                (
                    LayerSpec::MaxPool { pool, strides } | LayerSpec::AvgPool { pool, strides },
                    FeatureShape::Spatial { h, w, c },
                ) => {
                    if strides.0 == 0 || strides.1 == 0 {
                        return Err(MlError::invalid_description(format!(
                            "{}: zero pool stride",
                            def.name
                        )));
                    }
                    FeatureShape::Spatial {
                        h: valid_out(h, pool.0, strides.0, &def.name)?,
                        w: valid_out(w, pool.1, strides.1, &def.name)?,
                        c,
                    }
                }
                (LayerSpec::GlobalAvgPool, FeatureShape::Spatial { c, .. }) => FeatureShape::Flat(c),
                (LayerSpec::Flatten, FeatureShape::Spatial { h, w, c }) => {
                    FeatureShape::Flat(h * w * c)
                }
                (LayerSpec::Flatten, flat @ FeatureShape::Flat(_)) => flat,
                (LayerSpec::Dense { units, .. }, FeatureShape::Flat(_)) => FeatureShape::Flat(*units),
                (
                    LayerSpec::Dropout
                    | LayerSpec::Activation(_)
                    | LayerSpec::Rescaling { .. }
                    | LayerSpec::BatchNorm { .. },
                    shape,
                ) => shape,
                (LayerSpec::Input, shape) => shape,
                (spec, shape) => {
                    return Err(MlError::UnsupportedLayer(format!(
                        "{} ({spec:?}) on {shape:?} input",
                        def.name
                    )));
                }
            };
            planned.push(PlannedLayer {
                def: def.clone(),
                input: current,
                output,
                pad,
            });
            current = output;
        }

        if !matches!(current, FeatureShape::Flat(n) if n > 0) {
            return Err(MlError::invalid_description(format!(
                "network output must be a flat vector, got {current:?}"
            )));
        }
        Ok(planned)
    }

    /// Output shape of the whole network.
    pub fn output_shape(&self) -> Result<FeatureShape, MlError> {
        let planned = self.plan()?;
        Ok(planned
            .last()
            .map(|p| p.output)
            .unwrap_or(FeatureShape::Spatial {
                h: self.input_shape.height,
                w: self.input_shape.width,
                c: self.input_shape.channels,
            }))
    }

    /// Every parameter slot as `(<layer>/<param>, shape)`, in layer order.
    pub fn expected_params(&self) -> Result<Vec<(String, Vec<usize>)>, MlError> {
        let mut params = Vec::new();
        for p in self.plan()? {
            for (param, shape) in param_shapes(&p) {
                params.push((format!("{}/{param}", p.def.name), shape));
            }
        }
        Ok(params)
    }

    /// Build a runnable network with initialized (unbound) parameters.
    pub fn build(&self) -> Result<SequentialNet, MlError> {
        let mut layers = Vec::new();
        for p in self.plan()? {
            let kind = match &p.def.spec {
                LayerSpec::Input | LayerSpec::Dropout => continue,
                LayerSpec::Conv2d {
                    filters,
                    kernel: (kh, kw),
                    stride,
                    activation,
                    use_bias,
                    ..
                } => LayerKind::Conv2d {
                    kernel: zeros(&[*kh, *kw, p.input.channels(), *filters])?,
                    bias: if *use_bias { Some(zeros(&[*filters])?) } else { None },
                    stride: *stride,
                    pad: p.pad,
                    activation: *activation,
                },
                LayerSpec::MaxPool { pool, strides } => LayerKind::MaxPool {
                    pool: *pool,
                    strides: *strides,
                },
                LayerSpec::AvgPool { pool, strides } => LayerKind::AvgPool {
                    pool: *pool,
                    strides: *strides,
                },
                LayerSpec::GlobalAvgPool => LayerKind::GlobalAvgPool,
                LayerSpec::Flatten => LayerKind::Flatten,
                LayerSpec::Dense {
                    units,
                    activation,
                    use_bias,
                } => LayerKind::Dense {
                    kernel: zeros(&[p.input.channels(), *units])?,
                    bias: if *use_bias { Some(zeros(&[*units])?) } else { None },
                    activation: *activation,
                },
                LayerSpec::Activation(activation) => LayerKind::Activation(*activation),
                LayerSpec::Rescaling { scale, offset } => LayerKind::Rescaling {
                    scale: *scale,
                    offset: *offset,
                },
                LayerSpec::BatchNorm {
                    epsilon,
                    center,
                    scale,
                } => {
                    let c = p.input.channels();
                    LayerKind::BatchNorm {
                        gamma: if *scale { Some(ones(&[c])?) } else { None },
                        beta: if *center { Some(zeros(&[c])?) } else { None },
                        moving_mean: zeros(&[c])?,
                        moving_variance: ones(&[c])?,
                        epsilon: *epsilon,
                    }
                }
            };
            layers.push(Layer {
                name: p.def.name.clone(),
                kind,
            });
        }
        Ok(SequentialNet::new(self.name.clone(), self.input_shape, layers))
    }
}

fn valid_out(input: usize, window: usize, stride: usize, layer: &str) -> Result<usize, MlError> {
    if window == 0 || input < window {
        return Err(MlError::invalid_description(format!(
            "{layer}: window {window} does not fit input {input}"
        )));
    }
    Ok((input - window) / stride + 1)
}

fn param_shapes(p: &PlannedLayer) -> Vec<(&'static str, Vec<usize>)> {
    let c_in = p.input.channels();
    match &p.def.spec {
        LayerSpec::Conv2d {
            filters,
            kernel: (kh, kw),
            use_bias,
            ..
        } => {
            let mut out = vec![("kernel", vec![*kh, *kw, c_in, *filters])];
            if *use_bias {
                out.push(("bias", vec![*filters]));
            }
            out
        }
        LayerSpec::Dense { units, use_bias, .. } => {
            let mut out = vec![("kernel", vec![c_in, *units])];
            if *use_bias {
                out.push(("bias", vec![*units]));
            }
            out
        }
        LayerSpec::BatchNorm { center, scale, .. } => {
            let mut out = Vec::new();
            if *scale {
                out.push(("gamma", vec![c_in]));
            }
            if *center {
                out.push(("beta", vec![c_in]));
            }
            out.push(("moving_mean", vec![c_in]));
            out.push(("moving_variance", vec![c_in]));
            out
        }
        _ => Vec::new(),
    }
}
