//! Executable layers.
//!
//! Activations flow in NCHW between spatial layers so the tensor ops can use
//! the backend's native conv/pool layout. Parameters keep the layout they
//! are stored with in artifacts (`Conv2D` kernels `[kh, kw, in, out]`,
//! `Dense` kernels `[in, out]`) and are converted at use.

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::MlError;

/// Element-wise (or channel-wise, for softmax) activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    pub fn parse(name: Option<&str>) -> Result<Self, MlError> {
        match name.unwrap_or("linear") {
            "linear" | "" => Ok(Self::Linear),
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "softmax" => Ok(Self::Softmax),
            other => Err(MlError::UnsupportedLayer(format!("activation '{other}'"))),
        }
    }

    /// Apply the activation. Channels live on dim 1 for both NCHW and
    /// `[N, features]` tensors.
    pub fn apply(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Linear => Ok(x.clone()),
            Self::Relu => x.relu(),
            Self::Sigmoid => candle_nn::ops::sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Softmax => candle_nn::ops::softmax(x, 1),
        }
    }
}

/// Zero padding around the spatial dims, `(top, bottom, left, right)`.
pub type Pad4 = (usize, usize, usize, usize);

/// Runtime layer variants with their parameters.
#[derive(Debug, Clone)]
pub enum LayerKind {
    Conv2d {
        kernel: Tensor,
        bias: Option<Tensor>,
        stride: usize,
        pad: Pad4,
        activation: Activation,
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
        kernel: Tensor,
        bias: Option<Tensor>,
        activation: Activation,
    },
    Activation(Activation),
    Rescaling {
        scale: f64,
        offset: f64,
    },
    BatchNorm {
        gamma: Option<Tensor>,
        beta: Option<Tensor>,
        moving_mean: Tensor,
        moving_variance: Tensor,
        epsilon: f64,
    },
}

impl LayerKind {
    /// Named parameter slots, in declaration order.
    pub fn params(&self) -> Vec<(&'static str, &Tensor)> {
        let mut out = Vec::new();
        match self {
            Self::Conv2d { kernel, bias, .. } | Self::Dense { kernel, bias, .. } => {
                out.push(("kernel", kernel));
                if let Some(bias) = bias {
                    out.push(("bias", bias));
                }
            }
            Self::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_variance,
                ..
            } => {
                if let Some(gamma) = gamma {
                    out.push(("gamma", gamma));
                }
                if let Some(beta) = beta {
                    out.push(("beta", beta));
                }
                out.push(("moving_mean", moving_mean));
                out.push(("moving_variance", moving_variance));
            }
            _ => {}
        }
        out
    }

    pub fn params_mut(&mut self) -> Vec<(&'static str, &mut Tensor)> {
        let mut out = Vec::new();
        match self {
            Self::Conv2d { kernel, bias, .. } | Self::Dense { kernel, bias, .. } => {
                out.push(("kernel", kernel));
                if let Some(bias) = bias {
                    out.push(("bias", bias));
                }
            }
            Self::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_variance,
                ..
            } => {
                if let Some(gamma) = gamma {
                    out.push(("gamma", gamma));
                }
                if let Some(beta) = beta {
                    out.push(("beta", beta));
                }
                out.push(("moving_mean", moving_mean));
                out.push(("moving_variance", moving_variance));
            }
            _ => {}
        }
        out
    }

    pub fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Conv2d {
                kernel,
                bias,
                stride,
                pad,
                activation,
            } => {
                let (top, bottom, left, right) = *pad;
                let x = if top + bottom + left + right > 0 {
                    x.pad_with_zeros(2, top, bottom)?
                        .pad_with_zeros(3, left, right)?
                } else {
                    x.clone()
                };
                let weight = kernel.permute((3, 2, 0, 1))?.contiguous()?;
                let mut y = x.contiguous()?.conv2d(&weight, 0, *stride, 1, 1)?;
                if let Some(bias) = bias {
                    y = y.broadcast_add(&bias.reshape((1, bias.dim(0)?, 1, 1))?)?;
                }
                activation.apply(&y)
            }
            Self::MaxPool { pool, strides } => x.max_pool2d_with_stride(*pool, *strides),
            Self::AvgPool { pool, strides } => x.avg_pool2d_with_stride(*pool, *strides),
            Self::GlobalAvgPool => x.mean(3)?.mean(2),
            Self::Flatten => {
                if x.rank() == 4 {
                    // Flatten in HWC order to match kernels trained channels-last.
                    x.permute((0, 2, 3, 1))?.contiguous()?.flatten_from(1)
                } else {
                    x.contiguous()?.flatten_from(1)
                }
            }
            Self::Dense {
                kernel,
                bias,
                activation,
            } => {
                let mut y = x.contiguous()?.matmul(kernel)?;
                if let Some(bias) = bias {
                    y = y.broadcast_add(&bias.reshape((1, bias.dim(0)?))?)?;
                }
                activation.apply(&y)
            }
            Self::Activation(activation) => activation.apply(x),
            Self::Rescaling { scale, offset } => x.affine(*scale, *offset),
            Self::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_variance,
                epsilon,
            } => {
                let channels = moving_mean.dim(0)?;
                let shape = if x.rank() == 4 {
                    vec![1, channels, 1, 1]
                } else {
                    vec![1, channels]
                };
                let mean = moving_mean.reshape(shape.clone())?;
                let std = moving_variance
                    .affine(1.0, *epsilon)?
                    .sqrt()?
                    .reshape(shape.clone())?;
                let mut y = x.broadcast_sub(&mean)?.broadcast_div(&std)?;
                if let Some(gamma) = gamma {
                    y = y.broadcast_mul(&gamma.reshape(shape.clone())?)?;
                }
                if let Some(beta) = beta {
                    y = y.broadcast_add(&beta.reshape(shape)?)?;
                }
                Ok(y)
            }
        }
    }
}

/// A named runtime layer.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
}

pub(crate) fn zeros(shape: &[usize]) -> Result<Tensor, MlError> {
    Ok(Tensor::zeros(shape, DType::F32, &Device::Cpu)?)
}

pub(crate) fn ones(shape: &[usize]) -> Result<Tensor, MlError> {
    Ok(Tensor::ones(shape, DType::F32, &Device::Cpu)?)
}
