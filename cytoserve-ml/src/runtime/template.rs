//! Fixed generic CNN used when an artifact carries weights but no usable
//! description.
//!
//! Layer names follow the default naming a Keras `Sequential` model gets
//! when nothing is named explicitly, so weights saved from such a model bind
//! by name.

use super::architecture::{Architecture, LayerDef, LayerSpec, Padding};
use super::layers::Activation;
use crate::model::InputShape;

/// Hidden width of the first dense layer.
pub const TEMPLATE_HIDDEN_UNITS: usize = 128;

/// Build the template for `num_classes` outputs at a square `resolution`.
pub fn template(num_classes: usize, resolution: usize) -> Architecture {
    let conv = |filters| LayerSpec::Conv2d {
        filters,
        kernel: (3, 3),
        stride: 1,
        padding: Padding::Valid,
        activation: Activation::Relu,
        use_bias: true,
    };
    let pool = || LayerSpec::MaxPool {
        pool: (2, 2),
        strides: (2, 2),
    };

    Architecture {
        name: format!("template_{resolution}"),
        input_shape: InputShape::square(resolution),
        layers: vec![
            LayerDef::new("conv2d", conv(32)),
            LayerDef::new("max_pooling2d", pool()),
            LayerDef::new("conv2d_1", conv(64)),
            LayerDef::new("max_pooling2d_1", pool()),
            LayerDef::new("flatten", LayerSpec::Flatten),
            LayerDef::new(
                "dense",
                LayerSpec::Dense {
                    units: TEMPLATE_HIDDEN_UNITS,
                    activation: Activation::Relu,
                    use_bias: true,
                },
            ),
            LayerDef::new(
                "dense_1",
                LayerSpec::Dense {
                    units: num_classes,
                    activation: Activation::Softmax,
                    use_bias: true,
                },
            ),
        ],
    }
}

/// Flattened feature width the template produces at `resolution`.
pub fn flatten_width(resolution: usize) -> Option<usize> {
    let side = resolution.checked_sub(2)? / 2;
    let side = side.checked_sub(2)? / 2;
    (side > 0).then_some(side * side * 64)
}
