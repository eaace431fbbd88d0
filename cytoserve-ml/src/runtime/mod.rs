//! In-process inference runtime.
//!
//! Parses Keras-style architecture descriptions, builds sequential networks
//! on `candle` tensors (CPU), binds named weights and runs forward passes.

pub mod architecture;
pub mod layers;
pub mod net;
pub mod schema;
pub mod template;

pub use architecture::{Architecture, FeatureShape, LayerDef, LayerSpec, Padding};
pub use layers::Activation;
pub use net::{BindPolicy, BindReport, SequentialNet};
pub use schema::{UNSUPPORTED_FIELDS, find_unsupported};
pub use template::template;
