//! Model Module - Symbolic transformer architecture
//!
//! - SymbolicBlock: norm → attention → norm → FFN with residuals
//! - SymbolicTransformer: tied embedding, blocks, final norm, generation
//! - SymbolicConfig: hyperparameters and size presets

pub mod block;
pub mod config;
pub mod symbolic;

pub use block::SymbolicBlock;
pub use config::{ModelVariant, SymbolicConfig};
pub use symbolic::SymbolicTransformer;
