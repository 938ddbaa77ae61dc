//! Symbolic Engine
//!
//! Core implementation of the symbolic transformer: a GPT-style decoder whose
//! hidden states stay inside the span of the vocabulary embeddings.
//! Also provides the persistable AdamW optimizer and token sampling.

pub mod layers;
pub mod model;
pub mod optim;
pub mod sampling;

pub use model::{ModelVariant, SymbolicBlock, SymbolicConfig, SymbolicTransformer};
pub use optim::{AdamWParams, SymbolicAdamW};
pub use sampling::sample_token;
