//! Symbolic Train
//!
//! Training orchestration for the symbolic transformer: CLI arguments,
//! configuration, data, tokenizers, checkpoints with resumption, logging and
//! post-training generation checks.

pub mod config;
pub mod data;
pub mod device;
pub mod generation;
pub mod interpret;
pub mod logging;
pub mod tokenizer;
pub mod train;
