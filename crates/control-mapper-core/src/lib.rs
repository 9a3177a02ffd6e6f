//! # Control Mapper Core
//!
//! Shared, I/O-free logic for Control Mapper: data models, segmentation,
//! rule signals, the exact nearest-neighbor vector index and its companion
//! metadata store, retrieval merging, control-mapping templates, content
//! validation, prompt assembly and batch id uniqueness.
//!
//! This crate contains no tokio, filesystem or network dependencies. The
//! embedding and generative model interfaces are defined here as traits;
//! concrete providers live in the `control-mapper` app crate.

pub mod embedding;
pub mod hints;
pub mod index;
pub mod model;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod segment;
pub mod store;
pub mod template;
pub mod uniqueness;
pub mod validate;
