//! # Control Mapper
//!
//! Maps evidence found in a software repository to compliance control
//! implementation statements with retrieval-augmented generation.
//!
//! Repository files are segmented into evidence units, embedded, and stored
//! in a vector index. For each control, the requirement text retrieves the
//! closest evidence, a generative model drafts an implementation record,
//! and a validator decides whether to accept it or ask again with feedback.
//! Exhausted retries fall back to a conservative template.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────────────┐
//! │   Scan   │──▶│ Segment+Embed │──▶│ units / summaries │
//! │ walkdir  │   │ rayon + batch │   │  index + store    │
//! └──────────┘   └───────────────┘   └─────────┬─────────┘
//!                                              │ retrieve
//!                                              ▼
//!                 ┌────────────────┐   ┌────────────────┐
//!                 │   Uniqueness   │◀──│    Generate    │
//!                 │     check      │   │ validate/retry │
//!                 └───────┬────────┘   └────────────────┘
//!                         ▼
//!             implemented_requirements.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cmap index                          # scan and embed the repository
//! cmap search "token validation"      # inspect retrieval
//! cmap generate controls.json         # draft control mappings
//! cmap check                          # re-check an output file
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`scan`] | Repository walk and file filtering |
//! | [`indexer`] | Segment, embed, summarize, persist |
//! | [`inventory`] | Configuration file inventory |
//! | [`persist`] | On-disk index layout |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat completion client |
//! | [`retrieve`] | Query-time retrieval |
//! | [`generate`] | Generate, validate, retry, fall back |
//! | [`batch`] | Concurrent generation over many controls |
//! | [`output`] | Output documents |
//! | [`commands`] | `cmap` subcommand implementations |
//! | [`progress`] | Stderr progress reporting |
//! | [`logging`] | Tracing subscriber setup |
//!
//! Pure logic (segmentation, vector index, validation, templates, prompts)
//! lives in the [`control_mapper_core`] crate.

pub mod batch;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod generate;
pub mod indexer;
pub mod inventory;
pub mod llm;
pub mod logging;
pub mod output;
pub mod persist;
pub mod progress;
pub mod retrieve;
pub mod scan;
