// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # burl
//!
//! Anytime bottom-up rule learning over knowledge graphs, and link prediction
//! with the learned rules.
//!
//! ## Architecture
//!
//! - **Graph** (`graph`): interned ids, indexed triple sets and the triple-file loader
//! - **Sampling** (`sampler`): random walks that seed rule generalization
//! - **Rules** (`rule`): cyclic, acyclic and zero rules with sampled confidence
//! - **Mining** (`learn`): worker threads steered by a bandit over rule types,
//!   with timed snapshots of the rule store
//! - **Prediction** (`apply`): max-plus or noisy-or ranking of completion candidates
//! - **Evaluation** (`eval`): filtered hits@k and MRR of a prediction file
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use burl::config::Config;
//! use burl::graph::IdRegistry;
//! use burl::graph::loader::load_triples;
//! use burl::learn::Learner;
//!
//! let config = Config::default();
//! let registry = Arc::new(IdRegistry::new());
//! let training = load_triples(&config.paths.training, &registry).unwrap();
//! let summary = Learner::new(config, registry, training).unwrap().run().unwrap();
//! println!("{} rules", summary.rules);
//! ```

pub mod apply;
pub mod config;
pub mod error;
pub mod eval;
pub mod graph;
pub mod learn;
pub mod rule;
pub mod sampler;

pub use error::{BurlError, BurlResult};
