//! # QA Harness Core
//!
//! Pure pipeline logic for QA Harness: data models, chunking, the vector
//! index, retrieval, grounded test-case generation, and selector-constrained
//! script generation.
//!
//! This crate contains no tokio runtime, sqlx, filesystem I/O, or network
//! clients. External models are reached through the [`embedding::Embedder`]
//! and [`llm::LanguageModel`] traits, which the application crate
//! implements and tests replace with deterministic stubs.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod grounding;
pub mod index;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod script;

pub use error::{QaError, Result};
