//! # QA Harness
//!
//! Turns support documentation and a target web page into grounded QA test
//! cases and browser-automation scripts.
//!
//! The retrieval and validation logic lives in the pure `qa-harness-core`
//! crate. This crate supplies everything around it: source parsing,
//! selector extraction, embedding and language-model providers, versioned
//! persistence and the `qah` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ Sources      │──▶│ Parse + Chunk    │──▶│ versions/<v>/     │
//! │ md/json/pdf  │   │ + Embed          │   │ index.sqlite      │
//! └──────────────┘   └──────────────────┘   └────────┬─────────┘
//! ┌──────────────┐   ┌──────────────────┐            │ CURRENT
//! │ Markup page  │──▶│ Selector map     │────────────┤
//! └──────────────┘   └──────────────────┘            ▼
//!                      ┌──────────────────────────────────┐
//!                      │ Harness: retrieve → test cases   │
//!                      │          test case → script      │
//!                      └──────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Build inputs, snapshots and responses |
//! | [`parse`] | Source document text extraction |
//! | [`selectors`] | Selector map extraction from markup |
//! | [`connector_fs`] | Docs directory scanning |
//! | [`ingest`] | Knowledge-base build |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Language-model providers |
//! | [`store`] | Versioned on-disk snapshots |
//! | [`harness`] | Build, generate and script operations |
//! | [`commands`] | `qah` subcommands |
//! | [`stats`] | Index summary |

pub mod commands;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod harness;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod selectors;
pub mod stats;
pub mod store;

pub use harness::Harness;
