//! model-relay - one query contract over several LLM provider families
//!
//! This library lets an agent query structurally different model providers
//! (gateway chat completions, stateful responses, a direct-HTTP router and
//! an OAuth agent service) through [`models::ModelBackend`], with retry,
//! response normalization and per-call cost accounting composed in.

pub mod auth;
pub mod config;
pub mod conversation;
pub mod cost;
pub mod error;
pub mod message;
pub mod models;
pub mod retry;
pub mod stats;
pub mod text;
pub mod ui;

pub use error::{Error, Result};
