//! Resolve, download and load a seq2seq summarization model from an Azure ML
//! model registry.
//!
//! [`model::ConfigResolver`] decides which model and workspace to use,
//! [`model::ModelFetcher`] makes the artifacts available under the local cache
//! and hands them to a [`loader::ArtifactLoader`], and [`server`] exposes the
//! fixed HTTP front end.

pub mod cli;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod server;

pub use error::{Error, Result};
