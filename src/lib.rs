//! Declarative command-line test runner.
//!
//! Suites describe shell commands and what they are expected to print and
//! return. Tests run locally, over SSH or inside a Docker container.

pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod loader;
pub mod matcher;
pub mod model;
pub mod node;
pub mod report;
pub mod runner;
pub mod runtime;
pub mod schema;
pub mod suite;
pub mod validator;
