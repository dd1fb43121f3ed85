//! Stepwise CLI: run agent pipelines and workflows from the command line.
//!
//! The binary is a thin argument layer over `commands`, which is exposed
//! here so integration tests exercise the same code paths.

pub mod commands;
