//! Dataframe benchmark: synthetic data generation, the polars processing
//! variants, a timing harness for external variant programs, and result
//! plots.

pub mod config;
pub mod discover;
pub mod engine;
pub mod errors;
pub mod generate;
pub mod harness;
pub mod io;
pub mod observability;
pub mod report;
pub mod runner;
pub mod timing;
pub mod variant;
