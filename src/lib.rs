//! Orchestration and statistical post-processing for a common-envelope (CE)
//! population-synthesis study.
//!
//! The binary-evolution physics lives in an external engine invoked per
//! binary over a JSON stdio protocol; this crate generates initial-condition
//! grids, drives the engine, extracts CE outcomes from the returned
//! evolutionary histories, accumulates flat per-binary records into CSV
//! tables, and computes the downstream statistics (binomial confidence
//! intervals, bootstrap resampling, stratified survival analyses) and
//! figures.

pub mod analysis;
pub mod bootstrap;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod grid;
pub mod history;
pub mod obs;
pub mod plot;
pub mod runlog;
pub mod stats;
pub mod sweep;
