//! Extraction
//!
//! - `strategy`: ordered access strategies (direct, `su 0`, `su -c`)
//! - `engine`: discovery, strategy fallback, verified pull and parse
//! - `runner`: the extraction permit around every run

pub mod engine;
pub mod runner;
pub mod strategy;

pub use self::engine::{EngineOptions, ExtractionEngine};
pub use self::runner::{CycleOutcome, ExtractionRunner};
