//! goconc core - configuration and the analysis pipeline

pub mod config;
pub mod pipeline;

pub use config::{load_config, Config, QueryMode};
pub use pipeline::{analyze_file, analyze_program, Analysis, AnalysisSummary, PipelineError};
