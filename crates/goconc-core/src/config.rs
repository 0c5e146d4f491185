//! Configuration loading from goconc.toml.

use goconc_ir::ir::Program;
use goconc_pointer::{CollectorOptions, IncludeType};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "goconc.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pointer: PointerConfig,
    pub psets: PsetsConfig,
}

/// Which values get points-to queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Channels, functions and interfaces.
    #[default]
    Standard,
    /// Every pointer-like value.
    Total,
    /// The categories enabled in `[pointer]`.
    Custom,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    pub queries: QueryMode,
    /// Category flags, read only for `queries = "custom"`.
    #[serde(flatten)]
    pub include: IncludeType,
    /// Log every queried value at debug level.
    pub verbose: bool,
    /// Leave `sync` primitives out of the analysis.
    pub skip_sync: bool,
}

impl PointerConfig {
    pub fn include_type(&self) -> IncludeType {
        match self.queries {
            QueryMode::Standard => IncludeType::standard(),
            QueryMode::Total => IncludeType::total(),
            QueryMode::Custom => self.include,
        }
    }

    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            verbose: self.verbose,
            skip_sync: self.skip_sync,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PsetsConfig {
    /// Entry function of the main package, or a fully qualified name.
    pub entry: String,
}

impl Default for PsetsConfig {
    fn default() -> Self {
        Self {
            entry: "main".to_string(),
        }
    }
}

impl PsetsConfig {
    /// Full name of the entry function in `program`. A bare name is looked
    /// up in the main package; a qualified name must match exactly.
    pub fn resolve_entry(&self, program: &Program) -> Option<String> {
        let func = if self.entry.contains('.') {
            program.function(&self.entry)
        } else {
            program.main_function(&self.entry)
        };
        func.map(|f| f.name.clone())
    }
}

/// Find and load goconc.toml, walking up from `start_dir`.
/// Returns default config if no file is found or it cannot be used.
pub fn load_config(start_dir: &Path) -> Config {
    let Some(path) = find_config_file(start_dir) else {
        return Config::default();
    };
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot read config, using defaults");
            return Config::default();
        }
    };
    match toml::from_str(&content) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded config");
            config
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "invalid config, using defaults");
            Config::default()
        }
    }
}

/// Walk up directories looking for goconc.toml.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Default goconc.toml content.
pub const DEFAULT_CONFIG_TOML: &str = r#"[pointer]
# standard: channels, functions and interfaces
# total: every pointer-like value
# custom: the categories below
queries = "standard"
# chan = true
# interface = true
# function = true
# map = false
# slice = false
# pointer = false
# all = false
verbose = false
skip_sync = false

[psets]
entry = "main"
"#;
