//! Layered settings: built-in defaults, then an optional TOML file, then
//! `VOTECHAIN_*` environment variables.

use std::path::Path;

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::logging::LogFormat;
use crate::registry::Candidate;

/// Highest difficulty accepted for interactive use. Each step multiplies
/// the expected mining work by 16.
pub const MAX_INTERACTIVE_DIFFICULTY: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub election_name: String,
    /// Leading hex zeros required of every block hash.
    pub difficulty: usize,
    /// Upper bound on the nonce search. Unbounded when absent.
    pub max_nonce: Option<u64>,
    /// How often the background sealer mines pending votes.
    pub seal_interval_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    #[serde(default = "default_candidates")]
    pub candidates: Vec<Candidate>,
}

impl Settings {
    /// Loads settings from `path`, or from `votechain.toml` in the working
    /// directory if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => defaults()?.add_source(File::from(path)),
            None => defaults()?.add_source(File::with_name("votechain").required(false)),
        };
        let settings: Self = builder
            .add_source(Environment::with_prefix("VOTECHAIN").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    /// Parses settings from a TOML document layered over the defaults.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let settings: Self = defaults()?
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_INTERACTIVE_DIFFICULTY {
            return Err(ConfigError::Message(format!(
                "difficulty {} exceeds {MAX_INTERACTIVE_DIFFICULTY}",
                self.difficulty
            )));
        }
        if self.seal_interval_ms == 0 {
            return Err(ConfigError::Message("seal_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("election_name", "General Election")?
        .set_default("difficulty", 2_i64)?
        .set_default("seal_interval_ms", 500_i64)?
        .set_default("log_level", "info")?
        .set_default("log_format", "human")
}

fn default_candidates() -> Vec<Candidate> {
    [
        ("C001", "Alice Johnson", "Progressive Party", "Education and healthcare reform"),
        ("C002", "Bob Smith", "Conservative Party", "Economic growth and security"),
        ("C003", "Carol Williams", "Green Party", "Climate action and renewable energy"),
    ]
    .into_iter()
    .map(|(id, name, party, description)| Candidate {
        candidate_id: id.to_string(),
        name: name.to_string(),
        party: party.to_string(),
        description: description.to_string(),
    })
    .collect()
}
