//! `config.json` schema of a voice database directory.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::concat::{ConcatOptions, DEFAULT_CROSSFADE_MAX};
use crate::timeline::TimelineOptions;

/// The only database layout this crate reads.
pub const DATABASE_TYPE: &str = "UNITDB1";

/// Datagrams cached per timeline when the config does not say.
pub const DEFAULT_DATAGRAM_CACHE: usize = 1024;

/// Deserialised `config.json` of a voice database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Must be `"UNITDB1"`.
    #[serde(rename = "type")]
    pub model_type: String,

    /// Timeline filename, relative to the config file.
    pub timeline: String,

    /// Segment catalog filename.
    pub catalog: String,

    /// Feature file filename.
    pub features: String,

    /// Datagram LRU capacity; `0` disables the cache.
    #[serde(default)]
    pub datagram_cache: Option<usize>,

    /// Upper bound on the overlap-add crossfade, in samples.
    #[serde(default)]
    pub crossfade_max_samples: Option<usize>,

    /// Optional user dictionary.
    #[serde(default)]
    pub lexicon: Option<String>,
}

impl DatabaseConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(bytes).context("Failed to parse config.json")?;
        if config.model_type != DATABASE_TYPE {
            bail!(
                "Unsupported database type '{}', expected {}",
                config.model_type,
                DATABASE_TYPE
            );
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Cannot read config: {}", path.display()))?;
        Self::from_json(&bytes).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Every data file the config names, timeline first.
    pub fn files(&self) -> Vec<&str> {
        let mut files = vec![self.timeline.as_str(), self.catalog.as_str(), self.features.as_str()];
        files.extend(self.lexicon.as_deref());
        files
    }

    pub fn timeline_options(&self) -> TimelineOptions {
        TimelineOptions { cache_capacity: self.datagram_cache.unwrap_or(DEFAULT_DATAGRAM_CACHE) }
    }

    pub fn concat_options(&self) -> ConcatOptions {
        ConcatOptions { crossfade_max_samples: self.crossfade_max_samples.unwrap_or(DEFAULT_CROSSFADE_MAX) }
    }
}
