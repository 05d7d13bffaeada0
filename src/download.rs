//! HuggingFace Hub downloader for voice databases.
//!
//! Downloads `config.json` and every data file it names from a HuggingFace
//! repository, then opens the result as a [`VoiceDatabase`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::VoiceDatabase;

// ─────────────────────────────────────────────────────────────────────────────
// Download helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Download a single file from a HuggingFace repository.
fn hf_download(api: &Api, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let repo = api.model(repo_id.to_string());
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Download and open a voice database from HuggingFace.
///
/// Files are cached in the HuggingFace Hub cache directory
/// (`~/.cache/huggingface/hub` by default). All files of one repository
/// revision land in the same snapshot directory, so the config's relative
/// filenames resolve against the directory holding `config.json`.
///
/// # Example
/// ```no_run
/// let db = unitsynth::download::load_from_hub("someone/my-voice-unitdb").unwrap();
/// let audio = db.synthesize(&[0, 1, 2]).unwrap();
/// ```
pub fn load_from_hub(repo_id: &str) -> Result<VoiceDatabase> {
    info!(repo = repo_id, "downloading voice database config");
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;

    let config_path = hf_download(&api, repo_id, "config.json")?;
    let config = DatabaseConfig::load(&config_path)?;

    for file in config.files() {
        info!(repo = repo_id, file, "downloading");
        hf_download(&api, repo_id, file)?;
    }

    let dir = config_path.parent().unwrap_or(Path::new("."));
    VoiceDatabase::open_with_config(dir, &config)
}
