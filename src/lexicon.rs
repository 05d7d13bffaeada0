//! User dictionary: hand-written transcriptions that override letter-to-sound.
//!
//! One entry per line:
//!
//! ```text
//! graphemes | phones | optional POS tags separated by whitespace
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. A word may have
//! several entries; the part-of-speech tags pick between them.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Field separator, swallowing the whitespace around `|`.
static RE_FIELD_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\|\s*").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    phones: String,
    pos: Vec<String>,
}

/// Parsed user dictionary.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: HashMap<String, Vec<Entry>>,
}

impl Lexicon {
    /// Parse dictionary text. Lines without a phone field are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries: HashMap<String, Vec<Entry>> = HashMap::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = RE_FIELD_SEP.split(line).collect();
            let (graph, phones) = match fields.as_slice() {
                [graph, phones, ..] if !graph.trim().is_empty() && !phones.trim().is_empty() => {
                    (graph.trim(), phones.trim())
                }
                _ => {
                    warn!(line = n + 1, text = line, "lexicon: malformed entry skipped");
                    continue;
                }
            };
            let pos = fields
                .get(2)
                .map(|p| p.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            entries
                .entry(graph.to_string())
                .or_default()
                .push(Entry { phones: phones.to_string(), pos });
        }
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read lexicon: {}", path.display()))?;
        let lexicon = Self::parse(&text);
        debug!(path = %path.display(), words = lexicon.len(), "lexicon loaded");
        Ok(lexicon)
    }

    /// Number of distinct grapheme strings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look `text` up, trying it as given, then lowercased, then lowercased
    /// with an initial capital.
    ///
    /// Among the word's entries the first tagged with `pos` wins; without a
    /// match the last entry is returned.
    pub fn lookup(&self, text: &str, pos: Option<&str>) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        let lower = text.to_lowercase();
        let entries = self
            .entries
            .get(text)
            .or_else(|| self.entries.get(&lower))
            .or_else(|| self.entries.get(&capitalize(&lower)))?;

        if let Some(pos) = pos {
            if let Some(e) = entries.iter().find(|e| e.pos.iter().any(|p| p == pos)) {
                return Some(&e.phones);
            }
        }
        entries.last().map(|e| e.phones.as_str())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
