//! # unitsynth
//!
//! Storage and concatenation backend of a unit-selection speech synthesiser.
//!
//! A voice database is a set of recorded utterances cut into segments
//! ("units"). This crate reads the database and joins the units a selection
//! search picked into one waveform:
//!
//! ```no_run
//! use std::path::Path;
//! use unitsynth::VoiceDatabase;
//!
//! let db = VoiceDatabase::open(Path::new("voices/my-voice")).unwrap();
//!
//! // Candidate units for an accented /a/.
//! let ids = db.index().retrieve_where(&[("phone", "a"), ("accented", "1")]).unwrap();
//!
//! // Concatenate a chosen sequence straight to a WAV file.
//! db.synthesize_to_file(&[ids[0], 17, 18], Path::new("output.wav")).unwrap();
//! ```
//!
//! ## Components
//! | Module       | Role                                                        |
//! |--------------|-------------------------------------------------------------|
//! | [`timeline`] | Datagram store with a skip-index for time-based access      |
//! | [`catalog`]  | Unit id -> timeline span, recording continuity              |
//! | [`features`] | Feature schema and byte-coded feature vectors               |
//! | [`index`]    | Deep sort and wildcard retrieval over feature vectors       |
//! | [`concat`]   | Boundary planning, overlap-add and HNM joins                |
//! | [`database`] | Opens all of the above from a `config.json`                 |
//!
//! ## Pipeline
//! 1. **Extraction**: each selected unit's datagrams and right context are
//!    read from the timeline.
//! 2. **Boundary planning**: units that followed each other in the original
//!    recording are joined as-is; every other join is smoothed.
//! 3. **Rendering**: PCM16 units are crossfaded with their predecessor's
//!    right context; HNM units are resynthesised with interpolated parameters.
//! 4. **Export**: samples are scaled back to 16-bit PCM and written as WAV.

// Download from HuggingFace Hub is desktop-only: hf-hub's TLS stack cannot be
// cross-compiled for iOS/Android without a full SDK.
#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod download;

pub(crate) mod binio;
pub mod catalog;
pub mod concat;
pub mod config;
pub mod database;
pub mod datagram;
pub mod error;
pub mod features;
pub mod index;
pub mod lexicon;
pub mod timeline;
pub mod wav;

#[cfg(test)]
mod testutil;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use catalog::{Catalog, Segment};
pub use concat::{ConcatOptions, Concatenator, SelectedUnit};
pub use database::VoiceDatabase;
pub use datagram::Datagram;
pub use error::{Error, Result};
pub use features::{FeatureSchema, FeatureVector};
pub use index::{FeatureIndex, WildcardMask};
pub use timeline::{ContentType, TimelineReader};
