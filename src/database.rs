//! A voice database on disk: timeline, catalog, feature index and the
//! optional user dictionary, opened together from `config.json`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::catalog::Catalog;
use crate::concat::{ConcatOptions, Concatenator, SelectedUnit};
use crate::config::DatabaseConfig;
use crate::features::FeatureFile;
use crate::index::FeatureIndex;
use crate::lexicon::Lexicon;
use crate::error::Error;
use crate::timeline::{ContentType, TimelineReader};
use crate::wav::write_wav;

/// All read-side components of one voice.
///
/// Every component is immutable once opened, so a `VoiceDatabase` can be
/// shared between threads and serve several utterances at once.
#[derive(Debug)]
pub struct VoiceDatabase {
    dir: PathBuf,
    timeline: TimelineReader,
    catalog: Catalog,
    index: FeatureIndex,
    lexicon: Option<Lexicon>,
    concat_options: ConcatOptions,
}

impl VoiceDatabase {
    /// Open the database described by `dir/config.json`.
    pub fn open(dir: &Path) -> Result<Self> {
        let config = DatabaseConfig::load(&dir.join("config.json"))?;
        Self::open_with_config(dir, &config)
    }

    /// Open the database files named by `config`, relative to `dir`.
    pub fn open_with_config(dir: &Path, config: &DatabaseConfig) -> Result<Self> {
        let timeline_path = dir.join(&config.timeline);
        let timeline = TimelineReader::open_with(&timeline_path, &config.timeline_options())
            .with_context(|| format!("Cannot open timeline: {}", timeline_path.display()))?;

        let catalog_path = dir.join(&config.catalog);
        let catalog = Catalog::open(&catalog_path)
            .with_context(|| format!("Cannot open catalog: {}", catalog_path.display()))?;
        if catalog.sample_rate() != timeline.sample_rate() {
            bail!(
                "Sample rate mismatch: catalog {} Hz, timeline {} Hz",
                catalog.sample_rate(),
                timeline.sample_rate()
            );
        }
        catalog
            .validate_against(timeline.total_samples())
            .with_context(|| format!("Catalog does not fit timeline: {}", catalog_path.display()))?;
        if timeline.content_type() == ContentType::Hnm {
            check_frame_alignment(&catalog, &timeline)
                .with_context(|| format!("Catalog does not fit HNM frames: {}", catalog_path.display()))?;
        }

        let features_path = dir.join(&config.features);
        let features = FeatureFile::open(&features_path)
            .with_context(|| format!("Cannot open features: {}", features_path.display()))?;
        if features.vectors.len() != catalog.len() {
            bail!(
                "Feature file describes {} units, catalog has {}",
                features.vectors.len(),
                catalog.len()
            );
        }
        let index = FeatureIndex::from_file(features)?;

        let lexicon = match &config.lexicon {
            Some(file) => Some(Lexicon::load(&dir.join(file))?),
            None => None,
        };

        info!(
            dir = %dir.display(),
            units = catalog.len(),
            sample_rate = timeline.sample_rate(),
            content = ?timeline.content_type(),
            "voice database opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            timeline,
            catalog,
            index,
            lexicon,
            concat_options: config.concat_options(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate()
    }

    pub fn timeline(&self) -> &TimelineReader {
        &self.timeline
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn index(&self) -> &FeatureIndex {
        &self.index
    }

    /// Mutable access, e.g. to [`FeatureIndex::deep_sort`] before queries.
    pub fn index_mut(&mut self) -> &mut FeatureIndex {
        &mut self.index
    }

    pub fn lexicon(&self) -> Option<&Lexicon> {
        self.lexicon.as_ref()
    }

    pub fn concatenator(&self) -> Concatenator<'_> {
        Concatenator::new(&self.catalog, &self.timeline, self.concat_options.clone())
    }

    /// Extract and concatenate the given unit ids, in order.
    pub fn synthesize(&self, ids: &[u32]) -> Result<Vec<f32>> {
        let mut units = ids
            .iter()
            .map(|&id| self.catalog.get(id).map(SelectedUnit::new))
            .collect::<crate::Result<Vec<_>>>()?;
        let concatenator = self.concatenator();
        concatenator.load_units(&mut units)?;
        Ok(concatenator.concatenate(&units)?)
    }

    /// [`synthesize`](Self::synthesize) straight to a 16-bit WAV file.
    pub fn synthesize_to_file(&self, ids: &[u32], output_path: &Path) -> Result<()> {
        let audio = self.synthesize(ids)?;
        write_wav(&audio, self.sample_rate(), output_path)
    }
}

/// HNM frames cannot be cut, so every span must start and end on one.
fn check_frame_alignment(catalog: &Catalog, timeline: &TimelineReader) -> crate::Result<()> {
    let bounds = timeline.datagram_boundaries()?;
    let on_frame = |t: u64| bounds.binary_search(&t).is_ok();
    match catalog.iter().find(|s| !on_frame(s.timeline_offset) || !on_frame(s.end())) {
        Some(s) => Err(Error::corrupt(format!(
            "segment {} spans [{}, {}), which is not on HNM frame boundaries",
            s.id,
            s.timeline_offset,
            s.end()
        ))),
        None => Ok(()),
    }
}
