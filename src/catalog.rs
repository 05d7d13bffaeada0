//! Segment catalog ("unit file"): the dense, id-ordered list of speech units.
//!
//! ```text
//! [4B "UCAT"] [4B version=1] [4B sample_rate] [4B count]
//! count x ([8B timeline_offset_samples] [4B duration_samples])
//! ```
//!
//! A segment's id is its position in the file. Consecutive ids that abut in
//! the timeline belong to the same recording; a gap starts a new one.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use tracing::debug;

use crate::binio::{read_preamble, read_u32, read_u64, write_preamble};
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"UCAT";

/// A contiguous span of one timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    pub id: u32,
    pub timeline_offset: u64,
    pub duration: u32,
}

impl Segment {
    /// First sample after the span. Catalogs reject spans that overflow, so
    /// this only saturates for hand-built segments.
    pub fn end(&self) -> u64 {
        self.timeline_offset.saturating_add(self.duration as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory catalog, loaded once per database and shared read-only.
#[derive(Debug, Clone)]
pub struct Catalog {
    sample_rate: u32,
    spans: Vec<(u64, u32)>,
}

impl Catalog {
    /// Build a catalog from `(timeline_offset, duration)` spans in id order.
    pub fn from_spans(sample_rate: u32, spans: Vec<(u64, u32)>) -> Result<Self> {
        if let Some(id) = spans.iter().position(|&(_, d)| d == 0) {
            return Err(Error::InvalidState(format!("segment {id} has zero duration")));
        }
        if let Some(id) = spans.iter().position(|&(o, d)| o.checked_add(d as u64).is_none()) {
            return Err(Error::InvalidState(format!("segment {id} ends past the last addressable sample")));
        }
        u32::try_from(spans.len())
            .map_err(|_| Error::InvalidState(format!("{} segments exceed u32 ids", spans.len())))?;
        Ok(Self { sample_rate, spans })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        read_preamble(&mut r, MAGIC, "catalog header")?;
        let sample_rate = read_u32(&mut r, "catalog header")?;
        let count = read_u32(&mut r, "catalog header")?;

        let mut spans = Vec::with_capacity((count as usize).min(1 << 20));
        for id in 0..count {
            let offset = read_u64(&mut r, "catalog record")?;
            let duration = read_u32(&mut r, "catalog record")?;
            if duration == 0 {
                return Err(Error::corrupt(format!("catalog: segment {id} has zero duration")));
            }
            if offset.checked_add(duration as u64).is_none() {
                return Err(Error::corrupt(format!("catalog: segment {id} at offset {offset} overflows")));
            }
            spans.push((offset, duration));
        }

        debug!(path = %path.display(), segments = count, sample_rate, "catalog opened");
        Ok(Self { sample_rate, spans })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        write_preamble(&mut w, MAGIC)?;
        w.write_all(&self.sample_rate.to_le_bytes())?;
        w.write_all(&(self.spans.len() as u32).to_le_bytes())?;
        for &(offset, duration) in &self.spans {
            w.write_all(&offset.to_le_bytes())?;
            w.write_all(&duration.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, id: u32) -> Result<Segment> {
        let &(timeline_offset, duration) = self.spans.get(id as usize).ok_or_else(|| {
            Error::OutOfRange(format!("segment {id} not in catalog of {}", self.spans.len()))
        })?;
        Ok(Segment { id, timeline_offset, duration })
    }

    /// The segment that followed `id` in the original recording, or `None`
    /// at the end of a recording.
    pub fn next_in_recording(&self, id: u32) -> Result<Option<Segment>> {
        let seg = self.get(id)?;
        let Some(next_id) = id.checked_add(1) else {
            return Ok(None);
        };
        match self.get(next_id) {
            Ok(next) if next.timeline_offset == seg.end() => Ok(Some(next)),
            _ => Ok(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Segment> + '_ {
        self.spans
            .iter()
            .enumerate()
            .map(|(i, &(timeline_offset, duration))| Segment { id: i as u32, timeline_offset, duration })
    }

    /// Check every span lies inside a timeline of `total_samples`.
    pub fn validate_against(&self, total_samples: u64) -> Result<()> {
        match self.iter().find(|s| s.end() > total_samples) {
            Some(s) => Err(Error::corrupt(format!(
                "catalog: segment {} ends at sample {}, timeline has {total_samples}",
                s.id,
                s.end()
            ))),
            None => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates segments at database-build time.
#[derive(Debug)]
pub struct CatalogWriter {
    sample_rate: u32,
    spans: Vec<(u64, u32)>,
}

impl CatalogWriter {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate, spans: Vec::new() }
    }

    /// Add a segment and return its id.
    pub fn push(&mut self, timeline_offset: u64, duration: u32) -> Result<u32> {
        if duration == 0 {
            return Err(Error::InvalidState("segment duration must be > 0".into()));
        }
        let id = u32::try_from(self.spans.len())
            .map_err(|_| Error::InvalidState("catalog is full".into()))?;
        self.spans.push((timeline_offset, duration));
        Ok(id)
    }

    pub fn finish(self) -> Result<Catalog> {
        Catalog::from_spans(self.sample_rate, self.spans)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
