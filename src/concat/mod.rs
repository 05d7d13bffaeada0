//! Unit concatenation: turns selected units into one continuous signal.
//!
//! For every boundary between unit `i` and unit `i + 1`:
//!
//! 1. **Natural**: unit `i + 1` is the segment that followed unit `i` in the
//!    original recording (or nothing follows). The sample streams are already
//!    continuous and are appended untouched.
//! 2. **Discontinuous**: anything else. The right context of unit `i` (the
//!    first datagram of its recording successor) is blended into the onset of
//!    unit `i + 1`. How depends on the timeline's content:
//!    [`overlap::OverlapAdd`] for PCM16, [`hnm::HnmSynthesizer`] for
//!    parametric frames.
//!
//! Boundary detection is shared; only the blend differs. Units are rendered
//! strictly in order and never look further ahead than the next unit.

pub mod hnm;
pub mod overlap;

use tracing::info;

use crate::catalog::{Catalog, Segment};
use crate::datagram::Datagram;
use crate::error::{Error, Result};
use crate::timeline::{ContentType, TimelineReader};

/// Default upper bound on the overlap-add crossfade, in samples.
pub const DEFAULT_CROSSFADE_MAX: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// Selected units
// ─────────────────────────────────────────────────────────────────────────────

/// Audio data extracted for one selected unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatenationData {
    /// The datagrams covering the unit's span.
    pub datagrams: Vec<Datagram>,
    /// First datagram of the unit's recording successor, if it has one.
    pub right_context: Option<Datagram>,
}

/// A unit chosen by the selection search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedUnit {
    pub segment: Segment,
    pub concatenation_data: Option<ConcatenationData>,
}

impl SelectedUnit {
    pub fn new(segment: Segment) -> Self {
        Self { segment, concatenation_data: None }
    }
}

/// How two consecutive units meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Natural,
    Discontinuous,
}

/// Classify the right boundary of every unit. The last unit's boundary is
/// always natural.
pub fn plan_boundaries(units: &[SelectedUnit], catalog: &Catalog) -> Result<Vec<Boundary>> {
    let mut out = Vec::with_capacity(units.len());
    for (i, unit) in units.iter().enumerate() {
        let boundary = match units.get(i + 1) {
            None => Boundary::Natural,
            Some(next) => {
                let in_recording = catalog.next_in_recording(unit.segment.id)?;
                if in_recording.map(|s| s.id) == Some(next.segment.id) {
                    Boundary::Natural
                } else {
                    Boundary::Discontinuous
                }
            }
        };
        out.push(boundary);
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Renderers
// ─────────────────────────────────────────────────────────────────────────────

/// Renders one unit's datagrams to samples.
///
/// `incoming` is the previous unit's right context when the boundary into
/// this unit is discontinuous; the renderer blends it into the unit's onset.
/// Rendering a unit never changes its length.
pub trait UnitRenderer: Send {
    fn render(&mut self, datagrams: &[Datagram], incoming: Option<&Datagram>) -> Result<Vec<f32>>;
}

/// Options shared by all renderers.
#[derive(Debug, Clone)]
pub struct ConcatOptions {
    /// Upper bound on the overlap-add crossfade region.
    pub crossfade_max_samples: usize,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        Self { crossfade_max_samples: DEFAULT_CROSSFADE_MAX }
    }
}

/// Pick the renderer for a timeline's content type.
pub fn renderer_for(content: ContentType, sample_rate: u32, options: &ConcatOptions) -> Box<dyn UnitRenderer> {
    match content {
        ContentType::Pcm16 => Box::new(overlap::OverlapAdd::new(options.crossfade_max_samples)),
        ContentType::Hnm => Box::new(hnm::HnmSynthesizer::new(sample_rate)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Concatenator
// ─────────────────────────────────────────────────────────────────────────────

/// Borrows a catalog and its timeline for one or more utterances.
pub struct Concatenator<'a> {
    catalog: &'a Catalog,
    timeline: &'a TimelineReader,
    options: ConcatOptions,
}

impl<'a> Concatenator<'a> {
    pub fn new(catalog: &'a Catalog, timeline: &'a TimelineReader, options: ConcatOptions) -> Self {
        Self { catalog, timeline, options }
    }

    /// Read a segment's datagrams and its right context from the timeline.
    ///
    /// PCM16 datagrams are clipped to the segment's span. HNM frames cannot
    /// be cut, so a span that does not fall on frame boundaries is corrupt.
    pub fn extract(&self, segment: &Segment) -> Result<ConcatenationData> {
        let datagrams = self.read_clipped(segment.timeline_offset, segment.end())?;
        let right_context = match self.catalog.next_in_recording(segment.id)? {
            Some(next) => {
                let (first, mut rc) = self.timeline.read_span(next.timeline_offset, 1)?;
                rc.truncate(1);
                let rc_end = first + rc.iter().map(|d| d.duration() as u64).sum::<u64>();
                self.clip(first, rc, next.timeline_offset, rc_end.min(next.end()))?
                    .into_iter()
                    .next()
            }
            None => None,
        };
        Ok(ConcatenationData { datagrams, right_context })
    }

    fn read_clipped(&self, start: u64, end: u64) -> Result<Vec<Datagram>> {
        let (first, datagrams) = self.timeline.read_span(start, end - start)?;
        self.clip(first, datagrams, start, end)
    }

    /// Fit `datagrams`, the first of which begins at sample `first`, to `[start, end)`.
    fn clip(&self, first: u64, datagrams: Vec<Datagram>, start: u64, end: u64) -> Result<Vec<Datagram>> {
        match self.timeline.content_type() {
            ContentType::Pcm16 => clip_pcm16(first, datagrams, start, end),
            ContentType::Hnm => {
                let last = first + datagrams.iter().map(|d| d.duration() as u64).sum::<u64>();
                if first != start || last != end {
                    return Err(Error::corrupt(format!(
                        "span [{start}, {end}) is not aligned to HNM frames [{first}, {last})"
                    )));
                }
                Ok(datagrams)
            }
        }
    }

    /// Fill in the concatenation data of every unit that lacks it.
    pub fn load_units(&self, units: &mut [SelectedUnit]) -> Result<()> {
        for unit in units.iter_mut().filter(|u| u.concatenation_data.is_none()) {
            unit.concatenation_data = Some(self.extract(&unit.segment)?);
        }
        Ok(())
    }

    /// Build a lazily rendered stream over `units`.
    ///
    /// Every unit must already carry concatenation data.
    pub fn stream<'u>(&self, units: &'u [SelectedUnit]) -> Result<UnitStream<'u>> {
        if let Some(unit) = units.iter().find(|u| u.concatenation_data.is_none()) {
            return Err(Error::InvalidState(format!(
                "unit {} has no concatenation data; extract it before concatenating",
                unit.segment.id
            )));
        }
        let boundaries = plan_boundaries(units, self.catalog)?;
        let renderer = renderer_for(self.timeline.content_type(), self.timeline.sample_rate(), &self.options);
        Ok(UnitStream { units, boundaries, renderer, pos: 0, pending: None })
    }

    /// Render all units into one signal.
    pub fn concatenate(&self, units: &[SelectedUnit]) -> Result<Vec<f32>> {
        let mut audio = Vec::new();
        let mut stream = self.stream(units)?;
        for chunk in &mut stream {
            audio.extend(chunk?);
        }
        info!(
            units = units.len(),
            smoothed = stream.smoothed_joins(),
            samples = audio.len(),
            "utterance concatenated"
        );
        Ok(audio)
    }
}

/// Cut PCM16 datagrams starting at sample `first` down to `[start, end)`.
fn clip_pcm16(first: u64, datagrams: Vec<Datagram>, start: u64, end: u64) -> Result<Vec<Datagram>> {
    let mut out = Vec::with_capacity(datagrams.len());
    let mut t = first;
    for d in datagrams {
        let dur = d.duration() as u64;
        let (lo, hi) = (start.max(t), end.min(t + dur));
        if lo == t && hi == t + dur {
            out.push(d);
        } else if lo < hi {
            let samples = d.pcm16_samples()?;
            out.push(Datagram::from_pcm16(&samples[(lo - t) as usize..(hi - t) as usize])?);
        }
        t += dur;
    }
    Ok(out)
}

/// Renders one unit per step. Dropping the stream abandons the utterance.
pub struct UnitStream<'u> {
    units: &'u [SelectedUnit],
    boundaries: Vec<Boundary>,
    renderer: Box<dyn UnitRenderer>,
    pos: usize,
    pending: Option<&'u Datagram>,
}

impl UnitStream<'_> {
    pub fn boundaries(&self) -> &[Boundary] {
        &self.boundaries
    }

    /// Number of discontinuous boundaries in the utterance.
    pub fn smoothed_joins(&self) -> usize {
        self.boundaries.iter().filter(|b| **b == Boundary::Discontinuous).count()
    }
}

impl Iterator for UnitStream<'_> {
    type Item = Result<Vec<f32>>;

    fn next(&mut self) -> Option<Self::Item> {
        let units = self.units;
        let unit = units.get(self.pos)?;
        let Some(data) = unit.concatenation_data.as_ref() else {
            self.pos = self.units.len();
            return Some(Err(Error::InvalidState(format!(
                "unit {} has no concatenation data",
                unit.segment.id
            ))));
        };

        let incoming = self.pending.take();
        let result = self.renderer.render(&data.datagrams, incoming);
        if result.is_err() {
            self.pos = self.units.len();
            return Some(result);
        }
        if self.boundaries[self.pos] == Boundary::Discontinuous {
            self.pending = data.right_context.as_ref();
        }
        self.pos += 1;
        Some(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
