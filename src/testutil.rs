//! Synthetic databases for tests.

use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, CatalogWriter};
use crate::concat::hnm::HnmFrame;
use crate::datagram::Datagram;
use crate::timeline::{ContentType, TimelineWriter};

/// Samples of silence written between two recordings.
pub const GAP: usize = 16;

pub struct Fixture {
    pub timeline: PathBuf,
    pub catalog: Catalog,
    /// Raw datagrams of each segment, by id.
    pub segments: Vec<Vec<Datagram>>,
}

impl Fixture {
    pub fn pcm(&self, id: u32) -> Vec<i16> {
        self.segments[id as usize]
            .iter()
            .flat_map(|d| d.pcm16_samples().unwrap())
            .collect()
    }
}

/// Distinct, non-trivial PCM16 content for segment `id`.
pub fn segment_samples(id: u32, len: usize) -> Vec<i16> {
    (0..len)
        .map(|k| {
            let x = (id as i32 * 1_000 + k as i32 * 37) % 20_000 - 10_000;
            x as i16
        })
        .collect()
}

/// A PCM16 database. `recordings` lists segment lengths per recording;
/// each segment is cut into datagrams of at most `datagram_len` samples.
pub fn pcm_database(dir: &Path, recordings: &[&[usize]], datagram_len: usize, stride: u32) -> Fixture {
    let timeline = dir.join("timeline.bin");
    let mut tw = TimelineWriter::create(&timeline, 16_000, ContentType::Pcm16, stride).unwrap();
    let mut cw = CatalogWriter::new(16_000);
    let mut segments = Vec::new();

    for (r, lens) in recordings.iter().enumerate() {
        if r > 0 {
            tw.append(&Datagram::from_pcm16(&[0; GAP]).unwrap()).unwrap();
        }
        for &len in lens.iter() {
            let id = segments.len() as u32;
            let start = tw.total_samples();
            let datagrams: Vec<Datagram> = segment_samples(id, len)
                .chunks(datagram_len)
                .map(|c| Datagram::from_pcm16(c).unwrap())
                .collect();
            for d in &datagrams {
                tw.append(d).unwrap();
            }
            cw.push(start, len as u32).unwrap();
            segments.push(datagrams);
        }
    }
    tw.finish().unwrap();
    Fixture { timeline, catalog: cw.finish().unwrap(), segments }
}

/// Distinct analysis frame `n` of a synthetic voice.
pub fn frame(n: u32) -> HnmFrame {
    let f0 = 100.0 + (n % 7) as f32 * 15.0;
    let harmonics = 3 + (n % 3) as usize;
    HnmFrame {
        f0,
        amplitudes: (0..harmonics).map(|k| 0.2 / (k + 1) as f32).collect(),
        phases: (0..harmonics).map(|k| ((n as usize * 3 + k) % 6) as f32).collect(),
        noise_envelope: vec![0.01, 0.02 + (n % 4) as f32 * 0.005, 0.01],
    }
}

/// An HNM database of one recording; every segment is `frames_per_segment`
/// frames of `frame_len` samples.
pub fn hnm_database(dir: &Path, segments: usize, frames_per_segment: usize, frame_len: u32) -> Fixture {
    let timeline = dir.join("timeline.bin");
    let mut tw = TimelineWriter::create(&timeline, 16_000, ContentType::Hnm, 4).unwrap();
    let mut cw = CatalogWriter::new(16_000);
    let mut out = Vec::new();
    let mut n = 0;

    for _ in 0..segments {
        let start = tw.total_samples();
        let mut datagrams = Vec::new();
        for _ in 0..frames_per_segment {
            let d = frame(n).to_datagram(frame_len).unwrap();
            tw.append(&d).unwrap();
            datagrams.push(d);
            n += 1;
        }
        cw.push(start, frame_len * frames_per_segment as u32).unwrap();
        out.push(datagrams);
    }
    tw.finish().unwrap();
    Fixture { timeline, catalog: cw.finish().unwrap(), segments: out }
}
