//! Datagram: the atomic, duration-tagged storage record of a timeline.
//!
//! The payload is opaque here: raw PCM16 samples for waveform timelines,
//! one encoded analysis frame for HNM timelines (see [`crate::concat::hnm`]).
//!
//! On disk a datagram is `[4B duration][4B payload_len][payload]`.

use std::io::{Read, Write};

use crate::binio::{read_bytes, read_u32};
use crate::error::{Error, Result};

/// Bytes taken by a record header before the payload.
pub const RECORD_HEADER_LEN: u64 = 8;

/// A duration-tagged opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    duration: u32,
    payload: Vec<u8>,
}

impl Datagram {
    /// Build a datagram. Zero durations are rejected: every record must
    /// advance the timeline clock.
    pub fn new(duration: u32, payload: Vec<u8>) -> Result<Self> {
        if duration == 0 {
            return Err(Error::InvalidState("datagram duration must be > 0".into()));
        }
        Ok(Self { duration, payload })
    }

    /// Wrap PCM16 samples; the duration is the sample count.
    pub fn from_pcm16(samples: &[i16]) -> Result<Self> {
        let duration = u32::try_from(samples.len())
            .map_err(|_| Error::InvalidState(format!("{} samples in one datagram", samples.len())))?;
        let payload = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(duration, payload)
    }

    /// Duration in samples.
    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Decode the payload as PCM16. The payload must hold exactly
    /// `duration` samples.
    pub fn pcm16_samples(&self) -> Result<Vec<i16>> {
        if self.payload.len() != self.duration as usize * 2 {
            return Err(Error::corrupt(format!(
                "PCM16 datagram: {} payload bytes for {} samples",
                self.payload.len(),
                self.duration
            )));
        }
        Ok(self
            .payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }

    /// Size of this datagram's on-disk record.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_LEN + self.payload.len() as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let len = u32::try_from(self.payload.len())
            .map_err(|_| Error::InvalidState(format!("payload of {} bytes", self.payload.len())))?;
        w.write_all(&self.duration.to_le_bytes())?;
        w.write_all(&len.to_le_bytes())?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let (duration, len) = read_record_header(r)?;
        let payload = read_bytes(r, len as usize, "datagram payload")?;
        Ok(Self { duration, payload })
    }
}

/// Read `(duration, payload_len)` of the next record, leaving the reader at
/// the start of the payload.
pub fn read_record_header<R: Read>(r: &mut R) -> Result<(u32, u32)> {
    let duration = read_u32(r, "datagram header")?;
    if duration == 0 {
        return Err(Error::corrupt("datagram with zero duration"));
    }
    let len = read_u32(r, "datagram header")?;
    Ok((duration, len))
}
