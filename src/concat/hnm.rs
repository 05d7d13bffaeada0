//! Harmonic+noise frames and their parametric join.
//!
//! Each datagram of an HNM timeline holds one analysis frame:
//!
//! ```text
//! [4B f32 f0_hz] [2B num_harmonics] [2B num_noise]
//! num_harmonics x f32 amplitude, num_harmonics x f32 phase (radians, at frame start)
//! num_noise x f32 noise envelope (amplitude sampled evenly across the frame)
//! ```
//!
//! Harmonic `k` (0-based) sits at `(k + 1) * f0`; harmonics at or above
//! Nyquist are dropped. The noise component is white noise shaped by the
//! linearly interpolated envelope. Its generator is seeded from the frame
//! payload, so a frame always renders to the same samples.
//!
//! At a discontinuous boundary the first frame of the next unit is rendered
//! with every parameter moving linearly from the previous unit's right-context
//! frame to the frame itself. Phase tracks are interpolated along the
//! shortest arc, which keeps partials from cancelling the way a sample-domain
//! overlap of two harmonic signals would.

use std::f64::consts::TAU;

use crate::concat::UnitRenderer;
use crate::datagram::Datagram;
use crate::error::{Error, Result};

const FIXED_LEN: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Frame codec
// ─────────────────────────────────────────────────────────────────────────────

/// One harmonic+noise analysis frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HnmFrame {
    pub f0: f32,
    pub amplitudes: Vec<f32>,
    pub phases: Vec<f32>,
    pub noise_envelope: Vec<f32>,
}

impl HnmFrame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.amplitudes.len() != self.phases.len() {
            return Err(Error::InvalidState(format!(
                "HNM frame: {} amplitudes but {} phases",
                self.amplitudes.len(),
                self.phases.len()
            )));
        }
        let nh = u16::try_from(self.amplitudes.len())
            .map_err(|_| Error::InvalidState("HNM frame: too many harmonics".into()))?;
        let nn = u16::try_from(self.noise_envelope.len())
            .map_err(|_| Error::InvalidState("HNM frame: noise envelope too long".into()))?;

        let mut buf = Vec::with_capacity(FIXED_LEN + 4 * (2 * nh as usize + nn as usize));
        buf.extend_from_slice(&self.f0.to_le_bytes());
        buf.extend_from_slice(&nh.to_le_bytes());
        buf.extend_from_slice(&nn.to_le_bytes());
        for v in self.amplitudes.iter().chain(&self.phases).chain(&self.noise_envelope) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < FIXED_LEN {
            return Err(Error::corrupt(format!("HNM frame of {} bytes", payload.len())));
        }
        let f0 = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let nh = u16::from_le_bytes([payload[4], payload[5]]) as usize;
        let nn = u16::from_le_bytes([payload[6], payload[7]]) as usize;
        let expected = FIXED_LEN + 4 * (2 * nh + nn);
        if payload.len() != expected {
            return Err(Error::corrupt(format!(
                "HNM frame: {} bytes for {nh} harmonics and {nn} noise points (expected {expected})",
                payload.len()
            )));
        }
        if !f0.is_finite() || f0 < 0.0 {
            return Err(Error::corrupt(format!("HNM frame: invalid f0 {f0}")));
        }

        let values: Vec<f32> = payload[FIXED_LEN..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            f0,
            amplitudes: values[..nh].to_vec(),
            phases: values[nh..2 * nh].to_vec(),
            noise_envelope: values[2 * nh..].to_vec(),
        })
    }

    /// Pack this frame as a datagram lasting `duration` samples.
    pub fn to_datagram(&self, duration: u32) -> Result<Datagram> {
        Datagram::new(duration, self.encode()?)
    }

    pub fn from_datagram(d: &Datagram) -> Result<Self> {
        Self::decode(d.payload())
    }

    fn amplitude(&self, k: usize) -> f64 {
        self.amplitudes.get(k).copied().unwrap_or(0.0) as f64
    }

    /// Noise amplitude at fraction `x` in `[0, 1)` of the frame.
    fn noise_at(&self, x: f64) -> f64 {
        let env = &self.noise_envelope;
        match env.len() {
            0 => 0.0,
            1 => env[0] as f64,
            n => {
                let pos = x * (n - 1) as f64;
                let i = (pos.floor() as usize).min(n - 2);
                let frac = pos - i as f64;
                env[i] as f64 * (1.0 - frac) + env[i + 1] as f64 * frac
            }
        }
    }

    /// Phase of harmonic `k` after `t` samples.
    fn phase_at(&self, k: usize, t: f64, sample_rate: f64) -> f64 {
        self.phases[k] as f64 + TAU * (k + 1) as f64 * self.f0 as f64 * t / sample_rate
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Noise
// ─────────────────────────────────────────────────────────────────────────────

/// xorshift64* generator producing uniform samples in `[-1, 1)`.
struct Noise(u64);

impl Noise {
    /// Seed from the frame bytes (FNV-1a).
    fn for_payload(payload: &[u8]) -> Self {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in payload {
            h ^= b as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        Self(h | 1)
    }

    fn next(&mut self) -> f64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        let r = self.0.wrapping_mul(0x2545_f491_4f6c_dd1d);
        (r >> 11) as f64 / (1u64 << 52) as f64 - 1.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis
// ─────────────────────────────────────────────────────────────────────────────

/// Parametric renderer: resynthesises HNM frames to samples.
#[derive(Debug, Clone)]
pub struct HnmSynthesizer {
    sample_rate: f64,
}

impl HnmSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate: sample_rate as f64 }
    }

    fn audible(&self, f0: f32, k: usize) -> bool {
        (k + 1) as f64 * (f0 as f64) < self.sample_rate / 2.0
    }

    fn render_frame(&self, frame: &HnmFrame, payload: &[u8], len: usize, out: &mut Vec<f32>) {
        let mut noise = Noise::for_payload(payload);
        for t in 0..len {
            let tf = t as f64;
            let mut s = 0.0;
            for k in 0..frame.amplitudes.len() {
                if self.audible(frame.f0, k) {
                    s += frame.amplitude(k) * frame.phase_at(k, tf, self.sample_rate).cos();
                }
            }
            s += frame.noise_at(tf / len as f64) * noise.next();
            out.push(s as f32);
        }
    }

    /// Render `to` while moving every parameter over from `from`.
    fn render_blend(&self, from: &HnmFrame, to: &HnmFrame, payload: &[u8], len: usize, out: &mut Vec<f32>) {
        let mut noise = Noise::for_payload(payload);
        let harmonics = from.amplitudes.len().max(to.amplitudes.len());
        for t in 0..len {
            let tf = t as f64;
            let w = (tf + 0.5) / len as f64;
            let mut s = 0.0;
            for k in 0..harmonics {
                let a_from = if self.audible(from.f0, k) { from.amplitude(k) } else { 0.0 };
                let a_to = if self.audible(to.f0, k) { to.amplitude(k) } else { 0.0 };
                let a = (1.0 - w) * a_from + w * a_to;
                if a == 0.0 {
                    continue;
                }
                let phase = match (k < from.phases.len(), k < to.phases.len()) {
                    (true, true) => {
                        let p_from = from.phase_at(k, tf, self.sample_rate);
                        let p_to = to.phase_at(k, tf, self.sample_rate);
                        let mut d = p_to - p_from;
                        d -= TAU * (d / TAU).round();
                        p_from + w * d
                    }
                    (true, false) => from.phase_at(k, tf, self.sample_rate),
                    _ => to.phase_at(k, tf, self.sample_rate),
                };
                s += a * phase.cos();
            }
            let x = tf / len as f64;
            s += ((1.0 - w) * from.noise_at(x) + w * to.noise_at(x)) * noise.next();
            out.push(s as f32);
        }
    }
}

impl UnitRenderer for HnmSynthesizer {
    fn render(&mut self, datagrams: &[Datagram], incoming: Option<&Datagram>) -> Result<Vec<f32>> {
        let total: usize = datagrams.iter().map(|d| d.duration() as usize).sum();
        let mut out = Vec::with_capacity(total);
        let from = incoming.map(HnmFrame::from_datagram).transpose()?;

        for (j, d) in datagrams.iter().enumerate() {
            let frame = HnmFrame::from_datagram(d)?;
            let len = d.duration() as usize;
            match (&from, j) {
                (Some(from), 0) => self.render_blend(from, &frame, d.payload(), len, &mut out),
                _ => self.render_frame(&frame, d.payload(), len, &mut out),
            }
        }
        Ok(out)
    }
}
