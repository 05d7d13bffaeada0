//! Overlap-add joins for PCM16 timelines.
//!
//! At a discontinuous boundary the previous unit's right context fades out
//! while the onset of the next unit fades in, over
//! `L = min(right context, next unit, crossfade cap)` samples. The blend
//! replaces those samples in place, so unit lengths are preserved.

use std::f64::consts::PI;

use crate::concat::UnitRenderer;
use crate::datagram::Datagram;
use crate::error::Result;
use crate::wav::i16_to_f32;

/// Raised-cosine fade-in of length `len`. The matching fade-out is `1 - w`.
pub fn fade_in_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|k| (0.5 - 0.5 * (PI * (k as f64 + 0.5) / len as f64).cos()) as f32)
        .collect()
}

fn pcm_to_f32(d: &Datagram) -> Result<Vec<f32>> {
    Ok(d.pcm16_samples()?.into_iter().map(i16_to_f32).collect())
}

/// Sample-domain renderer.
#[derive(Debug, Clone)]
pub struct OverlapAdd {
    max_crossfade: usize,
}

impl OverlapAdd {
    pub fn new(max_crossfade: usize) -> Self {
        Self { max_crossfade }
    }
}

impl UnitRenderer for OverlapAdd {
    fn render(&mut self, datagrams: &[Datagram], incoming: Option<&Datagram>) -> Result<Vec<f32>> {
        let total: usize = datagrams.iter().map(|d| d.duration() as usize).sum();
        let mut samples = Vec::with_capacity(total);
        for d in datagrams {
            samples.extend(pcm_to_f32(d)?);
        }

        if let Some(rc) = incoming {
            let rc = pcm_to_f32(rc)?;
            let len = rc.len().min(samples.len()).min(self.max_crossfade);
            let w = fade_in_window(len);
            for (k, s) in samples[..len].iter_mut().enumerate() {
                *s = *s * w[k] + rc[k] * (1.0 - w[k]);
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dg(samples: &[i16]) -> Datagram {
        Datagram::from_pcm16(samples).unwrap()
    }

    #[test]
    fn test_window_is_symmetric_and_complementary() {
        let w = fade_in_window(8);
        for k in 0..8 {
            let mirrored = 1.0 - w[7 - k];
            assert!((w[k] - mirrored).abs() < 1e-6, "k={k}");
            assert!(w[k] > 0.0 && w[k] < 1.0);
        }
        assert!(w.windows(2).all(|p| p[0] < p[1]));
    }

    #[test]
    fn test_no_incoming_is_passthrough() {
        let mut r = OverlapAdd::new(64);
        let out = r.render(&[dg(&[1, 2]), dg(&[3])], None).unwrap();
        assert_eq!(out, vec![i16_to_f32(1), i16_to_f32(2), i16_to_f32(3)]);
    }

    #[test]
    fn test_crossfade_capped() {
        let mut r = OverlapAdd::new(2);
        let unit = [dg(&[1000; 6])];
        let rc = dg(&[-1000; 6]);
        let out = r.render(&unit, Some(&rc)).unwrap();
        assert_eq!(out.len(), 6);
        assert!(out[0] < out[1]);
        assert_eq!(&out[2..], &[i16_to_f32(1000); 4]);
    }

    #[test]
    fn test_short_right_context_limits_region() {
        let mut r = OverlapAdd::new(100);
        let out = r.render(&[dg(&[500; 10])], Some(&dg(&[0; 3]))).unwrap();
        assert_eq!(out.len(), 10);
        assert!(out[..3].iter().all(|&s| s < i16_to_f32(500)));
        assert_eq!(&out[3..], &[i16_to_f32(500); 7]);
    }
}
