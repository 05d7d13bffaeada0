//! PCM16 sample conversion and RIFF/WAVE export.
//!
//! Float samples use the `i16 / 32768` scale so a PCM16 signal survives the
//! round trip through `f32` bit-exactly.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Convert one PCM16 sample to `[-1.0, 1.0)`.
pub fn i16_to_f32(s: i16) -> f32 {
    s as f32 / 32768.0
}

/// Convert one float sample back to PCM16, rounding and clamping.
pub fn f32_to_i16(s: f32) -> i16 {
    (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Write `audio` to a mono 16-bit PCM WAV file.
///
/// 16-bit PCM is the format every player (and Android's `MediaPlayer`)
/// decodes reliably, and it is the native depth of waveform timelines.
pub fn write_wav(audio: &[f32], sample_rate: u32, output_path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output_path, spec)
        .with_context(|| format!("Cannot create WAV: {}", output_path.display()))?;
    for &s in audio {
        writer.write_sample(f32_to_i16(s)).context("WAV write error")?;
    }
    writer.finalize().context("WAV finalise error")?;
    info!(
        samples = audio.len(),
        seconds = audio.len() as f32 / sample_rate as f32,
        path = %output_path.display(),
        "WAV written"
    );
    Ok(())
}

/// Read a mono 16-bit PCM WAV file; returns `(sample_rate, samples)`.
pub fn read_wav_pcm16(path: &Path) -> Result<(u32, Vec<i16>)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Cannot open WAV: {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!(
            "Unsupported WAV format in {}: {} channel(s), {} bits, {:?}",
            path.display(),
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("WAV read error")?;
    Ok((spec.sample_rate, samples))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_roundtrip_is_exact() {
        for s in [i16::MIN, -12345, -1, 0, 1, 999, i16::MAX] {
            assert_eq!(f32_to_i16(i16_to_f32(s)), s);
        }
    }

    #[test]
    fn test_clamping() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
    }

    #[test]
    fn test_riff_header_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let audio: Vec<f32> = [0i16, 100, -100, 32767].iter().map(|&s| i16_to_f32(s)).collect();
        write_wav(&audio, 16_000, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(16), 16); // fmt chunk size
        assert_eq!(u16_at(20), 1); // PCM
        assert_eq!(u16_at(22), 1); // mono
        assert_eq!(u32_at(24), 16_000);
        assert_eq!(u32_at(28), 32_000); // byte rate
        assert_eq!(u16_at(32), 2); // block align
        assert_eq!(u16_at(34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(40), 8);
        assert_eq!(&bytes[44..48], &[0, 0, 100, 0]);

        let (rate, samples) = read_wav_pcm16(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(samples, vec![0, 100, -100, 32767]);
    }
}
