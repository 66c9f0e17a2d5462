//! # Wav Decoding
//!
//! Reads the normalized waveform file into the 32-bit float mono samples
//! the model consumes. By the time a file reaches this module it has been
//! through ffmpeg, so anything other than 16kHz mono PCM indicates a bug
//! upstream and is rejected loudly.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;

/// Sample rate every waveform in this pipeline uses.
pub const SAMPLE_RATE: u32 = 16_000;

/// Read a wav file into mono f32 samples in [-1.0, 1.0].
///
/// Multi-channel input is averaged down to one channel; this should never
/// fire in practice (ffmpeg already downmixed with `-ac 1`) but keeps the
/// function total over valid wav files.
pub fn read_mono_f32(path: &Path) -> Result<Vec<f32>> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open waveform {}", path.display()))?;
    let (header, data) = wav::read(&mut file)
        .with_context(|| format!("failed to parse waveform {}", path.display()))?;

    if header.sampling_rate != SAMPLE_RATE {
        return Err(anyhow!(
            "unexpected sample rate {} (want {})",
            header.sampling_rate,
            SAMPLE_RATE
        ));
    }

    let samples = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => pcm_to_float(&samples),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok(downmix(samples, header.channel_count))
}

/// Convert 16-bit PCM samples to floats in [-1.0, 1.0].
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Average interleaved channels down to mono.
fn downmix(samples: Vec<f32>, channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }

    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
