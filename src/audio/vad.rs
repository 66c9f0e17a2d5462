//! # Voice Activity Detection
//!
//! Energy-based detection of speech spans in a 16kHz mono waveform. Used
//! to skip long silent stretches before decoding: each detected span is
//! transcribed separately, so a half-hour recording with two minutes of
//! speech does not pay for decoding silence.
//!
//! This is a deliberately simple frame-RMS detector, not a learned model.
//! The two knobs mirror the request options: the minimum silence gap that
//! separates two spans, and the padding added around each span so word
//! onsets are not clipped.

use crate::audio::wave::SAMPLE_RATE;

/// Analysis frame length: 30ms at 16kHz.
const FRAME_SAMPLES: usize = 480;

/// RMS level below which a frame counts as silence. Tuned against the
/// post-ffmpeg waveform (the filter chain already applies gain).
const SILENCE_RMS: f32 = 0.01;

/// Spans shorter than this after merging are treated as noise and dropped.
const MIN_SPEECH_MS: u32 = 250;

/// A contiguous run of speech, in sample offsets into the waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start: usize,
    pub end: usize,
}

impl SpeechSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Detect speech spans in `samples`.
///
/// Frames are classified by RMS energy; consecutive speech frames form
/// candidate spans, spans separated by less than `min_silence_ms` of
/// silence are merged, each surviving span is padded by `speech_pad_ms` on
/// both sides (clamped to the waveform), and spans shorter than
/// [`MIN_SPEECH_MS`] are discarded.
///
/// Returns spans in chronological order. Silence-only input yields no
/// spans.
pub fn detect_speech_spans(
    samples: &[f32],
    min_silence_ms: u32,
    speech_pad_ms: u32,
) -> Vec<SpeechSpan> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut raw_spans: Vec<SpeechSpan> = Vec::new();
    let mut current: Option<SpeechSpan> = None;

    for (i, frame) in samples.chunks(FRAME_SAMPLES).enumerate() {
        let start = i * FRAME_SAMPLES;
        let end = start + frame.len();

        if frame_rms(frame) >= SILENCE_RMS {
            match current.as_mut() {
                Some(span) => span.end = end,
                None => current = Some(SpeechSpan { start, end }),
            }
        } else if let Some(span) = current.take() {
            raw_spans.push(span);
        }
    }
    if let Some(span) = current {
        raw_spans.push(span);
    }

    let min_gap = ms_to_samples(min_silence_ms);
    let pad = ms_to_samples(speech_pad_ms);
    let min_speech = ms_to_samples(MIN_SPEECH_MS);

    // Merge spans whose silence gap is shorter than the configured minimum.
    let mut merged: Vec<SpeechSpan> = Vec::new();
    for span in raw_spans {
        match merged.last_mut() {
            Some(prev) if span.start.saturating_sub(prev.end) < min_gap => {
                prev.end = span.end;
            }
            _ => merged.push(span),
        }
    }

    merged
        .into_iter()
        .filter(|span| span.len() >= min_speech)
        .map(|span| SpeechSpan {
            start: span.start.saturating_sub(pad),
            end: (span.end + pad).min(samples.len()),
        })
        .collect()
}

fn frame_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let energy: f32 = frame.iter().map(|s| s * s).sum();
    (energy / frame.len() as f32).sqrt()
}

fn ms_to_samples(ms: u32) -> usize {
    (ms as usize * SAMPLE_RATE as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(ms: u32) -> Vec<f32> {
        vec![0.0; ms_to_samples(ms)]
    }

    fn tone(ms: u32) -> Vec<f32> {
        (0..ms_to_samples(ms))
            .map(|i| (i as f32 * 0.3).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_silence_yields_no_spans() {
        let spans = detect_speech_spans(&silence(2000), 700, 250);
        assert!(spans.is_empty());
    }

    #[test]
    fn test_continuous_tone_is_one_span() {
        let spans = detect_speech_spans(&tone(1000), 700, 0);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, ms_to_samples(1000));
    }

    #[test]
    fn test_short_gap_is_merged() {
        let mut samples = tone(500);
        samples.extend(silence(300)); // below the 700ms threshold
        samples.extend(tone(500));

        let spans = detect_speech_spans(&samples, 700, 0);
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn test_long_gap_splits_spans() {
        let mut samples = tone(500);
        samples.extend(silence(1500));
        samples.extend(tone(500));

        let spans = detect_speech_spans(&samples, 700, 0);
        assert_eq!(spans.len(), 2);
        assert!(spans[0].end <= spans[1].start);
    }

    #[test]
    fn test_padding_extends_span_within_bounds() {
        let mut samples = silence(1000);
        samples.extend(tone(500));
        samples.extend(silence(1000));
        let total = samples.len();

        let padded = detect_speech_spans(&samples, 700, 250);
        let bare = detect_speech_spans(&samples, 700, 0);
        assert_eq!(padded.len(), 1);
        assert_eq!(bare.len(), 1);
        assert!(padded[0].start < bare[0].start);
        assert!(padded[0].end > bare[0].end);
        assert!(padded[0].end <= total);
    }

    #[test]
    fn test_blip_shorter_than_min_speech_dropped() {
        let mut samples = silence(1000);
        samples.extend(tone(60)); // 60ms blip
        samples.extend(silence(1000));

        let spans = detect_speech_spans(&samples, 700, 0);
        assert!(spans.is_empty());
    }
}
