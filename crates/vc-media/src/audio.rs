//! Telephony audio helpers
//!
//! Provider media streams carry G.711 μ-law, 8 kHz, mono. Speech services
//! produce 16-bit little-endian PCM at higher rates, so outbound audio is
//! resampled and companded here.

use std::time::Duration;

use rubato::{FftFixedIn, Resampler};

use crate::error::Result;

/// Telephony sample rate
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate of OpenAI `pcm` speech output
pub const TTS_SAMPLE_RATE: u32 = 24_000;

/// One 20 ms frame of 8 kHz μ-law
pub const FRAME_BYTES: usize = 160;

/// Playback time of one frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Compand one linear sample to μ-law
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Expand one μ-law byte to a linear sample
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = i32::from((value >> 4) & 0x07);
    let mantissa = i32::from(value & 0x0F);
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn encode_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_mulaw(s)).collect()
}

/// Interpret raw bytes as 16-bit little-endian PCM; a trailing odd byte is dropped
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Band-limited mono resampler
///
/// Runs an FFT sinc resampler, so content above the target Nyquist rate is
/// filtered out instead of aliasing into the speech band. The filter delay
/// is trimmed and the output is `len * to_rate / from_rate` samples.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Ok(Vec::new());
    }
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let input: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32_768.0).collect();
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut position = 0;
    while input.len() - position >= resampler.input_frames_next() {
        let end = position + resampler.input_frames_next();
        let chunk: [&[f32]; 1] = [&input[position..end]];
        let block = resampler.process(&chunk[..], None)?;
        output.extend_from_slice(&block[0]);
        position = end;
    }
    if position < input.len() {
        let tail: [&[f32]; 1] = [&input[position..]];
        let block = resampler.process_partial(Some(&tail[..]), None)?;
        output.extend_from_slice(&block[0]);
    }
    // Flush the filter tail
    while output.len() < expected + delay {
        let block = resampler.process_partial::<&[f32]>(None, None)?;
        if block[0].is_empty() {
            break;
        }
        output.extend_from_slice(&block[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| (s * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16)
        .collect())
}

/// 24 kHz PCM16 speech output to 8 kHz μ-law
pub fn pcm24k_to_mulaw(pcm_bytes: &[u8]) -> Result<Vec<u8>> {
    let samples = pcm16_from_le_bytes(pcm_bytes);
    let resampled = resample(&samples, TTS_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE)?;
    Ok(encode_mulaw(&resampled))
}

/// Split μ-law audio into 20 ms frames; the last frame may be short
pub fn frames(mulaw: &[u8]) -> impl Iterator<Item = &[u8]> {
    mulaw.chunks(FRAME_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_encodes_to_0xff() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn test_companding_is_close() {
        for sample in [-30_000i16, -1_000, -50, 50, 1_000, 30_000] {
            let restored = mulaw_to_linear(linear_to_mulaw(sample));
            let error = (i32::from(restored) - i32::from(sample)).abs();
            assert!(
                error <= i32::from(sample).abs() / 16 + 8,
                "{} -> {}",
                sample,
                restored
            );
            assert_eq!(restored.signum(), sample.signum());
        }
    }

    #[test]
    fn test_extremes_are_clipped() {
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
    }

    #[test]
    fn test_pcm16_little_endian() {
        assert_eq!(pcm16_from_le_bytes(&[0x01, 0x00, 0xFF, 0xFF, 0x7F]), vec![1, -1]);
    }

    fn sine(freq: f64, rate: u32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f64 / f64::from(rate);
                (16_000.0 * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| f64::from(s).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_resample_24k_to_8k_length() {
        let samples = sine(440.0, 24_000, 2400);
        let resampled = resample(&samples, 24_000, 8_000).unwrap();
        assert_eq!(resampled.len(), 800);
        assert!(resample(&[], 24_000, 8_000).unwrap().is_empty());
        assert_eq!(resample(&samples, 8_000, 8_000).unwrap(), samples);
    }

    #[test]
    fn test_resample_keeps_speech_band() {
        let samples = sine(440.0, 24_000, 24_000);
        let resampled = resample(&samples, 24_000, 8_000).unwrap();
        // Skip the edges where the filter ramps in and out
        let body = &resampled[400..7_600];
        let ratio = rms(body) / rms(&samples);
        assert!(ratio > 0.9 && ratio < 1.1, "passband ratio {}", ratio);
    }

    #[test]
    fn test_resample_removes_tones_above_nyquist() {
        let samples = sine(5_000.0, 24_000, 24_000);
        let resampled = resample(&samples, 24_000, 8_000).unwrap();
        let body = &resampled[400..7_600];
        let ratio = rms(body) / rms(&samples);
        assert!(ratio < 0.05, "5 kHz tone leaked at ratio {}", ratio);
    }

    #[test]
    fn test_one_second_of_speech_is_fifty_frames() {
        let pcm = vec![0u8; 24_000 * 2];
        let mulaw = pcm24k_to_mulaw(&pcm).unwrap();
        assert_eq!(mulaw.len(), 8_000);
        assert_eq!(frames(&mulaw).count(), 50);
        assert!(frames(&mulaw).all(|f| f.len() == FRAME_BYTES));
    }
}
