use std::path::Path;
use std::sync::Arc;

use crate::engine::backend::{BackendError, BackendResult};

/// A sample decoded to mono `f32` frames at its native rate.
#[derive(Debug, Clone)]
pub struct DecodedSample {
    pub frames: Arc<[f32]>,
    pub sample_rate: u32,
}

impl DecodedSample {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames.len() as f32 / self.sample_rate as f32
    }
}

fn wav_error(path: &Path, e: hound::Error) -> BackendError {
    BackendError(format!("{}: {}", path.display(), e))
}

/// Decode a WAV file, folding multichannel audio down to mono.
pub fn decode_wav(path: &Path) -> BackendResult<DecodedSample> {
    let mut reader = hound::WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| wav_error(path, e))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| wav_error(path, e))?
        }
    };

    let frames: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    log::debug!(
        target: "audio::samples",
        "decoded {} ({} frames, {} Hz, {} ch)",
        path.display(),
        frames.len(),
        spec.sample_rate,
        channels
    );

    Ok(DecodedSample {
        frames: frames.into(),
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_mono_int_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        write_wav(&path, 1, &[0, 16384, -16384, i16::MAX]);

        let decoded = decode_wav(&path).unwrap();
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.frames.len(), 4);
        assert_eq!(decoded.frames[0], 0.0);
        assert!((decoded.frames[1] - 0.5).abs() < 1e-4);
        assert!((decoded.frames[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn folds_stereo_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.wav");
        write_wav(&path, 2, &[16384, 0, 16384, 16384]);

        let decoded = decode_wav(&path).unwrap();
        assert_eq!(decoded.frames.len(), 2);
        assert!((decoded.frames[0] - 0.25).abs() < 1e-4);
        assert!((decoded.frames[1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn decodes_float_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [0.25f32, -0.75] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = decode_wav(&path).unwrap();
        assert_eq!(&decoded.frames[..], &[0.25, -0.75]);
        assert!((decoded.duration_secs() - 2.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.wav");
        std::fs::write(&path, b"not audio").unwrap();

        let err = decode_wav(&path).unwrap_err();
        assert!(err.0.contains("f.wav"));
    }
}
