//! WAV file I/O for the command-line front end
//!
//! The job pipeline only ever sees decoded [`AudioBuffer`]s. Decoding and
//! encoding live here so the CLI can act as the external collaborator that
//! owns files; nothing in `dsp`, `device` or `jobs` calls into this module.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::AudioBuffer;
use crate::error::{DrcError, Result};

/// Export format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    /// Bit depth: 16, 24, or 32 (32 writes IEEE float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat { bit_depth: 16 }
    }
}

impl ExportFormat {
    pub fn new(bit_depth: u16) -> Self {
        ExportFormat { bit_depth }
    }
}

/// Import a WAV file as a float buffer at its native sample rate
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidAudio` - If the file is not a valid WAV file
/// * `UnsupportedFormat` - For integer bit depths other than 8/16/24/32
pub fn import_audio(path: &Path) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(DrcError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let reader = WavReader::open(path).map_err(|e| DrcError::InvalidAudio {
        reason: format!("Failed to open WAV file: {}", e),
        source: Some(Box::new(e)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;

    AudioBuffer::from_interleaved(&samples, channels, spec.sample_rate)
}

/// Export a buffer to a WAV file at the buffer's sample rate
///
/// # Errors
/// * `UnsupportedFormat` - For bit depths other than 16, 24, 32
/// * `Io` - If the file cannot be written
pub fn export_audio(buffer: &AudioBuffer, path: &Path, format: ExportFormat) -> Result<()> {
    let sample_format = match format.bit_depth {
        16 | 24 => SampleFormat::Int,
        32 => SampleFormat::Float,
        other => {
            return Err(DrcError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", other),
            })
        }
    };

    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: format.bit_depth,
        sample_format,
    };

    let mut writer = WavWriter::create(path, spec).map_err(wav_io_error)?;
    let interleaved = buffer.to_interleaved();

    match format.bit_depth {
        16 => {
            for sample in interleaved {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(wav_io_error)?;
            }
        }
        24 => {
            for sample in interleaved {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(wav_io_error)?;
            }
        }
        _ => {
            for sample in interleaved {
                writer.write_sample(sample).map_err(wav_io_error)?;
            }
        }
    }

    writer.finalize().map_err(wav_io_error)?;
    Ok(())
}

fn wav_io_error(e: hound::Error) -> DrcError {
    match e {
        hound::Error::IoError(io) => DrcError::Io(io),
        other => DrcError::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| DrcError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(Box::new(e)),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(DrcError::UnsupportedFormat {
                        format: format!("{}-bit integer audio", bits_per_sample),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::sine;
    use tempfile::tempdir;

    #[test]
    fn test_float_export_import_is_lossless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = sine(440.0, -6.0, 0.25, 8000, 2).unwrap();

        export_audio(&tone, &path, ExportFormat::new(32)).unwrap();
        let loaded = import_audio(&path).unwrap();

        assert_eq!(loaded.sample_rate(), 8000);
        assert_eq!(loaded.num_channels(), 2);
        assert_eq!(loaded, tone);
    }

    #[test]
    fn test_16_bit_export_import_is_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone16.wav");
        let tone = sine(1000.0, -6.0, 0.1, 16000, 1).unwrap();

        export_audio(&tone, &path, ExportFormat::default()).unwrap();
        let loaded = import_audio(&path).unwrap();

        assert_eq!(loaded.len(), tone.len());
        assert!(loaded.max_abs_diff(&tone).unwrap() < 1e-3);
    }

    #[test]
    fn test_missing_file() {
        let err = import_audio(Path::new("/nonexistent/input.wav")).unwrap_err();
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let dir = tempdir().unwrap();
        let tone = sine(440.0, -6.0, 0.1, 8000, 1).unwrap();
        let err = export_audio(&tone, &dir.path().join("x.wav"), ExportFormat::new(12)).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
    }
}
