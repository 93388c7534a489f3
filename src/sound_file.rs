//! Thin adapter over file-backed sample I/O.
//!
//! WAV is handled directly through `hound` (the teacher's existing
//! dependency), streaming sample-accurate reads and seeks straight off
//! disk. Every other extension is decoded once, up front, with `symphonia`
//! (grounded in `poodle64-thoth`'s `audio::decode` module) into an
//! in-memory interleaved `f32` buffer, since general compressed formats
//! cannot seek to an arbitrary frame without re-decoding from the nearest
//! keyframe. Both backends present the same `seek`/`read_float` contract to
//! callers.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct SoundFileInfo {
    pub frames: u64,
    pub channels: usize,
    pub sample_rate: u32,
}

enum ReadBackend {
    Wav {
        reader: WavReader<BufReader<File>>,
        spec: WavSpec,
    },
    /// Fully decoded interleaved f32 samples, plus the next frame to read.
    Decoded { samples: Vec<f32>, cursor: usize },
}

pub struct SoundFileReader {
    path: PathBuf,
    info: SoundFileInfo,
    backend: ReadBackend,
}

impl SoundFileReader {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        if is_wav {
            Self::open_wav(path)
        } else {
            Self::open_decoded(path)
        }
    }

    fn open_wav(path: &Path) -> Result<Self, EngineError> {
        let reader = WavReader::open(path).map_err(|e| EngineError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let spec = reader.spec();
        let info = SoundFileInfo {
            frames: reader.duration() as u64,
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
        };
        Ok(Self {
            path: path.to_path_buf(),
            info,
            backend: ReadBackend::Wav { reader, spec },
        })
    }

    fn open_decoded(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| EngineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::Decode {
                path: path.to_path_buf(),
                reason: format!("unsupported format: {e}"),
            })?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::Decode {
                path: path.to_path_buf(),
                reason: "no decodeable audio track found".to_string(),
            })?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params.sample_rate.ok_or_else(|| EngineError::Decode {
            path: path.to_path_buf(),
            reason: "unknown sample rate".to_string(),
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(1)
            .max(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode {
                path: path.to_path_buf(),
                reason: format!("unsupported codec: {e}"),
            })?;

        let mut samples = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(EngineError::Decode {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => {
                    return Err(EngineError::Decode {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
            };
            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let sbuf = sample_buf.get_or_insert_with(|| SampleBuffer::<f32>::new(capacity, spec));
            if (sbuf.capacity() as u64) < capacity {
                *sbuf = SampleBuffer::<f32>::new(capacity, spec);
            }
            sbuf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sbuf.samples());
        }

        let frames = (samples.len() / channels) as u64;
        let info = SoundFileInfo {
            frames,
            channels,
            sample_rate,
        };
        Ok(Self {
            path: path.to_path_buf(),
            info,
            backend: ReadBackend::Decoded { samples, cursor: 0 },
        })
    }

    pub fn info(&self) -> SoundFileInfo {
        self.info
    }

    /// Seeks to `frame`, clamped to the file's length by the caller.
    pub fn seek(&mut self, frame: u64) -> Result<(), EngineError> {
        match &mut self.backend {
            ReadBackend::Wav { reader, .. } => {
                reader.seek(frame as u32).map_err(|e| EngineError::Decode {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
            ReadBackend::Decoded { cursor, .. } => {
                *cursor = (frame as usize) * self.info.channels;
                Ok(())
            }
        }
    }

    /// Reads up to `frames` frames of interleaved samples into `dst`
    /// (`dst.len()` must be `>= frames * channels`). Returns the number of
    /// frames actually read; fewer than requested means end of file.
    pub fn read_float(&mut self, dst: &mut [f32], frames: usize) -> Result<usize, EngineError> {
        let channels = self.info.channels;
        let wanted = frames * channels;
        debug_assert!(dst.len() >= wanted);

        match &mut self.backend {
            ReadBackend::Wav { reader, spec } => {
                let mut n = 0usize;
                match (spec.sample_format, spec.bits_per_sample) {
                    (SampleFormat::Float, _) => {
                        for (i, sample) in reader.samples::<f32>().take(wanted).enumerate() {
                            dst[i] = sample.map_err(|e| EngineError::Decode {
                                path: self.path.clone(),
                                reason: e.to_string(),
                            })?;
                            n = i + 1;
                        }
                    }
                    (SampleFormat::Int, bits) => {
                        let scale = 1.0_f32 / (1u64 << (bits - 1)) as f32;
                        for (i, sample) in reader.samples::<i32>().take(wanted).enumerate() {
                            let sample = sample.map_err(|e| EngineError::Decode {
                                path: self.path.clone(),
                                reason: e.to_string(),
                            })?;
                            dst[i] = sample as f32 * scale;
                            n = i + 1;
                        }
                    }
                }
                Ok(n / channels)
            }
            ReadBackend::Decoded { samples, cursor } => {
                let available = samples.len().saturating_sub(*cursor);
                let take = wanted.min(available);
                dst[..take].copy_from_slice(&samples[*cursor..*cursor + take]);
                *cursor += take;
                Ok(take / channels)
            }
        }
    }
}

/// Opens just the header of `path` to report its channel count, without
/// decoding any audio. Supplements `spec.md`: used by `Driver::resolve_ports`
/// to truncate the default output port list to the playback file's channel
/// count, matching `examples/original_source`'s `query_audio_file_channels`.
pub fn query_channels(path: &Path) -> Result<usize, EngineError> {
    Ok(SoundFileReader::open(path)?.info().channels)
}

/// Always WAV, PCM signed 32-bit, matching `spec.md` §6's record-file format.
pub struct SoundFileWriter {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
}

impl SoundFileWriter {
    pub fn create(path: &Path, channels: usize, sample_rate: u32) -> Result<Self, EngineError> {
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Int,
        };
        let file = File::create(path).map_err(|e| EngineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let writer =
            WavWriter::new(BufWriter::new(file), spec).map_err(|e| EngineError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn write_float(&mut self, src: &[f32], frames: usize) -> Result<usize, EngineError> {
        let channels = self.writer_channels();
        let wanted = frames * channels;
        debug_assert!(src.len() >= wanted);
        for &sample in &src[..wanted] {
            let scaled = (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
            self.writer
                .write_sample(scaled)
                .map_err(|_| EngineError::ShortWrite {
                    path: self.path.clone(),
                    requested: frames,
                    actual: 0,
                })?;
        }
        Ok(frames)
    }

    fn writer_channels(&self) -> usize {
        self.writer.spec().channels as usize
    }

    pub fn finalize(self) -> Result<(), EngineError> {
        self.writer.finalize().map_err(|e| EngineError::Decode {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}
