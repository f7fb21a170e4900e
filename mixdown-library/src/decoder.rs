//! Decoding encoded audio bytes into sample data

use mixdown_audio::{EngineError, SampleData};
use std::io::Cursor;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Errors that can occur while decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No audio track found in stream")]
    NoAudioTrack,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("Stream contained no samples")]
    Empty,
    #[error("Invalid sample data: {0}")]
    Sample(#[from] EngineError),
}

/// Turns an encoded byte buffer into sample data
pub trait Decode {
    fn decode(&self, bytes: &[u8]) -> Result<SampleData, DecodeError>;
}

/// Decoder backed by Symphonia, with optional resampling
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    target_sample_rate: Option<u32>,
}

impl SymphoniaDecoder {
    /// Decoder keeping the source sample rate
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder resampling everything to `target_sample_rate`
    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self {
            target_sample_rate: Some(target_sample_rate),
        }
    }

    pub fn target_sample_rate(&self) -> Option<u32> {
        self.target_sample_rate
    }

    /// Decode with a file extension hint for the format probe
    pub fn decode_with_hint(
        &self,
        bytes: &[u8],
        extension: Option<&str>,
    ) -> Result<SampleData, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut first_spec: Option<SignalSpec> = None;
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    tracing::debug!("stopping at undecodable packet: {e}");
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    tracing::debug!("skipping corrupt packet: {e}");
                    continue;
                }
            };

            let spec = *decoded.spec();
            if first_spec.is_none() {
                first_spec = Some(spec);
            }
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (channel_count, source_sample_rate) = stream_layout(first_spec.as_ref(), &codec_params);
        let data = SampleData::from_interleaved(&samples, channel_count, source_sample_rate)?;
        match self.target_sample_rate {
            Some(target) if target != source_sample_rate => resample(&data, target),
            _ => Ok(data),
        }
    }
}

impl Decode for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SampleData, DecodeError> {
        self.decode_with_hint(bytes, None)
    }
}

/// Channel count and sample rate of a stream. Decoded buffers are
/// authoritative; container metadata is the fallback.
fn stream_layout(decoded: Option<&SignalSpec>, params: &CodecParameters) -> (usize, u32) {
    let channels = decoded
        .map(|spec| spec.channels.count())
        .or_else(|| params.channels.map(|c| c.count()))
        .unwrap_or(2);
    let rate = decoded
        .map(|spec| spec.rate)
        .or(params.sample_rate)
        .unwrap_or(44_100);
    (channels, rate)
}

/// Resample planar data to `target_rate`
fn resample(data: &SampleData, target_rate: u32) -> Result<SampleData, DecodeError> {
    use rubato::{FftFixedInOut, Resampler};

    let source_rate = data.sample_rate();
    let channels = data.number_of_channels();
    let frames = data.length();

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, channels)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let planar: Vec<&[f32]> = (0..channels).filter_map(|ch| data.channel(ch)).collect();
    let chunk_size = resampler.input_frames_next();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];

    let mut pos = 0;
    while pos + chunk_size <= frames {
        let input: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..pos + chunk_size]).collect();
        let resampled = resampler
            .process(&input, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for (ch, block) in resampled.into_iter().enumerate() {
            output[ch].extend(block);
        }
        pos += chunk_size;
    }

    // Zero-pad the tail and keep only its proportional share of output
    if pos < frames {
        let remaining = frames - pos;
        let padded: Vec<Vec<f32>> = planar
            .iter()
            .map(|ch| {
                let mut v = ch[pos..].to_vec();
                v.resize(chunk_size, 0.0);
                v
            })
            .collect();
        let input: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();
        let resampled = resampler
            .process(&input, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        let keep = remaining * target_rate as usize / source_rate as usize;
        for (ch, block) in resampled.into_iter().enumerate() {
            output[ch].extend(&block[..keep.min(block.len())]);
        }
    }

    Ok(SampleData::new(output, target_rate)?)
}
