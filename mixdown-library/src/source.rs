//! Loading audio files into playable sources

use crate::decoder::{DecodeError, SymphoniaDecoder};
use mixdown_audio::{AudioClip, SampleData};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// File extensions the decoder is built to handle
pub const SUPPORTED_FILE_TYPES: &[&str] = &["wav", "mp3", "flac", "ogg", "oga", "aac", "m4a"];

static NEXT_SOURCE: AtomicU64 = AtomicU64::new(1);

/// Errors that can occur while loading a source
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown file type for {0}; set allow_foreign_file_types to load it anyway")]
    UnknownFileType(PathBuf),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Options for [`load_audio_source`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Attempt files whose extension is missing or not in [`SUPPORTED_FILE_TYPES`]
    pub allow_foreign_file_types: bool,
    /// Resample to this rate while decoding
    pub target_sample_rate: Option<u32>,
}

/// A decoded file ready to become a clip
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub id: u64,
    pub path: PathBuf,
    pub data: Arc<SampleData>,
    /// Size of the encoded file in bytes
    pub byte_length: usize,
    /// When the source finished loading
    pub timestamp: SystemTime,
}

impl AudioSource {
    /// Detached clip playing this source
    pub fn to_clip(&self) -> AudioClip {
        AudioClip::new(self.data.clone())
    }
}

/// Whether `path` has one of the supported extensions
pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_FILE_TYPES.iter().any(|t| *t == ext))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Read and decode the file at `path`
pub fn load_audio_source(path: &Path, options: LoadOptions) -> Result<AudioSource, LoadError> {
    let ext = extension(path);
    if !is_supported(path) {
        if !options.allow_foreign_file_types {
            return Err(LoadError::UnknownFileType(path.to_path_buf()));
        }
        tracing::warn!(
            path = %path.display(),
            "file type is not known to be supported, decoding anyway"
        );
    }

    let bytes = std::fs::read(path)?;
    let decoder = match options.target_sample_rate {
        Some(rate) => SymphoniaDecoder::with_sample_rate(rate),
        None => SymphoniaDecoder::new(),
    };
    let data = decoder.decode_with_hint(&bytes, ext.as_deref())?;
    tracing::info!(
        path = %path.display(),
        duration = data.duration(),
        channels = data.number_of_channels(),
        "loaded audio source"
    );

    Ok(AudioSource {
        id: NEXT_SOURCE.fetch_add(1, Ordering::Relaxed),
        path: path.to_path_buf(),
        data: Arc::new(data),
        byte_length: bytes.len(),
        timestamp: SystemTime::now(),
    })
}
