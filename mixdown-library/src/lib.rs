//! Collaborators for mixdown - decoding, file loading, devices and config

mod config;
mod decoder;
mod devices;
mod source;

pub use config::Config;
pub use decoder::{Decode, DecodeError, SymphoniaDecoder};
pub use devices::{CpalDevices, DeviceDescriptor, DeviceEnumerator, DeviceError};
pub use source::{
    is_supported, load_audio_source, AudioSource, LoadError, LoadOptions, SUPPORTED_FILE_TYPES,
};
