pub mod config;
pub mod correction;
pub mod device;
pub mod dsp;
pub mod editor;
pub mod error;
pub mod pitch_table;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod simulator;
pub mod spectral;
pub mod timeline;
pub mod tone;
pub mod types;

#[cfg(feature = "audio")]
pub mod audio_input;
