//! Real-time audio output
//!
//! A reference rodio-backed sink for hosts that do not bring their own audio
//! backend. The platform stream pulls frames from an [`crate::AudioPlayer`];
//! the driver core never calls into the platform layer.

mod audio_device;

pub use audio_device::AudioDevice;
