//! NES APU playback driver for tracker-style songs
//!
//! `nestune` turns a pattern-based musical score into a deterministic stream
//! of NES APU register writes and PCM audio. It drives an external sound-chip
//! emulator (any type implementing [`ApuEmulator`]) once per hardware frame,
//! translating notes and instrument envelopes into register images for the
//! 2A03 channels and a set of expansion chips (VRC6, MMC5, Sunsoft 5B).
//!
//! # Features
//! - Two tempo models: the legacy tracker speed/tempo divider and
//!   groove-based frame sequencing, with NTSC/PAL frame adaptation
//! - Per-channel state machines for ~13 channel variants
//! - Fast seeking through shadow registers (no intermediate audio rendering)
//! - Buffered or synchronous audio pipeline with bounded backpressure
//! - Metronome click mixing and live note preview
//! - Register-write stream recording and delta optimization for export
//!
//! # Crate feature flags
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//! - `export-wav` (opt-in): WAV export of rendered song audio (enables `hound`)
//!
//! # Quick start
//! ## Render a song to samples
//! ```no_run
//! use nestune::player::RegisterLogPlayer;
//! use nestune::song::Song;
//! use std::sync::Arc;
//! let song = Arc::new(Song::default());
//! let samples = RegisterLogPlayer::new(song).unwrap().song_samples().unwrap();
//! ```
//!
//! ## Buffered playback
//! ```no_run
//! use nestune::apu::RegisterLogApu;
//! use nestune::config::AudioConfig;
//! use nestune::player::{AudioPlayer, FrameStatus, SongPlayer};
//! use nestune::song::Song;
//! use std::sync::Arc;
//! let song = Arc::new(Song::default());
//! let sequencer = SongPlayer::new(Arc::clone(&song), RegisterLogApu::new(44_100)).unwrap();
//! let mut player = AudioPlayer::new(sequencer, AudioConfig::default()).unwrap();
//! player.start().unwrap();
//! loop {
//!     match player.next_frame() {
//!         FrameStatus::Frame(frame) => { /* hand frame.samples to the sink */ }
//!         FrameStatus::Starved => { /* output silence, emulation will catch up */ }
//!         FrameStatus::Done => break,
//!     }
//! }
//! player.stop();
//! ```

#![warn(missing_docs)]

pub mod apu; // APU register map and emulator collaborator interface
pub mod channels; // Per-channel note-to-register state machines
pub mod config; // Player configuration
#[cfg(feature = "export-wav")]
pub mod export; // WAV export helpers
pub mod fixed_point; // Fixed-point arithmetic for pitch slides
pub mod optimizer; // Register-write delta optimizer
pub mod player; // Sequencer and audio pipeline
pub mod song; // Score data model
#[cfg(feature = "streaming")]
pub mod streaming; // Audio Output & Streaming
pub mod tempo; // Tempo engines and frame adaptation

/// Error types for playback driver operations
#[derive(thiserror::Error, Debug)]
pub enum NestuneError {
    /// Invalid player or pipeline configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Song structure that cannot be played (no channels, bad loop point)
    #[error("Song error: {0}")]
    SongError(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Error writing exported audio
    #[error("Audio export error: {0}")]
    ExportError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for NestuneError {
    fn from(msg: String) -> Self {
        NestuneError::Other(msg)
    }
}

impl From<&str> for NestuneError {
    fn from(msg: &str) -> Self {
        NestuneError::Other(msg.to_string())
    }
}

/// Result type for playback driver operations
pub type Result<T> = std::result::Result<T, NestuneError>;

// Public API exports
pub use apu::{ApuEmulator, ChannelKind, RegisterLogApu, RegisterWrite};
pub use config::{AudioConfig, MetronomeConfig};
pub use optimizer::{ExpansionMask, RegisterWriteOptimizer};
pub use player::{AudioPlayer, FrameStatus, LivePlayer, LoopMode, RegisterLogPlayer, SongPlayer};
pub use song::{MachineRegion, NoteLocation, Song};
pub use tempo::TempoMode;
