//! Player configuration
//!
//! Mirrors the driver's tunable surface: output rate, how far the emulation
//! thread may run ahead, and metronome mixing. Configurations are plain
//! serde structs so hosts can persist them as JSON alongside their own
//! settings.

use serde::{Deserialize, Serialize};

use crate::song::MachineRegion;

/// Audio pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Frames the emulation thread may run ahead of playback.
    /// 0 selects the synchronous pipeline (no emulation thread).
    pub buffered_frames: usize,
    /// Playback region; emulation runs at this frame rate regardless of the
    /// region the song was authored for
    pub region: MachineRegion,
    /// Metronome settings
    pub metronome: MetronomeConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            sample_rate: 44_100,
            buffered_frames: 2,
            region: MachineRegion::Ntsc,
            metronome: MetronomeConfig::default(),
        }
    }
}

impl AudioConfig {
    /// Synchronous configuration (no buffering thread)
    pub fn synchronous(sample_rate: u32) -> Self {
        AudioConfig {
            sample_rate,
            buffered_frames: 0,
            ..Default::default()
        }
    }

    /// Buffered configuration running `frames` ahead
    pub fn buffered(sample_rate: u32, frames: usize) -> Self {
        AudioConfig {
            sample_rate,
            buffered_frames: frames,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.sample_rate < 8_000 || self.sample_rate > 192_000 {
            return Err(crate::NestuneError::ConfigError(format!(
                "sample rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.buffered_frames > 64 {
            return Err(crate::NestuneError::ConfigError(format!(
                "buffered frame count {} unreasonably large",
                self.buffered_frames
            )));
        }
        self.metronome.validate()
    }

    /// Worst-case pipeline latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        let frames = self.buffered_frames.max(1) as f32;
        frames * 1000.0 / self.region.frame_rate() as f32
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::NestuneError::ConfigError(format!("bad audio config: {e}")))
    }

    /// Serialize the configuration to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::NestuneError::ConfigError(e.to_string()))
    }
}

/// Metronome mixing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetronomeConfig {
    /// Whether the click is mixed at all
    pub enabled: bool,
    /// Click volume scalar, 0.0..=1.0
    pub volume: f32,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        MetronomeConfig {
            enabled: false,
            volume: 0.5,
        }
    }
}

impl MetronomeConfig {
    fn validate(&self) -> crate::Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(crate::NestuneError::ConfigError(format!(
                "metronome volume {} outside 0..=1",
                self.volume
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AudioConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_silly_sample_rates() {
        let mut config = AudioConfig::default();
        config.sample_rate = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_metronome_volume() {
        let mut config = AudioConfig::default();
        config.metronome.volume = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let mut config = AudioConfig::buffered(48_000, 4);
        config.region = MachineRegion::Pal;
        config.metronome.enabled = true;

        let json = config.to_json().unwrap();
        let parsed = AudioConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn latency_scales_with_buffering() {
        let sync = AudioConfig::synchronous(44_100);
        let buffered = AudioConfig::buffered(44_100, 4);
        assert!(buffered.latency_ms() > sync.latency_ms());
    }
}
