//! Offline song drives for export
//!
//! Exporters do not want real-time audio; they want either the raw register
//! write stream (NSF/text/driver output) or the whole song's PCM (WAV
//! export). `RegisterLogPlayer` wraps a sequencer around the recording
//! emulator and drives it to completion synchronously.

use std::sync::Arc;

use crate::apu::{RegisterLogApu, RegisterWrite};
use crate::player::sequencer::{LoopMode, SongPlayer};
use crate::song::{MachineRegion, Song};
use crate::{NestuneError, Result};

/// Hard cap on recorded length: one hour at 60 Hz. Legacy jump effects can
/// form cycles that never reach the song's end even without looping.
const MAX_RECORD_FRAMES: u32 = 60 * 60 * 60;

/// Sequencer driver that records register writes instead of making sound
pub struct RegisterLogPlayer {
    player: SongPlayer<RegisterLogApu>,
    frame_limit: u32,
}

impl RegisterLogPlayer {
    /// Recorder for a song, playing once through (no looping)
    pub fn new(song: Arc<Song>) -> Result<Self> {
        let region = song.region;
        Self::with_region(song, region)
    }

    /// Recorder rendering at an explicit playback region
    pub fn with_region(song: Arc<Song>, region: MachineRegion) -> Result<Self> {
        let mut player = SongPlayer::with_region(song, RegisterLogApu::new(44_100), region)?;
        player.set_loop_mode(LoopMode::None);
        Ok(RegisterLogPlayer {
            player,
            frame_limit: MAX_RECORD_FRAMES,
        })
    }

    /// Lower the recording length cap (frames at the playback frame rate)
    pub fn limit_frames(&mut self, frames: u32) {
        self.frame_limit = frames.min(MAX_RECORD_FRAMES);
    }

    /// Drive the song to completion and return every register write,
    /// in emission order, tagged with its frame number
    pub fn record_song(mut self) -> Result<Vec<RegisterWrite>> {
        self.run_to_end(|_| {})?;
        Ok(self.player.apu_mut().take_writes())
    }

    /// Drive the song to completion and return the concatenated PCM
    pub fn song_samples(mut self) -> Result<Vec<i16>> {
        let mut samples = Vec::new();
        self.run_to_end(|chunk| samples.extend_from_slice(chunk))?;
        Ok(samples)
    }

    /// Drive the song to completion, returning both the write stream and
    /// the PCM in one pass
    pub fn record_song_with_samples(mut self) -> Result<(Vec<RegisterWrite>, Vec<i16>)> {
        let mut samples = Vec::new();
        self.run_to_end(|chunk| samples.extend_from_slice(chunk))?;
        Ok((self.player.apu_mut().take_writes(), samples))
    }

    fn run_to_end<F: FnMut(&[i16])>(&mut self, mut sink: F) -> Result<()> {
        let mut frames = 0u32;
        while self.player.tick() {
            let chunk = self.player.drain_samples();
            sink(&chunk);
            frames += 1;
            if frames > self.frame_limit {
                log::warn!("recording aborted after {frames} frames");
                return Err(NestuneError::SongError(
                    "song never reaches its end (jump effect cycle?)".into(),
                ));
            }
        }
        Ok(())
    }
}
