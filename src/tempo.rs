//! Tempo engines and frame adaptation
//!
//! Playback time advances one hardware frame per emulation tick. Which rows
//! those frames land on is decided by one of two mutually exclusive tempo
//! models:
//!
//! - **Tracker tempo**: the legacy speed/tempo integer divider. Reproduced
//!   bit-for-bit, including its truncating division, so imported modules
//!   keep their exact row timing.
//! - **Groove tempo**: a repeating sequence of per-row frame counts.
//!   Pad entries consume frames without advancing the row, letting grooves
//!   hit non-integer average row lengths.
//!
//! When the song's authored region differs from the playback region, a small
//! frame-adaptation envelope runs 0 or 2 emulation frames on some ticks so
//! the average tempo survives the 60/50 Hz mismatch.

use crate::song::MachineRegion;
use crate::{NestuneError, Result};

/// Tempo model selected at the song level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TempoMode {
    /// Legacy divider: `speed` ticks per row scaled by `tempo`
    Tracker {
        /// Ticks per row divider (1..=31)
        speed: u8,
        /// Beats-per-minute style scale (32..=255)
        tempo: u8,
    },
    /// Repeating per-row frame counts
    Groove {
        /// Groove entries, applied cyclically
        entries: Vec<GrooveEntry>,
    },
}

impl Default for TempoMode {
    fn default() -> Self {
        TempoMode::Tracker {
            speed: 6,
            tempo: 150,
        }
    }
}

impl TempoMode {
    /// Groove from plain frame counts, no pad entries
    pub fn groove(frames: &[u8]) -> Self {
        TempoMode::Groove {
            entries: frames.iter().map(|&f| GrooveEntry::row(f)).collect(),
        }
    }

    /// Structural checks
    pub fn validate(&self) -> Result<()> {
        match self {
            TempoMode::Tracker { speed, tempo } => {
                if *speed == 0 || *speed > 31 {
                    return Err(NestuneError::SongError(format!(
                        "tracker speed {speed} outside 1..=31"
                    )));
                }
                if *tempo < 32 {
                    return Err(NestuneError::SongError(format!("tempo {tempo} below 32")));
                }
                Ok(())
            }
            TempoMode::Groove { entries } => {
                if entries.is_empty() {
                    return Err(NestuneError::SongError("empty groove".into()));
                }
                if entries.iter().all(|e| e.pad) {
                    return Err(NestuneError::SongError("groove never advances a row".into()));
                }
                if entries.iter().any(|e| e.frames == 0) {
                    return Err(NestuneError::SongError("groove entry of zero frames".into()));
                }
                Ok(())
            }
        }
    }
}

/// One groove step: a frame count, optionally marked as padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrooveEntry {
    /// Frames this entry lasts
    pub frames: u8,
    /// Pad entries consume their frames without advancing the row
    pub pad: bool,
}

impl GrooveEntry {
    /// Entry that plays a row for `frames` frames
    pub fn row(frames: u8) -> Self {
        GrooveEntry { frames, pad: false }
    }

    /// Entry that idles for `frames` frames
    pub fn pad(frames: u8) -> Self {
        GrooveEntry { frames, pad: true }
    }
}

// =============================================================================
// Tracker tempo
// =============================================================================

/// Legacy speed/tempo divider.
///
/// Each tick subtracts `(tempo * 24) / speed` from a running counter; a row
/// advances exactly on the ticks where the counter has reached zero or below,
/// at which point the counter is reseeded by adding
/// `60 * ticks_per_second - (tempo * 24) % speed`. All divisions truncate.
#[derive(Debug, Clone)]
struct TrackerTempo {
    speed: u32,
    tempo: u32,
    ticks_per_second: u32,
    counter: i32,
}

impl TrackerTempo {
    fn new(speed: u8, tempo: u8, region: MachineRegion) -> Self {
        TrackerTempo {
            speed: speed as u32,
            tempo: tempo as u32,
            ticks_per_second: region.frame_rate(),
            counter: 0,
        }
    }

    fn decrement(&self) -> i32 {
        ((self.tempo * 24) / self.speed) as i32
    }

    fn reseed(&self) -> i32 {
        (60 * self.ticks_per_second) as i32 - ((self.tempo * 24) % self.speed) as i32
    }

    fn should_advance(&self) -> bool {
        self.counter <= 0
    }

    fn update(&mut self) {
        if self.counter <= 0 {
            self.counter += self.reseed();
        }
        self.counter -= self.decrement();
    }

    fn set_speed(&mut self, speed: u8) {
        if speed >= 1 {
            self.speed = speed as u32;
        }
    }

    fn frames_per_row(&self) -> u32 {
        let decrement = self.decrement().max(1);
        ((self.reseed() + decrement - 1) / decrement).max(1) as u32
    }
}

// =============================================================================
// Groove tempo
// =============================================================================

/// Cyclic groove iterator. A row advances on the first frame of every
/// non-pad entry.
#[derive(Debug, Clone)]
struct GrooveTempo {
    entries: Vec<GrooveEntry>,
    index: usize,
    countdown: u8,
}

impl GrooveTempo {
    fn new(entries: Vec<GrooveEntry>) -> Self {
        let countdown = entries[0].frames;
        GrooveTempo {
            entries,
            index: 0,
            countdown,
        }
    }

    fn should_advance(&self) -> bool {
        let entry = self.entries[self.index];
        !entry.pad && self.countdown == entry.frames
    }

    fn update(&mut self) {
        self.countdown -= 1;
        if self.countdown == 0 {
            self.index = (self.index + 1) % self.entries.len();
            self.countdown = self.entries[self.index].frames;
        }
    }

    fn frames_per_row(&self) -> u32 {
        let total: u32 = self.entries.iter().map(|e| e.frames as u32).sum();
        let rows = self.entries.iter().filter(|e| !e.pad).count().max(1) as u32;
        (total / rows).max(1)
    }

    #[cfg(test)]
    fn index(&self) -> usize {
        self.index
    }
}

// =============================================================================
// Frame adaptation
// =============================================================================

// A 60 Hz song on 50 Hz hardware needs six emulation frames per five ticks;
// the reverse direction needs five per six. The irregular entry sits last so
// playback starts with a normal frame.
const ADAPT_NTSC_ON_PAL: &[u8] = &[1, 1, 1, 1, 2];
const ADAPT_PAL_ON_NTSC: &[u8] = &[1, 1, 1, 1, 1, 0];
const ADAPT_IDENTITY: &[u8] = &[1];

/// Per-tick emulation frame counts compensating a region mismatch
#[derive(Debug, Clone)]
struct FrameAdaptation {
    envelope: &'static [u8],
    index: usize,
}

impl FrameAdaptation {
    fn new(song_region: MachineRegion, playback_region: MachineRegion) -> Self {
        let envelope = match (song_region, playback_region) {
            (MachineRegion::Ntsc, MachineRegion::Pal) => ADAPT_NTSC_ON_PAL,
            (MachineRegion::Pal, MachineRegion::Ntsc) => ADAPT_PAL_ON_NTSC,
            _ => ADAPT_IDENTITY,
        };
        FrameAdaptation { envelope, index: 0 }
    }

    fn next(&mut self) -> u32 {
        let count = self.envelope[self.index];
        self.index = (self.index + 1) % self.envelope.len();
        count as u32
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
enum TempoModel {
    Tracker(TrackerTempo),
    Groove(GrooveTempo),
}

/// The tempo engine driving a [`crate::player::SongPlayer`].
///
/// Once per tick the sequencer asks [`TempoEngine::frames_to_run`] how many
/// emulation frames to run (0, 1 or 2), then for each frame consults
/// [`TempoEngine::should_advance_song`] and calls [`TempoEngine::update`].
#[derive(Debug, Clone)]
pub struct TempoEngine {
    model: TempoModel,
    adaptation: FrameAdaptation,
}

impl TempoEngine {
    /// Engine for a tempo mode, authored region and playback region
    pub fn new(
        mode: &TempoMode,
        song_region: MachineRegion,
        playback_region: MachineRegion,
    ) -> Result<Self> {
        mode.validate()?;
        let model = match mode {
            TempoMode::Tracker { speed, tempo } => {
                // The divider arithmetic already contains the tick rate, so
                // it adapts to the playback region on its own.
                TempoModel::Tracker(TrackerTempo::new(*speed, *tempo, playback_region))
            }
            TempoMode::Groove { entries } => TempoModel::Groove(GrooveTempo::new(entries.clone())),
        };
        let adaptation = match model {
            // Tracker songs always run one frame per tick
            TempoModel::Tracker(_) => FrameAdaptation::new(playback_region, playback_region),
            TempoModel::Groove(_) => FrameAdaptation::new(song_region, playback_region),
        };
        Ok(TempoEngine { model, adaptation })
    }

    /// Emulation frames to run for this tick
    pub fn frames_to_run(&mut self) -> u32 {
        self.adaptation.next()
    }

    /// Whether the current frame starts a new row
    pub fn should_advance_song(&self) -> bool {
        match &self.model {
            TempoModel::Tracker(t) => t.should_advance(),
            TempoModel::Groove(g) => g.should_advance(),
        }
    }

    /// Advance tempo state by one emulation frame
    pub fn update(&mut self) {
        match &mut self.model {
            TempoModel::Tracker(t) => t.update(),
            TempoModel::Groove(g) => g.update(),
        }
    }

    /// Apply a legacy speed-change effect. Ignored in groove mode.
    pub fn set_tracker_speed(&mut self, speed: u8) {
        if let TempoModel::Tracker(t) = &mut self.model {
            t.set_speed(speed);
        }
    }

    /// Average frames per row, used to scale automatic slide durations
    pub fn frames_per_row(&self) -> u32 {
        match &self.model {
            TempoModel::Tracker(t) => t.frames_per_row(),
            TempoModel::Groove(g) => g.frames_per_row(),
        }
    }
}
