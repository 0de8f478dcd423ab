//! Frame-synchronous song sequencer
//!
//! `SongPlayer` owns the song position, the tempo engine, one channel state
//! per track and the emulator handle. Each tick runs zero, one or two
//! hardware frames as decided by the tempo engine; on row boundaries all
//! channels consume their new pattern notes.
//!
//! Seeking is cooperative: `begin_seek` arms a target and `seek_step` runs a
//! bounded number of ticks per call, so a UI thread can interleave seek work
//! with event handling. While seeking, channel register writes are shadowed
//! and rendered samples are drained and discarded; the shadow flush on
//! completion leaves the emulator in the state real-time playback would have
//! reached.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::apu::{reg, ApuEmulator, Expansion};
use crate::channels::{ChannelState, StatusImage};
use crate::song::{MachineRegion, NoteLocation, PatternEffect, Song};
use crate::tempo::TempoEngine;
use crate::Result;

/// What happens when playback runs past the last pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Stop; the player reports done
    None,
    /// Jump back to the song's loop point
    #[default]
    Song,
    /// Stay inside the selected pattern range
    Pattern,
}

/// Beat classification for the row that just started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatKind {
    /// First row of a pattern
    Bar,
    /// Any other row on a beat boundary
    Beat,
}

/// Snapshot of the playback position after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayPosition {
    /// Current note location
    pub location: NoteLocation,
    /// Ticks played since playback started
    pub frame: u32,
    /// Times the song has wrapped past its end
    pub loops: u32,
}

impl Default for PlayPosition {
    fn default() -> Self {
        PlayPosition {
            location: NoteLocation::START,
            frame: 0,
            loops: 0,
        }
    }
}

/// Outcome of one cooperative seek step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekProgress {
    /// Target not reached yet; call `seek_step` again
    Running,
    /// Seek complete, shadow registers flushed
    Done,
}

struct SeekState {
    target: NoteLocation,
    saved_loop: LoopMode,
}

#[derive(Default)]
struct WrittenStatus {
    base: Option<u8>,
    mmc5: Option<u8>,
    s5b_mixer: Option<u8>,
}

/// The song sequencer
pub struct SongPlayer<A: ApuEmulator> {
    song: Arc<Song>,
    apu: A,
    channels: Vec<ChannelState>,
    tempo: TempoEngine,
    status: StatusImage,
    written: WrittenStatus,
    loop_mode: LoopMode,
    /// Selected pattern range for `LoopMode::Pattern`, settable from another
    /// thread and snapshotted once per row advance
    selection: Mutex<Option<(usize, usize)>>,
    playback_region: MachineRegion,
    location: NoteLocation,
    frame: u32,
    loop_count: u32,
    beat: Option<BeatKind>,
    attack_this_tick: bool,
    pending_jump: Option<NoteLocation>,
    done: bool,
    seek: Option<SeekState>,
    has_mmc5: bool,
    has_s5b: bool,
}

impl<A: ApuEmulator> SongPlayer<A> {
    /// Sequencer playing in the song's authored region
    pub fn new(song: Arc<Song>, apu: A) -> Result<Self> {
        let region = song.region;
        Self::with_region(song, apu, region)
    }

    /// Sequencer playing in an explicit region (NTSC song on PAL hardware
    /// and vice versa engage frame adaptation)
    pub fn with_region(song: Arc<Song>, mut apu: A, region: MachineRegion) -> Result<Self> {
        song.validate()?;
        let tempo = TempoEngine::new(&song.tempo_mode, song.region, region)?;

        apu.reset();
        let mut channels = Vec::with_capacity(song.tracks.len());
        for track in &song.tracks {
            apu.enable_channel(track.kind, true);
            channels.push(ChannelState::new(track.kind, region));
        }

        let has_mmc5 = song
            .tracks
            .iter()
            .any(|t| t.kind.expansion() == Expansion::Mmc5);
        let has_s5b = song
            .tracks
            .iter()
            .any(|t| t.kind.expansion() == Expansion::S5b);
        if song
            .tracks
            .iter()
            .any(|t| t.kind.expansion() == Expansion::Vrc6)
        {
            // Master control: full frequency range, not halted
            apu.write_register(reg::VRC6_MASTER, 0x00);
        }

        Ok(SongPlayer {
            song,
            apu,
            channels,
            tempo,
            status: StatusImage::default(),
            written: WrittenStatus::default(),
            loop_mode: LoopMode::default(),
            selection: Mutex::new(None),
            playback_region: region,
            location: NoteLocation::START,
            frame: 0,
            loop_count: 0,
            beat: None,
            attack_this_tick: false,
            pending_jump: None,
            done: false,
            seek: None,
            has_mmc5,
            has_s5b,
        })
    }

    /// The song being played
    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    /// Loop policy applied at the song's end
    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Current loop policy
    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Set the pattern range used by [`LoopMode::Pattern`]. May be called
    /// from another thread; the range is snapshotted at row boundaries.
    pub fn set_selection_range(&self, range: Option<(usize, usize)>) {
        *self.selection.lock() = range;
    }

    /// Position snapshot for the last completed tick
    pub fn play_position(&self) -> PlayPosition {
        PlayPosition {
            location: self.location,
            frame: self.frame,
            loops: self.loop_count,
        }
    }

    /// Whether a non-looping song has reached its end
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Beat that started on the last tick, if any
    pub fn beat(&self) -> Option<BeatKind> {
        self.beat
    }

    /// Whether any channel attacked a new note on the last tick
    pub fn attack_this_tick(&self) -> bool {
        self.attack_this_tick
    }

    /// Channel states, in track order
    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    /// The emulator handle
    pub fn apu(&self) -> &A {
        &self.apu
    }

    /// Mutable emulator handle
    pub fn apu_mut(&mut self) -> &mut A {
        &mut self.apu
    }

    /// Read and return every rendered sample the emulator has buffered
    pub fn drain_samples(&mut self) -> Vec<i16> {
        let available = self.apu.samples_available();
        let mut samples = vec![0i16; available];
        let mut read = 0;
        while read < available {
            let n = self.apu.read_samples(&mut samples[read..]);
            if n == 0 {
                break;
            }
            read += n;
        }
        samples.truncate(read);
        samples
    }

    // =========================================================================
    // Ticking
    // =========================================================================

    /// Run one playback tick. Returns false once a non-looping song has
    /// ended; further calls are no-ops.
    pub fn tick(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.beat = None;
        self.attack_this_tick = false;

        let song = Arc::clone(&self.song);
        let frames = self.tempo.frames_to_run();
        for _ in 0..frames {
            if self.tempo.should_advance_song() && !self.advance_row(&song) {
                self.done = true;
                break;
            }
            for channel in &mut self.channels {
                channel.update_envelopes(&song);
                channel.update_apu(&song, &mut self.apu, &mut self.status);
            }
            self.flush_status();
            self.tempo.update();
            self.apu.end_frame();
        }

        self.frame += 1;
        !self.done
    }

    /// Move to the next row, consuming pattern notes on every channel.
    /// Returns false when the song ends under `LoopMode::None`.
    fn advance_row(&mut self, song: &Song) -> bool {
        let next = match self.pending_jump.take() {
            Some(target) if target.pattern < song.pattern_count => Some(target),
            Some(_) => None,
            None => self.location.advanced(song),
        };

        let next = match self.effective_loop_bound(song) {
            Some((min, max)) => match next {
                Some(loc) if loc.pattern > max => {
                    self.loop_count += 1;
                    Some(NoteLocation::new(min, 0))
                }
                other => other,
            },
            None => next,
        };

        self.location = match next {
            Some(loc) => loc,
            None => match self.loop_mode {
                LoopMode::None => return false,
                LoopMode::Song => {
                    self.loop_count += 1;
                    NoteLocation::new(self.song.loop_point, 0)
                }
                LoopMode::Pattern => {
                    self.loop_count += 1;
                    let (min, _) = self.pattern_selection(song);
                    NoteLocation::new(min, 0)
                }
            },
        };

        self.apply_row_effects(song);

        let frames_per_row = self.tempo.frames_per_row();
        for (track, channel) in self.channels.iter_mut().enumerate() {
            channel.advance(song, track, self.location, frames_per_row);
            self.attack_this_tick |= channel.is_triggered();
        }

        if self.location.row == 0 {
            self.beat = Some(BeatKind::Bar);
        } else if song.beat_length > 0 && self.location.row % song.beat_length == 0 {
            self.beat = Some(BeatKind::Beat);
        }

        true
    }

    fn effective_loop_bound(&self, song: &Song) -> Option<(usize, usize)> {
        if self.loop_mode == LoopMode::Pattern {
            Some(self.pattern_selection(song))
        } else {
            None
        }
    }

    fn pattern_selection(&self, song: &Song) -> (usize, usize) {
        let last = song.pattern_count - 1;
        match *self.selection.lock() {
            Some((min, max)) => (min.min(last), max.min(last).max(min.min(last))),
            None => (0, last),
        }
    }

    /// Honor the legacy speed/jump/skip effect columns
    fn apply_row_effects(&mut self, song: &Song) {
        for track in 0..song.tracks.len() {
            let Some(effect) = song.note_at(track, self.location).effect else {
                continue;
            };
            match effect {
                PatternEffect::Speed(speed) => self.tempo.set_tracker_speed(speed),
                PatternEffect::Jump(pattern) => {
                    self.pending_jump = Some(NoteLocation::new(pattern as usize, 0));
                }
                PatternEffect::Skip(row) => {
                    let pattern = self.location.pattern + 1;
                    let row = if pattern < song.pattern_count {
                        (row as usize).min(song.pattern_length(pattern).saturating_sub(1))
                    } else {
                        0
                    };
                    self.pending_jump = Some(NoteLocation::new(pattern, row));
                }
            }
        }
    }

    /// Commit the shared enable/mixer images, writing each register only when
    /// its image changed. Deferred entirely while seeking; the seek
    /// completion path rewrites them.
    fn flush_status(&mut self) {
        if self.seek.is_some() {
            return;
        }
        if self.written.base != Some(self.status.base) {
            self.apu.write_register(reg::APU_STATUS, self.status.base);
            self.written.base = Some(self.status.base);
        }
        if self.has_mmc5 && self.written.mmc5 != Some(self.status.mmc5) {
            self.apu.write_register(reg::MMC5_STATUS, self.status.mmc5);
            self.written.mmc5 = Some(self.status.mmc5);
        }
        if self.has_s5b && self.written.s5b_mixer != Some(self.status.s5b_mixer) {
            self.apu.write_register(reg::S5B_ADDR, reg::s5b::MIXER);
            self.apu.write_register(reg::S5B_DATA, self.status.s5b_mixer);
            self.written.s5b_mixer = Some(self.status.s5b_mixer);
        }
    }

    // =========================================================================
    // Seeking
    // =========================================================================

    /// Restart playback from before the first frame. Channel states are
    /// rebuilt, the emulator is reset and re-enabled.
    pub fn reset(&mut self) {
        self.apu.reset();
        self.channels = self
            .song
            .tracks
            .iter()
            .map(|t| {
                self.apu.enable_channel(t.kind, true);
                ChannelState::new(t.kind, self.playback_region)
            })
            .collect();
        if self
            .song
            .tracks
            .iter()
            .any(|t| t.kind.expansion() == Expansion::Vrc6)
        {
            self.apu.write_register(reg::VRC6_MASTER, 0x00);
        }
        self.tempo = TempoEngine::new(&self.song.tempo_mode, self.song.region, self.playback_region)
            .expect("tempo mode was validated at construction");
        self.status = StatusImage::default();
        self.written = WrittenStatus::default();
        self.location = NoteLocation::START;
        self.frame = 0;
        self.loop_count = 0;
        self.beat = None;
        self.attack_this_tick = false;
        self.pending_jump = None;
        self.done = false;
        self.seek = None;
    }

    /// Arm a seek to `target`, restarting from the song's beginning.
    /// A target past the song's end just plays the song out.
    pub fn begin_seek(&mut self, target: NoteLocation) {
        self.reset();
        self.seek = Some(SeekState {
            target,
            saved_loop: self.loop_mode,
        });
        // Seeks never wrap; a target past the end just plays out
        self.loop_mode = LoopMode::None;
        self.apu.start_seeking();
        for channel in &mut self.channels {
            channel.begin_seek();
        }
    }

    /// Whether a seek is in flight
    pub fn is_seeking(&self) -> bool {
        self.seek.is_some()
    }

    /// Run up to `max_ticks` seek ticks. Rendered samples are drained and
    /// discarded each call so the emulator's buffers cannot overflow during
    /// long scans.
    pub fn seek_step(&mut self, max_ticks: usize) -> SeekProgress {
        let Some(target) = self.seek.as_ref().map(|s| s.target) else {
            return SeekProgress::Done;
        };

        for _ in 0..max_ticks {
            let reached = !self.location.is_start() && self.location >= target;
            if reached || self.done {
                return self.complete_seek();
            }
            self.tick();
            let _ = self.drain_samples();
        }

        let reached = !self.location.is_start() && self.location >= target;
        if reached || self.done {
            return self.complete_seek();
        }
        SeekProgress::Running
    }

    /// Abort an in-flight seek, flushing state at the current position
    pub fn cancel_seek(&mut self) {
        if self.seek.is_some() {
            log::debug!("seek cancelled at {:?}", self.location);
            self.complete_seek();
        }
    }

    fn complete_seek(&mut self) -> SeekProgress {
        let Some(seek) = self.seek.take() else {
            return SeekProgress::Done;
        };
        for channel in &mut self.channels {
            channel.finish_seek(&mut self.apu);
        }
        // Status images go out after the channel flushes so the final
        // enable bits win over any staged per-channel writes
        self.apu.write_register(reg::APU_STATUS, self.status.base);
        self.written.base = Some(self.status.base);
        if self.has_mmc5 {
            self.apu.write_register(reg::MMC5_STATUS, self.status.mmc5);
            self.written.mmc5 = Some(self.status.mmc5);
        }
        if self.has_s5b {
            self.apu.write_register(reg::S5B_ADDR, reg::s5b::MIXER);
            self.apu.write_register(reg::S5B_DATA, self.status.s5b_mixer);
            self.written.s5b_mixer = Some(self.status.s5b_mixer);
        }
        self.apu.stop_seeking();
        self.loop_mode = seek.saved_loop;
        let _ = self.drain_samples();
        SeekProgress::Done
    }
}
