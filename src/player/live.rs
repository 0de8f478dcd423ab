//! Live note preview
//!
//! Instrument preview and live keyboard input go through a single-slot
//! command queue: the UI pushes commands at any rate, the player consumes at
//! most one per tick, and a newer command simply replaces an unconsumed
//! older one. Only one channel is ever active at a time.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::apu::{reg, ApuEmulator, ChannelKind, Expansion};
use crate::channels::{ChannelState, StatusImage};
use crate::song::{MachineRegion, Note, Song};
use crate::tempo::TempoEngine;
use crate::Result;

/// A live input command
#[derive(Debug, Clone)]
pub enum LiveCommand {
    /// Attack a note on a channel
    PlayNote {
        /// Channel to play on
        kind: ChannelKind,
        /// Note event (pitch, instrument, volume)
        note: Note,
    },
    /// Release the current note
    ReleaseNote,
    /// Cut whatever is sounding
    StopAllNotes,
}

/// Latest-wins single-slot command queue. Clone freely; all clones feed the
/// same slot.
#[derive(Clone, Default)]
pub struct LiveCommandQueue {
    slot: Arc<Mutex<Option<LiveCommand>>>,
}

impl LiveCommandQueue {
    /// Replace the pending command
    pub fn push(&self, command: LiveCommand) {
        *self.slot.lock() = Some(command);
    }

    fn take(&self) -> Option<LiveCommand> {
        self.slot.lock().take()
    }
}

/// Lightweight one-channel sequencer for note preview
pub struct LivePlayer<A: ApuEmulator> {
    song: Arc<Song>,
    apu: A,
    region: MachineRegion,
    channel: Option<ChannelState>,
    status: StatusImage,
    written_base: Option<u8>,
    written_s5b: Option<u8>,
    queue: LiveCommandQueue,
    slide_frames: u32,
}

impl<A: ApuEmulator> LivePlayer<A> {
    /// Preview player using a song's instruments and tempo
    pub fn new(song: Arc<Song>, mut apu: A) -> Result<Self> {
        let region = song.region;
        let tempo = TempoEngine::new(&song.tempo_mode, region, region)?;
        let slide_frames = tempo.frames_per_row();
        apu.reset();
        Ok(LivePlayer {
            song,
            apu,
            region,
            channel: None,
            status: StatusImage::default(),
            written_base: None,
            written_s5b: None,
            queue: LiveCommandQueue::default(),
            slide_frames,
        })
    }

    /// A handle for pushing commands, usable from any thread
    pub fn command_queue(&self) -> LiveCommandQueue {
        self.queue.clone()
    }

    /// The active channel, if a note is sounding
    pub fn active_channel(&self) -> Option<&ChannelState> {
        self.channel.as_ref()
    }

    /// Consume at most one pending command, run one frame and return its
    /// samples
    pub fn tick(&mut self) -> Vec<i16> {
        if let Some(command) = self.queue.take() {
            self.apply(command);
        }

        let song = Arc::clone(&self.song);
        if let Some(channel) = self.channel.as_mut() {
            channel.update_envelopes(&song);
            channel.update_apu(&song, &mut self.apu, &mut self.status);
        }
        self.flush_status();
        self.apu.end_frame();
        self.drain_samples()
    }

    fn apply(&mut self, command: LiveCommand) {
        let song = Arc::clone(&self.song);
        match command {
            LiveCommand::PlayNote { kind, note } => {
                let switch = self.channel.as_ref().map(|c| c.kind()) != Some(kind);
                if switch {
                    self.silence_current();
                    self.apu.enable_channel(kind, true);
                    if kind.expansion() == Expansion::Vrc6 {
                        self.apu.write_register(reg::VRC6_MASTER, 0x00);
                    }
                    self.channel = Some(ChannelState::new(kind, self.region));
                }
                if let Some(channel) = self.channel.as_mut() {
                    channel.trigger(&song, note, self.slide_frames);
                }
            }
            LiveCommand::ReleaseNote => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.trigger(&song, Note::release(), self.slide_frames);
                }
            }
            LiveCommand::StopAllNotes => self.silence_current(),
        }
    }

    /// Cut the active channel, pushing its silent register image out
    fn silence_current(&mut self) {
        let song = Arc::clone(&self.song);
        if let Some(channel) = self.channel.as_mut() {
            channel.trigger(&song, Note::stop(), self.slide_frames);
            channel.update_apu(&song, &mut self.apu, &mut self.status);
        }
        self.channel = None;
    }

    fn flush_status(&mut self) {
        if self.written_base != Some(self.status.base) {
            self.apu.write_register(reg::APU_STATUS, self.status.base);
            self.written_base = Some(self.status.base);
        }
        if self.written_s5b != Some(self.status.s5b_mixer) {
            let uses_s5b = self
                .channel
                .as_ref()
                .map_or(false, |c| c.kind().expansion() == Expansion::S5b);
            if uses_s5b || self.written_s5b.is_some() {
                self.apu.write_register(reg::S5B_ADDR, reg::s5b::MIXER);
                self.apu.write_register(reg::S5B_DATA, self.status.s5b_mixer);
                self.written_s5b = Some(self.status.s5b_mixer);
            }
        }
    }

    fn drain_samples(&mut self) -> Vec<i16> {
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
}
