//! Per-channel note-to-register state machines
//!
//! One [`ChannelState`] exists per active hardware channel. Every frame the
//! sequencer drives the same three-step contract on each of them: `advance`
//! consumes the pattern note at the new location (row boundaries only),
//! `update_envelopes` steps envelope cursors and the slide accumulator, and
//! `update_apu` translates the resulting pitch/volume/timbre into hardware
//! register writes for the channel's chip family.
//!
//! While the sequencer is seeking, register writes land in a per-channel
//! shadow file instead of the emulator; leaving seek mode flushes every
//! touched register once, in register order, so the chip ends up in the same
//! state a real-time playback would have produced.

mod dpcm;
mod envelope;
mod noise;
mod pulse;
mod s5b;
mod triangle;
mod vrc6;

pub use envelope::{EnvelopeState, EnvelopeStates};

use std::collections::BTreeMap;

use crate::apu::{reg, ApuEmulator, ChannelKind, Expansion};
use crate::fixed_point::FixedPoint;
use crate::song::{
    note_frequency, EnvelopeSet, MachineRegion, Note, NoteLocation, NoteValue, Song, Vibrato,
    NOTE_MAX, NOTE_MIN,
};

/// Rows scanned ahead of a slide note to find its landing row
pub const SLIDE_SCAN_HORIZON: usize = 64;

/// Shared register images for the enable/mixer registers that several
/// channels contribute bits to. Owned by the sequencer; channels only flip
/// their own bits, the sequencer commits changed images once per frame.
#[derive(Debug, Clone, Copy)]
pub struct StatusImage {
    /// $4015 image (2A03 channel enables)
    pub base: u8,
    /// $5015 image (MMC5 pulse enables)
    pub mmc5: u8,
    /// Sunsoft 5B mixer image (1 = channel off, matching the YM register)
    pub s5b_mixer: u8,
}

impl Default for StatusImage {
    fn default() -> Self {
        StatusImage {
            base: 0,
            mmc5: 0,
            s5b_mixer: 0x3F,
        }
    }
}

impl StatusImage {
    /// Set or clear bits in the $4015 image
    pub fn set_base(&mut self, mask: u8, on: bool) {
        if on {
            self.base |= mask;
        } else {
            self.base &= !mask;
        }
    }

    /// Set or clear bits in the $5015 image
    pub fn set_mmc5(&mut self, mask: u8, on: bool) {
        if on {
            self.mmc5 |= mask;
        } else {
            self.mmc5 &= !mask;
        }
    }

    /// Open or close a 5B tone channel (0..=2) in the mixer image
    pub fn set_s5b_tone(&mut self, channel: u8, open: bool) {
        let bit = 1u8 << channel;
        if open {
            self.s5b_mixer &= !bit;
        } else {
            self.s5b_mixer |= bit;
        }
    }
}

/// Pitch slide accumulator
#[derive(Debug, Clone, Copy, Default)]
struct SlideState {
    step: FixedPoint,
    pitch: FixedPoint,
    remaining: u32,
    target: Option<u8>,
}

impl SlideState {
    fn clear(&mut self) {
        *self = SlideState::default();
    }

    fn active(&self) -> bool {
        self.remaining > 0
    }
}

/// Triangle-LFO vibrato state
#[derive(Debug, Clone, Copy, Default)]
struct VibratoState {
    speed: u8,
    depth: u8,
    phase: u8,
}

impl VibratoState {
    fn set(&mut self, vibrato: Vibrato) {
        self.speed = vibrato.speed & 0x0F;
        self.depth = vibrato.depth & 0x0F;
        self.phase = 0;
    }

    fn step(&mut self) {
        self.phase = (self.phase + self.speed) & 63;
    }

    /// Period offset for the current phase, a 64-step triangle wave scaled
    /// by the depth table
    fn offset(&self) -> i32 {
        if self.speed == 0 || self.depth == 0 {
            return 0;
        }
        let p = self.phase as i32;
        let tri = if p < 16 {
            p
        } else if p < 48 {
            32 - p
        } else {
            p - 64
        };
        tri * VIBRATO_DEPTHS[self.depth as usize] as i32 / 16
    }
}

/// Vibrato depth in period units at full swing, per depth index
const VIBRATO_DEPTHS: [u8; 16] = [0, 1, 2, 3, 4, 6, 8, 10, 12, 14, 17, 20, 24, 28, 32, 36];

/// Envelope outputs for the current frame. Values are captured before the
/// cursors advance, so the attack frame plays envelope index zero.
#[derive(Debug, Clone, Copy)]
struct EnvelopeValues {
    volume: i8,
    arpeggio: i8,
    pitch: i8,
    duty: i8,
}

impl Default for EnvelopeValues {
    fn default() -> Self {
        EnvelopeValues {
            volume: 15,
            arpeggio: 0,
            pitch: 0,
            duty: 0,
        }
    }
}

/// Per-channel playback cursor and register translator
pub struct ChannelState {
    kind: ChannelKind,
    /// Note -> timer period for this family; empty for noise/DPCM
    period_table: Vec<u16>,
    /// Current note; mutated in place as slides supersede it
    note: Note,
    instrument: Option<usize>,
    /// Last explicit note volume (persists across rows)
    volume: u8,
    envelopes: EnvelopeStates,
    env_values: EnvelopeValues,
    slide: SlideState,
    vibrato: VibratoState,
    /// A new note attacked since the last register update
    triggered: bool,
    /// High-period register image, to avoid spurious phase resets
    last_hi_value: Option<u8>,
    seeking: bool,
    /// Seek-mode shadow; 5B sub-registers are keyed above the data port so
    /// a flush can replay each latched write separately
    shadow: BTreeMap<u16, u8>,
    /// DPCM only: a sample is currently assigned and running
    dpcm_playing: bool,
}

impl ChannelState {
    /// Channel state for a hardware channel in a playback region
    pub fn new(kind: ChannelKind, region: MachineRegion) -> Self {
        ChannelState {
            kind,
            period_table: build_period_table(kind, region),
            note: Note::default(),
            instrument: None,
            volume: 15,
            envelopes: EnvelopeStates::default(),
            env_values: EnvelopeValues::default(),
            slide: SlideState::default(),
            vibrato: VibratoState::default(),
            triggered: false,
            last_hi_value: None,
            seeking: false,
            shadow: BTreeMap::new(),
            dpcm_playing: false,
        }
    }

    /// Channel kind
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Current note value (slides mutate this toward their target)
    pub fn current_note(&self) -> NoteValue {
        self.note.value
    }

    /// Envelope cursor indices, volume/arpeggio/pitch/duty order
    pub fn envelope_indices(&self) -> [usize; 4] {
        [
            self.envelopes.volume.index(),
            self.envelopes.arpeggio.index(),
            self.envelopes.pitch.index(),
            self.envelopes.duty.index(),
        ]
    }

    /// Whether a pitch slide is still running
    pub fn slide_active(&self) -> bool {
        self.slide.active()
    }

    /// Raw slide accumulator, for state comparisons
    pub fn slide_pitch(&self) -> i32 {
        self.slide.pitch.raw()
    }

    // =========================================================================
    // Sequencer contract
    // =========================================================================

    /// Consume the pattern note for this channel at `location`
    pub fn advance(
        &mut self,
        song: &Song,
        track: usize,
        location: NoteLocation,
        frames_per_row: u32,
    ) {
        let pattern_note = song.note_at(track, location);
        let auto_frames = if pattern_note.slide_target.is_some() {
            rows_to_next_event(song, track, location) * frames_per_row.max(1)
        } else {
            frames_per_row.max(1)
        };
        self.apply_note(song, pattern_note, auto_frames);
    }

    /// Apply a note event directly (live preview path)
    pub fn trigger(&mut self, song: &Song, note: Note, frames_per_row: u32) {
        self.apply_note(song, note, frames_per_row.max(1));
    }

    fn apply_note(&mut self, song: &Song, pattern_note: Note, auto_slide_frames: u32) {
        if let Some(volume) = pattern_note.volume {
            self.volume = volume.min(15);
        }
        if let Some(vibrato) = pattern_note.vibrato {
            self.vibrato.set(vibrato);
        }

        match pattern_note.value {
            NoteValue::None => {
                // Instrument-only rows swap the instrument without attacking
                if let Some(instrument) = pattern_note.instrument {
                    self.instrument = Some(instrument);
                }
            }
            NoteValue::Stop => {
                self.note = Note::stop();
                self.slide.clear();
                self.dpcm_playing = false;
            }
            NoteValue::Release => {
                let set = self.envelope_set(song);
                self.envelopes.release(set);
                self.capture_envelope_values(song);
            }
            NoteValue::Pitch(pitch) => {
                let pitch = pitch.clamp(NOTE_MIN, NOTE_MAX);
                self.instrument = pattern_note.instrument.or(self.instrument);
                self.slide.clear();
                self.setup_slide(&pattern_note, pitch, auto_slide_frames);
                self.note = pattern_note;
                self.envelopes.reset();
                self.capture_envelope_values(song);
                self.triggered = true;
            }
        }
    }

    fn setup_slide(&mut self, pattern_note: &Note, pitch: u8, auto_frames: u32) {
        let Some(target) = pattern_note.slide_target else {
            return;
        };
        let target = target.clamp(NOTE_MIN, NOTE_MAX);
        if self.period_table.is_empty() || target == pitch {
            return;
        }

        let base = self.period_table[pitch as usize] as i32;
        let goal = self.period_table[target as usize] as i32;
        let distance = goal - base;
        if distance == 0 {
            return;
        }

        let frames = match pattern_note.slide_speed {
            // Manual rate in period units per frame
            Some(speed) if speed > 0 => {
                ((distance.unsigned_abs() + speed as u32 - 1) / speed as u32).max(1)
            }
            // Land exactly on the next note event
            _ => auto_frames.max(1),
        };

        self.slide = SlideState {
            step: FixedPoint::step_over(distance, frames),
            pitch: FixedPoint::ZERO,
            remaining: frames,
            target: Some(target),
        };
    }

    /// Capture the current envelope outputs, then step envelopes, the slide
    /// accumulator and vibrato by one frame
    pub fn update_envelopes(&mut self, song: &Song) {
        self.capture_envelope_values(song);
        let set = self.envelope_set(song);
        self.envelopes.step(set);

        if self.slide.remaining > 0 {
            self.slide.pitch += self.slide.step;
            self.slide.remaining -= 1;
            if self.slide.remaining == 0 {
                // The slide has landed: the target becomes the current note
                if let Some(target) = self.slide.target {
                    self.note.value = NoteValue::Pitch(target);
                }
                self.slide.clear();
            }
        }

        self.vibrato.step();
    }

    /// Translate current state into hardware register writes
    pub fn update_apu(
        &mut self,
        song: &Song,
        apu: &mut dyn ApuEmulator,
        status: &mut StatusImage,
    ) {
        match self.kind.expansion() {
            Expansion::Base => match self.kind {
                ChannelKind::Pulse1 | ChannelKind::Pulse2 => {
                    pulse::update_apu(self, song, apu, status)
                }
                ChannelKind::Triangle => triangle::update_apu(self, song, apu, status),
                ChannelKind::Noise => noise::update_apu(self, song, apu, status),
                ChannelKind::Dpcm => dpcm::update_apu(self, song, apu, status),
                _ => unreachable!(),
            },
            Expansion::Vrc6 => vrc6::update_apu(self, song, apu),
            Expansion::Mmc5 => pulse::update_mmc5(self, song, apu, status),
            Expansion::S5b => s5b::update_apu(self, song, apu, status),
        }
        self.triggered = false;
    }

    // =========================================================================
    // Seeking
    // =========================================================================

    /// Enter seek mode; register writes start landing in the shadow file
    pub fn begin_seek(&mut self) {
        self.seeking = true;
        self.shadow.clear();
    }

    /// Leave seek mode, flushing every touched register once in register
    /// order so the emulator matches the state real-time playback would
    /// have reached
    pub fn finish_seek(&mut self, apu: &mut dyn ApuEmulator) {
        self.seeking = false;
        let shadow = std::mem::take(&mut self.shadow);
        for (address, value) in shadow {
            if address >= reg::S5B_DATA {
                apu.write_register(reg::S5B_ADDR, (address - reg::S5B_DATA) as u8);
                apu.write_register(reg::S5B_DATA, value);
            } else {
                apu.write_register(address, value);
            }
        }
        // The next real-time frame rewrites the high-period register
        self.last_hi_value = None;
    }

    /// Whether the channel is in seek mode
    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    // =========================================================================
    // Shared helpers for the family modules
    // =========================================================================

    pub(super) fn write(&mut self, apu: &mut dyn ApuEmulator, address: u16, value: u8) {
        if self.seeking {
            self.shadow.insert(address, value);
        } else {
            apu.write_register(address, value);
        }
    }

    pub(super) fn write_s5b(&mut self, apu: &mut dyn ApuEmulator, sub: u8, value: u8) {
        if self.seeking {
            self.shadow.insert(reg::S5B_DATA + sub as u16, value);
        } else {
            apu.write_register(reg::S5B_ADDR, sub);
            apu.write_register(reg::S5B_DATA, value);
        }
    }

    pub(super) fn envelope_set<'a>(&self, song: &'a Song) -> &'a EnvelopeSet {
        self.instrument
            .and_then(|idx| song.instruments.get(idx))
            .map(|i| &i.envelopes)
            .unwrap_or_else(|| &*DEFAULT_ENVELOPES)
    }

    pub(super) fn instrument_index(&self) -> Option<usize> {
        self.instrument
    }

    pub(super) fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub(super) fn dpcm_is_playing(&self) -> bool {
        self.dpcm_playing
    }

    pub(super) fn set_dpcm_playing(&mut self, playing: bool) {
        self.dpcm_playing = playing;
    }

    pub(super) fn last_hi(&self) -> Option<u8> {
        self.last_hi_value
    }

    pub(super) fn set_last_hi(&mut self, value: u8) {
        self.last_hi_value = Some(value);
    }

    /// Refresh the per-frame envelope output cache at the current cursors
    fn capture_envelope_values(&mut self, song: &Song) {
        let set = self.envelope_set(song);
        self.env_values = EnvelopeValues {
            volume: self.envelopes.volume.value(&set.volume, 15),
            arpeggio: self.envelopes.arpeggio.value(&set.arpeggio, 0),
            pitch: self.envelopes.pitch.value(&set.pitch, 0),
            duty: self.envelopes.duty.value(&set.duty, 0),
        };
    }

    /// Effective note after the arpeggio envelope
    pub(super) fn effective_note(&self, _song: &Song) -> Option<u8> {
        let pitch = self.note.value.pitch()?;
        let arp = self.env_values.arpeggio;
        Some((pitch as i32 + arp as i32).clamp(NOTE_MIN as i32, NOTE_MAX as i32) as u8)
    }

    /// Timer period after slide, vibrato, fine pitch and the pitch envelope
    pub(super) fn current_period(&self, song: &Song) -> u16 {
        let Some(note) = self.effective_note(song) else {
            return 0;
        };
        if self.period_table.is_empty() {
            return 0;
        }
        let base = self.period_table[note as usize] as i32;
        let period = base
            + self.slide.pitch.integer_part()
            + self.vibrato.offset()
            + self.note.fine_pitch as i32
            - self.env_values.pitch as i32;
        period.clamp(0, period_ceiling(self.kind) as i32) as u16
    }

    /// Combined instrument-envelope and note volume, 0..=15.
    /// A nonzero envelope over a nonzero note volume never rounds to zero.
    pub(super) fn current_volume(&self, _song: &Song) -> u8 {
        if !self.note.value.is_musical() {
            return 0;
        }
        let env = self.env_values.volume.clamp(0, 15) as u16;
        let note = self.volume.min(15) as u16;
        ((env * note + 14) / 15).min(15) as u8
    }

    /// Duty index from the duty envelope
    pub(super) fn current_duty(&self, _song: &Song) -> u8 {
        self.env_values.duty.clamp(0, 7) as u8
    }

    /// Whether the channel should be audible at all
    pub(super) fn is_audible(&self, song: &Song) -> bool {
        match self.kind {
            ChannelKind::Dpcm => self.dpcm_playing,
            _ => self.note.value.is_musical() && self.current_volume(song) > 0,
        }
    }
}

// Default envelope set for channels playing without an instrument. The
// constant 15 volume keeps bare notes audible.
static DEFAULT_ENVELOPES: std::sync::LazyLock<EnvelopeSet> =
    std::sync::LazyLock::new(EnvelopeSet::default);

/// Largest representable timer period per family
fn period_ceiling(kind: ChannelKind) -> u16 {
    match kind.expansion() {
        Expansion::Base | Expansion::Mmc5 => 0x7FF,
        Expansion::Vrc6 | Expansion::S5b => 0xFFF,
    }
}

/// Build a note -> timer period table for a channel family
fn build_period_table(kind: ChannelKind, region: MachineRegion) -> Vec<u16> {
    use ChannelKind::*;
    let (divider, minus_one) = match kind {
        Pulse1 | Pulse2 | Mmc5Pulse1 | Mmc5Pulse2 | Vrc6Pulse1 | Vrc6Pulse2 => (16.0, true),
        Triangle => (32.0, true),
        Vrc6Saw => (14.0, true),
        S5bSquare1 | S5bSquare2 | S5bSquare3 => (16.0, false),
        Noise | Dpcm => return Vec::new(),
    };

    let clock = region.cpu_clock() as f64;
    let ceiling = period_ceiling(kind);
    let mut table = vec![0u16; (NOTE_MAX + 1) as usize];
    for note in NOTE_MIN..=NOTE_MAX {
        let freq = note_frequency(note);
        let mut period = (clock / (divider * freq)).round();
        if minus_one {
            period -= 1.0;
        }
        table[note as usize] = period.clamp(0.0, ceiling as f64) as u16;
    }
    table
}

/// Rows until the next note event on a track, bounded by the scan horizon.
/// Used to size automatic slides so they land on the next event.
pub(crate) fn rows_to_next_event(song: &Song, track: usize, from: NoteLocation) -> u32 {
    let mut location = from;
    let mut rows = 0u32;
    while (rows as usize) < SLIDE_SCAN_HORIZON {
        match location.advanced(song) {
            None => break,
            Some(next) => {
                location = next;
                rows += 1;
                if song.note_at(track, location).value != NoteValue::None {
                    return rows;
                }
            }
        }
    }
    rows.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::RegisterLogApu;

    #[test]
    fn period_tables_are_monotonic() {
        for kind in [
            ChannelKind::Pulse1,
            ChannelKind::Triangle,
            ChannelKind::Vrc6Saw,
            ChannelKind::S5bSquare1,
        ] {
            let table = build_period_table(kind, MachineRegion::Ntsc);
            for note in (NOTE_MIN + 1)..=NOTE_MAX {
                assert!(
                    table[note as usize] <= table[(note - 1) as usize],
                    "{kind:?} period not monotonic at note {note}"
                );
            }
        }
    }

    #[test]
    fn pal_periods_differ_from_ntsc() {
        let ntsc = build_period_table(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let pal = build_period_table(ChannelKind::Pulse1, MachineRegion::Pal);
        assert_ne!(ntsc[40], pal[40]);
    }

    #[test]
    fn a440_pulse_period_matches_hardware_tables() {
        let table = build_period_table(ChannelKind::Pulse1, MachineRegion::Ntsc);
        // The canonical NTSC value for A4 on a pulse channel
        assert_eq!(table[crate::song::NOTE_A4 as usize], 253);
    }

    #[test]
    fn slide_lands_and_supersedes_note() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);

        let mut note = Note::pitch(40);
        note.slide_target = Some(45);
        channel.trigger(&song, note, 6);
        assert!(channel.slide_active());

        for _ in 0..6 {
            channel.update_envelopes(&song);
        }
        assert!(!channel.slide_active());
        assert_eq!(channel.current_note(), NoteValue::Pitch(45));
        assert_eq!(channel.slide_pitch(), 0);
    }

    #[test]
    fn manual_slide_speed_controls_duration() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);

        let mut note = Note::pitch(40);
        note.slide_target = Some(41);
        note.slide_speed = Some(1);
        channel.trigger(&song, note, 6);

        let table = build_period_table(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let distance = (table[41] as i32 - table[40] as i32).unsigned_abs();
        for _ in 0..distance {
            assert!(channel.slide_active());
            channel.update_envelopes(&song);
        }
        assert!(!channel.slide_active());
    }

    #[test]
    fn stop_note_clears_slide() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let mut note = Note::pitch(40);
        note.slide_target = Some(52);
        channel.trigger(&song, note, 6);
        channel.trigger(&song, Note::stop(), 6);
        assert!(!channel.slide_active());
        assert_eq!(channel.current_note(), NoteValue::Stop);
    }

    #[test]
    fn shadow_flush_replays_writes_in_register_order() {
        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);

        channel.begin_seek();
        channel.write(&mut apu, reg::PULSE1_HI, 0x02);
        channel.write(&mut apu, reg::PULSE1_CTRL, 0xBF);
        channel.write(&mut apu, reg::PULSE1_LO, 0xFD);
        // Overwrite: only the last value per register survives
        channel.write(&mut apu, reg::PULSE1_LO, 0x80);
        assert!(apu.writes().is_empty());

        channel.finish_seek(&mut apu);
        let addresses: Vec<u16> = apu.writes().iter().map(|w| w.address).collect();
        assert_eq!(
            addresses,
            vec![reg::PULSE1_CTRL, reg::PULSE1_LO, reg::PULSE1_HI]
        );
        assert_eq!(apu.writes()[1].value, 0x80);
    }

    #[test]
    fn shadow_flush_expands_s5b_latch_pairs() {
        let mut channel = ChannelState::new(ChannelKind::S5bSquare1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);

        channel.begin_seek();
        channel.write_s5b(&mut apu, reg::s5b::VOL_A, 0x0C);
        channel.write_s5b(&mut apu, reg::s5b::TONE_A_LO, 0x55);
        channel.finish_seek(&mut apu);

        let pairs: Vec<(u16, u8)> = apu.writes().iter().map(|w| (w.address, w.value)).collect();
        assert_eq!(
            pairs,
            vec![
                (reg::S5B_ADDR, reg::s5b::TONE_A_LO),
                (reg::S5B_DATA, 0x55),
                (reg::S5B_ADDR, reg::s5b::VOL_A),
                (reg::S5B_DATA, 0x0C),
            ]
        );
    }

    #[test]
    fn volume_combination_keeps_quiet_notes_audible() {
        let mut song = Song::default();
        let mut instrument = crate::song::Instrument::named("lead");
        instrument.envelopes.volume = crate::song::Envelope::constant(1);
        let idx = song.add_instrument(instrument);

        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let mut note = Note::pitch(40);
        note.instrument = Some(idx);
        note.volume = Some(1);
        channel.trigger(&song, note, 6);
        assert_eq!(channel.current_volume(&song), 1);
    }

    #[test]
    fn status_image_bit_twiddling() {
        let mut status = StatusImage::default();
        status.set_base(0x01, true);
        status.set_base(0x04, true);
        assert_eq!(status.base, 0x05);
        status.set_base(0x01, false);
        assert_eq!(status.base, 0x04);

        status.set_s5b_tone(1, true);
        assert_eq!(status.s5b_mixer, 0x3D);
        status.set_s5b_tone(1, false);
        assert_eq!(status.s5b_mixer, 0x3F);
    }
}
