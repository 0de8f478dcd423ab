//! Score data model: songs, patterns, notes, instruments, envelopes
//!
//! The model is deliberately playback-oriented. Persistence of projects is
//! the responsibility of an external serializer; tests and callers build
//! songs programmatically through the mutation helpers on [`Song`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::apu::ChannelKind;
use crate::tempo::TempoMode;

/// Lowest playable note number (C0)
pub const NOTE_MIN: u8 = 1;
/// Highest playable note number (B7)
pub const NOTE_MAX: u8 = 96;
/// Note number of A4 (440 Hz) on the C0-based scale
pub const NOTE_A4: u8 = 58;

/// Frequency in Hz for a note number (equal temperament, A4 = 440 Hz)
pub fn note_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - NOTE_A4 as f64) / 12.0)
}

/// Video standard the song targets, which fixes the hardware frame rate
/// and the CPU clock feeding the APU dividers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum MachineRegion {
    /// 60 Hz, 1.789773 MHz CPU
    #[default]
    Ntsc,
    /// 50 Hz, 1.662607 MHz CPU
    Pal,
}

impl MachineRegion {
    /// Hardware frames per second
    pub fn frame_rate(self) -> u32 {
        match self {
            MachineRegion::Ntsc => 60,
            MachineRegion::Pal => 50,
        }
    }

    /// CPU clock in Hz
    pub fn cpu_clock(self) -> u32 {
        match self {
            MachineRegion::Ntsc => 1_789_773,
            MachineRegion::Pal => 1_662_607,
        }
    }
}

/// Musical content of a note slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteValue {
    /// Empty slot, previous note keeps playing
    #[default]
    None,
    /// Cut the channel
    Stop,
    /// Trigger the instrument release phase
    Release,
    /// Play a pitch (1..=96)
    Pitch(u8),
}

impl NoteValue {
    /// Whether this value starts a new musical note
    pub fn is_musical(self) -> bool {
        matches!(self, NoteValue::Pitch(_))
    }

    /// The pitch number, if any
    pub fn pitch(self) -> Option<u8> {
        match self {
            NoteValue::Pitch(p) => Some(p),
            _ => None,
        }
    }
}

/// Vibrato parameters attached to a note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vibrato {
    /// Table index controlling oscillation rate (0 = off)
    pub speed: u8,
    /// Table index controlling oscillation amplitude (0 = off)
    pub depth: u8,
}

/// Legacy pattern effects, kept for imported module compatibility.
/// New songs express the same intents through loop points and custom
/// pattern lengths; these are honored as a migration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternEffect {
    /// Change the tracker speed divider
    Speed(u8),
    /// Jump to the given pattern, row 0
    Jump(u8),
    /// Skip to the next pattern at the given row
    Skip(u8),
}

/// One note slot in a pattern
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Note {
    /// Musical content
    pub value: NoteValue,
    /// Per-note volume override (0..=15)
    pub volume: Option<u8>,
    /// Instrument index into [`Song::instruments`]
    pub instrument: Option<usize>,
    /// Vibrato parameters
    pub vibrato: Option<Vibrato>,
    /// Fine pitch offset in period units
    pub fine_pitch: i8,
    /// Slide destination pitch; the channel glides from the note pitch
    /// toward this one
    pub slide_target: Option<u8>,
    /// Manual slide rate in period units per frame; when absent the rate is
    /// computed so the slide lands exactly on the next note event
    pub slide_speed: Option<u8>,
    /// Legacy effect column
    pub effect: Option<PatternEffect>,
}

impl Note {
    /// Note that plays the given pitch
    pub fn pitch(value: u8) -> Self {
        Note {
            value: NoteValue::Pitch(value),
            ..Default::default()
        }
    }

    /// Note that cuts the channel
    pub fn stop() -> Self {
        Note {
            value: NoteValue::Stop,
            ..Default::default()
        }
    }

    /// Note that releases the current instrument
    pub fn release() -> Self {
        Note {
            value: NoteValue::Release,
            ..Default::default()
        }
    }

    /// Whether this slot contains any event at all
    pub fn is_empty(&self) -> bool {
        self.value == NoteValue::None
            && self.volume.is_none()
            && self.instrument.is_none()
            && self.effect.is_none()
    }
}

/// An instrument envelope: an ordered value sequence with optional loop and
/// release points. `loop_point < release_point` when both are set; the
/// region between them sustains until the note is released.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    /// Envelope values, one per frame step
    pub values: Vec<i8>,
    /// Index the cursor returns to while sustaining
    pub loop_point: Option<usize>,
    /// Index the cursor jumps to once a release is triggered
    pub release_point: Option<usize>,
}

impl Envelope {
    /// Constant single-value envelope
    pub fn constant(value: i8) -> Self {
        Envelope {
            values: vec![value],
            loop_point: None,
            release_point: None,
        }
    }

    /// Envelope from raw values with no loop or release
    pub fn from_values(values: &[i8]) -> Self {
        Envelope {
            values: values.to_vec(),
            loop_point: None,
            release_point: None,
        }
    }

    /// Last valid index
    pub fn end(&self) -> usize {
        self.values.len().saturating_sub(1)
    }

    /// Whether the loop/release indices are consistent with the data
    pub fn is_well_formed(&self) -> bool {
        let end = self.values.len();
        let loop_ok = self.loop_point.map_or(true, |l| l < end);
        let release_ok = self.release_point.map_or(true, |r| r < end);
        let order_ok = match (self.loop_point, self.release_point) {
            (Some(l), Some(r)) => l < r,
            _ => true,
        };
        loop_ok && release_ok && order_ok
    }
}

/// The envelope kinds an instrument carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Output level, 0..=15
    Volume,
    /// Note offset in semitones
    Arpeggio,
    /// Period offset in timer units
    Pitch,
    /// Duty cycle / timbre select
    Duty,
}

/// All envelopes of one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeSet {
    /// Volume envelope (0..=15 values)
    pub volume: Envelope,
    /// Arpeggio envelope (semitone offsets)
    pub arpeggio: Envelope,
    /// Pitch envelope (period offsets)
    pub pitch: Envelope,
    /// Duty envelope (duty cycle indices)
    pub duty: Envelope,
}

impl Default for EnvelopeSet {
    fn default() -> Self {
        EnvelopeSet {
            volume: Envelope::constant(15),
            arpeggio: Envelope::constant(0),
            pitch: Envelope::constant(0),
            duty: Envelope::constant(0),
        }
    }
}

impl EnvelopeSet {
    /// Envelope for a kind
    pub fn get(&self, kind: EnvelopeKind) -> &Envelope {
        match kind {
            EnvelopeKind::Volume => &self.volume,
            EnvelopeKind::Arpeggio => &self.arpeggio,
            EnvelopeKind::Pitch => &self.pitch,
            EnvelopeKind::Duty => &self.duty,
        }
    }
}

/// A delta-PCM sample mapped to a note on the DPCM channel
#[derive(Debug, Clone, PartialEq)]
pub struct DpcmSample {
    /// Raw DPCM bitstream
    pub data: Arc<Vec<u8>>,
    /// Hardware playback rate index (0..=15)
    pub pitch: u8,
    /// Whether the sample loops
    pub looping: bool,
}

/// An instrument: envelope set plus optional DPCM note mappings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instrument {
    /// Display name
    pub name: String,
    /// Envelope set
    pub envelopes: EnvelopeSet,
    /// DPCM samples keyed by note number (DPCM channel only)
    pub dpcm_samples: BTreeMap<u8, DpcmSample>,
}

impl Instrument {
    /// Instrument with the given name and default envelopes
    pub fn named(name: &str) -> Self {
        Instrument {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// A fixed-capacity sequence of note rows for one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    /// Note rows; indices past the end read as empty
    pub rows: Vec<Note>,
}

impl Pattern {
    /// Empty pattern with the given capacity
    pub fn with_length(length: usize) -> Self {
        Pattern {
            rows: vec![Note::default(); length],
        }
    }

    /// Note at a row, or an empty note when out of range
    pub fn note(&self, row: usize) -> &Note {
        static EMPTY: Note = Note {
            value: NoteValue::None,
            volume: None,
            instrument: None,
            vibrato: None,
            fine_pitch: 0,
            slide_target: None,
            slide_speed: None,
            effect: None,
        };
        self.rows.get(row).unwrap_or(&EMPTY)
    }
}

/// One channel's pattern pool plus the timeline order referencing it.
/// The same pattern may appear at several timeline slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Which hardware channel this track drives
    pub kind: ChannelKind,
    /// Pattern pool
    pub patterns: Vec<Pattern>,
    /// Timeline slot -> pattern pool index (None = silent slot)
    pub order: Vec<Option<usize>>,
}

impl Track {
    /// Track for a channel with an empty timeline of `slots` entries
    pub fn new(kind: ChannelKind, slots: usize) -> Self {
        Track {
            kind,
            patterns: Vec::new(),
            order: vec![None; slots],
        }
    }

    /// Pattern instance at a timeline slot
    pub fn pattern_at(&self, slot: usize) -> Option<&Pattern> {
        self.order
            .get(slot)
            .copied()
            .flatten()
            .and_then(|idx| self.patterns.get(idx))
    }
}

/// A song: tracks, instruments, tempo parameters and timeline shape
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Display name
    pub name: String,
    /// Region the song was authored for
    pub region: MachineRegion,
    /// Tempo model
    pub tempo_mode: TempoMode,
    /// Channel tracks, one per active hardware channel
    pub tracks: Vec<Track>,
    /// Instrument pool
    pub instruments: Vec<Instrument>,
    /// Number of timeline slots
    pub pattern_count: usize,
    /// Default rows per pattern
    pub default_pattern_length: usize,
    /// Per-slot length overrides
    pub pattern_lengths: Vec<Option<usize>>,
    /// Rows per beat, used for the metronome and beat highlighting
    pub beat_length: usize,
    /// Timeline slot playback restarts from when looping
    pub loop_point: usize,
}

impl Default for Song {
    fn default() -> Self {
        Song::new(
            &[
                ChannelKind::Pulse1,
                ChannelKind::Pulse2,
                ChannelKind::Triangle,
                ChannelKind::Noise,
                ChannelKind::Dpcm,
            ],
            1,
            64,
        )
    }
}

impl Song {
    /// Song with the given channels, timeline slot count and pattern length
    pub fn new(channels: &[ChannelKind], pattern_count: usize, pattern_length: usize) -> Self {
        Song {
            name: String::new(),
            region: MachineRegion::Ntsc,
            tempo_mode: TempoMode::default(),
            tracks: channels
                .iter()
                .map(|&kind| Track::new(kind, pattern_count))
                .collect(),
            instruments: Vec::new(),
            pattern_count,
            default_pattern_length: pattern_length,
            pattern_lengths: vec![None; pattern_count],
            beat_length: 4,
            loop_point: 0,
        }
    }

    /// Number of rows in the pattern at a timeline slot
    pub fn pattern_length(&self, slot: usize) -> usize {
        self.pattern_lengths
            .get(slot)
            .copied()
            .flatten()
            .unwrap_or(self.default_pattern_length)
    }

    /// Track index for a channel kind, if the song uses it
    pub fn track_index(&self, kind: ChannelKind) -> Option<usize> {
        self.tracks.iter().position(|t| t.kind == kind)
    }

    /// Note for a channel at a location; empty when the slot has no pattern
    pub fn note_at(&self, track: usize, location: NoteLocation) -> Note {
        self.tracks
            .get(track)
            .and_then(|t| t.pattern_at(location.pattern))
            .map(|p| p.note(location.row).clone())
            .unwrap_or_default()
    }

    /// Place a note, growing the track's pattern pool as needed. The slot's
    /// pattern is created on first write.
    pub fn set_note(&mut self, track: usize, slot: usize, row: usize, note: Note) {
        let length = self.pattern_length(slot);
        let t = &mut self.tracks[track];
        let idx = match t.order.get(slot).copied().flatten() {
            Some(idx) => idx,
            None => {
                t.patterns.push(Pattern::with_length(length));
                let idx = t.patterns.len() - 1;
                t.order[slot] = Some(idx);
                idx
            }
        };
        if row < t.patterns[idx].rows.len() {
            t.patterns[idx].rows[row] = note;
        }
    }

    /// Reuse an existing pattern at another timeline slot
    pub fn set_pattern_instance(&mut self, track: usize, slot: usize, pattern: Option<usize>) {
        if let Some(t) = self.tracks.get_mut(track) {
            if slot < t.order.len() {
                t.order[slot] = pattern;
            }
        }
    }

    /// Add an instrument, returning its pool index
    pub fn add_instrument(&mut self, instrument: Instrument) -> usize {
        self.instruments.push(instrument);
        self.instruments.len() - 1
    }

    /// Structural checks a song must pass before playback
    pub fn validate(&self) -> crate::Result<()> {
        if self.tracks.is_empty() {
            return Err(crate::NestuneError::SongError("song has no channels".into()));
        }
        if self.pattern_count == 0 {
            return Err(crate::NestuneError::SongError("song has no patterns".into()));
        }
        if self.loop_point >= self.pattern_count {
            return Err(crate::NestuneError::SongError(format!(
                "loop point {} past song length {}",
                self.loop_point, self.pattern_count
            )));
        }
        for instrument in &self.instruments {
            let set = &instrument.envelopes;
            for env in [&set.volume, &set.arpeggio, &set.pitch, &set.duty] {
                if !env.is_well_formed() {
                    return Err(crate::NestuneError::SongError(format!(
                        "instrument '{}' has a malformed envelope",
                        instrument.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A position on the song timeline: `(pattern slot, row)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NoteLocation {
    /// Timeline slot index
    pub pattern: usize,
    /// Row within the pattern
    pub row: usize,
}

impl NoteLocation {
    /// Sentinel meaning "before the first frame has played"
    pub const START: NoteLocation = NoteLocation {
        pattern: usize::MAX,
        row: usize::MAX,
    };

    /// Location at a slot and row
    pub fn new(pattern: usize, row: usize) -> Self {
        NoteLocation { pattern, row }
    }

    /// Whether this is the before-first-frame sentinel
    pub fn is_start(self) -> bool {
        self.pattern == usize::MAX
    }

    /// Absolute row index given a song's pattern lengths
    pub fn absolute_row(self, song: &Song) -> usize {
        if self.is_start() {
            return 0;
        }
        let mut total = 0;
        for slot in 0..self.pattern.min(song.pattern_count) {
            total += song.pattern_length(slot);
        }
        total + self.row
    }

    /// Next location, wrapping rows into patterns. Returns None past the
    /// song's end.
    pub fn advanced(self, song: &Song) -> Option<NoteLocation> {
        if self.is_start() {
            return Some(NoteLocation::new(0, 0));
        }
        let mut next = NoteLocation::new(self.pattern, self.row + 1);
        if next.row >= song.pattern_length(next.pattern) {
            next = NoteLocation::new(self.pattern + 1, 0);
        }
        if next.pattern >= song.pattern_count {
            None
        } else {
            Some(next)
        }
    }
}
