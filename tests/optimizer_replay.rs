//! Register-write optimizer equivalence
//!
//! Replays unoptimized and optimized streams through an idealized register
//! model and checks the final hardware state is identical, and that every
//! dropped write was provably redundant.

use std::collections::BTreeMap;
use std::sync::Arc;

use nestune::apu::{reg, ChannelKind, RegisterWrite};
use nestune::optimizer::{ExpansionMask, RegisterWriteOptimizer};
use nestune::player::RegisterLogPlayer;
use nestune::song::{Envelope, Instrument, Note, Song};
use nestune::tempo::TempoMode;

/// Idealized register model: last-written value per logical slot. The 5B
/// data port is resolved through the latch, so its state is the latched
/// sub-register file rather than the raw port.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct RegisterModel {
    direct: BTreeMap<u16, u8>,
    s5b_latch: Option<u8>,
    s5b: BTreeMap<u8, u8>,
}

impl RegisterModel {
    fn apply(&mut self, write: &RegisterWrite) {
        if write.address == reg::S5B_ADDR {
            self.s5b_latch = Some(write.value & 0x0F);
        } else if write.address == reg::S5B_DATA {
            if let Some(latch) = self.s5b_latch {
                self.s5b.insert(latch, write.value);
            }
        } else {
            self.direct.insert(write.address, write.value);
        }
    }

    /// Current value of the logical slot a write targets, if known
    fn current(&self, write: &RegisterWrite) -> Option<u8> {
        if write.address == reg::S5B_ADDR {
            self.s5b_latch.map(|l| l & 0x0F)
        } else if write.address == reg::S5B_DATA {
            self.s5b_latch.and_then(|l| self.s5b.get(&l).copied())
        } else {
            self.direct.get(&write.address).copied()
        }
    }
}

/// Side-effect classification written independently of the optimizer
fn side_effecting(model: &RegisterModel, address: u16) -> bool {
    match address {
        0x4003 | 0x4007 | 0x400B | 0x400F | 0x4011 | 0x4015 => true,
        0x5003 | 0x5007 | 0x5015 => true,
        a if a == reg::S5B_DATA => model.s5b_latch == Some(reg::s5b::ENV_SHAPE),
        _ => false,
    }
}

/// A song touching every chip family the optimizer models
fn mixed_chip_song() -> Arc<Song> {
    let mut song = Song::new(
        &[
            ChannelKind::Pulse1,
            ChannelKind::Pulse2,
            ChannelKind::Triangle,
            ChannelKind::Noise,
            ChannelKind::Dpcm,
            ChannelKind::Vrc6Pulse1,
            ChannelKind::Mmc5Pulse1,
            ChannelKind::S5bSquare1,
            ChannelKind::S5bSquare2,
        ],
        2,
        8,
    );
    song.tempo_mode = TempoMode::Tracker {
        speed: 4,
        tempo: 150,
    };

    let mut lead = Instrument::named("lead");
    lead.envelopes.volume = Envelope {
        values: vec![15, 12, 10, 9, 9, 8],
        loop_point: Some(3),
        release_point: None,
    };
    lead.envelopes.pitch = Envelope::from_values(&[0, 2, 4, 2, 0, -2, -4, -2]);
    let lead = song.add_instrument(lead);

    for (track, base) in [(0usize, 49u8), (1, 53), (2, 37), (5, 56), (6, 61), (7, 44), (8, 47)] {
        let mut note = Note::pitch(base);
        note.instrument = Some(lead);
        song.set_note(track, 0, 0, note);

        let mut slide = Note::pitch(base + 3);
        slide.slide_target = Some(base + 7);
        song.set_note(track, 0, 4, slide);

        song.set_note(track, 1, 2, Note::pitch(base + 12));
        song.set_note(track, 1, 6, Note::stop());
    }
    // Noise track
    song.set_note(3, 0, 0, Note::pitch(33));
    song.set_note(3, 1, 0, Note::stop());

    Arc::new(song)
}

fn recorded_stream() -> Vec<RegisterWrite> {
    RegisterLogPlayer::new(mixed_chip_song())
        .unwrap()
        .record_song()
        .unwrap()
}

#[test]
fn optimized_stream_reaches_identical_final_state() {
    let writes = recorded_stream();
    let kept = RegisterWriteOptimizer::default().filter(&writes);
    assert!(kept.len() < writes.len(), "something must have been dropped");

    let mut unoptimized = RegisterModel::default();
    for write in &writes {
        unoptimized.apply(write);
    }
    let mut optimized = RegisterModel::default();
    for write in &kept {
        optimized.apply(write);
    }

    assert_eq!(unoptimized, optimized);
}

#[test]
fn every_dropped_write_is_redundant_and_side_effect_free() {
    let writes = recorded_stream();
    let kept = RegisterWriteOptimizer::default().filter(&writes);

    let mut model = RegisterModel::default();
    let mut kept_index = 0;
    for write in &writes {
        if kept_index < kept.len() && kept[kept_index] == *write {
            kept_index += 1;
        } else {
            assert!(
                !side_effecting(&model, write.address),
                "dropped a side-effecting write to {:#06x}",
                write.address
            );
            assert_eq!(
                model.current(write),
                Some(write.value),
                "dropped write to {:#06x} would have changed the register",
                write.address
            );
        }
        model.apply(write);
    }
    assert_eq!(kept_index, kept.len(), "kept stream is a subsequence");
}

#[test]
fn frame_tags_survive_filtering() {
    let writes = recorded_stream();
    let kept = RegisterWriteOptimizer::default().filter(&writes);
    // Frame numbers stay monotonic after filtering
    for pair in kept.windows(2) {
        assert!(pair[0].frame <= pair[1].frame);
    }
}

#[test]
fn disabled_families_vanish_from_the_stream() {
    let writes = recorded_stream();
    let kept = RegisterWriteOptimizer::new(ExpansionMask::BASE).filter(&writes);

    assert!(kept.iter().all(|w| w.address <= 0x4015));
    assert!(kept.iter().any(|w| w.address == reg::PULSE1_LO));
}
