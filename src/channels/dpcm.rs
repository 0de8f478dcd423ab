//! 2A03 delta-PCM sample channel
//!
//! Samples live in the instrument pool keyed by note number. Their hardware
//! addresses are assigned deterministically by pool order, 64-byte aligned
//! from $C000, matching how an exporter lays sample data out in the
//! cartridge.
//!
//! Restarting a sample requires dropping the DMC bit in $4015 and raising it
//! again after the sample registers point at the new data. While seeking the
//! toggle is skipped: the staged registers plus the status flush put the
//! channel in the right state without replaying the sample.

use super::{ChannelState, StatusImage};
use crate::apu::{reg, ApuEmulator};
use crate::song::Song;

/// Register values describing one mapped sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpcmRegs {
    /// $4012 value: (address - $C000) / 64
    pub address: u8,
    /// $4013 value: length / 16
    pub length: u8,
    /// $4010 rate index
    pub pitch: u8,
    /// $4010 loop bit
    pub looping: bool,
}

/// Resolve the hardware registers for an instrument's sample at a note.
/// Addresses are assigned by walking the instrument pool in order.
pub fn sample_registers(song: &Song, instrument: usize, note: u8) -> Option<DpcmRegs> {
    let mut offset = 0usize;
    for (index, inst) in song.instruments.iter().enumerate() {
        for (&mapped_note, sample) in &inst.dpcm_samples {
            let length = sample.data.len();
            if index == instrument && mapped_note == note {
                if offset / 64 > 0xFF || length / 16 > 0xFF {
                    return None;
                }
                return Some(DpcmRegs {
                    address: (offset / 64) as u8,
                    length: (length / 16) as u8,
                    pitch: sample.pitch & 0x0F,
                    looping: sample.looping,
                });
            }
            offset += (length + 63) & !63;
        }
    }
    None
}

pub(super) fn update_apu(
    state: &mut ChannelState,
    song: &Song,
    apu: &mut dyn ApuEmulator,
    status: &mut StatusImage,
) {
    if state.is_triggered() {
        let mapped = state
            .current_note()
            .pitch()
            .zip(state.instrument_index())
            .and_then(|(note, inst)| sample_registers(song, inst, note));

        match mapped {
            Some(regs) => {
                state.set_dpcm_playing(true);
                let freq = ((regs.looping as u8) << 6) | regs.pitch;

                if state.is_seeking() {
                    state.write(apu, reg::DMC_FREQ, freq);
                    state.write(apu, reg::DMC_START, regs.address);
                    state.write(apu, reg::DMC_LEN, regs.length);
                    status.set_base(0x10, true);
                } else {
                    status.set_base(0x10, false);
                    state.write(apu, reg::APU_STATUS, status.base);
                    state.write(apu, reg::DMC_FREQ, freq);
                    state.write(apu, reg::DMC_START, regs.address);
                    state.write(apu, reg::DMC_LEN, regs.length);
                    status.set_base(0x10, true);
                    state.write(apu, reg::APU_STATUS, status.base);
                }
            }
            None => {
                // An empty sample slot produces no sound on hardware;
                // mirror that instead of raising
                log::debug!("no DPCM sample mapped for triggered note");
                state.set_dpcm_playing(false);
                status.set_base(0x10, false);
            }
        }
    } else if !state.dpcm_is_playing() {
        status.set_base(0x10, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::{ChannelKind, RegisterLogApu};
    use crate::song::{DpcmSample, Instrument, MachineRegion, Note};
    use std::sync::Arc;

    fn song_with_samples() -> (Song, usize) {
        let mut song = Song::default();
        let mut instrument = Instrument::named("kit");
        instrument.dpcm_samples.insert(
            36,
            DpcmSample {
                data: Arc::new(vec![0xAA; 1024]),
                pitch: 15,
                looping: false,
            },
        );
        instrument.dpcm_samples.insert(
            38,
            DpcmSample {
                data: Arc::new(vec![0x55; 100]),
                pitch: 12,
                looping: true,
            },
        );
        let idx = song.add_instrument(instrument);
        (song, idx)
    }

    #[test]
    fn addresses_are_64_byte_aligned_by_pool_order() {
        let (song, idx) = song_with_samples();
        let first = sample_registers(&song, idx, 36).unwrap();
        let second = sample_registers(&song, idx, 38).unwrap();
        assert_eq!(first.address, 0);
        assert_eq!(first.length, 64); // 1024 / 16
        assert_eq!(second.address, 16); // 1024 / 64
        assert_eq!(second.length, 6); // 100 / 16
        assert!(second.looping);
    }

    #[test]
    fn trigger_toggles_dmc_enable_around_sample_setup() {
        let (song, idx) = song_with_samples();
        let mut channel = ChannelState::new(ChannelKind::Dpcm, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();
        status.set_base(0x0F, true); // other channels running

        let mut note = Note::pitch(36);
        note.instrument = Some(idx);
        channel.trigger(&song, note, 6);
        channel.update_apu(&song, &mut apu, &mut status);

        let status_writes: Vec<u8> = apu
            .writes()
            .iter()
            .filter(|w| w.address == reg::APU_STATUS)
            .map(|w| w.value)
            .collect();
        assert_eq!(status_writes, vec![0x0F, 0x1F]);
    }

    #[test]
    fn unmapped_note_degrades_to_silence() {
        let (song, idx) = song_with_samples();
        let mut channel = ChannelState::new(ChannelKind::Dpcm, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        let mut note = Note::pitch(60); // no mapping
        note.instrument = Some(idx);
        channel.trigger(&song, note, 6);
        channel.update_apu(&song, &mut apu, &mut status);

        assert_eq!(status.base & 0x10, 0);
        assert!(apu
            .writes()
            .iter()
            .all(|w| w.address != reg::DMC_START));
    }

    #[test]
    fn seeking_stages_registers_without_restart_toggle() {
        let (song, idx) = song_with_samples();
        let mut channel = ChannelState::new(ChannelKind::Dpcm, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.begin_seek();
        let mut note = Note::pitch(38);
        note.instrument = Some(idx);
        channel.trigger(&song, note, 6);
        channel.update_apu(&song, &mut apu, &mut status);
        assert!(apu.writes().is_empty());
        assert_eq!(status.base & 0x10, 0x10);

        channel.finish_seek(&mut apu);
        let addresses: Vec<u16> = apu.writes().iter().map(|w| w.address).collect();
        assert_eq!(addresses, vec![reg::DMC_FREQ, reg::DMC_START, reg::DMC_LEN]);
    }
}
