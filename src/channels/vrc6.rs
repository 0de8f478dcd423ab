//! VRC6 expansion channels
//!
//! Two squares with 3-bit duty and a sawtooth driven by an accumulator
//! rate. Unlike the 2A03 pulses, writing a VRC6 frequency high byte does
//! not reset the duty phase, so periods are written freely. Bit 7 of the
//! high register gates the channel.

use super::{ChannelState, StatusImage};
use crate::apu::{reg, ApuEmulator, ChannelKind};
use crate::song::Song;

pub(super) fn update_apu(state: &mut ChannelState, song: &Song, apu: &mut dyn ApuEmulator) {
    let (ctrl, lo, hi, saw) = match state.kind() {
        ChannelKind::Vrc6Pulse1 => (
            reg::VRC6_PULSE1_CTRL,
            reg::VRC6_PULSE1_LO,
            reg::VRC6_PULSE1_HI,
            false,
        ),
        ChannelKind::Vrc6Pulse2 => (
            reg::VRC6_PULSE2_CTRL,
            reg::VRC6_PULSE2_LO,
            reg::VRC6_PULSE2_HI,
            false,
        ),
        _ => (reg::VRC6_SAW_ACC, reg::VRC6_SAW_LO, reg::VRC6_SAW_HI, true),
    };

    let audible = state.is_audible(song);
    let volume = if audible { state.current_volume(song) } else { 0 };

    if saw {
        // The saw has no volume register; its accumulator rate scales the
        // ramp height. 42 is the highest rate before the ramp distorts.
        let rate = (volume as u16 * 42 / 15) as u8;
        state.write(apu, ctrl, rate & 0x3F);
    } else {
        let duty = state.current_duty(song) & 0x07;
        state.write(apu, ctrl, (duty << 4) | volume);
    }

    if audible {
        let period = state.current_period(song);
        state.write(apu, lo, (period & 0xFF) as u8);
        state.write(apu, hi, 0x80 | ((period >> 8) & 0x0F) as u8);
    } else {
        state.write(apu, hi, 0x00);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::RegisterLogApu;
    use crate::song::{MachineRegion, Note};

    fn last_write(apu: &RegisterLogApu, address: u16) -> Option<u8> {
        apu.writes()
            .iter()
            .rev()
            .find(|w| w.address == address)
            .map(|w| w.value)
    }

    #[test]
    fn pulse_enable_bit_follows_audibility() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Vrc6Pulse1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.trigger(&song, Note::pitch(45), 6);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(last_write(&apu, reg::VRC6_PULSE1_HI).unwrap() & 0x80, 0x80);

        channel.trigger(&song, Note::stop(), 6);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(last_write(&apu, reg::VRC6_PULSE1_HI).unwrap(), 0x00);
    }

    #[test]
    fn saw_scales_volume_into_accumulator_rate() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Vrc6Saw, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.trigger(&song, Note::pitch(45), 6);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(last_write(&apu, reg::VRC6_SAW_ACC), Some(42));
    }

    #[test]
    fn full_duty_range_reaches_the_control_register() {
        let mut song = Song::default();
        let mut instrument = crate::song::Instrument::named("wide");
        instrument.envelopes.duty = crate::song::Envelope::constant(7);
        let idx = song.add_instrument(instrument);

        let mut channel = ChannelState::new(ChannelKind::Vrc6Pulse1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        let mut note = Note::pitch(45);
        note.instrument = Some(idx);
        channel.trigger(&song, note, 6);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(
            last_write(&apu, reg::VRC6_PULSE1_CTRL).unwrap() >> 4,
            0x07,
            "3-bit duty should survive translation"
        );
    }
}
