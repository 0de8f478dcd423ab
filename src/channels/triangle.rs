//! 2A03 triangle channel
//!
//! The triangle has no volume control; silence is produced by loading a zero
//! linear counter. The volume envelope still gates audibility so instruments
//! can cut the channel.

use super::{ChannelState, StatusImage};
use crate::apu::{reg, ApuEmulator};
use crate::song::Song;

pub(super) fn update_apu(
    state: &mut ChannelState,
    song: &Song,
    apu: &mut dyn ApuEmulator,
    status: &mut StatusImage,
) {
    let audible = state.is_audible(song);
    status.set_base(0x04, audible);

    if audible {
        // Control flag set, maximum linear counter reload: plays continuously
        state.write(apu, reg::TRI_LINEAR, 0xFF);
        let period = state.current_period(song);
        state.write(apu, reg::TRI_LO, (period & 0xFF) as u8);
        let hi = ((period >> 8) & 0x07) as u8;
        if state.last_hi() != Some(hi) {
            state.write(apu, reg::TRI_HI, hi);
            state.set_last_hi(hi);
        }
    } else {
        // Zero reload halts the wave on its current output level
        state.write(apu, reg::TRI_LINEAR, 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::{ChannelKind, RegisterLogApu};
    use crate::song::{Envelope, Instrument, MachineRegion, Note};

    #[test]
    fn silent_triangle_loads_zero_linear_counter() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Triangle, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.update_envelopes(&song);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(apu.writes().last().unwrap().address, reg::TRI_LINEAR);
        assert_eq!(apu.writes().last().unwrap().value, 0x80);
        assert_eq!(status.base & 0x04, 0);
    }

    #[test]
    fn volume_envelope_gates_the_triangle() {
        let mut song = Song::default();
        let mut instrument = Instrument::named("cut");
        instrument.envelopes.volume = Envelope::from_values(&[15, 15, 0]);
        let idx = song.add_instrument(instrument);

        let mut channel = ChannelState::new(ChannelKind::Triangle, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        let mut note = Note::pitch(40);
        note.instrument = Some(idx);
        channel.trigger(&song, note, 6);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(status.base & 0x04, 0x04);

        // Walk to the envelope's zero tail (values are captured before the
        // cursor advances)
        channel.update_envelopes(&song);
        channel.update_envelopes(&song);
        channel.update_envelopes(&song);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(status.base & 0x04, 0);
    }
}
