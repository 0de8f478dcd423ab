//! 2A03 noise channel
//!
//! Note numbers map onto the 16 hardware period indices, high notes giving
//! short periods. The duty envelope's low bit selects the short (93-step)
//! LFSR mode.

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
    status.set_base(0x08, audible);

    let volume = if audible { state.current_volume(song) } else { 0 };
    state.write(apu, reg::NOISE_CTRL, 0x30 | volume);

    if audible {
        let note = state.effective_note(song).unwrap_or(0);
        let mode = if state.current_duty(song) & 1 != 0 { 0x80 } else { 0 };
        // Invert so ascending notes raise the pitch
        state.write(apu, reg::NOISE_PERIOD, mode | ((note & 0x0F) ^ 0x0F));
        if state.is_triggered() {
            // Length reload; restarts the hardware envelope unit
            state.write(apu, reg::NOISE_LENGTH, 0x00);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::{ChannelKind, RegisterLogApu};
    use crate::song::{MachineRegion, Note};

    #[test]
    fn ascending_notes_raise_noise_pitch() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Noise, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.trigger(&song, Note::pitch(32), 6);
        channel.update_apu(&song, &mut apu, &mut status);
        let low = apu
            .writes()
            .iter()
            .find(|w| w.address == reg::NOISE_PERIOD)
            .unwrap()
            .value
            & 0x0F;

        channel.trigger(&song, Note::pitch(37), 6);
        channel.update_apu(&song, &mut apu, &mut status);
        let high = apu
            .writes()
            .iter()
            .rev()
            .find(|w| w.address == reg::NOISE_PERIOD)
            .unwrap()
            .value
            & 0x0F;

        assert!(high < low, "higher note should use a shorter period index");
    }

    #[test]
    fn length_reload_only_on_attack() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Noise, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.trigger(&song, Note::pitch(30), 6);
        channel.update_apu(&song, &mut apu, &mut status);
        for _ in 0..4 {
            channel.update_envelopes(&song);
            channel.update_apu(&song, &mut apu, &mut status);
        }

        let reloads = apu
            .writes()
            .iter()
            .filter(|w| w.address == reg::NOISE_LENGTH)
            .count();
        assert_eq!(reloads, 1);
    }
}
