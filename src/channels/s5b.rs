//! Sunsoft 5B squares
//!
//! The 5B is a YM2149 derivative addressed through a latch pair: $C000
//! selects a sub-register, $E000 writes it. Tone enables live in the shared
//! mixer sub-register; each channel flips only its own bit in the sequencer's
//! mixer image, which is committed once per frame.

use super::{ChannelState, StatusImage};
use crate::apu::{reg, ApuEmulator, ChannelKind};
use crate::song::Song;

pub(super) fn update_apu(
    state: &mut ChannelState,
    song: &Song,
    apu: &mut dyn ApuEmulator,
    status: &mut StatusImage,
) {
    let channel = match state.kind() {
        ChannelKind::S5bSquare1 => 0u8,
        ChannelKind::S5bSquare2 => 1,
        _ => 2,
    };

    let audible = state.is_audible(song);
    status.set_s5b_tone(channel, audible);

    let volume = if audible { state.current_volume(song) } else { 0 };
    state.write_s5b(apu, reg::s5b::VOL_A + channel, volume & 0x0F);

    if audible {
        let period = state.current_period(song);
        state.write_s5b(apu, reg::s5b::TONE_A_LO + channel * 2, (period & 0xFF) as u8);
        state.write_s5b(
            apu,
            reg::s5b::TONE_A_HI + channel * 2,
            ((period >> 8) & 0x0F) as u8,
        );
    }
}
