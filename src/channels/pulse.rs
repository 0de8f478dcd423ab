//! 2A03 and MMC5 pulse channels
//!
//! The MMC5 squares share the 2A03 pulse register layout minus the sweep
//! unit, so both families translate here. Both chips reset the duty
//! sequencer phase when the high period register is written; the high byte
//! is therefore only rewritten when its bits actually changed.

use super::{ChannelState, StatusImage};
use crate::apu::{reg, ApuEmulator, ChannelKind};
use crate::song::Song;

pub(super) fn update_apu(
    state: &mut ChannelState,
    song: &Song,
    apu: &mut dyn ApuEmulator,
    status: &mut StatusImage,
) {
    let offset = if state.kind() == ChannelKind::Pulse2 { 4 } else { 0 };
    let audible = state.is_audible(song);
    if let Some(bit) = state.kind().status_bit() {
        status.set_base(bit, audible);
    }

    let volume = if audible { state.current_volume(song) } else { 0 };
    let duty = state.current_duty(song) & 0x03;

    // Length counter halted, constant volume
    state.write(apu, reg::PULSE1_CTRL + offset, 0x30 | (duty << 6) | volume);
    // Sweep unit off; the negate bit keeps its silencing comparator from
    // muting low periods
    state.write(apu, reg::PULSE1_SWEEP + offset, 0x08);

    if audible {
        let period = state.current_period(song);
        state.write(apu, reg::PULSE1_LO + offset, (period & 0xFF) as u8);
        let hi = ((period >> 8) & 0x07) as u8;
        if state.last_hi() != Some(hi) {
            state.write(apu, reg::PULSE1_HI + offset, hi);
            state.set_last_hi(hi);
        }
    }
}

pub(super) fn update_mmc5(
    state: &mut ChannelState,
    song: &Song,
    apu: &mut dyn ApuEmulator,
    status: &mut StatusImage,
) {
    let offset = if state.kind() == ChannelKind::Mmc5Pulse2 { 4 } else { 0 };
    let audible = state.is_audible(song);
    if let Some(bit) = state.kind().status_bit() {
        status.set_mmc5(bit, audible);
    }

    let volume = if audible { state.current_volume(song) } else { 0 };
    let duty = state.current_duty(song) & 0x03;

    state.write(apu, reg::MMC5_PULSE1_CTRL + offset, 0x30 | (duty << 6) | volume);

    if audible {
        let period = state.current_period(song);
        state.write(apu, reg::MMC5_PULSE1_LO + offset, (period & 0xFF) as u8);
        let hi = ((period >> 8) & 0x07) as u8;
        if state.last_hi() != Some(hi) {
            state.write(apu, reg::MMC5_PULSE1_HI + offset, hi);
            state.set_last_hi(hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::RegisterLogApu;
    use crate::song::{MachineRegion, Note};

    fn play_frames(channel: &mut ChannelState, song: &Song, apu: &mut RegisterLogApu, n: usize) {
        let mut status = StatusImage::default();
        for _ in 0..n {
            channel.update_envelopes(song);
            channel.update_apu(song, apu, &mut status);
            apu.end_frame();
        }
    }

    #[test]
    fn high_period_written_once_for_steady_note() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);

        channel.trigger(&song, Note::pitch(40), 6);
        play_frames(&mut channel, &song, &mut apu, 8);

        let hi_writes = apu
            .writes()
            .iter()
            .filter(|w| w.address == reg::PULSE1_HI)
            .count();
        assert_eq!(hi_writes, 1);
    }

    #[test]
    fn pulse2_uses_offset_registers() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Pulse2, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);

        channel.trigger(&song, Note::pitch(52), 6);
        play_frames(&mut channel, &song, &mut apu, 1);

        assert!(apu.writes().iter().all(|w| w.address >= reg::PULSE2_CTRL));
        assert!(apu
            .writes()
            .iter()
            .any(|w| w.address == reg::PULSE2_LO));
    }

    #[test]
    fn stopped_channel_writes_zero_volume_and_clears_status() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Pulse1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);
        let mut status = StatusImage::default();

        channel.trigger(&song, Note::pitch(40), 6);
        channel.update_envelopes(&song);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(status.base & 0x01, 0x01);

        channel.trigger(&song, Note::stop(), 6);
        channel.update_envelopes(&song);
        channel.update_apu(&song, &mut apu, &mut status);
        assert_eq!(status.base & 0x01, 0x00);

        let last_ctrl = apu
            .writes()
            .iter()
            .rev()
            .find(|w| w.address == reg::PULSE1_CTRL)
            .unwrap();
        assert_eq!(last_ctrl.value & 0x0F, 0);
    }

    #[test]
    fn mmc5_pulse_has_no_sweep_writes() {
        let song = Song::default();
        let mut channel = ChannelState::new(ChannelKind::Mmc5Pulse1, MachineRegion::Ntsc);
        let mut apu = RegisterLogApu::new(44_100);

        channel.trigger(&song, Note::pitch(40), 6);
        play_frames(&mut channel, &song, &mut apu, 4);

        assert!(apu
            .writes()
            .iter()
            .all(|w| (0x5000..=0x5007).contains(&w.address)));
    }
}
