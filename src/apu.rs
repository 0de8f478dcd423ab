//! APU register map and the emulator collaborator interface
//!
//! The driver never models the analog behavior of the sound hardware. It
//! talks to an opaque emulator through [`ApuEmulator`]: register writes go
//! in, rendered PCM comes out. [`RegisterLogApu`] is the bundled
//! implementation used for export and tests; it records the write stream and
//! synthesizes deterministic placeholder samples.

use num_derive::FromPrimitive;

/// Hardware channel variants the driver can sequence.
///
/// The first five are the stock 2A03 channels; the rest belong to the
/// expansion chips. Variant order is the canonical channel order used for
/// track layout and register flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum ChannelKind {
    /// 2A03 square 1 ($4000-$4003)
    Pulse1,
    /// 2A03 square 2 ($4004-$4007)
    Pulse2,
    /// 2A03 triangle ($4008-$400B)
    Triangle,
    /// 2A03 noise ($400C-$400F)
    Noise,
    /// 2A03 delta-PCM sample channel ($4010-$4013)
    Dpcm,
    /// VRC6 square 1 ($9000-$9002)
    Vrc6Pulse1,
    /// VRC6 square 2 ($A000-$A002)
    Vrc6Pulse2,
    /// VRC6 sawtooth ($B000-$B002)
    Vrc6Saw,
    /// MMC5 square 1 ($5000-$5003)
    Mmc5Pulse1,
    /// MMC5 square 2 ($5004-$5007)
    Mmc5Pulse2,
    /// Sunsoft 5B square A (via $C000/$E000 latch pair)
    S5bSquare1,
    /// Sunsoft 5B square B
    S5bSquare2,
    /// Sunsoft 5B square C
    S5bSquare3,
}

/// Chip family a channel belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expansion {
    /// Stock 2A03
    Base,
    /// Konami VRC6
    Vrc6,
    /// Nintendo MMC5
    Mmc5,
    /// Sunsoft 5B (YM2149 derivative)
    S5b,
}

impl ChannelKind {
    /// All channel variants in canonical order
    pub const ALL: [ChannelKind; 13] = [
        ChannelKind::Pulse1,
        ChannelKind::Pulse2,
        ChannelKind::Triangle,
        ChannelKind::Noise,
        ChannelKind::Dpcm,
        ChannelKind::Vrc6Pulse1,
        ChannelKind::Vrc6Pulse2,
        ChannelKind::Vrc6Saw,
        ChannelKind::Mmc5Pulse1,
        ChannelKind::Mmc5Pulse2,
        ChannelKind::S5bSquare1,
        ChannelKind::S5bSquare2,
        ChannelKind::S5bSquare3,
    ];

    /// Chip family this channel belongs to
    pub fn expansion(self) -> Expansion {
        use ChannelKind::*;
        match self {
            Pulse1 | Pulse2 | Triangle | Noise | Dpcm => Expansion::Base,
            Vrc6Pulse1 | Vrc6Pulse2 | Vrc6Saw => Expansion::Vrc6,
            Mmc5Pulse1 | Mmc5Pulse2 => Expansion::Mmc5,
            S5bSquare1 | S5bSquare2 | S5bSquare3 => Expansion::S5b,
        }
    }

    /// Channel bit in the family's status/enable register, if it has one
    pub fn status_bit(self) -> Option<u8> {
        use ChannelKind::*;
        match self {
            Pulse1 => Some(0x01),
            Pulse2 => Some(0x02),
            Triangle => Some(0x04),
            Noise => Some(0x08),
            Dpcm => Some(0x10),
            Mmc5Pulse1 => Some(0x01),
            Mmc5Pulse2 => Some(0x02),
            _ => None,
        }
    }
}

/// Register address constants, grouped by chip sub-block
pub mod reg {
    /// Pulse 1 duty / length-halt / volume
    pub const PULSE1_CTRL: u16 = 0x4000;
    /// Pulse 1 sweep unit
    pub const PULSE1_SWEEP: u16 = 0x4001;
    /// Pulse 1 timer low byte
    pub const PULSE1_LO: u16 = 0x4002;
    /// Pulse 1 length load + timer high bits; writing resets the phase
    pub const PULSE1_HI: u16 = 0x4003;
    /// Pulse 2 duty / length-halt / volume
    pub const PULSE2_CTRL: u16 = 0x4004;
    /// Pulse 2 sweep unit
    pub const PULSE2_SWEEP: u16 = 0x4005;
    /// Pulse 2 timer low byte
    pub const PULSE2_LO: u16 = 0x4006;
    /// Pulse 2 length load + timer high bits; writing resets the phase
    pub const PULSE2_HI: u16 = 0x4007;
    /// Triangle linear counter
    pub const TRI_LINEAR: u16 = 0x4008;
    /// Triangle timer low byte
    pub const TRI_LO: u16 = 0x400A;
    /// Triangle length load + timer high bits
    pub const TRI_HI: u16 = 0x400B;
    /// Noise length-halt / volume
    pub const NOISE_CTRL: u16 = 0x400C;
    /// Noise mode bit + period index
    pub const NOISE_PERIOD: u16 = 0x400E;
    /// Noise length load; writing restarts the length counter
    pub const NOISE_LENGTH: u16 = 0x400F;
    /// DMC IRQ / loop / rate index
    pub const DMC_FREQ: u16 = 0x4010;
    /// DMC direct 7-bit DAC load
    pub const DMC_RAW: u16 = 0x4011;
    /// DMC sample start address ($C000 + value * 64)
    pub const DMC_START: u16 = 0x4012;
    /// DMC sample length (value * 16 + 1 bytes)
    pub const DMC_LEN: u16 = 0x4013;
    /// Channel enable / DMC restart
    pub const APU_STATUS: u16 = 0x4015;

    /// VRC6 pulse 1 duty / volume
    pub const VRC6_PULSE1_CTRL: u16 = 0x9000;
    /// VRC6 pulse 1 timer low byte
    pub const VRC6_PULSE1_LO: u16 = 0x9001;
    /// VRC6 pulse 1 enable bit + timer high bits
    pub const VRC6_PULSE1_HI: u16 = 0x9002;
    /// VRC6 master frequency control / halt
    pub const VRC6_MASTER: u16 = 0x9003;
    /// VRC6 pulse 2 duty / volume
    pub const VRC6_PULSE2_CTRL: u16 = 0xA000;
    /// VRC6 pulse 2 timer low byte
    pub const VRC6_PULSE2_LO: u16 = 0xA001;
    /// VRC6 pulse 2 enable bit + timer high bits
    pub const VRC6_PULSE2_HI: u16 = 0xA002;
    /// VRC6 saw accumulator rate
    pub const VRC6_SAW_ACC: u16 = 0xB000;
    /// VRC6 saw timer low byte
    pub const VRC6_SAW_LO: u16 = 0xB001;
    /// VRC6 saw enable bit + timer high bits
    pub const VRC6_SAW_HI: u16 = 0xB002;

    /// MMC5 pulse 1 duty / volume
    pub const MMC5_PULSE1_CTRL: u16 = 0x5000;
    /// MMC5 pulse 1 timer low byte
    pub const MMC5_PULSE1_LO: u16 = 0x5002;
    /// MMC5 pulse 1 length load + timer high bits; resets the phase
    pub const MMC5_PULSE1_HI: u16 = 0x5003;
    /// MMC5 pulse 2 duty / volume
    pub const MMC5_PULSE2_CTRL: u16 = 0x5004;
    /// MMC5 pulse 2 timer low byte
    pub const MMC5_PULSE2_LO: u16 = 0x5006;
    /// MMC5 pulse 2 length load + timer high bits; resets the phase
    pub const MMC5_PULSE2_HI: u16 = 0x5007;
    /// MMC5 channel enable
    pub const MMC5_STATUS: u16 = 0x5015;

    /// Sunsoft 5B register select latch
    pub const S5B_ADDR: u16 = 0xC000;
    /// Sunsoft 5B data port, writes to the latched sub-register
    pub const S5B_DATA: u16 = 0xE000;

    /// Sunsoft 5B sub-register indices (YM2149 register file)
    pub mod s5b {
        /// Square A period low
        pub const TONE_A_LO: u8 = 0;
        /// Square A period high
        pub const TONE_A_HI: u8 = 1;
        /// Square B period low
        pub const TONE_B_LO: u8 = 2;
        /// Square B period high
        pub const TONE_B_HI: u8 = 3;
        /// Square C period low
        pub const TONE_C_LO: u8 = 4;
        /// Square C period high
        pub const TONE_C_HI: u8 = 5;
        /// Noise period
        pub const NOISE: u8 = 6;
        /// Tone/noise mixer
        pub const MIXER: u8 = 7;
        /// Square A volume
        pub const VOL_A: u8 = 8;
        /// Square B volume
        pub const VOL_B: u8 = 9;
        /// Square C volume
        pub const VOL_C: u8 = 10;
        /// Envelope period low
        pub const ENV_LO: u8 = 11;
        /// Envelope period high
        pub const ENV_HI: u8 = 12;
        /// Envelope shape; writing retriggers the envelope
        pub const ENV_SHAPE: u8 = 13;
    }
}

/// One recorded hardware register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Hardware frame the write happened on
    pub frame: u32,
    /// Register address
    pub address: u16,
    /// Value written
    pub value: u8,
}

/// The opaque sound-chip emulator the driver feeds.
///
/// One instance corresponds to one logical APU (stock channels plus whatever
/// expansions the song enables). The handle is owned by whichever component
/// drives ticks; nothing in the driver reaches for global chip state.
pub trait ApuEmulator: Send {
    /// Write a hardware register
    fn write_register(&mut self, address: u16, value: u8);

    /// Finish the current hardware frame, making its samples readable
    fn end_frame(&mut self);

    /// Number of rendered samples waiting to be read
    fn samples_available(&self) -> usize;

    /// Read up to `out.len()` rendered samples, returning how many were read
    fn read_samples(&mut self, out: &mut [i16]) -> usize;

    /// Reset the chip to power-on state
    fn reset(&mut self);

    /// Enable or disable rendering of one channel
    fn enable_channel(&mut self, kind: ChannelKind, enabled: bool);

    /// Enter seek mode: subsequent frames need not render audio
    fn start_seeking(&mut self);

    /// Leave seek mode
    fn stop_seeking(&mut self);
}

/// Recording emulator: logs every register write and synthesizes
/// deterministic placeholder PCM at a fixed rate.
///
/// Used to capture register streams for hardware export and as the emulator
/// stand-in throughout the test suites.
pub struct RegisterLogApu {
    writes: Vec<RegisterWrite>,
    frame: u32,
    samples_per_frame: usize,
    pending: usize,
    phase: usize,
    seeking: bool,
    muted: std::collections::HashSet<ChannelKind>,
}

impl RegisterLogApu {
    /// Recorder producing `sample_rate / 60` samples per frame
    pub fn new(sample_rate: u32) -> Self {
        RegisterLogApu {
            writes: Vec::new(),
            frame: 0,
            samples_per_frame: (sample_rate / 60) as usize,
            pending: 0,
            phase: 0,
            seeking: false,
            muted: std::collections::HashSet::new(),
        }
    }

    /// All recorded writes so far
    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    /// Take ownership of the recorded writes, clearing the log
    pub fn take_writes(&mut self) -> Vec<RegisterWrite> {
        std::mem::take(&mut self.writes)
    }

    /// Current hardware frame number
    pub fn frame(&self) -> u32 {
        self.frame
    }
}

impl ApuEmulator for RegisterLogApu {
    fn write_register(&mut self, address: u16, value: u8) {
        self.writes.push(RegisterWrite {
            frame: self.frame,
            address,
            value,
        });
    }

    fn end_frame(&mut self) {
        self.frame += 1;
        if !self.seeking {
            self.pending += self.samples_per_frame;
        }
    }

    fn samples_available(&self) -> usize {
        self.pending
    }

    fn read_samples(&mut self, out: &mut [i16]) -> usize {
        let count = out.len().min(self.pending);
        for sample in out.iter_mut().take(count) {
            // Low-amplitude deterministic ramp, enough to exercise mixing
            *sample = ((self.phase % 64) as i16 - 32) * 16;
            self.phase += 1;
        }
        self.pending -= count;
        count
    }

    fn reset(&mut self) {
        self.writes.clear();
        self.frame = 0;
        self.pending = 0;
        self.phase = 0;
        self.seeking = false;
    }

    fn enable_channel(&mut self, kind: ChannelKind, enabled: bool) {
        if enabled {
            self.muted.remove(&kind);
        } else {
            self.muted.insert(kind);
        }
    }

    fn start_seeking(&mut self) {
        self.seeking = true;
        self.pending = 0;
    }

    fn stop_seeking(&mut self) {
        self.seeking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn channel_kind_round_trips_through_indices() {
        for (idx, &kind) in ChannelKind::ALL.iter().enumerate() {
            assert_eq!(ChannelKind::from_usize(idx), Some(kind));
        }
        assert_eq!(ChannelKind::from_usize(ChannelKind::ALL.len()), None);
    }

    #[test]
    fn expansion_grouping() {
        assert_eq!(ChannelKind::Dpcm.expansion(), Expansion::Base);
        assert_eq!(ChannelKind::Vrc6Saw.expansion(), Expansion::Vrc6);
        assert_eq!(ChannelKind::Mmc5Pulse2.expansion(), Expansion::Mmc5);
        assert_eq!(ChannelKind::S5bSquare3.expansion(), Expansion::S5b);
    }

    #[test]
    fn recorder_tags_writes_with_frames() {
        let mut apu = RegisterLogApu::new(44_100);
        apu.write_register(reg::PULSE1_LO, 0xAB);
        apu.end_frame();
        apu.write_register(reg::PULSE1_HI, 0x02);

        let writes = apu.writes();
        assert_eq!(writes[0].frame, 0);
        assert_eq!(writes[1].frame, 1);
        assert_eq!(writes[1].address, reg::PULSE1_HI);
    }

    #[test]
    fn recorder_renders_no_samples_while_seeking() {
        let mut apu = RegisterLogApu::new(44_100);
        apu.start_seeking();
        apu.end_frame();
        assert_eq!(apu.samples_available(), 0);

        apu.stop_seeking();
        apu.end_frame();
        assert_eq!(apu.samples_available(), 735);

        let mut buf = [0i16; 1024];
        let read = apu.read_samples(&mut buf);
        assert_eq!(read, 735);
        assert_eq!(apu.samples_available(), 0);
    }
}
