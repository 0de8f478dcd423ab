//! Register-write delta optimizer
//!
//! Hardware export replays a recorded register stream on real silicon, where
//! every write costs cycles and ROM bytes. The optimizer walks the stream
//! with a shadow model of "last known value" per logical register slot and
//! drops writes that would merely rewrite an already-current value.
//!
//! Two classes of register are never dropped on a changed value, and some
//! never at all:
//!
//! - registers whose write has side effects beyond caching a value
//!   (length-counter reloads, phase resets, DMC restarts via $4015, the 5B
//!   envelope shape retrigger) are always kept;
//! - plain value registers are kept exactly when the shadow disagrees.
//!
//! The Sunsoft 5B is addressed indirectly through a latch pair: the latched
//! address is tracked separately from the data so keep/drop decisions apply
//! to the logical sub-register the latch currently selects.

use bitflags::bitflags;

use crate::apu::{reg, RegisterWrite};

bitflags! {
    /// Chip families whose writes survive filtering. Writes for families
    /// outside the mask are dropped unconditionally.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExpansionMask: u8 {
        /// Stock 2A03 registers ($4000-$4015)
        const BASE = 0x01;
        /// VRC6 registers ($9000-$B002)
        const VRC6 = 0x02;
        /// MMC5 registers ($5000-$5015)
        const MMC5 = 0x04;
        /// Sunsoft 5B latch pair ($C000/$E000)
        const S5B = 0x08;
    }
}

impl Default for ExpansionMask {
    fn default() -> Self {
        ExpansionMask::all()
    }
}

enum Slot {
    Base(usize),
    Mmc5(usize),
    Vrc6(usize),
    S5bLatch,
    S5bData,
    Unknown,
}

fn classify(address: u16) -> Slot {
    match address {
        0x4000..=0x4015 => Slot::Base((address - 0x4000) as usize),
        0x5000..=0x5015 => Slot::Mmc5((address - 0x5000) as usize),
        0x9000..=0x9003 => Slot::Vrc6((address - 0x9000) as usize),
        0xA000..=0xA002 => Slot::Vrc6(4 + (address - 0xA000) as usize),
        0xB000..=0xB002 => Slot::Vrc6(7 + (address - 0xB000) as usize),
        a if a == reg::S5B_ADDR => Slot::S5bLatch,
        a if a == reg::S5B_DATA => Slot::S5bData,
        _ => Slot::Unknown,
    }
}

/// Whether a 2A03 register write does more than cache a value
fn base_side_effecting(offset: usize) -> bool {
    matches!(
        0x4000 + offset as u16,
        reg::PULSE1_HI
            | reg::PULSE2_HI
            | reg::TRI_HI
            | reg::NOISE_LENGTH
            | reg::DMC_RAW
            | reg::APU_STATUS
    )
}

/// Whether an MMC5 register write does more than cache a value
fn mmc5_side_effecting(offset: usize) -> bool {
    matches!(
        0x5000 + offset as u16,
        reg::MMC5_PULSE1_HI | reg::MMC5_PULSE2_HI | reg::MMC5_STATUS
    )
}

/// Stateful filter over an ordered register-write stream
pub struct RegisterWriteOptimizer {
    mask: ExpansionMask,
    base: [Option<u8>; 0x16],
    mmc5: [Option<u8>; 0x16],
    vrc6: [Option<u8>; 10],
    s5b_latch: Option<u8>,
    s5b: [Option<u8>; 16],
}

impl Default for RegisterWriteOptimizer {
    fn default() -> Self {
        Self::new(ExpansionMask::default())
    }
}

impl RegisterWriteOptimizer {
    /// Optimizer keeping only the given chip families
    pub fn new(mask: ExpansionMask) -> Self {
        RegisterWriteOptimizer {
            mask,
            base: [None; 0x16],
            mmc5: [None; 0x16],
            vrc6: [None; 10],
            s5b_latch: None,
            s5b: [None; 16],
        }
    }

    /// Forget all shadow state (e.g. after a hardware reset in the stream)
    pub fn reset(&mut self) {
        let mask = self.mask;
        *self = Self::new(mask);
    }

    /// Filter a stream, returning the writes that must be kept
    pub fn filter(&mut self, writes: &[RegisterWrite]) -> Vec<RegisterWrite> {
        writes
            .iter()
            .copied()
            .filter(|w| self.keep(w.address, w.value))
            .collect()
    }

    /// Decide one write, updating the shadow model
    pub fn keep(&mut self, address: u16, value: u8) -> bool {
        match classify(address) {
            Slot::Base(offset) => {
                self.mask.contains(ExpansionMask::BASE)
                    && keep_slot(&mut self.base[offset], value, base_side_effecting(offset))
            }
            Slot::Mmc5(offset) => {
                self.mask.contains(ExpansionMask::MMC5)
                    && keep_slot(&mut self.mmc5[offset], value, mmc5_side_effecting(offset))
            }
            Slot::Vrc6(offset) => {
                // VRC6 period writes do not reset the duty phase; everything
                // is a plain value register
                self.mask.contains(ExpansionMask::VRC6)
                    && keep_slot(&mut self.vrc6[offset], value, false)
            }
            Slot::S5bLatch => {
                if !self.mask.contains(ExpansionMask::S5B) {
                    return false;
                }
                let sub = value & 0x0F;
                if self.s5b_latch == Some(sub) {
                    return false;
                }
                self.s5b_latch = Some(sub);
                true
            }
            Slot::S5bData => {
                if !self.mask.contains(ExpansionMask::S5B) {
                    return false;
                }
                let Some(sub) = self.s5b_latch else {
                    // Latch state unknown: cannot prove redundancy
                    return true;
                };
                let side_effecting = sub == reg::s5b::ENV_SHAPE;
                keep_slot(&mut self.s5b[sub as usize], value, side_effecting)
            }
            // Unprovable, pass through
            Slot::Unknown => true,
        }
    }
}

fn keep_slot(slot: &mut Option<u8>, value: u8, side_effecting: bool) -> bool {
    let unchanged = *slot == Some(value);
    *slot = Some(value);
    side_effecting || !unchanged
}
