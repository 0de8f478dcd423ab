//! Envelope playback cursors
//!
//! Envelope *data* lives in the instrument pool and never changes during
//! playback. Each channel owns one [`EnvelopeState`] cursor per envelope
//! kind, holding only an index and the release flag.

use crate::song::{Envelope, EnvelopeSet};

/// Playback cursor over one envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeState {
    index: usize,
    released: bool,
}

impl EnvelopeState {
    /// Rewind to the first value and clear the release flag
    pub fn reset(&mut self) {
        self.index = 0;
        self.released = false;
    }

    /// Current index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the release jump has been taken
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Current envelope value, or `default` for an empty envelope
    pub fn value(&self, env: &Envelope, default: i8) -> i8 {
        env.values.get(self.index).copied().unwrap_or(default)
    }

    /// Advance the cursor by one frame step.
    ///
    /// While unreleased, a release point bounds a sustain region that cycles
    /// back to the loop point (or holds just before the release tail when no
    /// loop is set). Without a release point the cursor wraps at the loop
    /// point, or clamps at the last value. Once released the cursor runs out
    /// the tail and clamps.
    pub fn step(&mut self, env: &Envelope) {
        if env.values.is_empty() {
            return;
        }
        let end = env.end();
        let next = self.index + 1;

        if !self.released {
            if let Some(release) = env.release_point {
                if next >= release {
                    self.index = env.loop_point.unwrap_or(release.saturating_sub(1)).min(end);
                } else {
                    self.index = next;
                }
                return;
            }
        }

        if next > end {
            if !self.released {
                if let Some(lp) = env.loop_point {
                    self.index = lp.min(end);
                    return;
                }
            }
            self.index = end;
        } else {
            self.index = next;
        }
    }

    /// Trigger the release jump. The cursor moves to the release point once;
    /// envelopes without one are unaffected beyond losing their loop.
    pub fn release(&mut self, env: &Envelope) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(release) = env.release_point {
            self.index = release.min(env.end());
        }
    }
}

/// The four envelope cursors of one channel
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeStates {
    /// Volume cursor
    pub volume: EnvelopeState,
    /// Arpeggio cursor
    pub arpeggio: EnvelopeState,
    /// Pitch cursor
    pub pitch: EnvelopeState,
    /// Duty cursor
    pub duty: EnvelopeState,
}

impl EnvelopeStates {
    /// Rewind all cursors
    pub fn reset(&mut self) {
        self.volume.reset();
        self.arpeggio.reset();
        self.pitch.reset();
        self.duty.reset();
    }

    /// Step all cursors one frame
    pub fn step(&mut self, set: &EnvelopeSet) {
        self.volume.step(&set.volume);
        self.arpeggio.step(&set.arpeggio);
        self.pitch.step(&set.pitch);
        self.duty.step(&set.duty);
    }

    /// Release all cursors
    pub fn release(&mut self, set: &EnvelopeSet) {
        self.volume.release(&set.volume);
        self.arpeggio.release(&set.arpeggio);
        self.pitch.release(&set.pitch);
        self.duty.release(&set.duty);
    }
}
