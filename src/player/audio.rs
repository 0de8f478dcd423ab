//! Audio pipeline: sequencer frames to a buffer-synchronous sink
//!
//! Two configurations, selected by [`AudioConfig::buffered_frames`]:
//!
//! - **Synchronous** (0): every [`AudioPlayer::next_frame`] call runs one
//!   sequencer tick inline and returns its samples. No extra thread.
//! - **Buffered** (N >= 1): a dedicated emulation thread runs ahead, paced
//!   by a counting-permit gate initialized to N. Each rendered frame
//!   consumes one permit and lands in a FIFO queue; each dequeue releases a
//!   permit. The gate is the only backpressure mechanism, so the thread can
//!   never run more than N frames ahead of playback, and the queue never
//!   holds more than N entries.
//!
//! The end of a non-looping song travels through the queue as a `None`
//! sentinel. The output side never blocks: an empty queue reports
//! [`FrameStatus::Starved`] and the sink is expected to play silence until
//! emulation catches up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::apu::ApuEmulator;
use crate::config::{AudioConfig, MetronomeConfig};
use crate::player::sequencer::{BeatKind, PlayPosition, SeekProgress, SongPlayer};
use crate::song::NoteLocation;
use crate::{NestuneError, Result};

/// Seek ticks run between abort-flag checks
const SEEK_TICKS_PER_STEP: usize = 64;

/// How long `start` waits for the queue to pre-fill
const PREFILL_TIMEOUT: Duration = Duration::from_secs(2);

// Click accents: the first beat of a pattern rings higher and louder
const BAR_PITCH: f32 = 1.5;
const BAR_VOLUME: f32 = 1.0;
const BEAT_PITCH: f32 = 1.0;
const BEAT_VOLUME: f32 = 0.8;

/// One fully rendered audio frame
#[derive(Debug, Clone)]
pub struct FrameAudio {
    /// Rendered PCM for this tick
    pub samples: Vec<i16>,
    /// Sequencer position at render time
    pub position: PlayPosition,
    /// Sample index an oscilloscope should sync to, when a note attacked
    pub trigger_sample: Option<usize>,
    /// Metronome parameters that were mixed into `samples`, if any
    pub metronome: Option<MetronomeMix>,
}

/// Metronome parameters applied to a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetronomeMix {
    /// Click sample position at the start of the frame
    pub position: f32,
    /// Resampling ratio of the click
    pub pitch: f32,
    /// Volume scalar
    pub volume: f32,
}

/// Result of asking the pipeline for the next frame
#[derive(Debug)]
pub enum FrameStatus {
    /// A frame of audio, consumed exactly once
    Frame(FrameAudio),
    /// Nothing ready; play silence and ask again
    Starved,
    /// Non-looping song has ended; stop the output stream
    Done,
}

// =============================================================================
// Metronome
// =============================================================================

/// Metronome click mixer.
///
/// A beat re-arms the click at position zero; every frame the click PCM is
/// resampled by `pitch` and added into the emulated samples until the click
/// is exhausted, at which point the position drops back to inactive.
pub struct Metronome {
    sample: Arc<Vec<i16>>,
    sample_rate: u32,
    output_rate: u32,
    enabled: bool,
    base_volume: f32,
    position: f32,
    pitch: f32,
    volume: f32,
}

impl Metronome {
    /// Metronome with the built-in synthesized click
    pub fn new(config: &MetronomeConfig, output_rate: u32) -> Self {
        Metronome {
            sample: default_click(),
            sample_rate: 44_100,
            output_rate,
            enabled: config.enabled,
            base_volume: config.volume,
            position: -1.0,
            pitch: 1.0,
            volume: 0.0,
        }
    }

    /// Replace the click PCM (rate is the sample's native rate)
    pub fn set_sample(&mut self, sample: Arc<Vec<i16>>, sample_rate: u32) {
        self.sample = sample;
        self.sample_rate = sample_rate.max(1);
        self.position = -1.0;
    }

    /// Enable or disable click mixing
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.position = -1.0;
        }
    }

    /// Whether a click is currently sounding
    pub fn is_active(&self) -> bool {
        self.position >= 0.0
    }

    /// Re-arm the click for a beat
    pub fn arm(&mut self, beat: BeatKind) {
        if !self.enabled {
            return;
        }
        let (pitch, volume) = match beat {
            BeatKind::Bar => (BAR_PITCH, BAR_VOLUME),
            BeatKind::Beat => (BEAT_PITCH, BEAT_VOLUME),
        };
        self.position = 0.0;
        self.pitch = pitch * self.sample_rate as f32 / self.output_rate.max(1) as f32;
        self.volume = volume * self.base_volume;
    }

    /// Mix the click into a frame in place, saturating at the sample range.
    /// Returns the parameters used, or None when inactive.
    pub fn mix(&mut self, out: &mut [i16]) -> Option<MetronomeMix> {
        if self.position < 0.0 {
            return None;
        }
        let report = MetronomeMix {
            position: self.position,
            pitch: self.pitch,
            volume: self.volume,
        };

        let len = self.sample.len();
        for sample in out.iter_mut() {
            let index = self.position as usize;
            if index >= len {
                self.position = -1.0;
                break;
            }
            let click = self.sample[index] as f32 * self.volume;
            *sample = (*sample as f32 + click).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            self.position += self.pitch;
        }
        if self.position >= len as f32 {
            self.position = -1.0;
        }
        Some(report)
    }
}

/// 1 kHz exponentially decaying sine, ~23 ms at 44.1 kHz
fn default_click() -> Arc<Vec<i16>> {
    let mut samples = Vec::with_capacity(1024);
    for i in 0..1024usize {
        let t = i as f32 / 44_100.0;
        let envelope = (-t * 180.0).exp();
        let wave = (2.0 * std::f32::consts::PI * 1_000.0 * t).sin();
        samples.push((wave * envelope * 12_000.0) as i16);
    }
    Arc::new(samples)
}

// =============================================================================
// Bounded frame queue and permit gate
// =============================================================================

struct QueueInner {
    frames: VecDeque<Option<FrameAudio>>,
}

/// FIFO of rendered frames shared by the emulation thread (writer) and the
/// output callback (reader). `None` is the end-of-song sentinel.
pub(crate) struct FrameQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl FrameQueue {
    fn new() -> Self {
        FrameQueue {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::new(),
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, frame: Option<FrameAudio>) {
        self.inner.lock().frames.push_back(frame);
        self.ready.notify_all();
    }

    fn try_pop(&self) -> Option<Option<FrameAudio>> {
        self.inner.lock().frames.pop_front()
    }

    fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    fn clear(&self) {
        self.inner.lock().frames.clear();
    }

    fn front_position(&self) -> Option<PlayPosition> {
        self.inner
            .lock()
            .frames
            .front()
            .and_then(|f| f.as_ref())
            .map(|f| f.position)
    }

    /// Wait until `len` frames are queued, the song ends, or the timeout
    /// elapses. Returns whether the target fill was reached.
    fn wait_for_len(&self, len: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.frames.len() < len {
            if inner.frames.back().map_or(false, |f| f.is_none()) {
                // End sentinel: the song is shorter than the buffer
                return true;
            }
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                return inner.frames.len() >= len;
            }
        }
        true
    }
}

/// Outcome of waiting on the emulation gate
enum GateEvent {
    /// A buffer slot is free; render one frame
    Permit,
    /// Stop was signaled; exit the thread
    Stop,
}

struct GateState {
    permits: usize,
    stopped: bool,
}

/// Counting-permit gate pacing the emulation thread. Permits equal free
/// buffer slots; `acquire` is a wait-any over a free permit and the stop
/// signal.
pub(crate) struct EmulationGate {
    state: Mutex<GateState>,
    available: Condvar,
}

impl EmulationGate {
    fn new() -> Self {
        EmulationGate {
            state: Mutex::new(GateState {
                permits: 0,
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    fn reset(&self, permits: usize) {
        let mut state = self.state.lock();
        state.permits = permits;
        state.stopped = false;
    }

    fn acquire(&self) -> GateEvent {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return GateEvent::Stop;
            }
            if state.permits > 0 {
                state.permits -= 1;
                return GateEvent::Permit;
            }
            self.available.wait(&mut state);
        }
    }

    fn release(&self) {
        self.state.lock().permits += 1;
        self.available.notify_one();
    }

    fn stop(&self) {
        self.state.lock().stopped = true;
        self.available.notify_all();
    }
}

// =============================================================================
// AudioPlayer
// =============================================================================

/// The audio pipeline around a [`SongPlayer`]
pub struct AudioPlayer<A: ApuEmulator + 'static> {
    config: AudioConfig,
    /// Present while idle or in synchronous mode; owned by the emulation
    /// thread while buffered playback runs
    player: Option<SongPlayer<A>>,
    metronome: Option<Metronome>,
    thread: Option<JoinHandle<(SongPlayer<A>, Metronome)>>,
    queue: Arc<FrameQueue>,
    gate: Arc<EmulationGate>,
    seek_abort: Arc<AtomicBool>,
    last_position: PlayPosition,
    starved: u64,
    started: bool,
    done: bool,
}

impl<A: ApuEmulator + 'static> AudioPlayer<A> {
    /// Pipeline around a sequencer
    pub fn new(player: SongPlayer<A>, config: AudioConfig) -> Result<Self> {
        config.validate()?;
        let metronome = Metronome::new(&config.metronome, config.sample_rate);
        Ok(AudioPlayer {
            config,
            player: Some(player),
            metronome: Some(metronome),
            thread: None,
            queue: Arc::new(FrameQueue::new()),
            gate: Arc::new(EmulationGate::new()),
            seek_abort: Arc::new(AtomicBool::new(false)),
            last_position: PlayPosition::default(),
            starved: 0,
            started: false,
            done: false,
        })
    }

    /// Pipeline configuration
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// The sequencer, available while playback is not running
    pub fn sequencer(&self) -> Option<&SongPlayer<A>> {
        self.player.as_ref()
    }

    /// Mutable sequencer access, available while playback is not running
    pub fn sequencer_mut(&mut self) -> Option<&mut SongPlayer<A>> {
        self.player.as_mut()
    }

    /// Metronome access, available while playback is not running
    pub fn metronome_mut(&mut self) -> Option<&mut Metronome> {
        self.metronome.as_mut()
    }

    /// Frames currently queued (buffered mode)
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Output-callback starvation events so far
    pub fn starved_count(&self) -> u64 {
        self.starved
    }

    /// Whether the song has played to completion
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The position the listener is hearing: the oldest frame still queued,
    /// not the most recently emulated one
    pub fn play_position(&self) -> PlayPosition {
        if self.config.buffered_frames > 0 {
            self.queue.front_position().unwrap_or(self.last_position)
        } else {
            self.last_position
        }
    }

    /// Handle that aborts an in-flight [`AudioPlayer::seek`] from another
    /// thread
    pub fn seek_abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.seek_abort)
    }

    /// Seek the sequencer to `target` before starting playback. Runs the
    /// cooperative seek loop on the calling thread, checking the abort
    /// handle between chunks of ticks. Calling this while playback runs is a
    /// contract violation and a no-op.
    pub fn seek(&mut self, target: NoteLocation) {
        if self.started {
            debug_assert!(!self.started, "seek while playback is running");
            return;
        }
        let Some(player) = self.player.as_mut() else {
            return;
        };
        self.seek_abort.store(false, Ordering::SeqCst);
        player.begin_seek(target);
        loop {
            if self.seek_abort.load(Ordering::SeqCst) {
                player.cancel_seek();
                break;
            }
            if player.seek_step(SEEK_TICKS_PER_STEP) == SeekProgress::Done {
                break;
            }
        }
        self.last_position = player.play_position();
    }

    /// Start the pipeline. In buffered mode this spawns the emulation
    /// thread and blocks until the queue has pre-filled to the configured
    /// depth, so the first output callback cannot underrun.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            debug_assert!(!self.started, "start() called twice");
            return Ok(());
        }
        self.done = false;
        self.starved = 0;

        if self.config.buffered_frames == 0 {
            self.started = true;
            return Ok(());
        }

        let mut player = self
            .player
            .take()
            .ok_or_else(|| NestuneError::AudioDeviceError("sequencer unavailable".into()))?;
        let mut metronome = self
            .metronome
            .take()
            .ok_or_else(|| NestuneError::AudioDeviceError("metronome unavailable".into()))?;

        self.queue.clear();
        self.gate.reset(self.config.buffered_frames);
        let queue = Arc::clone(&self.queue);
        let gate = Arc::clone(&self.gate);

        let handle = std::thread::Builder::new()
            .name("nestune-emulation".into())
            .spawn(move || {
                log::debug!("emulation thread running");
                loop {
                    match gate.acquire() {
                        GateEvent::Stop => break,
                        GateEvent::Permit => {
                            let frame = render_frame(&mut player, &mut metronome);
                            let ended = frame.is_none();
                            queue.push(frame);
                            if ended {
                                break;
                            }
                        }
                    }
                }
                log::debug!("emulation thread exiting");
                (player, metronome)
            })
            .map_err(|e| {
                NestuneError::AudioDeviceError(format!("failed to spawn emulation thread: {e}"))
            })?;
        self.thread = Some(handle);

        self.queue
            .wait_for_len(self.config.buffered_frames, PREFILL_TIMEOUT);
        self.started = true;
        Ok(())
    }

    /// Pull the next frame. Never blocks: if the emulation thread has not
    /// produced one yet, reports [`FrameStatus::Starved`] immediately.
    pub fn next_frame(&mut self) -> FrameStatus {
        if !self.started || self.done {
            return if self.done {
                FrameStatus::Done
            } else {
                FrameStatus::Starved
            };
        }

        if self.config.buffered_frames == 0 {
            let (Some(player), Some(metronome)) = (self.player.as_mut(), self.metronome.as_mut())
            else {
                return FrameStatus::Starved;
            };
            return match render_frame(player, metronome) {
                Some(frame) => {
                    self.last_position = frame.position;
                    FrameStatus::Frame(frame)
                }
                None => {
                    self.done = true;
                    FrameStatus::Done
                }
            };
        }

        match self.queue.try_pop() {
            Some(Some(frame)) => {
                self.gate.release();
                self.last_position = frame.position;
                FrameStatus::Frame(frame)
            }
            Some(None) => {
                self.done = true;
                FrameStatus::Done
            }
            None => {
                self.starved += 1;
                if self.starved.is_power_of_two() {
                    log::warn!("audio output starved ({} events so far)", self.starved);
                }
                FrameStatus::Starved
            }
        }
    }

    /// Stop the pipeline. Safe to call concurrently with an in-flight seek
    /// and safe to call twice: the seek is aborted first, then the emulation
    /// thread is signaled and joined, and only then should the caller stop
    /// its output stream.
    pub fn stop(&mut self) {
        self.seek_abort.store(true, Ordering::SeqCst);
        if let Some(player) = self.player.as_mut() {
            player.cancel_seek();
        }

        if let Some(handle) = self.thread.take() {
            self.gate.stop();
            match handle.join() {
                Ok((player, metronome)) => {
                    self.player = Some(player);
                    self.metronome = Some(metronome);
                }
                Err(_) => log::error!("emulation thread panicked"),
            }
            self.queue.clear();
        }
        self.started = false;
    }
}

impl<A: ApuEmulator + 'static> Drop for AudioPlayer<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run one sequencer tick and package its audio. Returns None when the song
/// has ended.
fn render_frame<A: ApuEmulator>(
    player: &mut SongPlayer<A>,
    metronome: &mut Metronome,
) -> Option<FrameAudio> {
    if !player.tick() {
        return None;
    }
    let mut samples = player.drain_samples();
    if let Some(beat) = player.beat() {
        metronome.arm(beat);
    }
    let mix = metronome.mix(&mut samples);
    Some(FrameAudio {
        samples,
        position: player.play_position(),
        trigger_sample: player.attack_this_tick().then_some(0),
        metronome: mix,
    })
}
