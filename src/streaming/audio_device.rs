//! Audio device integration using rodio
//!
//! Wraps an [`AudioPlayer`] in a rodio `Source`. The source pulls one frame
//! at a time from the pipeline; starvation yields a short run of silence so
//! the platform stream stays alive, and the end-of-song signal terminates
//! the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rodio::{OutputStream, Sink, Source};

use crate::apu::ApuEmulator;
use crate::player::{AudioPlayer, FrameStatus};
use crate::{NestuneError, Result};

/// Silence emitted per starvation event before asking the pipeline again
const STARVED_CHUNK: usize = 256;

/// Audio source pulling frames from the playback pipeline
struct FrameSource<A: ApuEmulator + 'static> {
    player: AudioPlayer<A>,
    buffer: Vec<i16>,
    position: usize,
    sample_rate: u32,
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl<A: ApuEmulator + 'static> Iterator for FrameSource<A> {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.stopped.load(Ordering::Relaxed) {
            return None;
        }

        if self.position >= self.buffer.len() {
            match self.player.next_frame() {
                FrameStatus::Frame(frame) => {
                    self.buffer = frame.samples;
                    self.position = 0;
                }
                FrameStatus::Starved => {
                    // Keep the stream alive with silence until the
                    // emulation thread catches up
                    self.buffer = vec![0; STARVED_CHUNK];
                    self.position = 0;
                }
                FrameStatus::Done => {
                    self.finished.store(true, Ordering::Relaxed);
                    return None;
                }
            }
        }

        let sample = self.buffer.get(self.position).copied().unwrap_or(0);
        self.position += 1;
        Some(sample)
    }
}

impl<A: ApuEmulator + 'static> Source for FrameSource<A> {
    fn current_frame_len(&self) -> Option<usize> {
        Some((self.buffer.len() - self.position).max(STARVED_CHUNK))
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Start the pipeline and begin playing it on the default output
    /// device. Takes ownership of the player; dropping the device stops
    /// playback and joins the emulation thread.
    pub fn new<A: ApuEmulator + 'static>(mut player: AudioPlayer<A>) -> Result<Self> {
        let sample_rate = player.config().sample_rate;
        player.start()?;

        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| NestuneError::AudioDeviceError(format!("failed to open stream: {e}")))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| NestuneError::AudioDeviceError(format!("failed to create sink: {e}")))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        sink.append(FrameSource {
            player,
            buffer: Vec::new(),
            position: 0,
            sample_rate,
            stopped: Arc::clone(&stopped),
            finished: Arc::clone(&finished),
        });

        Ok(AudioDevice {
            _stream: stream,
            sink,
            stopped,
            finished,
        })
    }

    /// Pause the output stream
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume the output stream
    pub fn play(&self) {
        self.sink.play();
    }

    /// Whether the song has played to its end
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Stop the stream. The source drops on the rodio side, which stops the
    /// pipeline and joins its emulation thread.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.sink.stop();
    }

    /// Block until the sink has drained (song end or stop)
    pub fn wait_until_end(&self) {
        self.sink.sleep_until_end();
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
