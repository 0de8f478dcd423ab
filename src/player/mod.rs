//! Sequencer and audio pipeline
//!
//! [`SongPlayer`] is the frame-synchronous sequencer: one call to
//! [`SongPlayer::tick`] runs the tempo engine, the channel state machines
//! and the emulator for one playback tick. [`AudioPlayer`] bridges that to a
//! buffer-synchronous audio sink, either inline or through a bounded queue
//! fed by a dedicated emulation thread. [`LivePlayer`] previews single notes
//! and [`RegisterLogPlayer`] drives a song offline for export.

mod audio;
mod live;
mod record;
mod sequencer;

pub use audio::{AudioPlayer, FrameAudio, FrameStatus, Metronome, MetronomeMix};
pub use live::{LiveCommand, LiveCommandQueue, LivePlayer};
pub use record::RegisterLogPlayer;
pub use sequencer::{BeatKind, LoopMode, PlayPosition, SeekProgress, SongPlayer};
