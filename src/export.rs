//! WAV export of rendered song audio
//!
//! Pairs with [`crate::player::RegisterLogPlayer::song_samples`]: render the
//! whole song offline, then write the PCM out as a mono 16-bit WAV.

use std::path::Path;

use crate::{NestuneError, Result};

/// Write mono 16-bit PCM to a WAV file
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| NestuneError::ExportError(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| NestuneError::ExportError(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| NestuneError::ExportError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::ChannelKind;
    use crate::player::RegisterLogPlayer;
    use crate::song::{Note, Song};
    use std::sync::Arc;

    #[test]
    fn renders_a_song_to_wav() {
        let mut song = Song::new(&[ChannelKind::Pulse1], 1, 2);
        song.set_note(0, 0, 0, Note::pitch(49));
        let samples = RegisterLogPlayer::new(Arc::new(song))
            .unwrap()
            .song_samples()
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_wav(&path, &samples, 44_100).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.len() as usize, samples.len());
    }
}
