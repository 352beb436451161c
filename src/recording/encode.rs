//! WAV encoding of a finished capture.

use std::io::Cursor;

use super::device::StreamFormat;
use super::resample::{downmix, resample};

/// A finished answer, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    /// 16-bit PCM mono WAV file contents.
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub duration_secs: f32,
}

impl EncodedAudio {
    pub const MIME: &'static str = "audio/wav";
    pub const FILE_NAME: &'static str = "answer.wav";

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Downmix, resample to `target_rate` and wrap in a WAV container.
///
/// Encoding never fails outright: a writer error is logged and yields empty
/// bytes, which the server rejects like any other blank answer.
pub fn encode(samples: &[f32], format: StreamFormat, target_rate: u32) -> EncodedAudio {
    let mono = downmix(samples, format.channels);
    let pcm = resample(&mono, format.sample_rate, target_rate);
    let duration_secs = if target_rate == 0 {
        0.0
    } else {
        pcm.len() as f32 / target_rate as f32
    };

    let bytes = write_wav(&pcm, target_rate).unwrap_or_else(|e| {
        log::error!("recording: WAV encoding failed: {e}");
        Vec::new()
    });

    EncodedAudio {
        bytes,
        sample_rate: target_rate,
        duration_secs,
    }
}

fn write_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
