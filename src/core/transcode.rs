//! Stem transcoding: decode the engine's output and re-encode it for streaming.

use std::{
    fmt,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    core::audio::{read_audio, to_i16},
    error::{Result, SplitError},
    types::AudioData,
};

pub const DEFAULT_BITRATE_KBPS: u32 = 192;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Mp3,
    Wav,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Mp3 => "mp3",
            TargetFormat::Wav => "wav",
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(TargetFormat::Mp3),
            "wav" => Ok(TargetFormat::Wav),
            other => Err(format!("unsupported transcode format `{other}`")),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

pub trait AudioEncoder: Send + Sync {
    fn encode(&self, audio: &AudioData) -> anyhow::Result<Vec<u8>>;

    fn extension(&self) -> &'static str;
}

/// MP3 through the native LAME bindings.
pub struct Mp3Encoder {
    bitrate_kbps: u32,
}

impl Mp3Encoder {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }

    fn lame_bitrate(&self) -> mp3lame_encoder::Bitrate {
        use mp3lame_encoder::Bitrate;
        match self.bitrate_kbps {
            0..=111 => Bitrate::Kbps96,
            112..=127 => Bitrate::Kbps112,
            128..=159 => Bitrate::Kbps128,
            160..=191 => Bitrate::Kbps160,
            192..=223 => Bitrate::Kbps192,
            224..=255 => Bitrate::Kbps224,
            256..=319 => Bitrate::Kbps256,
            _ => Bitrate::Kbps320,
        }
    }
}

impl AudioEncoder for Mp3Encoder {
    fn encode(&self, audio: &AudioData) -> anyhow::Result<Vec<u8>> {
        use mp3lame_encoder::{Builder, DualPcm, FlushNoGap};

        let mut builder = Builder::new().ok_or_else(|| anyhow!("LAME encoder init failed"))?;
        builder
            .set_num_channels(2)
            .map_err(|e| anyhow!("LAME set channels failed: {:?}", e))?;
        builder
            .set_sample_rate(audio.sample_rate)
            .map_err(|e| anyhow!("LAME set sample rate {} failed: {:?}", audio.sample_rate, e))?;
        builder
            .set_brate(self.lame_bitrate())
            .map_err(|e| anyhow!("LAME set bitrate failed: {:?}", e))?;
        builder
            .set_quality(mp3lame_encoder::Quality::Good)
            .map_err(|e| anyhow!("LAME set quality failed: {:?}", e))?;
        let mut encoder = builder
            .build()
            .map_err(|e| anyhow!("LAME build failed: {:?}", e))?;

        let (left, right) = split_stereo(audio);

        let mut out: Vec<u8> = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
        let encoded = encoder
            .encode(
                DualPcm {
                    left: &left,
                    right: &right,
                },
                out.spare_capacity_mut(),
            )
            .map_err(|e| anyhow!("LAME encode failed: {:?}", e))?;
        // SAFETY: the encoder initialized `encoded` bytes of spare capacity.
        unsafe {
            out.set_len(encoded);
        }

        out.reserve(7200);
        let flushed = encoder
            .flush::<FlushNoGap>(out.spare_capacity_mut())
            .map_err(|e| anyhow!("LAME flush failed: {:?}", e))?;
        // SAFETY: as above, for the flushed tail.
        unsafe {
            out.set_len(out.len() + flushed);
        }

        Ok(out)
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }
}

/// 16-bit PCM WAV.
pub struct WavEncoder;

impl AudioEncoder for WavEncoder {
    fn encode(&self, audio: &AudioData) -> anyhow::Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: audio.channels,
            sample_rate: audio.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for s in &audio.samples {
                writer.write_sample(to_i16(*s))?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    fn extension(&self) -> &'static str {
        "wav"
    }
}

// LAME gets two channels: mono is duplicated, anything wider keeps its first two.
fn split_stereo(audio: &AudioData) -> (Vec<i16>, Vec<i16>) {
    let channels = audio.channels.max(1) as usize;
    let frames = audio.samples.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in audio.samples.chunks_exact(channels) {
        let l = to_i16(frame[0]);
        let r = if channels > 1 { to_i16(frame[1]) } else { l };
        left.push(l);
        right.push(r);
    }
    (left, right)
}

/// Decodes a stem and writes `<same dir>/<same basename>.<target ext>`.
pub struct Transcoder {
    encoder: Box<dyn AudioEncoder>,
}

impl Transcoder {
    pub fn new(format: TargetFormat, bitrate_kbps: u32) -> Self {
        let encoder: Box<dyn AudioEncoder> = match format {
            TargetFormat::Mp3 => Box::new(Mp3Encoder::new(bitrate_kbps)),
            TargetFormat::Wav => Box::new(WavEncoder),
        };
        Self { encoder }
    }

    /// Failures come back as `SplitError::StemTranscode`, which callers treat as per-stem.
    pub fn transcode(&self, stem: &str, decoded: &Path) -> Result<PathBuf> {
        self.try_transcode(decoded)
            .map_err(|e| SplitError::transcode(stem, format!("{e:#}")))
    }

    fn try_transcode(&self, decoded: &Path) -> anyhow::Result<PathBuf> {
        let audio = read_audio(decoded)?;
        if audio.frames() == 0 || audio.sample_rate == 0 {
            return Err(anyhow!("no audio frames in {:?}", decoded));
        }

        let bytes = self.encoder.encode(&audio)?;
        let target = decoded.with_extension(self.encoder.extension());
        let dir = decoded.parent().unwrap_or_else(|| Path::new("."));

        // Written beside the target and renamed so a half-written file is never served.
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&target)
            .map_err(|e| anyhow!("Failed to persist {:?}: {}", target, e.error))?;

        tracing::debug!(
            from = %decoded.display(),
            to = %target.display(),
            bytes = bytes.len(),
            "transcoded stem"
        );
        Ok(target)
    }
}
