pub mod wav;

use log::debug;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::error::{HarnessError, Result};

/// Fraction of full scale used for every synthesized tone
pub const GAIN: f64 = 0.8;

/// Bytes per quantized sample understood by the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum SampleWidth {
    /// Signed 8-bit
    S8,
    /// Signed 16-bit little endian
    S16,
    /// Signed 32-bit little endian
    S32,
}

impl SampleWidth {
    pub fn bytes(self) -> u16 {
        match self {
            SampleWidth::S8 => 1,
            SampleWidth::S16 => 2,
            SampleWidth::S32 => 4,
        }
    }

    /// Amplitude that a gain of 1.0 maps to.
    ///
    /// The 4-byte value is 2^31, one past `i32::MAX`. The subject was
    /// calibrated against fixtures produced with this constant, so it is
    /// kept as is; with the 0.8 gain no sample can reach the boundary.
    pub fn full_scale(self) -> f64 {
        match self {
            SampleWidth::S8 => 127.0,
            SampleWidth::S16 => 32760.0,
            SampleWidth::S32 => 2_147_483_648.0,
        }
    }

    /// Inclusive signed range of a quantized sample
    pub fn range(self) -> (i64, i64) {
        match self {
            SampleWidth::S8 => (i8::MIN as i64, i8::MAX as i64),
            SampleWidth::S16 => (i16::MIN as i64, i16::MAX as i64),
            SampleWidth::S32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

impl TryFrom<u16> for SampleWidth {
    type Error = HarnessError;

    fn try_from(bytes: u16) -> std::result::Result<Self, Self::Error> {
        match bytes {
            1 => Ok(SampleWidth::S8),
            2 => Ok(SampleWidth::S16),
            4 => Ok(SampleWidth::S32),
            other => Err(HarnessError::InvalidFormat(other)),
        }
    }
}

impl From<SampleWidth> for u16 {
    fn from(width: SampleWidth) -> Self {
        width.bytes()
    }
}

impl fmt::Display for SampleWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// Channel count, sample width and rate of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub channels: u16,
    pub width: SampleWidth,
    pub sample_rate: u32,
}

impl FormatDescriptor {
    pub fn new(channels: u16, width: SampleWidth, sample_rate: u32) -> Self {
        Self {
            channels,
            width,
            sample_rate,
        }
    }

    /// Bytes occupied by one interleaved frame
    pub fn frame_bytes(&self) -> u32 {
        self.channels as u32 * self.width.bytes() as u32
    }
}

/// Per-channel tone frequencies in Hz, one entry per channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneSet(Vec<u32>);

impl ToneSet {
    pub fn new(frequencies: Vec<u32>) -> Self {
        Self(frequencies)
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest tone allowed for a given rate, kept well under Nyquist
    pub fn max_frequency(sample_rate: u32) -> u32 {
        2 * sample_rate / 5
    }
}

impl fmt::Display for ToneSet {
    /// Comma-joined list as accepted by the subject's `-F` option
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|freq| freq.to_string())
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

/// Interleaved quantized samples, frame by frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    format: FormatDescriptor,
    samples: Vec<i32>,
}

impl FrameBuffer {
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels as usize
    }
}

/// Generate `frames` frames of one sine tone per channel.
///
/// The sample index advances once per frame, so every channel shares the
/// same time base. Values are truncated toward zero. The tone set must hold
/// exactly one tone per channel.
pub fn synthesize(
    format: FormatDescriptor,
    tones: &ToneSet,
    frames: usize,
) -> Result<FrameBuffer> {
    let channels = format.channels as usize;
    if channels == 0 {
        return Err(HarnessError::InvalidConfiguration(
            "cannot synthesize zero channels".to_string(),
        ));
    }
    if tones.len() != channels {
        return Err(HarnessError::InvalidConfiguration(format!(
            "{} tone(s) given for {} channel(s)",
            tones.len(),
            channels
        )));
    }
    if format.sample_rate == 0 {
        return Err(HarnessError::InvalidConfiguration(
            "sample rate must be positive".to_string(),
        ));
    }
    let rate = format.sample_rate as f64;
    let peak = GAIN * format.width.full_scale();

    debug!(
        "Synthesizing {} frames, {} channel(s), {}-byte samples at {} Hz, tones {}",
        frames, channels, format.width, format.sample_rate, tones
    );

    let mut samples = Vec::with_capacity(frames * channels);
    for n in 0..frames {
        for &freq in tones.frequencies() {
            let phase = 2.0 * PI * n as f64 * freq as f64 / rate;
            samples.push((peak * phase.sin()) as i32);
        }
    }

    Ok(FrameBuffer { format, samples })
}
