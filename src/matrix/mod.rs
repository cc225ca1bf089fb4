pub mod command;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HarnessError, Result};
use crate::signal::{FormatDescriptor, SampleWidth, ToneSet};

/// Lowest tone frequency drawn for a cell
pub const MIN_TONE_HZ: u32 = 10;

/// Timed durations are drawn in tenths of a second from this range
const TIMED_TENTHS: std::ops::RangeInclusive<u32> = 5..=40;

/// Allowed values for each axis of a test matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSet {
    pub channels: Vec<u16>,
    pub sample_widths: Vec<SampleWidth>,
    pub sample_rates: Vec<u32>,
}

impl TestSet {
    pub fn new(channels: &[u16], sample_widths: &[SampleWidth], sample_rates: &[u32]) -> Self {
        Self {
            channels: channels.to_vec(),
            sample_widths: sample_widths.to_vec(),
            sample_rates: sample_rates.to_vec(),
        }
    }

    /// Reject empty value sets, zero channel counts and rates too low to
    /// carry a tone of at least `MIN_TONE_HZ`
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(HarnessError::InvalidConfiguration(
                "channel set is empty".to_string(),
            ));
        }
        if self.sample_widths.is_empty() {
            return Err(HarnessError::InvalidConfiguration(
                "sample width set is empty".to_string(),
            ));
        }
        if self.sample_rates.is_empty() {
            return Err(HarnessError::InvalidConfiguration(
                "sample rate set is empty".to_string(),
            ));
        }
        if self.channels.contains(&0) {
            return Err(HarnessError::InvalidConfiguration(
                "channel count must be positive".to_string(),
            ));
        }
        if self.sample_rates.contains(&0) {
            return Err(HarnessError::InvalidConfiguration(
                "sample rate must be positive".to_string(),
            ));
        }
        if let Some(rate) = self
            .sample_rates
            .iter()
            .find(|&&rate| ToneSet::max_frequency(rate) < MIN_TONE_HZ)
        {
            return Err(HarnessError::InvalidConfiguration(format!(
                "sample rate {}Hz is too low for a {}Hz tone",
                rate, MIN_TONE_HZ
            )));
        }
        Ok(())
    }

    /// Every (channels, width, rate) combination, channels outermost.
    pub fn formats(&self) -> Result<impl Iterator<Item = FormatDescriptor> + '_> {
        self.validate()?;
        Ok(self.channels.iter().flat_map(move |&channels| {
            self.sample_widths.iter().flat_map(move |&width| {
                self.sample_rates
                    .iter()
                    .map(move |&rate| FormatDescriptor::new(channels, width, rate))
            })
        }))
    }

    /// Lazily expand into test cells, drawing tones and durations from `rng`.
    ///
    /// Each call starts a fresh expansion; nothing is shared between calls.
    pub fn expand<'a, R: Rng>(
        &'a self,
        policy: DurationPolicy,
        rng: &'a mut R,
    ) -> Result<impl Iterator<Item = TestCell> + 'a> {
        let formats = self.formats()?;
        Ok(formats.map(move |format| TestCell::draw(format, policy, &mut *rng)))
    }

    pub fn len(&self) -> usize {
        self.channels.len() * self.sample_widths.len() * self.sample_rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How long the subject should run for a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DurationSpec {
    /// Exact frame count
    Frames(u64),
    /// Seconds, passed with an `s` suffix
    Seconds(f64),
}

impl DurationSpec {
    pub fn scaled(self, factor: u32) -> Self {
        match self {
            DurationSpec::Frames(frames) => DurationSpec::Frames(frames * factor as u64),
            DurationSpec::Seconds(secs) => DurationSpec::Seconds(secs * factor as f64),
        }
    }

    pub fn seconds(self, sample_rate: u32) -> f64 {
        match self {
            DurationSpec::Frames(frames) => frames as f64 / sample_rate as f64,
            DurationSpec::Seconds(secs) => secs,
        }
    }

    pub fn frames(self, sample_rate: u32) -> u64 {
        match self {
            DurationSpec::Frames(frames) => frames,
            DurationSpec::Seconds(secs) => (secs * sample_rate as f64) as u64,
        }
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationSpec::Frames(frames) => write!(f, "{}", frames),
            DurationSpec::Seconds(secs) => write!(f, "{:.1}s", secs),
        }
    }
}

/// Duration rule applied to every cell of an expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPolicy {
    /// Two seconds worth of frames
    Streamed,
    /// Random 0.5 to 4.0 seconds in steps of 0.1
    Timed,
    /// One second worth of frames for capture; playback runs twice as long
    SingleLine,
}

/// One concrete configuration to run the subject with
#[derive(Debug, Clone, PartialEq)]
pub struct TestCell {
    pub format: FormatDescriptor,
    pub tones: ToneSet,
    pub duration: DurationSpec,
}

impl TestCell {
    fn draw<R: Rng>(format: FormatDescriptor, policy: DurationPolicy, rng: &mut R) -> Self {
        let max_tone = ToneSet::max_frequency(format.sample_rate);
        let tones = ToneSet::new(
            (0..format.channels)
                .map(|_| rng.gen_range(MIN_TONE_HZ..=max_tone))
                .collect(),
        );

        let duration = match policy {
            DurationPolicy::Streamed => DurationSpec::Frames(2 * format.sample_rate as u64),
            DurationPolicy::Timed => {
                DurationSpec::Seconds(rng.gen_range(TIMED_TENTHS) as f64 / 10.0)
            }
            DurationPolicy::SingleLine => DurationSpec::Frames(format.sample_rate as u64),
        };

        Self {
            format,
            tones,
            duration,
        }
    }

    /// Copy of this cell running for a different length
    pub fn with_duration(&self, duration: DurationSpec) -> Self {
        Self {
            duration,
            ..self.clone()
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.seconds(self.format.sample_rate)
    }
}

impl fmt::Display for TestCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} channel(s), {} bytes per sample, sampling rate is {}Hz, sine wave frequency is {:?}Hz",
            self.format.channels,
            self.format.width,
            self.format.sample_rate,
            self.tones.frequencies()
        )
    }
}
