use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::HarnessError;
use crate::matrix::TestSet;
use crate::signal::SampleWidth::{S16, S32, S8};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the bat binary under test
    pub subject: PathBuf,

    /// Device used for playback and capture
    pub device: String,

    /// Show the subject's own output
    pub verbose: bool,

    /// Scratch WAV file rewritten before each file-input cell
    #[serde(default = "default_fixture_path")]
    pub fixture_path: PathBuf,

    /// Delay between starting playback and capture in single line mode (ms)
    #[serde(default = "default_grace_delay_ms")]
    pub grace_delay_ms: u64,

    /// Accepted deviation from the expected duration (seconds)
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: f64,

    /// Kill a subject still running after this many seconds (None waits forever)
    #[serde(default)]
    pub process_timeout_secs: Option<f64>,

    /// Fixed test matrices
    #[serde(default)]
    pub test_sets: TestSets,
}

/// Matrices run by the suite, one per scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSets {
    pub alsa: TestSet,
    pub tinyalsa: TestSet,
    pub hw: TestSet,
    /// Mono is rejected by the bare hardware device
    pub hw_fail_mono: TestSet,
    /// 8-bit samples are rejected by the bare hardware device
    pub hw_fail_8bit: TestSet,
    /// Low rates are rejected by the bare hardware device
    pub hw_fail_rates: TestSet,
    /// Timed runs with a fractional `-n` argument
    pub arg_n: TestSet,
}

const HW_RATES: &[u32] = &[44100, 48000, 96000, 192000];

impl Default for TestSets {
    fn default() -> Self {
        Self {
            alsa: TestSet::new(
                &[1, 2],
                &[S8, S16, S32],
                &[8000, 11025, 16000, 22050, 44100, 48000, 88200, 96000, 192000],
            ),
            tinyalsa: TestSet::new(&[2], &[S16, S32], &[44100, 192000]),
            hw: TestSet::new(&[2], &[S16, S32], HW_RATES),
            hw_fail_mono: TestSet::new(&[1], &[S16, S32], HW_RATES),
            hw_fail_8bit: TestSet::new(&[2], &[S8], HW_RATES),
            hw_fail_rates: TestSet::new(&[2], &[S16, S32], &[8000, 22050]),
            arg_n: TestSet::new(&[1, 2], &[S16, S32], &[48000, 96000]),
        }
    }
}

impl TestSets {
    /// Validate every matrix, naming the offending one
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, set) in self.iter() {
            set.validate().map_err(|e| match e {
                HarnessError::InvalidConfiguration(message) => {
                    HarnessError::InvalidConfiguration(format!("test set '{}': {}", name, message))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &TestSet)> {
        [
            ("alsa", &self.alsa),
            ("tinyalsa", &self.tinyalsa),
            ("hw", &self.hw),
            ("hw_fail_mono", &self.hw_fail_mono),
            ("hw_fail_8bit", &self.hw_fail_8bit),
            ("hw_fail_rates", &self.hw_fail_rates),
            ("arg_n", &self.arg_n),
        ]
        .into_iter()
    }
}

fn default_fixture_path() -> PathBuf {
    PathBuf::from("wav_test_file.wav")
}

fn default_grace_delay_ms() -> u64 {
    100
}

fn default_tolerance_secs() -> f64 {
    0.1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subject: PathBuf::from("bat"),
            device: "plughw:0,0".to_string(),
            verbose: false,
            fixture_path: default_fixture_path(),
            grace_delay_ms: default_grace_delay_ms(),
            tolerance_secs: default_tolerance_secs(),
            process_timeout_secs: None,
            test_sets: TestSets::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        self.test_sets.validate()?;
        if self.tolerance_secs.is_nan() || self.tolerance_secs < 0.0 {
            anyhow::bail!(
                "tolerance_secs ({}) must be a non-negative number of seconds",
                self.tolerance_secs
            );
        }
        if let Some(timeout) = self.process_timeout_secs {
            if !timeout.is_finite() || timeout <= 0.0 {
                anyhow::bail!("process_timeout_secs ({}) must be positive", timeout);
            }
        }
        Ok(())
    }

    /// The bare hardware device behind a `plughw` device, if it differs
    pub fn hw_device(&self) -> Option<String> {
        let hw = self.device.replace("plug", "");
        (hw != self.device).then_some(hw)
    }
}
