use std::fmt;
use std::path::{Path, PathBuf};

use super::TestCell;

/// Which side(s) of the device the subject opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// Playback and capture in one process (`-D`)
    Combined,
    /// Playback only (`-P`)
    Playback,
    /// Capture only (`-C`)
    Capture,
}

impl DeviceRole {
    pub fn flag(self) -> &'static str {
        match self {
            DeviceRole::Combined => "-D",
            DeviceRole::Playback => "-P",
            DeviceRole::Capture => "-C",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceRole::Combined => "loopback",
            DeviceRole::Playback => "playback",
            DeviceRole::Capture => "capture",
        };
        f.write_str(name)
    }
}

/// Optional switches appended after the tone list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectFlag {
    /// Analyse the input file without touching the device (`-l`)
    LocalAnalysis,
    /// Use the tinyalsa backend (`-t`)
    TinyBackend,
}

impl SubjectFlag {
    pub fn as_arg(self) -> &'static str {
        match self {
            SubjectFlag::LocalAnalysis => "-l",
            SubjectFlag::TinyBackend => "-t",
        }
    }
}

/// Execution mode of one subject invocation
#[derive(Debug, Clone, Copy)]
pub enum ExecutionMode<'a> {
    /// Generate the sine internally, play and capture on one device
    SineGeneration,
    /// Read format and samples from a fixture instead of `-r/-c/-s/-n`
    FileInput(&'a Path),
    /// Play only, paired with a separate capture process
    Playback,
    /// Capture only, paired with a separate playback process
    Capture,
}

impl ExecutionMode<'_> {
    pub fn role(&self) -> DeviceRole {
        match self {
            ExecutionMode::SineGeneration | ExecutionMode::FileInput(_) => DeviceRole::Combined,
            ExecutionMode::Playback => DeviceRole::Playback,
            ExecutionMode::Capture => DeviceRole::Capture,
        }
    }
}

/// The subject binary and the device it should open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub subject: PathBuf,
    pub device: String,
}

impl Target {
    pub fn new(subject: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            device: device.into(),
        }
    }
}

/// One fully resolved subject process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub role: DeviceRole,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// One process, or a playback/capture pair started together
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    Single(Invocation),
    Pair {
        playback: Invocation,
        capture: Invocation,
    },
}

impl ExecutionPlan {
    pub fn invocations(&self) -> Vec<&Invocation> {
        match self {
            ExecutionPlan::Single(invocation) => vec![invocation],
            ExecutionPlan::Pair { playback, capture } => vec![playback, capture],
        }
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPlan::Single(invocation) => write!(f, "{}", invocation),
            ExecutionPlan::Pair { playback, capture } => {
                write!(f, "{}\n{}", playback, capture)
            }
        }
    }
}

/// Build the argument list for one subject process.
///
/// Order: device flag, device, format and length (or `-f` fixture), `-F`
/// tone list, then `flags`.
pub fn derive_command(
    target: &Target,
    cell: &TestCell,
    mode: ExecutionMode<'_>,
    flags: &[SubjectFlag],
) -> Invocation {
    let role = mode.role();
    let mut args = vec![role.flag().to_string(), target.device.clone()];

    match mode {
        ExecutionMode::FileInput(path) => {
            args.push("-f".to_string());
            args.push(path.display().to_string());
        }
        _ => {
            args.push("-r".to_string());
            args.push(cell.format.sample_rate.to_string());
            args.push("-c".to_string());
            args.push(cell.format.channels.to_string());
            args.push("-s".to_string());
            args.push(cell.format.width.to_string());
            args.push("-n".to_string());
            args.push(cell.duration.to_string());
        }
    }

    args.push("-F".to_string());
    args.push(cell.tones.to_string());
    args.extend(flags.iter().map(|flag| flag.as_arg().to_string()));

    Invocation {
        role,
        program: target.subject.clone(),
        args,
    }
}

/// Playback of `playback_cell` paired with capture of `capture_cell`
pub fn derive_pair(
    target: &Target,
    playback_cell: &TestCell,
    capture_cell: &TestCell,
    flags: &[SubjectFlag],
) -> ExecutionPlan {
    ExecutionPlan::Pair {
        playback: derive_command(target, playback_cell, ExecutionMode::Playback, flags),
        capture: derive_command(target, capture_cell, ExecutionMode::Capture, flags),
    }
}
