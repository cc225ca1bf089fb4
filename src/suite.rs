use chrono::Local;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::error::Result;
use crate::matrix::command::{
    derive_command, derive_pair, ExecutionMode, ExecutionPlan, SubjectFlag, Target,
};
use crate::matrix::{DurationPolicy, TestCell, TestSet};
use crate::orchestrator::{ExpectedDuration, Orchestrator, Verdict};
use crate::signal::{synthesize, wav};

/// State carried from one cell to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    /// Index printed in each cell header
    pub test_index: usize,
    /// Every process of the following cells should fail
    pub expect_failure: bool,
}

impl RunContext {
    fn next_index(&mut self) -> usize {
        let index = self.test_index;
        self.test_index += 1;
        index
    }
}

/// Runs the fixed sequence of test matrices against the subject and stops at
/// the first unexpected result.
pub struct Suite<R: Rng = StdRng> {
    config: Config,
    orchestrator: Orchestrator,
    target: Target,
    rng: R,
}

impl Suite<StdRng> {
    pub fn new(config: Config) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> Suite<R> {
    pub fn with_rng(config: Config, rng: R) -> Self {
        let orchestrator = Orchestrator::from_config(&config);
        let target = Target::new(config.subject.clone(), config.device.clone());
        Self {
            config,
            orchestrator,
            target,
            rng,
        }
    }

    /// Run the whole suite, returning the number of cells executed.
    pub fn run_all(&mut self) -> Result<usize> {
        let sets = self.config.test_sets.clone();
        sets.validate()?;

        let started = Local::now();
        info!("Suite started at {}", started.format("%Y-%m-%d %H:%M:%S"));
        let mut ctx = RunContext::default();
        let tiny = [SubjectFlag::TinyBackend];

        self.file_analysis(&mut ctx, &sets.alsa, "with ALSA testset")?;

        self.file_loopback(&mut ctx, &sets.alsa, "ALSA", &[])?;
        self.sine_loopback(&mut ctx, &sets.alsa, "ALSA", &[])?;

        self.file_loopback(&mut ctx, &sets.tinyalsa, "TINYALSA", &tiny)?;
        self.sine_loopback(&mut ctx, &sets.tinyalsa, "TINYALSA", &tiny)?;

        self.single_line_mode(&mut ctx, &sets.alsa, "ALSA", &[])?;
        self.single_line_mode(&mut ctx, &sets.tinyalsa, "TINYALSA", &tiny)?;

        self.argument_n(&mut ctx, &sets.arg_n, "")?;

        match self.config.hw_device() {
            Some(hw) => {
                self.target.device = hw;
                self.file_loopback(&mut ctx, &sets.hw, "ALSA hw", &[])?;

                ctx.expect_failure = true;
                let name = "ALSA hw with not supported config";
                self.file_loopback(&mut ctx, &sets.hw_fail_mono, name, &[])?;
                self.sine_loopback(&mut ctx, &sets.hw_fail_8bit, name, &[])?;
                self.file_loopback(&mut ctx, &sets.hw_fail_rates, name, &[])?;
            }
            None => info!(
                "Device {} has no plug layer, skipping bare hardware tests",
                self.config.device
            ),
        }

        let elapsed = Local::now() - started;
        println!(
            "\nTESTS FINISHED: {} test(s) in {}s",
            ctx.test_index,
            elapsed.num_seconds()
        );
        Ok(ctx.test_index)
    }

    /// Analyse synthesized fixtures without touching the device
    pub fn file_analysis(
        &mut self,
        ctx: &mut RunContext,
        set: &TestSet,
        name: &str,
    ) -> Result<()> {
        banner("TESTING BAT ANALYZIS", name);
        self.input_file(ctx, set, &[SubjectFlag::LocalAnalysis])
    }

    /// Play synthesized fixtures and capture them back
    pub fn file_loopback(
        &mut self,
        ctx: &mut RunContext,
        set: &TestSet,
        name: &str,
        flags: &[SubjectFlag],
    ) -> Result<()> {
        banner("TESTING BAT AUDIO LOOP", name);
        self.input_file(ctx, set, flags)
    }

    /// Let the subject generate the sine itself
    pub fn sine_loopback(
        &mut self,
        ctx: &mut RunContext,
        set: &TestSet,
        name: &str,
        flags: &[SubjectFlag],
    ) -> Result<()> {
        banner("TESTING BAT AUDIO SINE GEN", name);
        for cell in self.cells(set, DurationPolicy::Streamed)? {
            println!("{}", "-".repeat(80));
            println!(
                "Test #{}: {}, length is {}s",
                ctx.next_index(),
                cell,
                cell.duration_secs()
            );
            let invocation =
                derive_command(&self.target, &cell, ExecutionMode::SineGeneration, flags);
            self.execute(ctx, &ExecutionPlan::Single(invocation), None)?;
        }
        Ok(())
    }

    /// Separate playback and capture processes on the same device
    pub fn single_line_mode(
        &mut self,
        ctx: &mut RunContext,
        set: &TestSet,
        name: &str,
        flags: &[SubjectFlag],
    ) -> Result<()> {
        banner("TESTING SINGLE LINE MODE", name);
        for capture in self.cells(set, DurationPolicy::SingleLine)? {
            let playback = capture.with_duration(capture.duration.scaled(2));
            println!("{}", "-".repeat(80));
            println!(
                "Test #{}: {}, playback length is {}s, capture length is {}s",
                ctx.next_index(),
                capture,
                playback.duration_secs(),
                capture.duration_secs()
            );
            let plan = derive_pair(&self.target, &playback, &capture, flags);
            self.execute(ctx, &plan, None)?;
        }
        Ok(())
    }

    /// Timed runs with a fractional `-n`: a free-running loopback, then
    /// playback alone
    pub fn argument_n(&mut self, ctx: &mut RunContext, set: &TestSet, name: &str) -> Result<()> {
        banner("TESTING ARGUMENT -n", name);

        for cell in self.cells(set, DurationPolicy::Timed)? {
            let duration = cell.duration_secs();
            println!("{}", "-".repeat(80));
            println!("Test #{}: {}, length is {}s", ctx.next_index(), cell, duration);
            let invocation =
                derive_command(&self.target, &cell, ExecutionMode::SineGeneration, &[]);
            self.execute(
                ctx,
                &ExecutionPlan::Single(invocation),
                Some(ExpectedDuration::Buffered(duration)),
            )?;
        }

        for cell in self.cells(set, DurationPolicy::Timed)? {
            let duration = cell.duration_secs();
            println!("{}", "-".repeat(80));
            println!(
                "Test #{}: {}, playback length is {}s",
                ctx.next_index(),
                cell,
                duration
            );
            let invocation = derive_command(&self.target, &cell, ExecutionMode::Playback, &[]);
            self.execute(
                ctx,
                &ExecutionPlan::Single(invocation),
                Some(ExpectedDuration::Exact(duration)),
            )?;
        }
        Ok(())
    }

    fn input_file(
        &mut self,
        ctx: &mut RunContext,
        set: &TestSet,
        flags: &[SubjectFlag],
    ) -> Result<()> {
        let fixture = self.config.fixture_path.clone();
        for cell in self.cells(set, DurationPolicy::Streamed)? {
            let frames = cell.duration.scaled(2).frames(cell.format.sample_rate);
            println!("{}", "-".repeat(80));
            println!(
                "Test #{}: {}, analysing length is {}s",
                ctx.next_index(),
                cell,
                cell.duration_secs()
            );
            println!(
                "  Generating wav file: {}, length is {}s",
                cell,
                frames as f64 / cell.format.sample_rate as f64
            );

            let buffer = synthesize(cell.format, &cell.tones, frames as usize)?;
            wav::write_fixture(&fixture, &buffer)?;

            let mode = ExecutionMode::FileInput(&fixture);
            let invocation = derive_command(&self.target, &cell, mode, flags);
            self.execute(ctx, &ExecutionPlan::Single(invocation), None)?;
        }
        Ok(())
    }

    fn cells(&mut self, set: &TestSet, policy: DurationPolicy) -> Result<Vec<TestCell>> {
        let cells: Vec<TestCell> = set.expand(policy, &mut self.rng)?.collect();
        debug!("Expanded {} cell(s) with {:?} durations", cells.len(), policy);
        Ok(cells)
    }

    fn execute(
        &self,
        ctx: &RunContext,
        plan: &ExecutionPlan,
        timing: Option<ExpectedDuration>,
    ) -> Result<Verdict> {
        println!("  Calling bat with cmd:\n{}", plan);
        let verdict = self.orchestrator.run(plan, ctx.expect_failure, timing)?;

        if let (Some(expected), Some(measured)) = (verdict.expected, verdict.measured) {
            println!(
                "  BAT was expected to run {:.3}s and ran for {:.3}s",
                expected, measured
            );
        }
        println!(" ==> {}", if verdict.passed { "Pass" } else { "Fail" });
        verdict.into_result()
    }
}

fn banner(title: &str, name: &str) {
    println!("{}", "#".repeat(80));
    println!("{} {} -- {} {}", "#".repeat(10), title, name, "#".repeat(10));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_counts_cells() {
        let mut ctx = RunContext::default();
        assert_eq!(ctx.next_index(), 0);
        assert_eq!(ctx.next_index(), 1);
        assert_eq!(ctx.test_index, 2);
        assert!(!ctx.expect_failure);
    }
}
