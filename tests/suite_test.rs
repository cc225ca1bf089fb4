
use bat_harness::config::{Config, TestSets};
use bat_harness::error::HarnessError;
use bat_harness::matrix::TestSet;
use bat_harness::signal::SampleWidth;
use bat_harness::suite::{RunContext, Suite};
use fake_subject::{fake_subject, recorded_args};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

fn tiny_set() -> TestSet {
    TestSet::new(&[2], &[SampleWidth::S16], &[8000])
}

fn config_for(dir: &Path, body: &str) -> Config {
    let tiny = tiny_set();
    Config {
        subject: fake_subject(dir, body),
        device: "plughw:0,0".to_string(),
        fixture_path: dir.join("wav_test_file.wav"),
        test_sets: TestSets {
            alsa: tiny.clone(),
            tinyalsa: tiny.clone(),
            hw: tiny.clone(),
            hw_fail_mono: tiny.clone(),
            hw_fail_8bit: tiny.clone(),
            hw_fail_rates: tiny.clone(),
            arg_n: tiny,
        },
        ..Default::default()
    }
}

fn suite(config: Config) -> Suite<StdRng> {
    Suite::with_rng(config, StdRng::seed_from_u64(42))
}

#[test]
fn test_file_loopback_writes_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), "exit 0");
    let fixture = config.fixture_path.clone();
    let mut suite = suite(config);
    let mut ctx = RunContext::default();

    suite
        .file_loopback(&mut ctx, &tiny_set(), "fake", &[])
        .unwrap();
    assert_eq!(ctx.test_index, 1);

    let args = recorded_args(dir.path());
    assert_eq!(args.len(), 1);
    let expected_prefix = format!("-D plughw:0,0 -f {} -F ", fixture.display());
    assert!(args[0].starts_with(&expected_prefix), "{}", args[0]);

    // fixture holds twice the two-second cell length
    let reader = hound::WavReader::open(&fixture).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(reader.duration(), 4 * 8000);
}

#[test]
fn test_file_analysis_adds_local_flag() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = suite(config_for(dir.path(), "exit 0"));
    let mut ctx = RunContext::default();

    suite
        .file_analysis(&mut ctx, &tiny_set(), "fake")
        .unwrap();
    let args = recorded_args(dir.path());
    assert!(args[0].ends_with(" -l"), "{}", args[0]);
}

#[test]
fn test_sine_loopback_passes_format() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = suite(config_for(dir.path(), "exit 0"));
    let mut ctx = RunContext::default();
    let set = TestSet::new(&[1, 2], &[SampleWidth::S16, SampleWidth::S32], &[8000]);

    suite
        .sine_loopback(
            &mut ctx,
            &set,
            "fake",
            &[bat_harness::matrix::command::SubjectFlag::TinyBackend],
        )
        .unwrap();

    let args = recorded_args(dir.path());
    assert_eq!(args.len(), 4);
    assert!(args[0].starts_with("-D plughw:0,0 -r 8000 -c 1 -s 2 -n 16000 -F "));
    assert!(args[3].starts_with("-D plughw:0,0 -r 8000 -c 2 -s 4 -n 16000 -F "));
    assert!(args.iter().all(|a| a.ends_with(" -t")));
    // stereo cells carry two comma-joined tones
    let tones = args[3].split(' ').nth(11).unwrap();
    assert_eq!(tones.split(',').count(), 2);
}

#[test]
fn test_single_line_mode_runs_both_roles() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = suite(config_for(dir.path(), "exit 0"));
    let mut ctx = RunContext::default();

    suite
        .single_line_mode(&mut ctx, &tiny_set(), "fake", &[])
        .unwrap();

    let mut args = recorded_args(dir.path());
    args.sort();
    assert_eq!(args.len(), 2);
    assert!(args[0].starts_with("-C plughw:0,0 -r 8000 -c 2 -s 2 -n 8000 "));
    assert!(args[1].starts_with("-P plughw:0,0 -r 8000 -c 2 -s 2 -n 16000 "));
}

#[test]
fn test_expected_failures_pass() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = suite(config_for(dir.path(), "exit 1"));
    let mut ctx = RunContext {
        expect_failure: true,
        ..Default::default()
    };

    suite
        .sine_loopback(&mut ctx, &tiny_set(), "fake", &[])
        .unwrap();
    suite
        .single_line_mode(&mut ctx, &tiny_set(), "fake", &[])
        .unwrap();
    assert_eq!(ctx.test_index, 2);
}

#[test]
fn test_unexpected_failure_halts_suite() {
    let dir = tempfile::tempdir().unwrap();
    let mut suite = suite(config_for(dir.path(), "exit 1"));

    let result = suite.run_all();
    assert!(matches!(
        result,
        Err(HarnessError::ProcessExitMismatch {
            expected_failure: false,
            ..
        })
    ));
    // nothing runs after the first failing cell
    assert_eq!(recorded_args(dir.path()).len(), 1);
}

#[test]
fn test_empty_test_set_stops_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path(), "exit 0");
    config.test_sets.tinyalsa.channels.clear();
    let mut suite = suite(config);

    assert!(matches!(
        suite.run_all(),
        Err(HarnessError::InvalidConfiguration(_))
    ));
    assert!(recorded_args(dir.path()).is_empty());
}

/// Sleeps as long as a real device would for `-n` runs given in seconds
const SLEEP_FOR_LENGTH: &str = r#"
role=$1
device=$2
length=""
prev=""
for arg in "$@"; do
    [ "$prev" = "-n" ] && length=$arg
    prev=$arg
done
case "$length" in
    *s)
        secs=${length%s}
        if [ "$role" = "-D" ]; then
            secs=$(awk "BEGIN { print $secs * 1.5 + 0.5 }")
        fi
        sleep "$secs"
        ;;
esac
"#;

/// The bare hardware device only accepts the first loopback run
const REJECT_REPEATED_HW: &str = r#"
if [ "$device" = "hw:0,0" ]; then
    runs=$(grep -c '^-D hw:0,0 ' "$(dirname "$0")/args.log")
    [ "$runs" -gt 1 ] && exit 1
fi
"#;

#[test]
fn test_full_suite_completes() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("{}{}exit 0", SLEEP_FOR_LENGTH, REJECT_REPEATED_HW);
    let mut suite = suite(config_for(dir.path(), &body));

    // 9 cells on plughw, 1 on hw, 3 expected failures on hw
    assert_eq!(suite.run_all().unwrap(), 13);

    let args = recorded_args(dir.path());
    // single line cells launch two processes each
    assert_eq!(args.len(), 15);

    let on_hw: Vec<_> = args.iter().filter(|a| a.contains(" hw:0,0 ")).collect();
    assert_eq!(on_hw.len(), 4);
    assert!(on_hw.iter().all(|a| a.starts_with("-D hw:0,0 ")));
    // the bare hardware steps run last
    assert!(args[11..].iter().all(|a| a.starts_with("-D hw:0,0 ")));
    assert!(args[..11].iter().all(|a| a.contains(" plughw:0,0 ")));

    assert_eq!(args.iter().filter(|a| a.ends_with(" -l")).count(), 1);
    assert_eq!(args.iter().filter(|a| a.ends_with(" -t")).count(), 4);

    // timed -n runs: one free-running loopback, one playback
    let timed: Vec<_> = args.iter().filter(|a| a.contains("s -F ")).collect();
    assert_eq!(timed.len(), 2);
    assert!(timed[0].starts_with("-D plughw:0,0 "));
    assert!(timed[1].starts_with("-P plughw:0,0 "));
}

#[test]
fn test_bare_hardware_success_halts_expected_failure_phase() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("{}exit 0", SLEEP_FOR_LENGTH);
    let mut suite = suite(config_for(dir.path(), &body));

    let result = suite.run_all();
    assert!(matches!(
        result,
        Err(HarnessError::ProcessExitMismatch {
            expected_failure: true,
            ..
        })
    ));
    // the first expected-failure cell succeeded and stopped the run
    let args = recorded_args(dir.path());
    assert_eq!(args.len(), 13);
    assert!(args[12].starts_with("-D hw:0,0 "));
}
