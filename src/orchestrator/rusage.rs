use nix::sys::resource::{getrusage, UsageWho};
use std::time::Duration;

use crate::error::Result;

/// Cumulative user CPU time of all waited-for child processes
pub fn children_user_time() -> Result<Duration> {
    let usage = getrusage(UsageWho::RUSAGE_CHILDREN).map_err(std::io::Error::from)?;
    let user = usage.user_time();
    Ok(Duration::from_secs(user.tv_sec() as u64) + Duration::from_micros(user.tv_usec() as u64))
}
