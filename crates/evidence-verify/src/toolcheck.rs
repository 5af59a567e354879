//! Detects whether `cosign` can be launched.
//!
//! Image signature re-verification is delegated to `cosign`. A missing binary is not an
//! error; the verifier reports the step as skipped.

use std::ffi::OsStr;
use std::process::{Command, Stdio};

/// Spawns `cmd args...` with output discarded. `true` when the process launched, whatever
/// its exit code.
pub fn launches(cmd: impl AsRef<OsStr>, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

pub fn cosign_available(program: impl AsRef<OsStr>) -> bool {
    launches(program, &["version"])
}
