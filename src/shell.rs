//! `/bin/sh -c` subprocess helpers.
//!
//! Build and vendor commands run with inherited stdio so protoc and fetch
//! tool output stays visible; callers needing pipes configure them on the
//! returned [`Command`].

use std::io;
use std::process::Command;

/// Build a `/bin/sh -c <command>` invocation. Stdio is inherited by default.
pub fn shell(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Run a shell command with inherited stdio, returning its exit status code.
pub fn run(command: &str) -> io::Result<i32> {
    let status = shell(command).status()?;
    Ok(status.code().unwrap_or(-1))
}

/// Run a shell command and capture trimmed stdout. Stderr stays inherited.
/// A non-zero exit is an error.
pub fn run_capture(command: &str) -> io::Result<String> {
    let output = shell(command).output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("command failed ({}): {}", output.status, command),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
