use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Run `program` to completion and return its stdout.
///
/// There is no timeout: archive and install commands may run for a long
/// time. A non-zero exit is reported with the combined output.
pub(crate) async fn run<I, S>(program: &Path, args: I) -> Result<String, FetchError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.display().to_string();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(program = %name, "spawning");

    let output = cmd.output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    warn!(program = %name, code = ?output.status.code(), stderr = %stderr.trim(), "command failed");
    Err(FetchError::Process {
        program: name,
        code: output.status.code(),
        output: format!("{}\n{}", stdout.trim(), stderr.trim()).trim().to_owned(),
    })
}
