use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use futures::future;
use tokio::process::Command;
use tokio::select;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::WattmonError;

/// The command being profiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    argv: Vec<String>,
    shell: bool,
}

impl Workload {
    /// Runs `argv[0]` directly with the remaining words as its arguments.
    pub fn direct(argv: Vec<String>) -> Self {
        Workload { argv, shell: false }
    }

    /// Joins `argv` with spaces and hands the line to `sh -c`.
    pub fn shell(argv: Vec<String>) -> Self {
        Workload { argv, shell: true }
    }

    fn command(&self) -> Command {
        if self.shell {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(self.argv.join(" "));
            cmd
        } else {
            let mut cmd = Command::new(self.argv.first().map(String::as_str).unwrap_or_default());
            cmd.args(self.argv.iter().skip(1));
            cmd
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutput {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ChildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawns `workload` with both output streams captured and waits for it.
///
/// The child is killed if `timeout` expires or `shutdown` fires first.
pub async fn run_workload(
    workload: &Workload,
    timeout: Option<Duration>,
    shutdown: &CancellationToken,
) -> Result<ChildOutput, WattmonError> {
    let command = workload.to_string();
    let child = workload
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| WattmonError::ChildSpawn {
            command: command.clone(),
            source,
        })?;
    debug!("Spawned '{}' (pid {:?})", command, child.id());

    let start_time = Instant::now();
    let output = child.wait_with_output();
    let deadline = async {
        match timeout {
            Some(after) => sleep(after).await,
            None => future::pending().await,
        }
    };

    // Dropping `output` drops the child, which kills it.
    let output = select! {
        res = output => res.map_err(|source| WattmonError::ChildIo {
            command: command.clone(),
            source,
        })?,
        _ = deadline => {
            return Err(WattmonError::ChildTimeout {
                command,
                after: timeout.unwrap_or_default(),
            });
        }
        _ = shutdown.cancelled() => return Err(WattmonError::Interrupted),
    };

    Ok(ChildOutput {
        exit_code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
        elapsed: start_time.elapsed(),
    })
}
