//! Script execution
//!
//! Runs a resolved script under a shell and streams its output into the log
//! line by line while it runs. Standard output is logged at INFO and standard
//! error at WARN, both tagged with the script name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ScriptError;

/// Interpreter used for every script
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// How long to keep draining output after the script exits
///
/// Background processes started by a script can hold the pipes open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs scripts found in a working directory
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    work_dir: PathBuf,
    shell: PathBuf,
}

impl ScriptRunner {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    /// Use a different interpreter
    pub fn with_shell(mut self, shell: impl AsRef<Path>) -> Self {
        self.shell = shell.as_ref().to_path_buf();
        self
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run a script and wait for it to exit
    ///
    /// All of the script's output has been logged by the time this returns.
    pub async fn run(&self, name: &str) -> Result<(), ScriptError> {
        let path = self.work_dir.join(name);
        debug!("about to run: {}", path.display());

        let mut child = Command::new(&self.shell)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ScriptError::execution(
                    name,
                    format!("error starting command '{}': {}", path.display(), e),
                )
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScriptError::execution(name, "could not attach to stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScriptError::execution(name, "could not attach to stderr"))?;

        let readers = [
            tokio::spawn(forward_lines(name.to_string(), stdout, Stream::Stdout)),
            tokio::spawn(forward_lines(name.to_string(), stderr, Stream::Stderr)),
        ];

        let status = child.wait().await;

        for reader in readers {
            drain(name, reader).await;
        }

        let status = status.map_err(|e| {
            ScriptError::execution(name, format!("error waiting for command: {e}"))
        })?;

        if !status.success() {
            let message = match status.code() {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            };
            return Err(ScriptError::execution(name, message));
        }

        debug!("{} finished successfully", name);
        Ok(())
    }
}

/// Wait for an output reader to finish, abandoning it if the pipe stays open
async fn drain(name: &str, mut reader: JoinHandle<()>) {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("output reader for {} failed: {}", name, e),
        Err(_) => {
            warn!(
                "{} exited but its output is still open, no longer reading it",
                name
            );
            reader.abort();
            let _ = reader.await;
        }
    }
}

async fn forward_lines<R>(name: String, reader: R, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                match stream {
                    Stream::Stdout => info!("{} | {}", name, line),
                    Stream::Stderr => warn!("{} | {}", name, line),
                }
            }
            Err(e) => {
                warn!("error reading output of {}: {}", name, e);
                break;
            }
        }
    }
}
