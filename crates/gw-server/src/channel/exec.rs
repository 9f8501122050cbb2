//! Non-interactive command execution
//!
//! Bridges an exec channel to a spawned child process. The command is
//! run through the configured shell with the operator's home directory
//! as working directory; stdin, stdout, and stderr are relayed as raw
//! byte pipes with no framing.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use gw_core::error::SessionError;

use super::{exit_signal_for, AdapterControl, ChannelSink};

/// Bridges one exec channel to one child process
pub struct ExecChannelAdapter;

impl ExecChannelAdapter {
    /// Spawn the command and start the relay task.
    ///
    /// Returns the control sender for routing channel input and
    /// teardown. Dropping the sender kills the child.
    pub fn spawn(
        shell: &str,
        command: &str,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<mpsc::Sender<AdapterControl>, SessionError> {
        let spawn_err = |reason: String| SessionError::Spawn {
            command: command.to_string(),
            reason,
        };

        let mut child = Command::new(shell)
            .arg("-c")
            .arg(command)
            .current_dir(home_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_err(e.to_string()))?;

        let stdin = child.stdin.take();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(spawn_err("stdio pipes unavailable".to_string()));
        };

        tracing::debug!("Spawned exec child for command: {}", command);

        let (control_tx, control_rx) = mpsc::channel(64);
        tokio::spawn(run(child, stdin, stdout, stderr, control_rx, sink));
        Ok(control_tx)
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Relay loop owning the child and all three stdio pipes.
///
/// Output arms are polled before the exit arm, so bytes the child
/// wrote before exiting reach the channel ahead of the exit
/// notification.
async fn run(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    mut control_rx: mpsc::Receiver<AdapterControl>,
    sink: Arc<dyn ChannelSink>,
) {
    let mut out_buf = vec![0u8; 8192];
    let mut err_buf = vec![0u8; 8192];
    let mut out_open = true;
    let mut err_open = true;

    let status = loop {
        tokio::select! {
            biased;

            n = stdout.read(&mut out_buf), if out_open => match n {
                Ok(n) if n > 0 => sink.data(&out_buf[..n]).await,
                _ => out_open = false,
            },
            n = stderr.read(&mut err_buf), if err_open => match n {
                Ok(n) if n > 0 => sink.extended_data(1, &err_buf[..n]).await,
                _ => err_open = false,
            },
            ctl = control_rx.recv() => match ctl {
                Some(AdapterControl::Stdin(data)) => {
                    if let Some(pipe) = stdin.as_mut() {
                        if pipe.write_all(&data).await.is_err() {
                            stdin = None;
                        }
                    }
                }
                Some(AdapterControl::StdinEof) => stdin = None,
                Some(AdapterControl::Resize { .. }) => {}
                Some(AdapterControl::Close) | None => {
                    // Client closed the channel; the process goes with it.
                    // The channel is already gone, so nothing is reported.
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return;
                }
            },
            status = child.wait() => break status,
        }
    };

    // Final drain: anything written before exit is already readable.
    // A pipe a grandchild still holds open does not keep the channel
    // alive; its later output is dropped.
    while out_open || err_open {
        tokio::select! {
            biased;
            n = stdout.read(&mut out_buf), if out_open => match n {
                Ok(n) if n > 0 => sink.data(&out_buf[..n]).await,
                _ => out_open = false,
            },
            n = stderr.read(&mut err_buf), if err_open => match n {
                Ok(n) if n > 0 => sink.extended_data(1, &err_buf[..n]).await,
                _ => err_open = false,
            },
            _ = std::future::ready(()) => break,
        }
    }

    match status {
        Ok(status) => {
            if let Some(signal) = status.signal() {
                tracing::debug!("Exec child killed by signal {}", signal);
                sink.exit_signal(exit_signal_for(signal)).await;
            } else {
                let code = status.code().unwrap_or(0) as u32;
                tracing::debug!("Exec child exited with status {}", code);
                sink.exit_status(code).await;
            }
        }
        Err(e) => {
            tracing::warn!("Failed to collect exec child status: {}", e);
            sink.exit_status(1).await;
        }
    }

    sink.eof().await;
    sink.close().await;
}
