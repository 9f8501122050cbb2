//! Interactive shell sessions
//!
//! Bridges a shell channel to a process running inside a
//! pseudo-terminal. The PTY owns echo and line discipline; this module
//! only relays bytes, applies resizes, and reports the exit.
//!
//! portable-pty I/O is blocking, so the master reader, master writer,
//! and process reaper each run on their own thread and meet the async
//! relay task over channels.

use std::io::{Read, Write};
use std::sync::Arc;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};

use gw_core::error::SessionError;

use super::{exit_signal_for, AdapterControl, ChannelSink};
use crate::session::PtyInfo;

/// How the PTY process ended
#[derive(Debug, Clone, Copy)]
enum PtyExit {
    Code(i32),
    Signal(i32),
}

/// Bridges one shell channel to one PTY process
pub struct InteractiveShellAdapter;

impl InteractiveShellAdapter {
    /// Allocate a PTY sized from `pty`, spawn the shell inside it, and
    /// start the relay. Dropping the returned sender kills the shell.
    pub fn spawn(
        shell: &str,
        pty: &PtyInfo,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<mpsc::Sender<AdapterControl>, SessionError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: dimension(pty.rows, 24),
                cols: dimension(pty.cols, 80),
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", &pty.term);
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn {
                command: shell.to_string(),
                reason: e.to_string(),
            })?;

        // The child keeps its own slave handle; drop the parent's so
        // the master sees EOF when the child exits.
        drop(pair.slave);

        let killer = child.clone_killer();
        let pid = child.process_id();
        tracing::debug!("Spawned shell {} in PTY, pid={:?}", shell, pid);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::PtyAllocation(e.to_string()))?;

        // PTY master -> relay
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    // EOF, or EIO once the child side is gone
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Relay -> PTY master
        let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(64);
        std::thread::spawn(move || {
            let mut writer = writer;
            while let Some(data) = in_rx.blocking_recv() {
                if writer.write_all(&data).and_then(|_| writer.flush()).is_err() {
                    break;
                }
            }
        });

        // Reap with signal detail; portable-pty's own wait folds a
        // signal death into a bare exit code.
        let (exit_tx, exit_rx) = oneshot::channel();
        std::thread::spawn(move || {
            let mut child = child;
            let exit = match pid {
                Some(pid) => wait_for_exit(pid as i32),
                None => match child.wait() {
                    Ok(status) => PtyExit::Code(status.exit_code() as i32),
                    Err(_) => PtyExit::Code(1),
                },
            };
            let _ = exit_tx.send(exit);
        });

        let (control_tx, control_rx) = mpsc::channel(64);
        tokio::spawn(run(
            pair.master,
            killer,
            in_tx,
            out_rx,
            exit_rx,
            control_rx,
            sink,
        ));
        Ok(control_tx)
    }
}

/// Clamp a requested dimension to the PTY's u16 range
fn dimension(value: u32, fallback: u16) -> u16 {
    if value == 0 || value > u16::MAX as u32 {
        fallback
    } else {
        value as u16
    }
}

fn wait_for_exit(pid: i32) -> PtyExit {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::Pid;

    match waitpid(Pid::from_raw(pid), None) {
        Ok(WaitStatus::Exited(_, code)) => PtyExit::Code(code),
        Ok(WaitStatus::Signaled(_, signal, _)) => PtyExit::Signal(signal as i32),
        _ => PtyExit::Code(1),
    }
}

/// Relay loop owning the PTY master.
///
/// Output is polled before the exit arm so everything the shell wrote
/// before exiting reaches the channel ahead of the exit notification.
async fn run(
    master: Box<dyn MasterPty + Send>,
    mut killer: Box<dyn ChildKiller + Send + Sync>,
    in_tx: mpsc::Sender<Vec<u8>>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    mut exit_rx: oneshot::Receiver<PtyExit>,
    mut control_rx: mpsc::Receiver<AdapterControl>,
    sink: Arc<dyn ChannelSink>,
) {
    let mut out_open = true;
    let mut ctl_open = true;
    let mut closed_by_client = false;

    let exit = loop {
        tokio::select! {
            biased;

            out = out_rx.recv(), if out_open => match out {
                Some(data) => sink.data(&data).await,
                None => out_open = false,
            },
            ctl = control_rx.recv(), if ctl_open => match ctl {
                Some(AdapterControl::Stdin(data)) => {
                    let _ = in_tx.send(data).await;
                }
                // A PTY has no input half-close
                Some(AdapterControl::StdinEof) => {}
                Some(AdapterControl::Resize { cols, rows }) => {
                    let size = PtySize {
                        rows: dimension(rows, 24),
                        cols: dimension(cols, 80),
                        pixel_width: 0,
                        pixel_height: 0,
                    };
                    if let Err(e) = master.resize(size) {
                        tracing::warn!("PTY resize failed: {}", e);
                    }
                }
                Some(AdapterControl::Close) | None => {
                    // Client closed the channel; kill the shell and
                    // keep looping until the reaper reports the exit.
                    ctl_open = false;
                    closed_by_client = true;
                    let _ = killer.kill();
                }
            },
            exit = &mut exit_rx => break exit.unwrap_or(PtyExit::Code(1)),
        }
    };

    // Deliver output that was already queued when the exit landed.
    while out_open {
        tokio::select! {
            biased;
            out = out_rx.recv() => match out {
                Some(data) => sink.data(&data).await,
                None => out_open = false,
            },
            _ = std::future::ready(()) => break,
        }
    }

    drop(master);

    if closed_by_client {
        // Channel already closed from the other side; nothing to report.
        return;
    }

    match exit {
        PtyExit::Signal(signal) => {
            tracing::debug!("Shell killed by signal {}", signal);
            sink.exit_signal(exit_signal_for(signal)).await;
        }
        PtyExit::Code(code) => {
            tracing::debug!("Shell exited with status {}", code);
            sink.exit_status(code.max(0) as u32).await;
        }
    }

    sink.eof().await;
    sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::{RecordingSink, SinkEvent};
    use std::time::Duration;
    use tokio::time::timeout;

    const SHELL: &str = "/bin/sh";

    #[tokio::test]
    async fn test_shell_exit_code_reported() {
        let sink = RecordingSink::new();
        let control =
            InteractiveShellAdapter::spawn(SHELL, &PtyInfo::default(), sink.clone()).unwrap();

        control
            .send(AdapterControl::Stdin(b"exit 7\n".to_vec()))
            .await
            .unwrap();

        timeout(Duration::from_secs(10), sink.wait_closed())
            .await
            .expect("channel never closed");

        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SinkEvent::ExitStatus(7))));
        assert!(matches!(events.last(), Some(SinkEvent::Close)));
    }

    #[tokio::test]
    async fn test_pty_sized_from_request() {
        let sink = RecordingSink::new();
        let info = PtyInfo {
            term: "xterm".to_string(),
            cols: 100,
            rows: 40,
        };
        let control = InteractiveShellAdapter::spawn(SHELL, &info, sink.clone()).unwrap();

        control
            .send(AdapterControl::Stdin(b"stty size; exit\n".to_vec()))
            .await
            .unwrap();

        timeout(Duration::from_secs(10), sink.wait_closed())
            .await
            .expect("channel never closed");

        let output = String::from_utf8_lossy(&sink.stdout()).to_string();
        assert!(output.contains("40 100"), "unexpected output: {}", output);
    }

    #[tokio::test]
    async fn test_window_change_resizes_live_pty() {
        let sink = RecordingSink::new();
        let control =
            InteractiveShellAdapter::spawn(SHELL, &PtyInfo::default(), sink.clone()).unwrap();

        // Control messages are applied in order, so the resize lands
        // before the shell reads the stty command.
        control
            .send(AdapterControl::Resize {
                cols: 120,
                rows: 50,
            })
            .await
            .unwrap();
        control
            .send(AdapterControl::Stdin(b"stty size; exit\n".to_vec()))
            .await
            .unwrap();

        timeout(Duration::from_secs(10), sink.wait_closed())
            .await
            .expect("channel never closed");

        let output = String::from_utf8_lossy(&sink.stdout()).to_string();
        assert!(output.contains("50 120"), "unexpected output: {}", output);
    }

    #[tokio::test]
    async fn test_client_close_kills_shell_silently() {
        let sink = RecordingSink::new();
        let control =
            InteractiveShellAdapter::spawn(SHELL, &PtyInfo::default(), sink.clone()).unwrap();

        control.send(AdapterControl::Close).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // The shell may have echoed a prompt, but no exit or close
        // notification goes out on a client-closed channel.
        assert!(!sink.events().iter().any(|e| matches!(
            e,
            SinkEvent::ExitStatus(_) | SinkEvent::ExitSignal(_) | SinkEvent::Close
        )));
    }
}
