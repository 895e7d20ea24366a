//! PTY spawning and I/O thread management.
//!
//! Each [`PtyHandle`] owns a `portable-pty` child and a reader thread; the
//! reader thread pushes onto a *shared* channel tagged with the owning
//! terminal's name (§4.5), so the `Multiplex` loop can `recv_timeout` on one
//! receiver instead of `select`-ing across heterogeneous fds.

use std::io::Write;
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// A message from a pty reader thread, tagged with the terminal name it
/// belongs to.
#[derive(Debug)]
pub enum PtyMessage {
    Output(Vec<u8>),
    Exited(i32),
    Error(std::io::Error),
}

/// Handle to a single pty-backed child process.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    reader_thread: Option<JoinHandle<()>>,
}

impl PtyHandle {
    /// Spawns `cmd` with `args` in a new pty sized `cols`x`rows`, applying
    /// `env` on top of the inherited environment. Output (and exit/error)
    /// events are tagged `term_name` and pushed to `event_tx`.
    pub fn spawn(
        term_name: &str,
        cmd: &str,
        args: &[&str],
        cwd: &Path,
        env: &[(String, String)],
        rows: u16,
        cols: u16,
        event_tx: Sender<(String, PtyMessage)>,
    ) -> std::io::Result<Self> {
        let pty_system = native_pty_system();
        let size = PtySize { rows, cols, pixel_width: 0, pixel_height: 0 };
        let pair = pty_system
            .openpty(size)
            .map_err(std::io::Error::other)?;

        let mut cmd_builder = CommandBuilder::new(cmd);
        cmd_builder.args(args);
        cmd_builder.cwd(cwd);
        for (k, v) in env {
            cmd_builder.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd_builder)
            .map_err(std::io::Error::other)?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(std::io::Error::other)?;
        let writer = pair
            .master
            .take_writer()
            .map_err(std::io::Error::other)?;

        let name = term_name.to_string();
        let reader_thread = thread::spawn(move || {
            use std::io::Read;
            let mut buf = [0u8; 65536];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = event_tx.send((name.clone(), PtyMessage::Exited(0)));
                        break;
                    }
                    Ok(n) => {
                        if event_tx.send((name.clone(), PtyMessage::Output(buf[..n].to_vec()))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = event_tx.send((name.clone(), PtyMessage::Error(e)));
                        break;
                    }
                }
            }
        });

        Ok(PtyHandle { master: pair.master, writer, child, reader_thread: Some(reader_thread) })
    }

    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    pub fn resize(&self, rows: u16, cols: u16) -> std::io::Result<()> {
        let size = PtySize { rows, cols, pixel_width: 0, pixel_height: 0 };
        self.master.resize(size).map_err(std::io::Error::other)
    }

    pub fn try_wait(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            Ok(None) => None,
            Err(_) => Some(-1),
        }
    }

    /// Reaps the child: sends `SIGTERM` to let it exit cleanly (§5 "reaping
    /// closes the fd, sends SIGTERM"), falling back to `Child::kill`'s harder
    /// termination when the pid is unavailable (e.g. already reaped).
    pub fn kill(&mut self) -> std::io::Result<()> {
        match self.child.process_id() {
            Some(pid) => {
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc == 0 {
                    Ok(())
                } else {
                    self.child.kill().map_err(std::io::Error::other)
                }
            }
            None => self.child.kill().map_err(std::io::Error::other),
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        let _ = self.kill();
        // The reader thread exits on EOF/error once the child is gone; we
        // don't join it here since it may be mid-`read()`.
        self.reader_thread.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn spawn_echo_produces_output_tagged_with_term_name() {
        let (tx, rx) = unbounded();
        let _handle = PtyHandle::spawn("t1", "echo", &["hello"], Path::new("/tmp"), &[], 24, 80, tx)
            .expect("spawn failed");

        let mut found = false;
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if let Ok((name, msg)) = rx.recv_timeout(Duration::from_millis(100)) {
                assert_eq!(name, "t1");
                if let PtyMessage::Output(data) = msg {
                    if String::from_utf8_lossy(&data).contains("hello") {
                        found = true;
                        break;
                    }
                }
            }
        }
        assert!(found, "expected 'hello' in pty output");
    }

    #[test]
    fn spawn_true_exits_cleanly() {
        let (tx, _rx) = unbounded();
        let mut handle = PtyHandle::spawn("t2", "true", &[], Path::new("/tmp"), &[], 24, 80, tx)
            .expect("spawn failed");
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(handle.try_wait(), Some(0));
    }
}
