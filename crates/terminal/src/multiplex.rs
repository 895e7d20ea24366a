//! Owns every live terminal session: spawns ptys, drains the shared output
//! channel, feeds bytes through each session's [`Emulator`], and hands
//! finished events back to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::{is_login_shell, MultiplexConfig, ENV_STRIP, LC_EXPORT_ENV};
use crate::emulator::Emulator;
use crate::error::{TermError, TermResult};
use crate::event::Event;
use crate::pty::{PtyHandle, PtyMessage};

/// How long `poll` blocks on the shared channel before returning, even if
/// nothing arrived. Keeps the caller's loop responsive to its own signals.
const POLL_SLICE: Duration = Duration::from_millis(20);

struct TerminalSession {
    emulator: Emulator,
    pty: PtyHandle,
    last_output: Instant,
    /// Cleared after the first output burst; used to strip a stray leading
    /// `"> "` (or `"\x1b[K> "`) that some shells echo before their real
    /// first prompt arrives (§4.5 `pty_read`).
    first_burst: bool,
}

/// Strips a leading spurious `"> "` or `"\x1b[K> "` from the very first byte
/// burst a freshly spawned shell emits, a one-shot fixup for a missed first
/// prompt (§4.5).
/// Single-quotes `value` for safe injection into a shell command line,
/// escaping embedded single quotes the POSIX way (`'\''`).
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn strip_stray_leading_prompt(bytes: &[u8]) -> &[u8] {
    const MARKERS: [&[u8]; 2] = [b"\x1b[K> ", b"> "];
    for marker in MARKERS {
        if bytes.starts_with(marker) {
            return &bytes[marker.len()..];
        }
    }
    bytes
}

/// Drives every terminal this process owns from one thread: one pty reader
/// thread per terminal pushes onto a single shared channel (§4.5), and
/// `poll` is the sole consumer, so no terminal's state is ever touched from
/// more than one thread at a time without going through that channel.
pub struct Multiplex {
    config: MultiplexConfig,
    sessions: HashMap<String, TerminalSession>,
    event_tx: Sender<(String, PtyMessage)>,
    event_rx: Receiver<(String, PtyMessage)>,
    next_cookie: u64,
}

impl Multiplex {
    pub fn new(config: MultiplexConfig) -> Self {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Multiplex { config, sessions: HashMap::new(), event_tx, event_rx, next_cookie: 0 }
    }

    pub fn terminal_names(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn has_terminal(&self, term_name: &str) -> bool {
        self.sessions.contains_key(term_name)
    }

    /// Spawns a new pty-backed session named `term_name`, sized `rows`x`cols`.
    pub fn create_terminal(&mut self, term_name: &str, rows: u16, cols: u16) -> TermResult<()> {
        let (cmd, args) = self.resolve_command();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let cwd = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        self.next_cookie += 1;
        let cookie = format!("{:016}", self.next_cookie);
        let env = self.build_environment(term_name, &cookie, rows, cols);

        let pty = PtyHandle::spawn(term_name, &cmd, &arg_refs, &cwd, &env, rows, cols, self.event_tx.clone())
            .map_err(TermError::Spawn)?;
        let emulator = Emulator::new(cols as usize, rows as usize, cookie, self.config.prompt.clone());
        self.sessions.insert(term_name.to_string(), TerminalSession { emulator, pty, last_output: Instant::now(), first_burst: true });
        Ok(())
    }

    fn resolve_command(&self) -> (String, Vec<String>) {
        let cmd = self
            .config
            .command
            .clone()
            .unwrap_or_else(|| std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()));
        let basename = Path::new(&cmd).file_name().and_then(|s| s.to_str()).unwrap_or(&cmd);
        let args = if is_login_shell(basename) { vec!["-l".to_string()] } else { Vec::new() };
        (cmd, args)
    }

    /// Strips the ambient-tooling variables named in [`ENV_STRIP`] and
    /// injects the `GRAPHTERM_*` set a spawned shell uses to find its way
    /// back to this process (§6); mirrors the locale-laundering `LC_*` trick
    /// under `lc_export` for hops (`ssh`) that only forward locale vars.
    pub fn build_environment(&self, term_name: &str, cookie: &str, rows: u16, cols: u16) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = std::env::vars().filter(|(k, _)| !ENV_STRIP.contains(&k.as_str())).collect();

        env.push(("TERM".to_string(), self.config.term_type.clone()));
        env.push(("GRAPHTERM_COOKIE".to_string(), cookie.to_string()));
        env.push(("GRAPHTERM_SHARED_SECRET".to_string(), self.config.shared_secret.clone()));
        env.push(("GRAPHTERM_PATH".to_string(), format!("{}/{}", self.config.host, term_name)));
        env.push(("GRAPHTERM_DIMENSIONS".to_string(), format!("{cols}x{rows}")));
        env.push(("GRAPHTERM_URL".to_string(), self.config.server_url.clone()));
        env.push(("GRAPHTERM_API".to_string(), self.config.api_version.clone()));
        env.push(("GRAPHTERM_SOCKET".to_string(), self.config.widget_port.to_string()));

        let (prefix, suffix) = self
            .config
            .prompt
            .as_ref()
            .map(|p| (p.prefix.clone(), p.suffix.clone()))
            .unwrap_or_else(|| ("$".to_string(), " ".to_string()));
        env.push(("GRAPHTERM_PROMPT".to_string(), format!("{prefix}{suffix}")));
        env.push((
            "PROMPT_COMMAND".to_string(),
            format!(
                "PS1=\"{prefix}{suffix}\"; printf '\\033[?1150;{cookie}h%s\\033[?1150;l' \"$PWD\"",
            ),
        ));

        if let Some(bindir) = &self.config.bindir {
            env.push(("GRAPHTERM_DIR".to_string(), bindir.display().to_string()));
            let path = std::env::var("PATH").unwrap_or_default();
            env.push(("PATH".to_string(), format!("{}:{}", bindir.display(), path)));
        }

        if self.config.lc_export {
            let mirrored: Vec<(String, String)> = LC_EXPORT_ENV
                .iter()
                .filter_map(|key| env.iter().find(|(k, _)| k == key).map(|(_, v)| (format!("LC_{key}"), v.clone())))
                .collect();
            env.extend(mirrored);
        }
        env
    }

    pub fn write_input(&mut self, term_name: &str, data: &[u8]) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session
            .pty
            .write(data)
            .map_err(|source| TermError::PtyIo { term_name: term_name.to_string(), source })
    }

    pub fn resize_terminal(&mut self, term_name: &str, rows: u16, cols: u16) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session
            .pty
            .resize(rows, cols)
            .map_err(|source| TermError::PtyIo { term_name: term_name.to_string(), source })?;
        session.emulator.resize(rows as usize, cols as usize);
        Ok(())
    }

    pub fn kill_term(&mut self, term_name: &str) -> TermResult<()> {
        let mut session = self.sessions.remove(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        let _ = session.pty.kill();
        Ok(())
    }

    pub fn kill_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            let _ = session.pty.kill();
        }
    }

    pub fn shutdown(&mut self) {
        self.kill_all();
    }

    /// Forces a full resend of the named terminal's screen and entire
    /// scroll history — call this right after a front-end reconnects.
    pub fn reconnect(&mut self, term_name: &str, mut callback: impl FnMut(&str, Event)) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session.emulator.update_for_reconnect();
        for event in session.emulator.drain_events() {
            callback(term_name, event);
        }
        Ok(())
    }

    pub fn note_activate(&mut self, term_name: &str, cwd: Option<String>) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session.emulator.note_activate(cwd);
        Ok(())
    }

    pub fn note_deactivate(&mut self, term_name: &str) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session.emulator.note_deactivate();
        Ok(())
    }

    pub fn exec_cell(&mut self, term_name: &str, command: &str) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        if let Some(line) = session.emulator.exec_cell(command) {
            session
                .pty
                .write(line.as_bytes())
                .map_err(|source| TermError::PtyIo { term_name: term_name.to_string(), source })?;
        }
        Ok(())
    }

    pub fn note_add_cell(&mut self, term_name: &str, cell_type: &str, before_index: Option<u64>) -> TermResult<Option<u64>> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        Ok(session.emulator.note_add_cell(cell_type, before_index))
    }

    pub fn note_switch_cell(&mut self, term_name: &str, cell_index: u64, move_up: Option<bool>) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session.emulator.note_switch_cell(cell_index, move_up);
        Ok(())
    }

    pub fn note_delete_cell(&mut self, term_name: &str, cell_index: u64) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session.emulator.note_delete_cell(cell_index);
        Ok(())
    }

    pub fn complete_cell(&mut self, term_name: &str) -> TermResult<()> {
        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session.emulator.complete_cell();
        Ok(())
    }

    /// Re-sends the `GRAPHTERM_*`/`PROMPT_COMMAND` assignments into an
    /// already-running shell, guarded so a shell that already has them is
    /// left untouched (§4.5 `export_environment`) — covers a shell started
    /// before this process's environment injection applied, e.g. after an
    /// `ssh` hop.
    pub fn export_environment(&mut self, term_name: &str, rows: u16, cols: u16) -> TermResult<()> {
        let cookie = self
            .sessions
            .get(term_name)
            .map(|s| s.emulator.cookie().to_string())
            .ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        let env = self.build_environment(term_name, &cookie, rows, cols);
        let mut script = String::from("[ \"$GRAPHTERM_COOKIE\" ] || {\n");
        for (k, v) in &env {
            if k == "PATH" || k == "PROMPT_COMMAND" {
                continue;
            }
            script.push_str(&format!("export {k}={};\n", shell_quote(v)));
        }
        if let Some((_, prompt_command)) = env.iter().find(|(k, _)| k == "PROMPT_COMMAND") {
            script.push_str(prompt_command);
            script.push_str(";\n");
        }
        script.push_str("}\n");

        let session = self.sessions.get_mut(term_name).ok_or_else(|| TermError::NoSuchTerminal(term_name.to_string()))?;
        session
            .pty
            .write(script.as_bytes())
            .map_err(|source| TermError::PtyIo { term_name: term_name.to_string(), source })
    }

    /// Drains whatever arrived on the shared channel for up to 20ms,
    /// dispatching each message to its owning terminal's emulator with a
    /// `catch_unwind` boundary so one terminal's panic can't take down the
    /// others (§7). Events are collected into a local `Vec` while sessions
    /// are being mutated and only handed to `callback` once that borrow
    /// ends — the queue-and-flush pattern that keeps this reentrant-mutex-free.
    pub fn poll(&mut self, mut callback: impl FnMut(&str, Event)) {
        let mut pending: Vec<(String, Event)> = Vec::new();
        let deadline = Instant::now() + POLL_SLICE;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.event_rx.recv_timeout(remaining) {
                Ok((name, msg)) => self.handle_message(&name, msg, &mut pending),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.reap_idle(&mut pending);

        for (name, event) in pending {
            callback(&name, event);
        }
    }

    fn handle_message(&mut self, name: &str, msg: PtyMessage, pending: &mut Vec<(String, Event)>) {
        // §7 "I/O on child pty": EOF or a read error never takes the whole
        // multiplexer down. A final `update()` flushes anything still in
        // the screen before the session is reaped immediately, rather than
        // waiting out the idle timeout.
        if matches!(msg, PtyMessage::Exited(_) | PtyMessage::Error(_)) {
            if let Some(session) = self.sessions.get_mut(name) {
                session.emulator.update();
                for event in session.emulator.drain_events() {
                    pending.push((name.to_string(), event));
                }
            }
            let reason = match &msg {
                PtyMessage::Exited(code) => format!("{name} exited with status {code}"),
                PtyMessage::Error(e) => format!("{name} pty error: {e}"),
                PtyMessage::Output(_) => unreachable!(),
            };
            tracing::info!(term = name, %reason, "reaping terminal after pty EOF/error");
            pending.push((name.to_string(), Event::Alert { message: reason }));
            self.sessions.remove(name);
            return;
        }

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let Some(session) = self.sessions.get_mut(name) else { return };
            match msg {
                PtyMessage::Output(bytes) => {
                    let bytes = if session.first_burst {
                        session.first_burst = false;
                        strip_stray_leading_prompt(&bytes)
                    } else {
                        &bytes[..]
                    };
                    session.emulator.write(bytes);
                    session.last_output = Instant::now();

                    let reply = session.emulator.take_output();
                    if !reply.is_empty() {
                        let _ = session.pty.write(&reply);
                    }

                    session.emulator.update();

                    if let Some(line) = session.emulator.note_prompt_seen() {
                        let _ = session.pty.write(line.as_bytes());
                    }

                    for event in session.emulator.drain_events() {
                        pending.push((name.to_string(), event));
                    }
                }
                PtyMessage::Exited(_) | PtyMessage::Error(_) => unreachable!(),
            }
        }));

        if outcome.is_err() {
            tracing::error!(term = name, "panic while dispatching pty output; isolating this terminal");
        }
    }

    fn reap_idle(&mut self, pending: &mut Vec<(String, Event)>) {
        let timeout = self.config.idle_timeout;
        let now = Instant::now();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_output) > timeout)
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            if let Some(mut session) = self.sessions.remove(&name) {
                let _ = session.pty.kill();
                pending.push((name, Event::Alert { message: "idle timeout".to_string() }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_command_wraps_login_shells_with_dash_l() {
        let mut config = MultiplexConfig::default();
        config.command = Some("/bin/bash".to_string());
        let mux = Multiplex::new(config);
        let (cmd, args) = mux.resolve_command();
        assert_eq!(cmd, "/bin/bash");
        assert_eq!(args, vec!["-l".to_string()]);
    }

    #[test]
    fn resolve_command_leaves_non_shell_commands_bare() {
        let mut config = MultiplexConfig::default();
        config.command = Some("/usr/bin/python3".to_string());
        let mux = Multiplex::new(config);
        let (_, args) = mux.resolve_command();
        assert!(args.is_empty());
    }

    #[test]
    fn build_environment_strips_and_injects() {
        std::env::set_var("TERM_PROGRAM", "vscode");
        let mut config = MultiplexConfig::default();
        config.host = "localhost".to_string();
        let mux = Multiplex::new(config);
        let env = mux.build_environment("main", "1234567890123456", 24, 80);
        assert!(env.iter().all(|(k, _)| k != "TERM_PROGRAM"));
        assert!(env.iter().all(|(k, _)| k != "GRAPHTERM_EXPORT"));
        assert!(env.iter().any(|(k, v)| k == "GRAPHTERM_PATH" && v == "localhost/main"));
        assert!(env.iter().any(|(k, v)| k == "GRAPHTERM_COOKIE" && v == "1234567890123456"));
        assert!(env.iter().any(|(k, v)| k == "GRAPHTERM_DIMENSIONS" && v == "80x24"));
    }

    #[test]
    fn strip_stray_leading_prompt_removes_known_markers() {
        assert_eq!(strip_stray_leading_prompt(b"> hello"), b"hello");
        assert_eq!(strip_stray_leading_prompt(b"\x1b[K> hello"), b"hello");
        assert_eq!(strip_stray_leading_prompt(b"hello"), b"hello");
    }

    #[test]
    fn no_such_terminal_errors_on_write() {
        let mut mux = Multiplex::new(MultiplexConfig::default());
        let err = mux.write_input("ghost", b"hi").unwrap_err();
        assert!(matches!(err, TermError::NoSuchTerminal(_)));
    }

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn export_environment_errors_on_unknown_terminal() {
        let mut mux = Multiplex::new(MultiplexConfig::default());
        assert!(mux.export_environment("ghost", 24, 80).is_err());
    }

    #[test]
    fn create_write_and_kill_round_trip() {
        let mut config = MultiplexConfig::default();
        config.command = Some("/bin/cat".to_string());
        let mut mux = Multiplex::new(config);
        mux.create_terminal("t1", 24, 80).expect("spawn failed");
        assert!(mux.has_terminal("t1"));
        mux.write_input("t1", b"hello\n").expect("write failed");
        std::thread::sleep(Duration::from_millis(200));
        let mut saw_output = false;
        mux.poll(|_name, event| {
            if let Event::RowUpdate(p) = event {
                if !p.updated_rows.is_empty() {
                    saw_output = true;
                }
            }
        });
        assert!(saw_output);
        mux.kill_term("t1").expect("kill failed");
        assert!(!mux.has_terminal("t1"));
    }
}
