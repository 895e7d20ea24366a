//! linepty: a thin smoke-test harness binary.
//!
//! Wires one [`Multiplex`] terminal to the calling process's own stdin/stdout
//! so the emulator and pty plumbing can be exercised by hand. This is not a
//! terminal front-end — it prints scroll-row text as it arrives and forwards
//! raw stdin bytes to the child pty. A real front-end owns its own render
//! loop and calls into `linepty-terminal` directly.

use std::io::{self, Read};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use linepty_terminal::{Event, Multiplex, MultiplexConfig};

const TERM_NAME: &str = "main";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let rows = 24u16;
    let cols = 80u16;

    let mut config = MultiplexConfig::default();
    config.host = "localhost".to_string();
    config.term_type = "xterm-256color".to_string();

    let mut mux = Multiplex::new(config);
    if let Err(e) = mux.create_terminal(TERM_NAME, rows, cols) {
        eprintln!("linepty: failed to spawn terminal: {e}");
        std::process::exit(1);
    }

    let stdin_rx = spawn_stdin_reader();

    loop {
        match stdin_rx.try_recv() {
            Ok(bytes) => {
                if let Err(e) = mux.write_input(TERM_NAME, &bytes) {
                    eprintln!("linepty: write failed: {e}");
                    break;
                }
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => break,
        }

        if !mux.has_terminal(TERM_NAME) {
            break;
        }

        let mut exited = false;
        mux.poll(|_term, event| {
            if print_event(&event) {
                exited = true;
            }
        });
        if exited {
            break;
        }

        thread::sleep(Duration::from_millis(10));
    }

    mux.shutdown();
}

/// Prints a terse line for each event this harness cares about. Returns
/// `true` if the event signals the terminal is gone.
fn print_event(event: &Event) -> bool {
    match event {
        Event::RowUpdate(payload) => {
            for row in &payload.updated_rows {
                println!("[row {}] {}", row.row, render_runs(&row.runs));
            }
            false
        }
        Event::Alert { message } => {
            eprintln!("linepty: {message}");
            true
        }
        _ => false,
    }
}

fn render_runs(runs: &[linepty_terminal::RowRun]) -> String {
    let mut s = String::new();
    for run in runs {
        s.push_str(&run.text);
    }
    s
}

fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}
