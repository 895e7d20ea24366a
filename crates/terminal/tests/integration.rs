//! Integration tests for the terminal crate.
//!
//! These exercise real child processes through `Multiplex` rather than
//! driving the emulator's byte parser directly, matching how a front-end
//! actually uses this crate.

use std::time::Duration;

use linepty_terminal::{Event, Multiplex, MultiplexConfig};

fn config_with_command(cmd: &str) -> MultiplexConfig {
    let mut config = MultiplexConfig::default();
    config.command = Some(cmd.to_string());
    config
}

fn poll_until(mux: &mut Multiplex, deadline: Duration, mut pred: impl FnMut(&str, &Event) -> bool) -> bool {
    let start = std::time::Instant::now();
    let mut matched = false;
    while start.elapsed() < deadline {
        mux.poll(|name, event| {
            if pred(name, &event) {
                matched = true;
            }
        });
        if matched {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn cat_echoes_input_back_through_row_updates() {
    let mut mux = Multiplex::new(config_with_command("/bin/cat"));
    mux.create_terminal("t1", 24, 80).expect("spawn failed");
    mux.write_input("t1", b"hello integration\n").expect("write failed");

    let saw_hello = poll_until(&mut mux, Duration::from_secs(2), |_name, event| {
        matches!(event, Event::RowUpdate(p) if p.updated_rows.iter().any(|r| {
            r.runs.iter().any(|run| run.text.contains("hello integration"))
        }))
    });
    assert!(saw_hello, "expected cat to echo input back as a row update");

    mux.kill_term("t1").expect("kill failed");
}

#[test]
fn exiting_child_reaps_session_and_emits_alert() {
    let mut mux = Multiplex::new(config_with_command("/bin/true"));
    mux.create_terminal("t2", 24, 80).expect("spawn failed");

    let saw_alert = poll_until(&mut mux, Duration::from_secs(2), |_name, event| {
        matches!(event, Event::Alert { .. })
    });
    assert!(saw_alert, "expected an Alert once the child exited");
    assert!(!mux.has_terminal("t2"), "session should be reaped after exit");
}

#[test]
fn resize_terminal_does_not_error_on_live_session() {
    let mut mux = Multiplex::new(config_with_command("/bin/cat"));
    mux.create_terminal("t3", 24, 80).expect("spawn failed");
    mux.resize_terminal("t3", 40, 120).expect("resize failed");
    mux.kill_term("t3").expect("kill failed");
}

#[test]
fn reconnect_resends_full_screen_state() {
    let mut mux = Multiplex::new(config_with_command("/bin/cat"));
    mux.create_terminal("t4", 24, 80).expect("spawn failed");
    mux.write_input("t4", b"before reconnect\n").expect("write failed");
    poll_until(&mut mux, Duration::from_secs(2), |_name, event| {
        matches!(event, Event::RowUpdate(p) if !p.updated_rows.is_empty())
    });

    let mut saw_full_update = false;
    mux.reconnect("t4", |_name, event| {
        if let Event::RowUpdate(p) = event {
            if p.full_update {
                saw_full_update = true;
            }
        }
    })
    .expect("reconnect failed");
    assert!(saw_full_update, "reconnect should force a full_update row delta");

    mux.kill_term("t4").expect("kill failed");
}

#[test]
fn killing_unknown_terminal_errors() {
    let mut mux = Multiplex::new(MultiplexConfig::default());
    assert!(mux.kill_term("nope").is_err());
}
