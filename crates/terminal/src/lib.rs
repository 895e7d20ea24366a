//! VT100/xterm-flavored terminal emulator, bounded scroll history, the
//! pagelet private-escape protocol, notebook execution mode, and a pty
//! multiplexer that drives many such terminals from one shared channel.
//!
//! The emulator ([`emulator::Emulator`]) owns no I/O itself — it consumes
//! bytes and produces [`event::Event`]s. [`multiplex::Multiplex`] is the
//! part that actually spawns ptys and drives the loop.
//!
//! ```no_run
//! use linepty_terminal::{Multiplex, MultiplexConfig};
//!
//! let mut mux = Multiplex::new(MultiplexConfig::default());
//! mux.create_terminal("main", 24, 80).unwrap();
//! mux.write_input("main", b"ls\n").unwrap();
//! mux.poll(|term_name, event| {
//!     println!("{term_name}: {event:?}");
//! });
//! ```

pub mod cell;
pub mod config;
pub mod emulator;
pub mod error;
pub mod event;
pub mod multiplex;
pub mod notebook;
pub mod pagelet;
mod pty;
pub mod screen;
pub mod screen_buf;
pub mod scroll;

pub use cell::{Cell, CellStyle};
pub use config::{MultiplexConfig, PromptDelim};
pub use emulator::Emulator;
pub use error::{TermError, TermResult};
pub use event::{Event, RowUpdatePayload};
pub use multiplex::Multiplex;
pub use pagelet::PageletOutcome;
pub use screen::{RowMeta, Screen};
pub use screen_buf::{RowRun, RowUpdate, ScreenDelta, StyleTags};
pub use scroll::{PageletOptions, ScrollEntry, ScrollParams};

// Style and rendering types shared with a front-end; this crate owns no UI.
pub use linepty_buffer::{
    BufferView, Color, CursorInfo, CursorShape, DirtyLines, NamedColor, Position, Span, Style, StyledLine, UnderlineStyle,
};
