//! linepty-buffer: shared styling and rendering types for linepty.
//!
//! This crate has no knowledge of ptys or control sequences. It defines the
//! vocabulary a front-end renderer and a terminal emulator agree on: colors,
//! text attributes, styled spans/lines, cursor info, and dirty-line tracking.
//!
//! # Example
//!
//! ```
//! use linepty_buffer::{Span, StyledLine, Style};
//!
//! let line = StyledLine::new(vec![
//!     Span::new("$ ", Style { bold: true, ..Style::default() }),
//!     Span::plain("ls"),
//! ]);
//! assert_eq!(line.char_count(), 4);
//! ```

mod buffer_view;
mod types;

pub use buffer_view::{
    BufferView, Color, CursorInfo, CursorShape, NamedColor, Span, Style, StyledLine,
    UnderlineStyle,
};
pub use types::{DirtyLines, Position};
