//! The control-sequence state machine: owns the main/alternate screens,
//! cursor state, scroll region, pagelet assembly, and command parsing.

use base64::Engine;

use crate::cell::{Cell, CellStyle};
use crate::config::PromptDelim;
use crate::event::{Event, RowUpdatePayload};
use crate::notebook::Notebook;
use crate::pagelet::{self, PageletOutcome, PageletState};
use crate::screen::{RowMeta, Screen};
use crate::screen_buf::ScreenBuf;
use crate::scroll::{command_markup, prompt_offset, shplit, ScrollParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscMode {
    None,
    Pending,
    Csi,
    Osc,
}

/// A private-mode-set/reset pair recognized by [`Emulator::apply_csi`].
const ALT_SCREEN_MODES: &[u32] = &[47, 1047, 1049];
const PROMPT_MODE: u32 = 1150;
const PAGELET_MODE: u32 = 1155;

pub struct Emulator {
    main: Screen,
    alt: Screen,
    alt_mode: bool,
    cursor_x: usize,
    cursor_y: usize,
    cursor_eol: bool,
    saved_cursor: Option<(usize, usize, bool)>,
    scroll_top: usize,
    scroll_bot: usize,
    active_rows: usize,
    cur_style: CellStyle,
    cur_inverse: bool,
    output_buf: Vec<u8>,
    pending: Vec<u8>,
    mode: EscMode,
    utf8_buf: Vec<u8>,
    utf8_need: usize,
    pagelet: Option<PageletState>,
    cookie: String,
    command_path: Option<String>,
    multiline_head: Option<(String, Option<String>)>,
    pending_cwd: Option<String>,
    pub(crate) screen_buf: ScreenBuf,
    ascii_only: bool,
    prompt: Option<PromptDelim>,
    events: Vec<Event>,
    pub(crate) notebook: Option<Notebook>,
}

impl Emulator {
    pub fn new(width: usize, height: usize, cookie: impl Into<String>, prompt: Option<PromptDelim>) -> Self {
        Emulator {
            main: Screen::new(width, height),
            alt: Screen::new(width, height),
            alt_mode: false,
            cursor_x: 0,
            cursor_y: 0,
            cursor_eol: false,
            saved_cursor: None,
            scroll_top: 0,
            scroll_bot: height.saturating_sub(1),
            active_rows: 0,
            cur_style: CellStyle::default(),
            cur_inverse: false,
            output_buf: Vec::new(),
            pending: Vec::new(),
            mode: EscMode::None,
            utf8_buf: Vec::new(),
            utf8_need: 0,
            pagelet: None,
            cookie: cookie.into(),
            command_path: None,
            multiline_head: None,
            pending_cwd: None,
            screen_buf: ScreenBuf::new(0),
            ascii_only: false,
            prompt,
            events: Vec::new(),
            notebook: None,
        }
    }

    pub fn width(&self) -> usize {
        self.main.width()
    }

    pub fn height(&self) -> usize {
        self.main.height()
    }

    pub fn alt_mode(&self) -> bool {
        self.alt_mode
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    pub fn active_rows(&self) -> usize {
        self.active_rows
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// The first token of the most recently retired command-head line;
    /// notebook activation uses it to pick a prompt convention (§4.4).
    pub fn command_path(&self) -> Option<&str> {
        self.command_path.as_deref()
    }

    pub fn screen(&self) -> &Screen {
        if self.alt_mode {
            &self.alt
        } else {
            &self.main
        }
    }

    fn screen_mut(&mut self) -> &mut Screen {
        if self.alt_mode {
            &mut self.alt
        } else {
            &mut self.main
        }
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output_buf)
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    // ---------------------------------------------------------------- I/O

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    fn write_byte(&mut self, b: u8) {
        if self.pagelet.is_some() {
            if b == 0x1b {
                self.finalize_pagelet();
                self.begin_escape();
                return;
            }
            let overflowed_before = self.pagelet.as_ref().unwrap().overflowed();
            if !overflowed_before {
                self.pagelet.as_mut().unwrap().push(b);
            }
            return;
        }

        match self.mode {
            EscMode::None => self.dispatch_plain(b),
            _ => self.feed_escape(b),
        }
    }

    fn dispatch_plain(&mut self, b: u8) {
        match b {
            0x1b => self.begin_escape(),
            0x08 => self.backspace(),
            0x09 => self.tab(),
            0x0a | 0x0b | 0x0c => self.line_feed(),
            0x0d => self.carriage_return(),
            0x07 | 0x0e | 0x0f => {}
            _ => self.echo_byte(b),
        }
    }

    fn begin_escape(&mut self) {
        self.pending.clear();
        self.pending.push(0x1b);
        self.mode = EscMode::Pending;
    }

    fn reset_escape(&mut self) {
        self.pending.clear();
        self.mode = EscMode::None;
    }

    fn feed_escape(&mut self, b: u8) {
        self.pending.push(b);
        if self.pending.len() == 2 {
            match b {
                b'[' => {
                    self.mode = EscMode::Csi;
                    return;
                }
                b']' => {
                    self.mode = EscMode::Osc;
                    return;
                }
                _ => {
                    self.dispatch_literal_escape();
                    self.reset_escape();
                    return;
                }
            }
        }

        match self.mode {
            EscMode::Csi => {
                if (0x40..=0x7e).contains(&b) {
                    self.dispatch_csi();
                    self.reset_escape();
                } else if self.pending.len() > 32 {
                    self.reset_escape();
                }
            }
            EscMode::Osc => {
                let is_st = self.pending.len() >= 2
                    && self.pending[self.pending.len() - 2] == 0x1b
                    && b == b'\\';
                if b == 0x07 || is_st || self.pending.len() > 32 {
                    self.reset_escape();
                }
            }
            _ => {
                if self.pending.len() > 32 {
                    self.reset_escape();
                }
            }
        }
    }

    fn dispatch_literal_escape(&mut self) {
        match self.pending.as_slice() {
            [0x1b, b'c'] => self.full_reset(),
            [0x1b, b'7'] => self.save_cursor(),
            [0x1b, b'8'] => self.restore_cursor(),
            [0x1b, b'='] | [0x1b, b'>'] => {}
            [0x1b, b'M'] => self.reverse_index(),
            _ => {}
        }
    }

    // ------------------------------------------------------------ echoing

    fn echo_byte(&mut self, b: u8) {
        if b & 0x80 == 0 {
            self.utf8_buf.clear();
            self.put_char(b as char);
            return;
        }
        if b & 0xc0 == 0xc0 {
            self.utf8_buf.clear();
            self.utf8_need = if b & 0xe0 == 0xc0 {
                1
            } else if b & 0xf0 == 0xe0 {
                2
            } else if b & 0xf8 == 0xf0 {
                3
            } else {
                0
            };
            if self.utf8_need == 0 {
                return;
            }
            self.utf8_buf.push(b);
            return;
        }
        if b & 0xc0 == 0x80 && !self.utf8_buf.is_empty() {
            self.utf8_buf.push(b);
            if self.utf8_buf.len() > self.utf8_need {
                if let Ok(s) = std::str::from_utf8(&self.utf8_buf) {
                    if let Some(c) = s.chars().next() {
                        self.put_char(c);
                    }
                }
                self.utf8_buf.clear();
            }
            return;
        }
        self.utf8_buf.clear();
    }

    /// Writes one decoded character, advancing the cursor by its display
    /// width (1 for most glyphs, 2 for wide CJK characters) rather than
    /// always one column.
    fn put_char(&mut self, ch: char) {
        if self.cursor_eol {
            self.cursor_down();
            self.cursor_x = 0;
        }
        let code_point = ch as u32;
        let width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(1).max(1);
        let style = if self.cur_inverse { self.cur_style.inverted() } else { self.cur_style };
        let cell = Cell::new(style, code_point);
        let (row, col, w) = (self.cursor_y, self.cursor_x, self.width());
        self.screen_mut().set(row, col, cell);
        if col + 1 >= w {
            self.cursor_eol = true;
        } else {
            self.cursor_x += 1;
        }
        self.touch_active_rows();
    }

    fn touch_active_rows(&mut self) {
        if !self.alt_mode {
            self.active_rows = self.active_rows.max(self.cursor_y + 1).min(self.height());
        }
    }

    // --------------------------------------------------------- single-byte

    fn backspace(&mut self) {
        if self.cursor_eol {
            self.cursor_eol = false;
        } else if self.cursor_x > 0 {
            self.cursor_x -= 1;
        }
    }

    fn tab(&mut self) {
        let w = self.width();
        let next = ((self.cursor_x / 8) + 1) * 8;
        self.cursor_x = next.min(w - 1);
    }

    fn carriage_return(&mut self) {
        self.cursor_x = 0;
        self.cursor_eol = false;
    }

    fn line_feed(&mut self) {
        self.cursor_down();
    }

    // ----------------------------------------------------- cursor + scroll

    fn cursor_down(&mut self) {
        if self.cursor_y + 1 <= self.scroll_bot {
            self.cursor_y += 1;
            self.touch_active_rows();
        } else if self.alt_mode {
            self.alt.scroll_region_up(self.scroll_top, self.scroll_bot);
        } else {
            self.retire_row(self.scroll_top);
            self.main.scroll_region_up(self.scroll_top, self.scroll_bot);
        }
        self.cursor_eol = false;
    }

    fn cursor_up_one(&mut self) {
        if self.cursor_y > self.scroll_top {
            self.cursor_y -= 1;
        } else {
            self.screen_mut_region_down();
        }
        self.cursor_eol = false;
    }

    fn screen_mut_region_down(&mut self) {
        let (top, bot) = (self.scroll_top, self.scroll_bot);
        self.screen_mut().scroll_region_down(top, bot);
    }

    fn reverse_index(&mut self) {
        self.cursor_up_one();
    }

    fn cursor_up(&mut self, n: usize) {
        self.cursor_y = self.cursor_y.saturating_sub(n).max(self.scroll_top.min(self.cursor_y));
        if self.cursor_y < self.scroll_top {
            self.cursor_y = self.scroll_top;
        }
        self.cursor_eol = false;
    }

    fn cursor_down_n(&mut self, n: usize) {
        for _ in 0..n {
            self.cursor_down();
        }
    }

    fn cursor_back(&mut self, n: usize) {
        self.cursor_x = self.cursor_x.saturating_sub(n);
        self.cursor_eol = false;
    }

    fn cursor_forward(&mut self, n: usize) {
        let w = self.width();
        self.cursor_x = (self.cursor_x + n).min(w.saturating_sub(1));
    }

    fn save_cursor(&mut self) {
        self.saved_cursor = Some((self.cursor_x, self.cursor_y, self.cursor_eol));
    }

    fn restore_cursor(&mut self) {
        if let Some((x, y, eol)) = self.saved_cursor {
            self.cursor_x = x;
            self.cursor_y = y;
            self.cursor_eol = eol;
        }
    }

    fn full_reset(&mut self) {
        let (w, h) = (self.width(), self.height());
        self.main = Screen::new(w, h);
        self.alt = Screen::new(w, h);
        self.alt_mode = false;
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.cursor_eol = false;
        self.saved_cursor = None;
        self.scroll_top = 0;
        self.scroll_bot = h.saturating_sub(1);
        self.active_rows = 0;
        self.cur_style = CellStyle::default();
        self.cur_inverse = false;
        self.screen_buf.set_full_update();
    }

    // ------------------------------------------------------------ CSI/SGR

    fn dispatch_csi(&mut self) {
        let body = &self.pending[2..self.pending.len() - 1];
        let final_byte = *self.pending.last().unwrap();
        let mut s = body;
        let private = s.first() == Some(&b'?');
        if private {
            s = &s[1..];
        }
        let secondary = s.first() == Some(&b'>');
        if secondary {
            s = &s[1..];
        }
        let params: Vec<Option<i64>> = std::str::from_utf8(s)
            .unwrap_or("")
            .split(';')
            .map(|p| p.parse::<i64>().ok())
            .collect();
        let p = |idx: usize, default: i64| -> usize {
            params.get(idx).copied().flatten().filter(|&v| v > 0).unwrap_or(default).max(0) as usize
        };

        match final_byte {
            b'@' => {
                let n = p(0, 1);
                let row = self.cursor_y;
                let (col, w) = (self.cursor_x, self.width());
                for c in (col..w).rev() {
                    let src = if c >= col + n { self.screen().get(row, c - n) } else { Cell::blank(self.cur_style) };
                    self.screen_mut().set(row, c, src);
                }
            }
            b'A' => self.cursor_up(p(0, 1)),
            b'B' => self.cursor_down_n(p(0, 1)),
            b'C' => self.cursor_forward(p(0, 1)),
            b'D' => self.cursor_back(p(0, 1)),
            b'E' => {
                self.cursor_down_n(p(0, 1));
                self.cursor_x = 0;
                self.cursor_eol = false;
            }
            b'F' => {
                self.cursor_up(p(0, 1));
                self.cursor_x = 0;
                self.cursor_eol = false;
            }
            b'G' | b'`' => {
                self.cursor_x = p(0, 1).saturating_sub(1).min(self.width() - 1);
                self.cursor_eol = false;
            }
            b'H' | b'f' => {
                self.cursor_y = p(0, 1).saturating_sub(1).min(self.height() - 1);
                self.cursor_x = p(1, 1).saturating_sub(1).min(self.width() - 1);
                self.cursor_eol = false;
            }
            b'J' => self.erase_in_display(p(0, 0)),
            b'K' => self.erase_in_line(p(0, 0)),
            b'L' => {
                let (row, top, bot) = (self.cursor_y, self.scroll_top, self.scroll_bot);
                self.screen_mut().insert_lines(row, p(0, 1), top, bot);
            }
            b'M' => {
                let (row, top, bot) = (self.cursor_y, self.scroll_top, self.scroll_bot);
                self.screen_mut().delete_lines(row, p(0, 1), top, bot);
            }
            b'P' => self.delete_chars(p(0, 1)),
            b'X' => self.erase_chars(p(0, 1)),
            b'd' => {
                self.cursor_y = p(0, 1).saturating_sub(1).min(self.height() - 1);
            }
            b'h' if private => self.set_private_mode(&params, true),
            b'l' if private => self.set_private_mode(&params, false),
            b'm' => self.sgr(&params),
            b'r' => {
                let top = p(0, 1).saturating_sub(1);
                let bot = p(1, self.height() as i64).saturating_sub(1).min(self.height() - 1);
                if top < bot {
                    self.scroll_top = top;
                    self.scroll_bot = bot;
                }
            }
            b's' => self.save_cursor(),
            b'u' => self.restore_cursor(),
            b'c' if secondary => self.output_buf.extend_from_slice(b"\x1b[>0;0;0c"),
            b'c' => self.output_buf.extend_from_slice(b"\x1b[?6c"),
            b'n' => {
                if params.first().copied().flatten() == Some(6) {
                    let reply = format!("\x1b[{};{}R", self.cursor_y + 1, self.cursor_x + 1);
                    self.output_buf.extend_from_slice(reply.as_bytes());
                } else {
                    self.output_buf.extend_from_slice(b"\x1b[0n");
                }
            }
            b'x' => self.output_buf.extend_from_slice(b"\x1b[2;1;1;112;112;1;0x"),
            _ => {}
        }
    }

    fn erase_in_display(&mut self, mode: usize) {
        let (row, h) = (self.cursor_y, self.height());
        match mode {
            0 => {
                self.erase_in_line(0);
                for r in (row + 1)..h {
                    self.screen_mut().clear_row(r);
                }
            }
            1 => {
                self.erase_in_line(1);
                for r in 0..row {
                    self.screen_mut().clear_row(r);
                }
            }
            _ => self.screen_mut().clear_all(),
        }
    }

    fn erase_in_line(&mut self, mode: usize) {
        let (row, col) = (self.cursor_y, self.cursor_x);
        match mode {
            0 => self.screen_mut().erase_row_from(row, col),
            1 => self.screen_mut().erase_row_to(row, col),
            _ => self.screen_mut().clear_row(row),
        }
    }

    fn delete_chars(&mut self, n: usize) {
        let (row, col, w) = (self.cursor_y, self.cursor_x, self.width());
        for c in col..w {
            let src = if c + n < w { self.screen().get(row, c + n) } else { Cell::blank(self.cur_style) };
            self.screen_mut().set(row, c, src);
        }
    }

    fn erase_chars(&mut self, n: usize) {
        let (row, col, w) = (self.cursor_y, self.cursor_x, self.width());
        for c in col..(col + n).min(w) {
            self.screen_mut().set(row, c, Cell::blank(self.cur_style));
        }
    }

    fn sgr(&mut self, params: &[Option<i64>]) {
        if params.is_empty() || params == [None] {
            self.cur_style = CellStyle::default();
            self.cur_inverse = false;
            return;
        }
        for param in params {
            match param.unwrap_or(0) {
                0 | 27 | 39 | 49 => {
                    self.cur_style = CellStyle::default();
                    self.cur_inverse = false;
                }
                1 => self.cur_style.bold = true,
                7 => self.cur_inverse = true,
                n @ 30..=37 => self.cur_style.fg = (n - 30) as u8,
                n @ 40..=47 => self.cur_style.bg = (n - 40) as u8,
                _ => {}
            }
        }
    }

    /// The first param is always a mode code. For the pagelet-capture modes
    /// a second param carries the session cookie rather than another mode
    /// to toggle, so those two are handled distinctly from a plain
    /// multi-code `CSI ?47;1049h`-style toggle.
    fn set_private_mode(&mut self, params: &[Option<i64>], set: bool) {
        let Some(code) = params.first().copied().flatten().map(|v| v as u32) else {
            return;
        };
        if code == PROMPT_MODE || code == PAGELET_MODE {
            if set {
                if code == PAGELET_MODE {
                    self.flush_active_to_scroll_buf();
                }
                let cookie_param = params.get(1).copied().flatten().map(|v| v.to_string());
                let validated = cookie_param.as_deref() == Some(self.cookie.as_str());
                self.pagelet = Some(PageletState::new(code, validated));
            }
            return;
        }
        for param in params {
            let c = param.unwrap_or(0) as u32;
            if ALT_SCREEN_MODES.contains(&c) {
                self.toggle_alt_screen(set);
            }
        }
    }

    fn toggle_alt_screen(&mut self, enter: bool) {
        if enter && !self.alt_mode {
            self.alt_mode = true;
            self.alt = Screen::new(self.width(), self.height());
            self.cursor_x = 0;
            self.cursor_y = 0;
            self.cursor_eol = false;
            self.screen_buf.set_full_update();
        } else if !enter && self.alt_mode {
            self.alt_mode = false;
            self.cursor_y = self.active_rows.saturating_sub(1);
            self.cursor_x = 0;
            self.cursor_eol = false;
            self.screen_buf.set_full_update();
        }
    }

    // --------------------------------------------------------- retirement

    fn retire_row(&mut self, row: usize) {
        let meta = self.main.row_meta(row).cloned();
        let text = self.main.row_text(row, self.ascii_only);
        match meta {
            Some(m) if m.is_head() => {
                self.flush_multiline_head();
                self.multiline_head = Some((text, m.directory));
            }
            Some(_m) => {
                if let Some((buf, _)) = &mut self.multiline_head {
                    buf.push(' ');
                    buf.push_str(text.trim_start());
                } else {
                    self.multiline_head = Some((text, None));
                }
            }
            None => {
                self.flush_multiline_head();
                let offset = self.prompt_offset_for(&text, false);
                self.push_retired(text, None, offset, ScrollParams::Plain, None);
            }
        }
    }

    fn flush_multiline_head(&mut self) {
        if let Some((text, directory)) = self.multiline_head.take() {
            let offset = self.prompt_offset_for(&text, true);
            let markup = if offset > 0 { Some(command_markup(&text, offset)) } else { None };
            if offset > 0 {
                let command = &text[offset.min(text.len())..];
                let tokens = shplit(command);
                if let Some(first) = tokens.into_iter().next() {
                    self.command_path = Some(first);
                }
            }
            self.push_retired(text, directory, offset, ScrollParams::Plain, markup);
        }
    }

    /// Routes a retired line either into the live notebook cell's captured
    /// output or, outside notebook mode, into the ordinary scroll history.
    fn push_retired(&mut self, text: String, directory: Option<String>, offset: usize, params: ScrollParams, markup: Option<String>) {
        if let Some(nb) = self.notebook.as_mut() {
            nb.screen_buf.scroll_buf_up(text, directory, offset, params, markup);
            if let Some(entry) = nb.screen_buf.scroll_lines().back().cloned() {
                self.note_capture_output(entry);
            }
        } else {
            self.screen_buf.scroll_buf_up(text, directory, offset, params, markup);
        }
    }

    /// Text of the row the cursor currently sits on, for prompt matching.
    pub(crate) fn cursor_row_text(&self) -> String {
        self.main.row_text(self.cursor_y, self.ascii_only)
    }

    /// Whether the cursor's row carries command-head metadata (i.e. a 1150
    /// pagelet marked it as a freshly emitted shell prompt).
    pub(crate) fn cursor_row_is_head(&self) -> bool {
        self.main.row_meta(self.cursor_y).map(|m| m.is_head()).unwrap_or(false)
    }

    /// Retires every currently active row into the main scroll buffer, then
    /// blanks the main screen in place (dimensions unchanged). Used by
    /// notebook activate/deactivate to hand the visible screen back and
    /// forth between the two scroll buffers without a full resize.
    pub(crate) fn flush_active_to_scroll_buf(&mut self) {
        for row in 0..self.active_rows {
            self.retire_row(row);
        }
        self.flush_multiline_head();
        self.reset_active_screen();
    }

    /// Blanks the main screen in place without retiring its rows anywhere,
    /// forcing a full resend on whichever scroll buffer (main or notebook)
    /// is currently live.
    pub(crate) fn reset_active_screen(&mut self) {
        self.main.clear_all();
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.cursor_eol = false;
        self.active_rows = 0;
        if let Some(nb) = self.notebook.as_mut() {
            nb.screen_buf.set_full_update();
        } else {
            self.screen_buf.set_full_update();
        }
    }

    pub(crate) fn prompt_offset_for(&self, text: &str, is_head: bool) -> usize {
        match &self.prompt {
            Some(p) => prompt_offset(text, &p.prefix, &p.suffix, is_head),
            None => 0,
        }
    }

    /// Marks the current row (or whichever row is about to be written next)
    /// as a prompt/command-head line with the given cwd, per a completed
    /// 1150 pagelet.
    fn mark_command_head(&mut self, cwd: String) {
        let row = self.cursor_y;
        self.main.set_row_meta(row, Some(RowMeta::head(Some(cwd))));
    }

    // -------------------------------------------------------------- pagelet

    fn finalize_pagelet(&mut self) {
        let Some(state) = self.pagelet.take() else { return };
        let outcome = pagelet::finalize(&state, |path| std::fs::read_to_string(path));
        match outcome {
            PageletOutcome::Cwd(cwd) => self.mark_command_head(cwd),
            PageletOutcome::Row { text, markup, options, is_edit_file } => {
                let params = if is_edit_file {
                    ScrollParams::EditFile(options)
                } else if options.pagelet_id.is_some() || options.blob.is_some() || options.add_class.is_some() {
                    ScrollParams::Pagelet(options)
                } else {
                    ScrollParams::Plain
                };
                self.push_retired(text, None, 0, params, markup);
            }
            PageletOutcome::CreateBlob { blob_id, headers, content_b64 } => {
                self.push_event(Event::CreateBlob { blob_id, headers, content_b64 });
            }
            PageletOutcome::FrameMsg { user, frame, content } => {
                self.push_event(Event::FrameMsg { user, frame, content });
            }
            PageletOutcome::GraphtermOutput { headers, content_b64 } => {
                self.push_event(Event::GraphtermOutput { params_with_headers: headers, content_b64 });
            }
        }
    }

    /// Base64-decodes and writes `data` to `filepath`, emitting a
    /// `save_status` event rather than returning a `Result` (§7).
    pub fn save_file(&mut self, filepath: &str, base64_data: &str) {
        let result = base64::engine::general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|e| e.to_string())
            .and_then(|bytes| std::fs::write(filepath, bytes).map_err(|e| e.to_string()));
        let error = result.err();
        self.push_event(Event::SaveStatus { filepath: filepath.to_string(), error });
    }

    /// Computes the text that would be pasted onto the current command
    /// line for `text` (or a quoted `file_url`), honoring `normalize`
    /// (relativize against cwd) and `enter` (append a trailing newline).
    pub fn click_paste(&mut self, text: &str, file_url: Option<&str>, normalize: bool, enter: bool, clear_last: bool) -> String {
        let mut payload = if let Some(url) = file_url {
            if normalize {
                if let Some(dir) = self.current_directory() {
                    if let Ok(rel) = std::path::Path::new(url).strip_prefix(&dir) {
                        rel.to_string_lossy().into_owned()
                    } else {
                        url.to_string()
                    }
                } else {
                    url.to_string()
                }
            } else {
                url.to_string()
            }
        } else {
            text.to_string()
        };

        if clear_last {
            if let Some(last) = self.screen_buf.scroll_lines().back() {
                if last.is_prompt() && last.text.trim_end_matches(|c: char| c.is_whitespace()).len() <= last.prompt_offset {
                    self.screen_buf.clear_last_entry(None);
                }
            }
        }

        if payload.contains(' ') && !payload.starts_with('"') {
            payload = format!("\"{payload}\"");
        }
        if enter {
            payload.push('\n');
        }
        payload
    }

    fn current_directory(&self) -> Option<String> {
        self.screen_buf
            .scroll_lines()
            .iter()
            .rev()
            .find_map(|e| e.directory.clone())
    }

    // ----------------------------------------------------------- resize

    pub fn resize(&mut self, height: usize, width: usize) {
        if height == self.height() && width == self.width() {
            return;
        }
        let preserved_prompt = if self.active_rows > 0 {
            self.main
                .row_meta(0)
                .filter(|m| m.is_head())
                .map(|_| self.main.row_text(0, self.ascii_only))
        } else {
            None
        };

        self.main = Screen::new(width, height);
        self.alt = Screen::new(width, height);
        self.alt_mode = false;
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.cursor_eol = false;
        self.saved_cursor = None;
        self.scroll_top = 0;
        self.scroll_bot = height.saturating_sub(1);
        self.active_rows = 0;

        if let Some(text) = preserved_prompt {
            let directory = self.current_directory();
            self.main.set_row_meta(0, Some(RowMeta::head(directory)));
            for (i, c) in text.chars().take(width).enumerate() {
                self.main.set(0, i, Cell::new(self.cur_style, c as u32));
            }
            self.active_rows = 1;
            self.cursor_x = text.chars().count().min(width);
        }
        self.screen_buf.set_full_update();
    }

    // ------------------------------------------------------------- update

    /// Diffs the active screen against its shadow and emits a `row_update`
    /// (or `note_row_update`, while notebook mode is active) event.
    pub fn update(&mut self) {
        self.update_inner(false)
    }

    /// Forces a full resend of the active screen and the entire scroll
    /// history, without disturbing `last_scroll_count` bookkeeping — used
    /// when a front-end reconnects to an already-running session (§4.2).
    pub fn update_for_reconnect(&mut self) {
        self.update_inner(true)
    }

    fn update_inner(&mut self, reconnect: bool) {
        let in_notebook = self.notebook.is_some();
        let active_rows = if self.alt_mode { self.height() } else { self.active_rows };
        let (cx, cy) = (self.cursor_x, self.cursor_y);

        let screen_buf = if in_notebook {
            &mut self.notebook.as_mut().unwrap().screen_buf
        } else {
            &mut self.screen_buf
        };
        let delta = screen_buf.diff(
            if self.alt_mode { &self.alt } else { &self.main },
            active_rows,
            cy,
            self.ascii_only,
            self.alt_mode,
            reconnect,
            self.prompt.as_ref(),
        );

        for blob_id in screen_buf.take_delete_blob_ids() {
            self.push_event(Event::DeleteBlob { blob_id });
        }

        let payload = RowUpdatePayload {
            alt_mode: self.alt_mode,
            full_update: delta.full_update,
            active_rows,
            width: self.width(),
            height: self.height(),
            cx,
            cy,
            pre_offset: 0,
            updated_rows: delta.updated_rows,
            appended_scroll: delta.appended_scroll,
        };
        if in_notebook {
            self.push_event(Event::NoteRowUpdate(payload));
        } else {
            self.push_event(Event::RowUpdate(payload));
        }
    }

    pub fn clear_last_entry(&mut self, last_entry_index: Option<u64>) {
        self.screen_buf.clear_last_entry(last_entry_index);
    }

    pub fn scroll_entries(&self) -> &std::collections::VecDeque<crate::scroll::ScrollEntry> {
        self.screen_buf.scroll_lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptDelim;

    fn delim() -> PromptDelim {
        PromptDelim { prefix: "$".into(), suffix: " ".into(), format: String::new(), export_format: None }
    }

    #[test]
    fn plain_echo_writes_row_and_advances_cursor() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.write(b"hello\r\n");
        assert_eq!(emu.main.row_text(0, false), "hello");
        assert_eq!(emu.cursor(), (0, 1));
    }

    #[test]
    fn echoing_full_width_sets_eol() {
        let mut emu = Emulator::new(5, 3, "cookie", None);
        emu.write(b"abcde");
        assert_eq!(emu.cursor(), (4, 0));
        assert!(emu.cursor_eol);
        emu.write(b"f");
        assert_eq!(emu.cursor(), (1, 1));
    }

    #[test]
    fn csi_defaults_apply_when_no_params() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.write(b"\x1b[H");
        assert_eq!(emu.cursor(), (0, 0));
        emu.cursor_x = 5;
        emu.cursor_y = 2;
        emu.write(b"\x1b[A");
        assert_eq!(emu.cursor_y, 1);
    }

    #[test]
    fn sgr_bold_and_reset() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.write(b"\x1b[1m");
        assert!(emu.cur_style.bold);
        emu.write(b"\x1b[0m");
        assert!(!emu.cur_style.bold);
    }

    #[test]
    fn alt_screen_toggle_sets_full_update() {
        let mut emu = Emulator::new(10, 5, "cookie", None);
        emu.write(b"\x1b[?1049h");
        assert!(emu.alt_mode());
        emu.write(b"X");
        emu.write(b"\x1b[?1049l");
        assert!(!emu.alt_mode());
    }

    #[test]
    fn unterminated_csi_is_discarded_after_32_bytes() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.write(b"\x1b[");
        emu.write(&[b'9'; 31]);
        // the discard lands exactly on the last of these 31 bytes, leaving
        // plain-byte mode active for what follows
        emu.write(b"hi");
        assert_eq!(emu.main.row_text(0, false), "hi");
    }

    #[test]
    fn reconnect_resends_whole_scroll_history_without_advancing_last_count() {
        let mut emu = Emulator::new(20, 5, "7", None);
        emu.write(b"a\r\nb\r\nc\r\nd\r\ne\r\nf\r\n");
        emu.update();
        emu.drain_events();

        emu.update_for_reconnect();
        let events = emu.drain_events();
        let payload = events.iter().find_map(|e| match e {
            Event::RowUpdate(p) => Some(p),
            _ => None,
        });
        assert!(payload.is_some());
        assert!(payload.unwrap().full_update);
        assert!(!payload.unwrap().appended_scroll.is_empty());
    }

    #[test]
    fn prompt_command_and_output_share_entry_index() {
        let mut emu = Emulator::new(20, 5, "7", Some(delim()));
        emu.write(b"\x1b[?1150;7h/home/u\x1b[?1150;l");
        emu.write(b"$ ls\r\n");
        emu.write(b"a  b\r\n");
        let entries: Vec<_> = emu.scroll_entries().iter().cloned().collect();
        assert!(entries.len() >= 2);
        assert_eq!(entries[0].entry_index, entries[1].entry_index);
        assert_eq!(entries[0].prompt_offset, 2);
        assert_eq!(entries[0].directory.as_deref(), Some("/home/u"));
    }

    #[test]
    fn notebook_retirement_assigns_real_entry_index_and_feeds_note_screen_buf() {
        let mut emu = Emulator::new(20, 5, "7", None);
        emu.note_activate(Some("/home/u".into()));
        emu.write(b"first\r\n");
        emu.write(b"second\r\n");
        {
            let nb = emu.notebook.as_ref().unwrap();
            assert!(!nb.screen_buf.scroll_lines().is_empty(), "notebook retirement should feed nb.screen_buf");
            assert!(nb.screen_buf.scroll_lines().iter().any(|e| e.entry_index != 0));
        }
        emu.complete_cell();
        let nb = emu.notebook.as_ref().unwrap();
        assert!(!nb.cells[0].output.is_empty(), "completed cell should retain captured output");
    }

    #[test]
    fn pagelet_suffix_after_esc_processed_normally() {
        let mut emu = Emulator::new(20, 5, "7", None);
        let mut input = Vec::new();
        input.extend_from_slice(b"\x1b[?1155;7h");
        input.extend_from_slice(b"hello");
        input.extend_from_slice(b"\x1b[?1155;l");
        input.extend_from_slice(b"X");
        emu.write(&input);
        assert_eq!(emu.main.row_text(0, false), "X");
    }

    #[test]
    fn resize_forces_full_update() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.write(b"hi");
        emu.resize(10, 30);
        assert_eq!(emu.width(), 30);
        assert_eq!(emu.height(), 10);
    }
}
