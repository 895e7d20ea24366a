//! Notebook execution mode: a cell model layered over the emulator's
//! ordinary shell session. While active, the session's output is captured
//! into the current cell instead of the main scroll history, and input is
//! fed to the shell one line at a time, gated on the prompt reappearing.

use crate::event::Event;
use crate::scroll::{shplit, ScrollEntry, ScrollParams};
use crate::screen_buf::ScreenBuf;

/// Interpreter-specific prompt conventions, keyed on the first token of the
/// command that launched them. Anything not listed falls back to `at_shell`
/// gating on the ordinary shell prompt / command-head row metadata.
const PROMPT_TABLE: &[(&str, &str)] = &[("python", ">>> "), ("python3", ">>> "), ("ipython", "In ["), ("node", "> ")];

/// One unit of notebook content: a block of typed-in command lines plus the
/// scroll entries its execution produced.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub cell_type: String,
    pub input_lines: Vec<String>,
    pub output: Vec<ScrollEntry>,
    pub executing: bool,
    /// Every entry retired while this cell was executing, before §4.4's
    /// prompt-elision filter is applied at completion.
    raw: Vec<ScrollEntry>,
}

impl Cell {
    fn new(cell_type: impl Into<String>) -> Self {
        Cell { cell_type: cell_type.into(), input_lines: Vec::new(), output: Vec::new(), executing: false, raw: Vec::new() }
    }
}

/// Notebook state attached to an [`crate::emulator::Emulator`] while active.
pub struct Notebook {
    pub(crate) screen_buf: ScreenBuf,
    cells: Vec<Cell>,
    cell_ids: Vec<u64>,
    current: usize,
    next_id: u64,
    pub(crate) cwd: Option<String>,
    pending_lines: Vec<String>,
    feeding: bool,
    /// Known REPL prompt strings for the interpreter this cell set targets;
    /// empty means "use the ordinary shell prompt convention" (`at_shell`).
    prompts: Vec<String>,
    at_shell: bool,
}

impl Notebook {
    fn new(cwd: Option<String>, prompts: Vec<String>, at_shell: bool) -> Self {
        let mut nb = Notebook {
            screen_buf: ScreenBuf::new(0),
            cells: Vec::new(),
            cell_ids: Vec::new(),
            current: 0,
            next_id: 1,
            cwd,
            pending_lines: Vec::new(),
            feeding: false,
            prompts,
            at_shell,
        };
        nb.push_cell("code");
        nb
    }

    fn push_cell(&mut self, cell_type: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.cells.push(Cell::new(cell_type));
        self.cell_ids.push(id);
        id
    }

    fn index_of(&self, cell_index: u64) -> Option<usize> {
        self.cell_ids.iter().position(|&id| id == cell_index)
    }
}

/// Filters a cell's raw retired entries per §4.4 "Output stripping": lines
/// that open with a known prompt are elided unless an "error" substring
/// shows up somewhere between that prompt and the next one, in which case
/// the prompt is kept so the traceback retains context.
fn strip_prompts(raw: Vec<ScrollEntry>) -> Vec<ScrollEntry> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pending_prompt: Option<ScrollEntry> = None;
    let mut saw_error_since_prompt = false;

    for entry in raw {
        if entry.is_prompt() {
            if let Some(prev) = pending_prompt.take() {
                if saw_error_since_prompt {
                    out.push(prev);
                }
            }
            pending_prompt = Some(entry);
            saw_error_since_prompt = false;
        } else {
            if entry.text.to_lowercase().contains("error") {
                saw_error_since_prompt = true;
            }
            out.push(entry);
        }
    }
    if let Some(prev) = pending_prompt {
        if saw_error_since_prompt {
            out.push(prev);
        }
    }
    out
}

impl crate::emulator::Emulator {
    /// Enters notebook mode: flushes whatever is on screen into the main
    /// scroll history, blanks the screen, and picks a prompt convention
    /// (caller-supplied, else a table keyed on the last command's first
    /// token, else the ordinary shell prompt).
    pub fn note_activate(&mut self, cwd: Option<String>) {
        self.note_activate_with_prompts(cwd, None)
    }

    /// Same as [`Self::note_activate`], but lets the caller force a prompt
    /// convention instead of inferring it from `command_path`.
    pub fn note_activate_with_prompts(&mut self, cwd: Option<String>, forced_prompts: Option<Vec<String>>) {
        if self.notebook.is_some() {
            return;
        }
        let (prompts, at_shell) = match forced_prompts {
            Some(p) if !p.is_empty() => (p, false),
            _ => match self.command_path().and_then(|cmd| PROMPT_TABLE.iter().find(|(k, _)| *k == cmd)) {
                Some((_, prompt)) => (vec![(*prompt).to_string()], false),
                None => (Vec::new(), true),
            },
        };
        self.flush_active_to_scroll_buf();
        self.notebook = Some(Notebook::new(cwd.clone(), prompts, at_shell));
        self.push_event(Event::NoteActivate { active: true, cwd, at_shell });
    }

    /// Leaves notebook mode, flushing every cell's input/output into the
    /// main scroll history in document order.
    pub fn note_deactivate(&mut self) {
        let Some(nb) = self.notebook.take() else { return };
        for cell in nb.cells {
            for line in &cell.input_lines {
                let offset = self.prompt_offset_for(line, true);
                self.screen_buf.scroll_buf_up(line.clone(), nb.cwd.clone(), offset, ScrollParams::Plain, None);
            }
            for entry in cell.output {
                self.screen_buf.scroll_buf_up(entry.text, entry.directory, entry.prompt_offset, entry.params, entry.markup);
            }
        }
        self.reset_active_screen();
        self.push_event(Event::NoteActivate { active: false, cwd: None, at_shell: true });
    }

    pub fn note_active(&self) -> bool {
        self.notebook.is_some()
    }

    /// Inserts a new cell of `cell_type` before `before_index` (or at the
    /// end when `None`), returning its id.
    pub fn note_add_cell(&mut self, cell_type: &str, before_index: Option<u64>) -> Option<u64> {
        let nb = self.notebook.as_mut()?;
        let id = nb.next_id;
        nb.next_id += 1;
        let cell = Cell::new(cell_type);
        let insert_at = before_index.and_then(|b| nb.index_of(b)).unwrap_or(nb.cells.len());
        nb.cells.insert(insert_at, cell);
        nb.cell_ids.insert(insert_at, id);
        nb.current = insert_at;
        self.push_event(Event::NoteAddCell {
            cell_index: id,
            cell_type: cell_type.to_string(),
            before_index,
            input_lines: Vec::new(),
            output_entries: Vec::new(),
        });
        Some(id)
    }

    /// Switches the current cell to `cell_index`. When `move_up` is set,
    /// instead reorders `cell_index` one slot earlier (`true`) or later
    /// (`false`) in the cell list, leaving the current pointer untouched.
    pub fn note_switch_cell(&mut self, cell_index: u64, move_up: Option<bool>) {
        let Some(nb) = self.notebook.as_mut() else { return };
        let Some(idx) = nb.index_of(cell_index) else { return };
        match move_up {
            Some(true) if idx > 0 => {
                nb.cells.swap(idx, idx - 1);
                nb.cell_ids.swap(idx, idx - 1);
            }
            Some(false) if idx + 1 < nb.cells.len() => {
                nb.cells.swap(idx, idx + 1);
                nb.cell_ids.swap(idx, idx + 1);
            }
            Some(_) => return,
            None => nb.current = idx,
        }
        self.push_event(Event::NoteSwitchCell { cell_index });
    }

    /// Removes a cell, leaving at least one cell behind; the cell before it
    /// (or the new first cell) becomes current.
    pub fn note_delete_cell(&mut self, cell_index: u64) {
        let Some(nb) = self.notebook.as_mut() else { return };
        let Some(idx) = nb.index_of(cell_index) else { return };
        if nb.cells.len() == 1 {
            nb.cells[0] = Cell::new("code");
            self.push_event(Event::NoteDeleteCell { deleted: cell_index, new_current: nb.cell_ids[0] });
            return;
        }
        nb.cells.remove(idx);
        nb.cell_ids.remove(idx);
        let new_idx = idx.min(nb.cells.len() - 1);
        nb.current = new_idx;
        let new_current = nb.cell_ids[new_idx];
        self.push_event(Event::NoteDeleteCell { deleted: cell_index, new_current });
    }

    /// Marks the current cell complete: no more input lines will be fed to
    /// it once its pending lines finish executing, and applies the
    /// prompt-elision filter (§4.4) to its captured output.
    pub fn complete_cell(&mut self) {
        let Some(nb) = self.notebook.as_mut() else { return };
        let idx = nb.current;
        nb.cells[idx].executing = false;
        let raw = std::mem::take(&mut nb.cells[idx].raw);
        nb.cells[idx].output = strip_prompts(raw);
    }

    /// Queues `command` (split on newlines, plus a trailing blank line to
    /// force the shell to deindent) as the current cell's input, clears the
    /// notebook's scroll buffer and the visible screen, and writes a bare
    /// newline to provoke a fresh prompt. Returns the first input line to
    /// write immediately when no prompt convention is known (the child gets
    /// fed directly rather than gated on prompt reappearance).
    pub fn exec_cell(&mut self, command: &str) -> Option<String> {
        let gated = {
            let nb = self.notebook.as_mut()?;
            let idx = nb.current;
            let mut lines: Vec<String> = command.lines().map(str::to_string).collect();
            lines.push(String::new());
            nb.cells[idx].input_lines.extend(lines.clone());
            nb.cells[idx].executing = true;
            nb.cells[idx].raw.clear();
            nb.pending_lines = lines;
            nb.feeding = true;
            nb.screen_buf = ScreenBuf::new(nb.screen_buf.buf_note());
            !nb.prompts.is_empty() || nb.at_shell
        };
        self.reset_active_screen();
        if gated {
            None
        } else {
            let nb = self.notebook.as_mut()?;
            if nb.pending_lines.is_empty() {
                nb.feeding = false;
                return None;
            }
            let mut line = nb.pending_lines.remove(0);
            line.push('\n');
            Some(line)
        }
    }

    /// Called after every pty read while notebook mode is active: if the
    /// cursor's row shows the configured prompt reappearing (or, in
    /// `at_shell` mode, carries command-head row metadata), pops and
    /// returns the next queued input line.
    pub fn note_prompt_seen(&mut self) -> Option<String> {
        if self.notebook.as_ref().map(|nb| nb.feeding) != Some(true) {
            return None;
        }
        if !self.cursor_row_shows_prompt() {
            return None;
        }
        let exhausted = self.notebook.as_ref().map(|nb| nb.pending_lines.is_empty()).unwrap_or(true);
        if exhausted {
            if let Some(nb) = self.notebook.as_mut() {
                nb.feeding = false;
            }
            self.complete_cell();
            return None;
        }
        let nb = self.notebook.as_mut()?;
        let mut line = nb.pending_lines.remove(0);
        line.push('\n');
        Some(line)
    }

    fn cursor_row_shows_prompt(&self) -> bool {
        let Some(nb) = self.notebook.as_ref() else { return false };
        if nb.prompts.is_empty() {
            if nb.at_shell {
                self.cursor_row_is_head()
            } else {
                false
            }
        } else {
            let row = self.cursor_row_text();
            nb.prompts.iter().any(|p| row.starts_with(p.as_str()))
        }
    }

    /// Routes a retired scroll entry produced while notebook mode is active
    /// into the current cell's raw output buffer; the prompt-elision filter
    /// (§4.4) runs later, at [`Self::complete_cell`].
    pub(crate) fn note_capture_output(&mut self, entry: ScrollEntry) {
        let Some(nb) = self.notebook.as_mut() else { return };
        let idx = nb.current;
        nb.cells[idx].raw.push(entry);
    }

    pub fn note_command_tokens(text: &str) -> Vec<String> {
        shplit(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::Emulator;

    #[test]
    fn note_activate_flushes_screen_and_creates_one_cell() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.write(b"leftover");
        emu.note_activate(Some("/home/u".into()));
        assert!(emu.note_active());
        assert_eq!(emu.cursor_row_text(), "");
    }

    #[test]
    fn note_prompt_seen_gates_on_at_shell_head_metadata() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.note_activate(None);
        emu.exec_cell("echo hi");
        assert_eq!(emu.note_prompt_seen(), None, "no prompt row yet, must not feed");
        emu.write(b"\x1b[?1150;cookieh\x1b[?1150;l");
        assert_eq!(emu.note_prompt_seen().as_deref(), Some("echo hi\n"));
    }

    #[test]
    fn note_switch_cell_move_up_reorders_without_changing_current() {
        let mut emu = Emulator::new(20, 5, "cookie", None);
        emu.note_activate(None);
        let first = {
            let nb = emu.notebook.as_ref().unwrap();
            nb.cell_ids[0]
        };
        let second = emu.note_add_cell("code", None).unwrap();
        // note_add_cell made `second` current; move it one slot earlier.
        emu.note_switch_cell(second, Some(true));
        let nb = emu.notebook.as_ref().unwrap();
        assert_eq!(nb.cell_ids, vec![second, first]);
        assert_eq!(nb.current, 1, "move_up reorders but does not change the current pointer");
    }

    #[test]
    fn strip_prompts_keeps_prompt_only_when_followed_by_error() {
        let clean_prompt = ScrollEntry { entry_index: 1, prompt_offset: 2, directory: None, params: ScrollParams::Plain, text: "$ ls".into(), markup: None };
        let clean_output = ScrollEntry::plain(1, "a.txt");
        let err_prompt = ScrollEntry { entry_index: 2, prompt_offset: 2, directory: None, params: ScrollParams::Plain, text: "$ bad".into(), markup: None };
        let err_output = ScrollEntry::plain(2, "error: boom");

        let out = strip_prompts(vec![clean_prompt, clean_output, err_prompt, err_output]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].text, "a.txt");
        assert_eq!(out[1].text, "$ bad");
        assert_eq!(out[2].text, "error: boom");
    }
}
