//! Bounded scroll history plus row-delta computation against a shadow copy.

use std::collections::VecDeque;

use crate::config::{MAX_SCROLL_LINES, PromptDelim};
use crate::scroll::{self, ScrollEntry, ScrollParams};
use crate::screen::Screen;

/// A coalesced run of same-styled cells within a row, as emitted to the
/// front-end. Color channels stay in the style byte, carried out-of-band;
/// `tags` is just the `{bold, inverse}` set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyleTags {
    pub bold: bool,
    pub inverse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowRun {
    pub tags: StyleTags,
    pub text: String,
}

/// One row's worth of delta: its rich-text runs and prompt offset.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub row: usize,
    pub prompt_offset: usize,
    pub runs: Vec<RowRun>,
}

/// The result of diffing a screen against its shadow.
#[derive(Debug, Clone, Default)]
pub struct ScreenDelta {
    pub full_update: bool,
    pub updated_rows: Vec<RowUpdate>,
    pub appended_scroll: Vec<ScrollEntry>,
}

fn row_runs(screen: &Screen, row: usize, ascii_only: bool) -> Vec<RowRun> {
    let mut runs = Vec::new();
    let mut cur_tags: Option<StyleTags> = None;
    let mut cur_text = String::new();
    for cell in screen.row_cells(row) {
        let style = cell.style();
        let tags = StyleTags { bold: style.bold, inverse: false };
        let cp = cell.code_point(ascii_only);
        let ch = if cp == 0 {
            ' '
        } else {
            char::from_u32(cp).unwrap_or(' ')
        };
        match &cur_tags {
            Some(t) if *t == tags => cur_text.push(ch),
            _ => {
                if let Some(t) = cur_tags.take() {
                    runs.push(RowRun { tags: t, text: std::mem::take(&mut cur_text) });
                }
                cur_tags = Some(tags);
                cur_text.push(ch);
            }
        }
    }
    if let Some(t) = cur_tags {
        runs.push(RowRun { tags: t, text: cur_text });
    }
    if runs.is_empty() {
        runs.push(RowRun { tags: StyleTags::default(), text: String::new() });
    }
    runs
}

/// Bounded deque of [`ScrollEntry`] plus the shadow state needed to compute
/// deltas against the live screens.
pub struct ScreenBuf {
    scroll_lines: VecDeque<ScrollEntry>,
    entry_index: u64,
    current_scroll_count: u64,
    last_scroll_count: u64,
    last_blob_id: Option<String>,
    delete_blob_ids: Vec<String>,
    full_update: bool,
    shadow_main: Option<Screen>,
    shadow_alt: Option<Screen>,
    buf_note: u64,
    last_cleared_directory: Option<String>,
}

impl ScreenBuf {
    pub fn new(buf_note: u64) -> Self {
        ScreenBuf {
            scroll_lines: VecDeque::new(),
            entry_index: 0,
            current_scroll_count: 0,
            last_scroll_count: 0,
            last_blob_id: None,
            delete_blob_ids: Vec::new(),
            full_update: true,
            shadow_main: None,
            shadow_alt: None,
            buf_note,
        last_cleared_directory: None,
        }
    }

    pub fn scroll_lines(&self) -> &VecDeque<ScrollEntry> {
        &self.scroll_lines
    }

    pub fn entry_index(&self) -> u64 {
        self.entry_index
    }

    pub fn buf_note(&self) -> u64 {
        self.buf_note
    }

    pub fn set_full_update(&mut self) {
        self.full_update = true;
    }

    pub fn full_update(&self) -> bool {
        self.full_update
    }

    pub fn next_pagelet_id(&self) -> String {
        format!("{}-{}", self.buf_note, self.current_scroll_count)
    }

    pub fn take_delete_blob_ids(&mut self) -> Vec<String> {
        std::mem::take(&mut self.delete_blob_ids)
    }

    /// Inserts a retired row as a new scroll entry (or merges it into the
    /// prior one, per the overwrite/one-shot rules in §4.2).
    pub fn scroll_buf_up(
        &mut self,
        text: String,
        directory: Option<String>,
        offset: usize,
        params: ScrollParams,
        markup: Option<String>,
    ) {
        // An edit/form pagelet is one-shot: a following line blanks it out.
        if let Some(last) = self.scroll_lines.back() {
            let was_one_shot = matches!(last.params, ScrollParams::EditFile(_))
                || matches!(&last.params, ScrollParams::Pagelet(o) if o.add_class.as_deref() == Some("form"));
            if was_one_shot {
                let idx = self.scroll_lines.len() - 1;
                self.scroll_lines[idx].text.clear();
                self.scroll_lines[idx].markup = None;
                self.scroll_lines[idx].params = ScrollParams::Plain;
            }
        }

        if offset > 0 {
            self.entry_index += 1;
            let entry = ScrollEntry {
                entry_index: self.entry_index,
                prompt_offset: offset,
                directory,
                params: ScrollParams::Plain,
                text,
                markup,
            };
            self.push_entry(entry);
            return;
        }

        if let ScrollParams::Pagelet(ref opts) = params {
            if opts.overwrite {
                if let Some(pid) = &opts.pagelet_id {
                    if let Some(last) = self.scroll_lines.back() {
                        let same = matches!(&last.params, ScrollParams::Pagelet(o) if o.pagelet_id.as_deref() == Some(pid.as_str()));
                        if same {
                            if let Some(old_blob) = self.scroll_lines.back().and_then(|e| e.params.blob_id()) {
                                self.delete_blob_ids.push(old_blob.to_string());
                            }
                            let idx = self.scroll_lines.len() - 1;
                            let entry_index = self.scroll_lines[idx].entry_index;
                            self.scroll_lines[idx] = ScrollEntry {
                                entry_index,
                                prompt_offset: 0,
                                directory,
                                params,
                                text,
                                markup,
                            };
                            if self.last_scroll_count > 0 {
                                self.last_scroll_count -= 1;
                            }
                            return;
                        }
                    }
                }
            }
        }

        let entry = ScrollEntry {
            entry_index: self.entry_index.max(1),
            prompt_offset: 0,
            directory,
            params,
            text,
            markup,
        };
        self.push_entry(entry);
    }

    fn push_entry(&mut self, entry: ScrollEntry) {
        if let Some(blob) = entry.params.blob_id() {
            self.last_blob_id = Some(blob.to_string());
        }
        self.scroll_lines.push_back(entry);
        self.current_scroll_count += 1;
        self.evict_if_over_budget();
    }

    fn evict_if_over_budget(&mut self) {
        if self.scroll_lines.len() <= MAX_SCROLL_LINES {
            return;
        }
        let oldest_index = self.scroll_lines.front().map(|e| e.entry_index).unwrap_or(0);
        while let Some(front) = self.scroll_lines.front() {
            if front.entry_index != oldest_index {
                break;
            }
            if let Some(blob) = self.scroll_lines.pop_front().unwrap().params.blob_id().map(String::from) {
                self.delete_blob_ids.push(blob);
            }
            if self.last_scroll_count > 0 {
                self.last_scroll_count -= 1;
            }
        }
    }

    /// Removes every scroll line carrying the highest `entry_index`. If
    /// `last_entry_index` is given and doesn't match, this is a no-op.
    pub fn clear_last_entry(&mut self, last_entry_index: Option<u64>) {
        let Some(highest) = self.scroll_lines.back().map(|e| e.entry_index) else {
            return;
        };
        if let Some(expect) = last_entry_index {
            if expect != highest {
                return;
            }
        }
        let mut cleared_dir = None;
        while let Some(back) = self.scroll_lines.back() {
            if back.entry_index != highest {
                break;
            }
            let removed = self.scroll_lines.pop_back().unwrap();
            if cleared_dir.is_none() {
                cleared_dir = removed.directory.clone();
            }
            if let Some(blob) = removed.params.blob_id() {
                self.delete_blob_ids.push(blob.to_string());
            }
        }
        self.last_cleared_directory = cleared_dir;
        if self.entry_index == highest {
            self.entry_index = self.entry_index.saturating_sub(1);
        }
    }

    pub fn last_cleared_directory(&self) -> Option<&str> {
        self.last_cleared_directory.as_deref()
    }

    /// Computes `(full_update, updated_rows, appended_scroll)` for the
    /// active screen, advancing the shadow/last-scroll-count bookkeeping
    /// unless `reconnect` is set (reconnect never mutates `last_scroll_count`
    /// so the whole history can be resent without losing state).
    pub fn diff(
        &mut self,
        screen: &Screen,
        active_rows: usize,
        cursor_row: usize,
        ascii_only: bool,
        alt_mode: bool,
        reconnect: bool,
        prompt: Option<&PromptDelim>,
    ) -> ScreenDelta {
        let shadow_slot = if alt_mode { &mut self.shadow_alt } else { &mut self.shadow_main };
        let full_update = self.full_update || reconnect || shadow_slot.is_none();

        let mut updated_rows = Vec::new();
        for row in 0..active_rows {
            let differs = match shadow_slot {
                Some(shadow) => !rows_equal(shadow, screen, row),
                None => true,
            };
            if differs || full_update || row == cursor_row {
                let is_head = screen.row_meta(row).map(|m| m.is_head()).unwrap_or(false);
                let prompt_offset = match prompt {
                    Some(p) => scroll::prompt_offset(&screen.row_text(row, ascii_only), &p.prefix, &p.suffix, is_head),
                    None => 0,
                };
                updated_rows.push(RowUpdate { row, prompt_offset, runs: row_runs(screen, row, ascii_only) });
            }
        }

        let appended_scroll = if reconnect {
            self.scroll_lines.iter().cloned().collect()
        } else if (self.current_scroll_count as i64 - self.last_scroll_count as i64) > 0 {
            let skip = self.scroll_lines.len().saturating_sub((self.current_scroll_count - self.last_scroll_count) as usize);
            self.scroll_lines.iter().skip(skip).cloned().collect()
        } else {
            Vec::new()
        };

        *shadow_slot = Some(screen.clone());
        if !reconnect {
            self.last_scroll_count = self.current_scroll_count;
            self.full_update = false;
        }

        ScreenDelta { full_update, updated_rows, appended_scroll }
    }

    pub fn clear_main(&mut self) {
        self.scroll_lines.clear();
        self.entry_index = 0;
        self.current_scroll_count = 0;
        self.last_scroll_count = 0;
    }
}

fn rows_equal(a: &Screen, b: &Screen, row: usize) -> bool {
    a.row_cells(row) == b.row_cells(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, CellStyle};

    fn screen_with_text(text: &str, width: usize) -> Screen {
        let mut s = Screen::new(width, 3);
        for (i, c) in text.chars().enumerate() {
            s.set(0, i, Cell::new(CellStyle::default(), c as u32));
        }
        s
    }

    #[test]
    fn diff_twice_with_no_writes_is_empty() {
        let mut buf = ScreenBuf::new(0);
        let screen = screen_with_text("hello", 10);
        let _ = buf.diff(&screen, 1, 0, false, false, false, None);
        let second = buf.diff(&screen, 1, 0, false, false, false, None);
        assert!(!second.full_update);
        assert!(second.updated_rows.is_empty() || second.updated_rows.iter().all(|r| r.row == 0));
        assert!(second.appended_scroll.is_empty());
    }

    #[test]
    fn scroll_buf_up_assigns_entry_index_to_prompt() {
        let mut buf = ScreenBuf::new(0);
        buf.scroll_buf_up("$ ls".into(), Some("/tmp".into()), 2, ScrollParams::Plain, None);
        assert_eq!(buf.scroll_lines().back().unwrap().entry_index, 1);
    }

    #[test]
    fn eviction_keeps_within_budget_and_frees_blobs() {
        let mut buf = ScreenBuf::new(0);
        for i in 0..(MAX_SCROLL_LINES + 1) {
            let mut opts = crate::scroll::PageletOptions::default();
            opts.blob = Some(format!("blob-{i}"));
            buf.scroll_buf_up(String::new(), None, 0, ScrollParams::Pagelet(opts), None);
        }
        assert!(buf.scroll_lines().len() <= MAX_SCROLL_LINES);
        let deleted = buf.take_delete_blob_ids();
        assert!(deleted.contains(&"blob-0".to_string()));
    }

    #[test]
    fn clear_last_entry_removes_highest_index_group() {
        let mut buf = ScreenBuf::new(0);
        buf.scroll_buf_up("$ ls".into(), None, 2, ScrollParams::Plain, None);
        buf.scroll_buf_up("out".into(), None, 0, ScrollParams::Plain, None);
        let before = buf.entry_index();
        buf.clear_last_entry(None);
        assert!(buf.scroll_lines().is_empty());
        assert_eq!(buf.entry_index(), before - 1);
    }

    #[test]
    fn pagelet_overwrite_rewinds_last_scroll_count() {
        let mut buf = ScreenBuf::new(0);
        let mut opts = crate::scroll::PageletOptions::default();
        opts.overwrite = true;
        opts.pagelet_id = Some("0-0".into());
        buf.scroll_buf_up("v1".into(), None, 0, ScrollParams::Pagelet(opts.clone()), None);
        buf.scroll_buf_up("v2".into(), None, 0, ScrollParams::Pagelet(opts), None);
        assert_eq!(buf.scroll_lines().len(), 1);
        assert_eq!(buf.scroll_lines().back().unwrap().text, "v2");
    }
}
