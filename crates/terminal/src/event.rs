//! The callback event vocabulary: every observable change funnels through
//! one `Event` enum delivered to the front-end as `(term_name, response_id, Event)`.

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::screen_buf::RowUpdate;
use crate::scroll::ScrollEntry;

#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdatePayload {
    pub alt_mode: bool,
    pub full_update: bool,
    pub active_rows: usize,
    pub width: usize,
    pub height: usize,
    pub cx: usize,
    pub cy: usize,
    pub pre_offset: usize,
    pub updated_rows: Vec<RowUpdate>,
    pub appended_scroll: Vec<ScrollEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RowUpdate(RowUpdatePayload),
    NoteRowUpdate(RowUpdatePayload),
    NoteActivate { active: bool, cwd: Option<String>, at_shell: bool },
    NoteAddCell {
        cell_index: u64,
        cell_type: String,
        before_index: Option<u64>,
        input_lines: Vec<String>,
        output_entries: Vec<ScrollEntry>,
    },
    NoteSwitchCell { cell_index: u64 },
    NoteDeleteCell { deleted: u64, new_current: u64 },
    DeleteBlob { blob_id: String },
    CreateBlob { blob_id: String, headers: JsonMap<String, JsonValue>, content_b64: String },
    GraphtermOutput { params_with_headers: JsonMap<String, JsonValue>, content_b64: String },
    FrameMsg { user: String, frame: String, content: String },
    SaveStatus { filepath: String, error: Option<String> },
    Alert { message: String },
}
