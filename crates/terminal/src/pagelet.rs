//! Pagelet assembly: parses the MIME-like payload captured between a
//! private-mode-set pagelet escape and its ESC terminator.

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::config::MAX_PAGELET_BYTES;
use crate::scroll::PageletOptions;

/// The pagelet-capture sub-state of the emulator.
#[derive(Debug, Clone)]
pub struct PageletState {
    pub code: u32,
    pub validated: bool,
    pub buf: Vec<u8>,
}

impl PageletState {
    pub fn new(code: u32, validated: bool) -> Self {
        PageletState { code, validated, buf: Vec::new() }
    }

    pub fn push(&mut self, byte: u8) -> bool {
        if self.buf.len() >= MAX_PAGELET_BYTES {
            return false;
        }
        self.buf.push(byte);
        true
    }

    pub fn overflowed(&self) -> bool {
        self.buf.len() >= MAX_PAGELET_BYTES
    }
}

/// The dispatch outcome of a finalized pagelet, matching the callback kinds
/// named in §4.3/§6.
#[derive(Debug, Clone, PartialEq)]
pub enum PageletOutcome {
    /// Interpreted as the shell's current working directory (code 1150).
    Cwd(String),
    /// Renders as a scroll row with the given text/markup/options.
    Row { text: String, markup: Option<String>, options: PageletOptions, is_edit_file: bool },
    CreateBlob { blob_id: String, headers: JsonMap<String, JsonValue>, content_b64: String },
    FrameMsg { user: String, frame: String, content: String },
    GraphtermOutput { headers: JsonMap<String, JsonValue>, content_b64: String },
}

fn error_pagelet_headers(message: &str) -> JsonMap<String, JsonValue> {
    let mut headers = JsonMap::new();
    headers.insert("content_type".into(), JsonValue::String("text/plain".into()));
    headers.insert("x_gterm_response".into(), JsonValue::String("error_message".into()));
    headers.insert("error".into(), JsonValue::String(message.into()));
    headers
}

fn split_headers_body(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    for sep in [&b"\r\n\r\n"[..], &b"\n\n"[..], &b"\r\r"[..]] {
        if let Some(pos) = find_subslice(raw, sep) {
            return Some((&raw[..pos], &raw[pos + sep.len()..]));
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Best-effort HTML stripping for untrusted (unvalidated) pagelet content.
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Extracts `KIND` and space-separated `KEY=URLENC` options from a leading
/// `<!--gterm KIND K=V&K2=V2-->` directive, if present at offset 0.
fn parse_directive(body: &str) -> Option<(String, Vec<(String, String)>)> {
    let body = body.trim_start();
    let rest = body.strip_prefix("<!--gterm ")?;
    let end = rest.find("-->")?;
    let inner = &rest[..end];
    let mut parts = inner.split_whitespace();
    let kind = parts.next()?.to_string();
    let mut opts = Vec::new();
    for part in parts {
        for kv in part.split('&') {
            if let Some((k, v)) = kv.split_once('=') {
                opts.push((k.to_string(), url_decode(v)));
            }
        }
    }
    Some((kind, opts))
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn header_str<'a>(headers: &'a JsonMap<String, JsonValue>, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|v| v.as_str())
}

/// Finalizes a pagelet-capture buffer into an outcome. `read_file` is the
/// injected file-loading collaborator for `edit_file`; kept out of this
/// module's test surface since §1 treats file I/O as an external collaborator.
pub fn finalize<F>(state: &PageletState, read_file: F) -> PageletOutcome
where
    F: FnOnce(&str) -> std::io::Result<String>,
{
    if state.overflowed() {
        return PageletOutcome::Row {
            text: format!("pagelet exceeded {MAX_PAGELET_BYTES} bytes"),
            markup: None,
            options: PageletOptions { headers: error_pagelet_headers("overflow"), ..Default::default() },
            is_edit_file: false,
        };
    }

    if state.code == 1150 {
        let cwd = String::from_utf8_lossy(&state.buf).into_owned();
        return PageletOutcome::Cwd(cwd);
    }

    let (headers, body): (JsonMap<String, JsonValue>, String) = if state.buf.first() == Some(&b'<') {
        (JsonMap::new(), String::from_utf8_lossy(&state.buf).into_owned())
    } else if let Some((head, body)) = split_headers_body(&state.buf) {
        match serde_json::from_slice::<JsonValue>(head) {
            Ok(JsonValue::Object(map)) => (map, String::from_utf8_lossy(body).into_owned()),
            Ok(_) | Err(_) => {
                return PageletOutcome::Row {
                    text: "malformed pagelet header".into(),
                    markup: None,
                    options: PageletOptions { headers: error_pagelet_headers("header parse error"), ..Default::default() },
                    is_edit_file: false,
                };
            }
        }
    } else {
        (JsonMap::new(), String::from_utf8_lossy(&state.buf).into_owned())
    };

    if !state.validated {
        let safe = strip_html(&body);
        return PageletOutcome::Row {
            text: safe,
            markup: None,
            options: PageletOptions::default(),
            is_edit_file: false,
        };
    }

    match header_str(&headers, "x_gterm_response").unwrap_or("") {
        "" => {
            let mut options = PageletOptions { headers: headers.clone(), ..Default::default() };
            if let Some((kind, opts)) = parse_directive(&body) {
                if kind == "pagelet" || kind == "form" {
                    options.add_class = Some(kind);
                }
                for (k, v) in opts {
                    match k.as_str() {
                        "overwrite" => options.overwrite = v == "1" || v == "true",
                        "id" => options.pagelet_id = Some(v),
                        "blob" => options.blob = Some(v),
                        other => {
                            options.headers.insert(other.to_string(), JsonValue::String(v));
                        }
                    }
                }
            }
            PageletOutcome::Row { text: body, markup: None, options, is_edit_file: false }
        }
        "edit_file" => {
            let filepath = header_str(&headers, "filepath").unwrap_or("").to_string();
            match read_file(&filepath) {
                Ok(content) => {
                    let mut options = PageletOptions { headers, ..Default::default() };
                    options.headers.insert("filepath".into(), JsonValue::String(filepath));
                    PageletOutcome::Row { text: content, markup: None, options, is_edit_file: true }
                }
                Err(e) => PageletOutcome::Row {
                    text: format!("could not read {filepath}: {e}"),
                    markup: None,
                    options: PageletOptions { headers: error_pagelet_headers(&e.to_string()), ..Default::default() },
                    is_edit_file: false,
                },
            }
        }
        "create_blob" => PageletOutcome::CreateBlob {
            blob_id: header_str(&headers, "x_gterm_parameters").unwrap_or("").to_string(),
            headers,
            content_b64: body,
        },
        "frame_msg" => {
            let params = header_str(&headers, "x_gterm_parameters").unwrap_or("");
            let mut parts = params.splitn(2, ':');
            let user = parts.next().unwrap_or("").to_string();
            let frame = parts.next().unwrap_or("").to_string();
            PageletOutcome::FrameMsg { user, frame, content: body }
        }
        _ => PageletOutcome::GraphtermOutput { headers, content_b64: body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_file(_: &str) -> std::io::Result<String> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
    }

    #[test]
    fn cwd_code_returns_cwd() {
        let mut st = PageletState::new(1150, true);
        for b in b"/home/u" {
            st.push(*b);
        }
        match finalize(&st, no_file) {
            PageletOutcome::Cwd(dir) => assert_eq!(dir, "/home/u"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn raw_html_with_lt_prefix_is_passthrough_when_validated() {
        let mut st = PageletState::new(1155, true);
        for b in b"<b>hi</b>" {
            st.push(*b);
        }
        match finalize(&st, no_file) {
            PageletOutcome::Row { text, .. } => assert_eq!(text, "<b>hi</b>"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unvalidated_pagelet_strips_html() {
        let mut st = PageletState::new(1155, false);
        for b in b"<script>evil()</script>plain" {
            st.push(*b);
        }
        match finalize(&st, no_file) {
            PageletOutcome::Row { text, options, .. } => {
                assert_eq!(text, "evil()plain");
                assert_eq!(options, PageletOptions::default());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_headers_then_body_parsed() {
        let mut st = PageletState::new(1155, true);
        let payload = b"{\"x_gterm_response\":\"\"}\n\n<!--gterm pagelet id=42 overwrite=1-->body";
        for b in payload {
            st.push(*b);
        }
        match finalize(&st, no_file) {
            PageletOutcome::Row { options, .. } => {
                assert_eq!(options.pagelet_id.as_deref(), Some("42"));
                assert!(options.overwrite);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_header_json_becomes_error_row() {
        let mut st = PageletState::new(1155, true);
        for b in b"{not json}\n\nbody" {
            st.push(*b);
        }
        match finalize(&st, no_file) {
            PageletOutcome::Row { options, .. } => {
                assert_eq!(header_str(&options.headers, "x_gterm_response"), Some("error_message"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overflow_synthesizes_error_pagelet() {
        let mut st = PageletState::new(1155, true);
        st.buf = vec![b'a'; MAX_PAGELET_BYTES];
        match finalize(&st, no_file) {
            PageletOutcome::Row { options, .. } => {
                assert_eq!(header_str(&options.headers, "x_gterm_response"), Some("error_message"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn edit_file_reports_error_pagelet_on_read_failure() {
        let mut st = PageletState::new(1155, true);
        for b in b"{\"x_gterm_response\":\"edit_file\",\"filepath\":\"/nope\"}\n\n" {
            st.push(*b);
        }
        match finalize(&st, no_file) {
            PageletOutcome::Row { options, .. } => {
                assert_eq!(header_str(&options.headers, "x_gterm_response"), Some("error_message"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
