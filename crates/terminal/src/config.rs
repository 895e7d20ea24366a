use std::time::Duration;

/// Maximum number of scroll entries retained in a `ScreenBuf` history.
/// Oldest entry group is evicted wholesale once this is exceeded.
pub const MAX_SCROLL_LINES: usize = 500;

/// Soft limit on an in-flight pagelet payload. Exceeding it synthesizes an
/// error pagelet rather than growing the buffer without bound.
pub const MAX_PAGELET_BYTES: usize = 1_000_000;

/// A terminal whose output has been quiet this long is reaped by the next
/// multiplexer loop tick that checks idle terminals.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum spacing between `update()` calls for a single terminal.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(50);

/// Environment variables stripped from the child's inherited environment
/// before injecting the `GRAPHTERM_*` set.
pub const ENV_STRIP: &[&str] = &[
    "GRAPHTERM_EXPORT",
    "TERM_PROGRAM",
    "TERM_PROGRAM_VERSION",
    "TERM_SESSION_ID",
];

/// Environment variables mirrored as `LC_*` when `lc_export` is enabled,
/// to smuggle them through an `ssh` hop that otherwise only forwards locale
/// variables.
pub const LC_EXPORT_ENV: &[&str] = &[
    "GRAPHTERM_PATH",
    "GRAPHTERM_DIMENSIONS",
    "GRAPHTERM_API",
    "GRAPHTERM_COOKIE",
    "GRAPHTERM_SHARED_SECRET",
];

/// A login shell, matched against the basename of the configured command to
/// decide whether to exec it directly or wrap it in `/bin/sh -c`.
pub fn is_login_shell(basename: &str) -> bool {
    // Matches bash, csh, ksh, tcsh, sh — mirrors `^[/\w]*/(ba|c|k|tc)?sh$`.
    matches!(
        basename,
        "sh" | "bash" | "csh" | "ksh" | "tcsh"
    )
}

/// Prompt delimiter pair `(prefix, suffix)` plus the local/export `PS1`
/// format strings, bundled the way `prompt_list` is passed to the original
/// multiplexer constructor.
#[derive(Debug, Clone, Default)]
pub struct PromptDelim {
    pub prefix: String,
    pub suffix: String,
    pub format: String,
    pub export_format: Option<String>,
}

/// Construction-time configuration for a [`crate::multiplex::Multiplex`].
///
/// Bundles what used to be a long constructor parameter list; every field
/// has a default matching the constants above.
#[derive(Debug, Clone)]
pub struct MultiplexConfig {
    /// Command to run in each new pty. `None` spawns a login shell.
    pub command: Option<String>,
    pub shared_secret: String,
    pub host: String,
    pub server_url: String,
    pub term_type: String,
    pub api_version: String,
    pub widget_port: u16,
    pub prompt: Option<PromptDelim>,
    pub lc_export: bool,
    pub idle_timeout: Duration,
    pub update_interval: Duration,
    /// Directory holding the helper scripts (`gls`, editor launchers, …)
    /// prefixed onto the child's `PATH` and exported as `GRAPHTERM_DIR`.
    pub bindir: Option<std::path::PathBuf>,
}

impl Default for MultiplexConfig {
    fn default() -> Self {
        MultiplexConfig {
            command: None,
            shared_secret: String::new(),
            host: String::new(),
            server_url: String::new(),
            term_type: "xterm".to_string(),
            api_version: String::new(),
            widget_port: 0,
            prompt: None,
            lc_export: false,
            idle_timeout: IDLE_TIMEOUT,
            update_interval: UPDATE_INTERVAL,
            bindir: None,
        }
    }
}
