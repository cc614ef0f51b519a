//! Log file location, ANSI stripping, the progress row width, and timestamps.
use std::fs;
use std::path::PathBuf;

use crate::platform;

/// Indent plus marker drawn in front of the progress text (`  ▹ `).
const PROGRESS_PREFIX_COLS: usize = 4;

/// Remove ANSI control sequences from `s`.
///
/// A CSI sequence (`ESC [` parameters, final byte in `@`..=`~`) is dropped
/// whole. A lone `ESC` swallows the one character after it.
pub(super) fn strip_ansi(s: &str) -> String {
    #[derive(Clone, Copy)]
    enum Scan {
        Text,
        Escape,
        Csi,
    }

    let mut scan = Scan::Text;
    s.chars()
        .filter(|&c| {
            let (next, keep) = match (scan, c) {
                (Scan::Text, '\x1b') => (Scan::Escape, false),
                (Scan::Text, _) => (Scan::Text, true),
                (Scan::Escape, '[') => (Scan::Csi, false),
                (Scan::Escape, _) => (Scan::Text, false),
                (Scan::Csi, '@'..='~') => (Scan::Text, false),
                (Scan::Csi, _) => (Scan::Csi, false),
            };
            scan = next;
            keep
        })
        .collect()
}

/// Characters of progress text that fit on one terminal row.
///
/// Width comes from the attached terminal, then `COLUMNS`, then 80.
pub(super) fn progress_width() -> usize {
    let columns = terminal_size::terminal_size()
        .map(|(terminal_size::Width(w), _)| usize::from(w))
        .filter(|&w| w > 0)
        .unwrap_or_else(|| columns_from_env(std::env::var("COLUMNS").ok().as_deref()));
    columns.saturating_sub(PROGRESS_PREFIX_COLS)
}

fn columns_from_env(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(80)
}

/// Base cache directory: `XDG_CACHE_HOME`, then `%LOCALAPPDATA%` on Windows,
/// then `~/.cache`.
fn cache_base() -> PathBuf {
    let from_env = |name: &str| {
        std::env::var_os(name)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    };
    from_env("XDG_CACHE_HOME")
        .or_else(|| cfg!(windows).then(|| from_env("LOCALAPPDATA")).flatten())
        .unwrap_or_else(|| {
            platform::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cache")
        })
}

/// `<cache>/converge/<command>.log`, creating the directory.
///
/// Returns `None` when the directory cannot be created; logging then stays
/// console-only.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    let dir = cache_base().join("converge");
    fs::create_dir_all(&dir).ok()?;
    Some(dir.join(format!("{command}.log")))
}

/// Current UTC time as `YYYY-MM-DD HH:MM:SS`, for the log banner.
pub(super) fn format_utc_datetime() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Current UTC time as `HH:MM:SS`, for log rows.
pub(super) fn format_utc_time() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}

/// Cut `text` to `max` characters, ending in `…` when shortened.
pub(super) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some(_) => {
            let mut kept: String = text.chars().take(max.saturating_sub(1)).collect();
            kept.push('…');
            kept
        }
    }
}
