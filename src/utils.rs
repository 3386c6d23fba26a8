//! Shared utility functions

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Format a wait as "375ms", "1.5s", "2m"
pub fn format_wait(wait: Duration) -> String {
    let ms = wait.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        let secs = ms as f64 / 1000.0;
        if ms % 1000 == 0 {
            format!("{}s", ms / 1000)
        } else {
            format!("{:.1}s", secs)
        }
    } else {
        format!("{}m", ms / 60_000)
    }
}

/// Default output path for `watch`: page.html -> page.repriced.html
pub fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    input.with_file_name(format!("{}.repriced.html", stem))
}

/// Truncate a string to max_len characters (not bytes), adding "..." if truncated.
/// Safe for non-ASCII content (emoji, CJK, etc).
pub fn truncate_str(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        chars[..max_len].iter().collect()
    } else {
        format!("{}...", chars[..max_len - 3].iter().collect::<String>())
    }
}
