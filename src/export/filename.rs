use std::sync::LazyLock;

use regex::Regex;

pub const ARCHIVE_EXTENSION: &str = "zip";
const MAX_STEM_CHARS: usize = 200;

// Invalid characters for Windows: < > : " / \ | ? *  plus control characters (0-31)
static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("invalid-chars pattern"));

static RESERVED_NAMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$").expect("reserved-names pattern")
});

/// Sanitize a filename for cross-platform compatibility
/// Removes/replaces characters that are invalid on Windows, macOS, or Linux
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = INVALID_CHARS.replace_all(name, "_");

    // Trim leading/trailing spaces and dots (problematic on Windows)
    let sanitized = sanitized.trim_matches(|c| c == ' ' || c == '.');

    if RESERVED_NAMES.is_match(sanitized) {
        return format!("_{sanitized}");
    }

    // Leave room for the extension and a " (n)" suffix
    let sanitized: String = sanitized.chars().take(MAX_STEM_CHARS).collect();

    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized
    }
}

/// File name for the archive: the name typed into the form, or the comic
/// title when that was left blank, sanitized and with a `.zip` extension.
pub fn resolve_archive_name(requested: &str, title: Option<&str>) -> String {
    let requested = requested.trim();
    let base = if requested.is_empty() {
        title.map(str::trim).unwrap_or_default()
    } else {
        requested
    };

    let suffix = format!(".{ARCHIVE_EXTENSION}");
    let stem = if base.len() > suffix.len() && base.to_ascii_lowercase().ends_with(&suffix) {
        &base[..base.len() - suffix.len()]
    } else {
        base
    };

    format!("{}{suffix}", sanitize_filename(stem))
}
