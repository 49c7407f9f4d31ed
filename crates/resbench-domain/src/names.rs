/// Canonical project name: lowercase, with every run of `-`, `_` or `.` collapsed to one `-`.
pub fn normalize_dist_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

pub fn is_normalized_name(name: &str) -> bool {
    is_valid_dist_name(name) && normalize_dist_name(name) == name
}

/// Project names must start and end with an ASCII alphanumeric and contain only
/// alphanumerics and `-`, `_`, `.` in between.
pub fn is_valid_dist_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}
