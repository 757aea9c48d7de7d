//! Lexical path matching between dependencies and outputs.

/// Normalizes a declared path for matching.
///
/// `.` components and repeated or trailing separators are dropped. `..` is
/// kept as written; paths are compared lexically, never resolved on disk.
#[must_use]
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    match (absolute, parts.is_empty()) {
        (true, _) => format!("/{}", parts.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => parts.join("/"),
    }
}

/// Yields `path` followed by each of its ancestors, nearest first.
///
/// `path` is expected to be normalized.
pub fn self_and_ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(path);
    std::iter::from_fn(move || {
        let this = current?;
        current = match this.rfind('/') {
            Some(0) if this.len() > 1 => Some("/"),
            Some(idx) if idx > 0 => Some(&this[..idx]),
            _ => None,
        };
        Some(this)
    })
}
