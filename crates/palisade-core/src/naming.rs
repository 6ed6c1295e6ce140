//! Display name de-duplication.
//!
//! Peers choose their own display name; the server makes it unique before
//! promotion. A taken name gets a ` (n)` suffix with the smallest free `n`.

/// Longest display name kept, in characters
pub const MAX_NAME_LEN: usize = 50;

/// Shortest display name kept, in characters
pub const MIN_NAME_LEN: usize = 2;

/// Derive a free display name from `requested`.
///
/// The name is truncated to [`MAX_NAME_LEN`] characters and prefixed with
/// `"aa"` when shorter than [`MIN_NAME_LEN`]. `is_taken` decides whether a
/// candidate is in use; callers normally compare case-insensitively.
pub fn unique_name(requested: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let mut base: String = requested.chars().take(MAX_NAME_LEN).collect();
    if base.chars().count() < MIN_NAME_LEN {
        base.insert_str(0, "aa");
    }

    if !is_taken(&base) {
        return base;
    }

    (1u64..)
        .map(|n| format!("{base} ({n})"))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or(base)
}

/// Strip a ` (n)` de-duplication suffix, returning the name the peer asked
/// for.
pub fn real_name(name: &str) -> &str {
    let Some(stripped) = name.strip_suffix(')') else {
        return name;
    };
    let Some(open) = stripped.rfind(" (") else {
        return name;
    };
    let digits = &stripped[open + 2..];
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        &name[..open]
    } else {
        name
    }
}
