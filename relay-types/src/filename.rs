//! File name handling shared by the relay's artifact store and clients.
//!
//! Uploaded names are untrusted. Only the final component survives, with
//! both `/` and `\` treated as separators.

/// The final path component of `filename`, trimmed.
///
/// Returns `None` when nothing usable is left: empty names, `.`, `..` and
/// names containing NUL.
pub fn basename(filename: &str) -> Option<&str> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return None;
    }
    Some(base)
}

/// `<prefix>_<basename>`, or `None` if [`basename`] rejects `filename`.
pub fn prefixed_name(prefix: &str, filename: &str) -> Option<String> {
    basename(filename).map(|base| format!("{prefix}_{base}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_final_component() {
        assert_eq!(basename("notes.txt"), Some("notes.txt"));
        assert_eq!(basename("/home/alice/notes.txt"), Some("notes.txt"));
        assert_eq!(basename("C:\\Users\\bob\\report.md"), Some("report.md"));
        assert_eq!(basename("../../etc/passwd"), Some("passwd"));
    }

    #[test]
    fn rejects_unusable_names() {
        for bad in ["", "..", ".", "../", "a/..", "dir/", "  ", "nul\0byte"] {
            assert_eq!(basename(bad), None, "{bad:?} should be rejected");
        }
    }

    #[test]
    fn prefixes() {
        assert_eq!(
            prefixed_name("received", "x/notes.txt").as_deref(),
            Some("received_notes.txt")
        );
        assert_eq!(prefixed_name("received", ".."), None);
    }
}
