//! Change detection for generated CI config.
//!
//! Encrypted variables come out different on every run even for identical
//! plaintext, so those lines are ignored when deciding whether a commit is
//! needed.

use similar::TextDiff;

/// Leading text (after indentation) of an encrypted variable line.
pub const SECURE_MARKER: &str = "- secure:";

fn is_secure(line: &str) -> bool {
    line.trim_start().starts_with(SECURE_MARKER)
}

pub fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n")
}

/// True if `a` and `b` are identical apart from encrypted variable values.
///
/// A differing line count is always a change. A line pair is skipped only
/// when both sides are secure declarations, which keeps the check symmetric.
pub fn same_ignoring_secure(a: &str, b: &str) -> bool {
    let a = normalize_line_endings(a);
    let b = normalize_line_endings(b);
    let left: Vec<&str> = a.split('\n').collect();
    let right: Vec<&str> = b.split('\n').collect();
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right.iter())
        .all(|(l, r)| l == r || (is_secure(l) && is_secure(r)))
}

/// Unified diff between the committed file (if any) and a fresh render.
pub fn config_diff(path: &str, existing: Option<&str>, rendered: &str) -> String {
    let existing = normalize_line_endings(existing.unwrap_or_default());
    let rendered = normalize_line_endings(rendered);
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(&existing, &rendered)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "env:\n  global:\n    - X=1\n    - secure: \"abc\"\nscript: []\n";
    const B: &str = "env:\n  global:\n    - X=1\n    - secure: \"zzz\"\nscript: []\n";

    #[test]
    fn secure_lines_are_ignored_both_ways() {
        assert!(same_ignoring_secure(A, B));
        assert!(same_ignoring_secure(B, A));
    }

    #[test]
    fn plain_change_is_detected() {
        let changed = A.replace("X=1", "X=2");
        assert!(!same_ignoring_secure(A, &changed));
        assert!(!same_ignoring_secure(&changed, A));
    }

    #[test]
    fn length_mismatch_is_a_change() {
        let longer = format!("{A}extra: true\n");
        assert!(!same_ignoring_secure(A, &longer));
        assert!(!same_ignoring_secure(&longer, A));
    }

    #[test]
    fn secure_against_plain_is_a_change() {
        let plain = A.replace("- secure: \"abc\"", "- X=3");
        assert!(!same_ignoring_secure(A, &plain));
        assert!(!same_ignoring_secure(&plain, A));
    }

    #[test]
    fn crlf_is_normalised() {
        assert!(same_ignoring_secure(&A.replace('\n', "\r\n"), B));
    }

    #[test]
    fn diff_has_headers() {
        let diff = config_diff(".travis.yml", None, "language: python\n");
        assert!(diff.contains("--- a/.travis.yml"));
        assert!(diff.contains("+++ b/.travis.yml"));
        assert!(diff.contains("+language: python"));
    }
}
