//! Branch-name sanitization
//!
//! Turns arbitrary session titles into names git accepts as branch components.
//! The transform is idempotent, so a sanitized name round-trips unchanged
//! through the persistence layer.

/// Sanitize a string for use as a git branch name (or branch component).
///
/// Rules: lowercase, whitespace becomes `-`, characters outside
/// `[a-z0-9-_/.]` are dropped, runs of `-` collapse to one, and leading or
/// trailing `-`/`/` are trimmed. Empty input yields empty output.
pub fn sanitize_branch_name(name: &str) -> String {
    let mut kept = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_whitespace() {
            kept.push('-');
        } else if matches!(c, 'a'..='z' | '0'..='9' | '-' | '_' | '/' | '.') {
            kept.push(c);
        }
    }

    let mut collapsed = String::with_capacity(kept.len());
    let mut prev_dash = false;
    for c in kept.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push(c);
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }

    collapsed
        .trim_matches(|c| c == '-' || c == '/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_mixed_case_and_symbols() {
        assert_eq!(
            sanitize_branch_name("USER/Feature Branch!@#$%^&*()/v1.0"),
            "user/feature-branch/v1.0"
        );
    }

    #[test]
    fn test_sanitize_trims_edges() {
        assert_eq!(sanitize_branch_name(" -feature-branch- "), "feature-branch");
    }

    #[test]
    fn test_sanitize_collapses_dashes() {
        assert_eq!(sanitize_branch_name("feat---ure"), "feat-ure");
    }

    #[test]
    fn test_sanitize_whitespace_runs() {
        assert_eq!(sanitize_branch_name("fix   the  bug"), "fix-the-bug");
        assert_eq!(sanitize_branch_name("fix\tthe\nbug"), "fix-the-bug");
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize_branch_name(""), "");
        assert_eq!(sanitize_branch_name("!@#$%"), "");
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(input in ".{0,64}") {
            let once = sanitize_branch_name(&input);
            let twice = sanitize_branch_name(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn sanitize_output_charset(input in ".{0,64}") {
            let out = sanitize_branch_name(&input);
            prop_assert!(out
                .chars()
                .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_' | '/' | '.')));
            if let Some(first) = out.chars().next() {
                prop_assert!(first != '-' && first != '/');
            }
            if let Some(last) = out.chars().last() {
                prop_assert!(last != '-' && last != '/');
            }
        }
    }
}
