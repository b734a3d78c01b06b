//! Deterministic classification of Manager verdicts.

use crate::core::status::StatusCode;

/// Map a raw Manager verdict to a [`StatusCode`].
///
/// - Surrounding whitespace is trimmed and the text upper-cased.
/// - An exact match on a code name yields that code.
/// - Anything else, including empty or verbose output, is `Unparseable`.
///
/// No partial or fuzzy matching: a verdict that merely contains a code name
/// is not accepted.
pub fn classify(raw_verdict: &str) -> StatusCode {
    raw_verdict.parse().unwrap_or(StatusCode::Unparseable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_lowercase_completed() {
        assert_eq!(classify("completed"), StatusCode::Completed);
    }

    #[test]
    fn classify_trims_surrounding_whitespace() {
        assert_eq!(classify(" Completed \n"), StatusCode::Completed);
        assert_eq!(classify("\tincomplete_task\r\n"), StatusCode::IncompleteTask);
    }

    #[test]
    fn classify_off_menu_is_unparseable() {
        assert_eq!(classify("banana"), StatusCode::Unparseable);
    }

    #[test]
    fn classify_empty_is_unparseable() {
        assert_eq!(classify(""), StatusCode::Unparseable);
        assert_eq!(classify("   \n"), StatusCode::Unparseable);
    }

    #[test]
    fn classify_verbose_verdict_is_unparseable() {
        assert_eq!(
            classify("The task is COMPLETED."),
            StatusCode::Unparseable
        );
        assert_eq!(classify("COMPLETED COMPLETED"), StatusCode::Unparseable);
        assert_eq!(classify("\"COMPLETED\""), StatusCode::Unparseable);
    }

    #[test]
    fn classify_does_not_accept_inner_whitespace_variants() {
        assert_eq!(classify("INCOMPLETE TASK"), StatusCode::Unparseable);
        assert_eq!(classify("incomplete-task"), StatusCode::Unparseable);
    }

    #[test]
    fn classify_every_name_maps_to_itself() {
        for code in StatusCode::ALL {
            assert_eq!(classify(&code.as_str().to_lowercase()), code);
        }
    }
}
