//! Running header/footer removal.
//!
//! Many typeset documents frame each page's body with horizontal rules: a
//! running header above the first rule and a footer below the last one. In
//! the text layer those rules come out as lines of repeated `-`, `_` or `=`.
//! Everything outside the outermost pair is dropped.
//!
//! Pages are processed independently; nothing is carried between pages.

use once_cell::sync::Lazy;
use regex::Regex;

/// A run of five or more of one rule character (`-`, `_` or `=`), optionally
/// surrounded by spaces/tabs. Mixed runs such as `-_=-_` are not rules.
static RE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:-{5,}|_{5,}|={5,})[ \t]*$").unwrap());

/// `true` when `line` is a separator rule.
pub fn is_separator_line(line: &str) -> bool {
    RE_SEPARATOR.is_match(line)
}

/// Drop the header (up to and including the first separator) and the footer
/// (from the last remaining separator on).
///
/// A page without any separator is returned unchanged. A page with a single
/// separator loses only its header.
pub fn strip_headers_footers(page: &str) -> String {
    let lines: Vec<&str> = page.lines().collect();

    let Some(first) = lines.iter().position(|l| is_separator_line(l)) else {
        return page.to_string();
    };
    let body = &lines[first + 1..];
    let body = match body.iter().rposition(|l| is_separator_line(l)) {
        Some(last) => &body[..last],
        None => body,
    };

    body.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_detection() {
        assert!(is_separator_line("-----"));
        assert!(is_separator_line("  ==========  "));
        assert!(is_separator_line("_____\t"));
        assert!(!is_separator_line("----"));
        assert!(!is_separator_line("-- text --"));
    }

    #[test]
    fn mixed_rule_characters_are_not_a_separator() {
        assert!(!is_separator_line("-_=-_"));
        assert!(!is_separator_line("--===__"));
        assert!(is_separator_line("\t------"));
        let page = "Head\n-_=-_\nBody\n=====\nFoot";
        assert_eq!(strip_headers_footers(page), "Foot");
    }

    #[test]
    fn header_and_footer_removed() {
        let page = "Journal of Things, Vol. 3\n-----\nBody line one\nBody line two\n=====\nPage 12";
        assert_eq!(strip_headers_footers(page), "Body line one\nBody line two");
    }

    #[test]
    fn single_separator_drops_header_only() {
        let page = "Running title\n_______\nBody\nMore body";
        assert_eq!(strip_headers_footers(page), "Body\nMore body");
    }

    #[test]
    fn no_separator_unchanged() {
        let page = "Just\ntext\n";
        assert_eq!(strip_headers_footers(page), page);
    }

    #[test]
    fn inner_separators_use_outermost_pair() {
        let page = "H\n-----\nA\n-----\nB\n-----\nF";
        assert_eq!(strip_headers_footers(page), "A\n-----\nB");
    }

    #[test]
    fn empty_page() {
        assert_eq!(strip_headers_footers(""), "");
    }
}
