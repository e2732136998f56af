//! Readability fixes applied to restored text.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[0-9]+[.,?]? point(?:[.,?]? [0-9])+").expect("valid decimal regex")
    })
}

fn space_run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r" +").expect("valid space regex"))
}

/// Trims `text` into a single well-formed sentence.
///
/// Leading characters up to the first ASCII letter are dropped and the first
/// letter is upper-cased. Text that does not end in `.`, `?` or `!` loses one
/// trailing non-letter and gains a full stop.
pub fn make_intact_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find(|c: char| c.is_ascii_alphabetic()) else {
        return String::new();
    };
    let body = &trimmed[start..];

    let mut out = String::with_capacity(body.len() + 1);
    let mut chars = body.chars();
    if let Some(first) = chars.next() {
        out.push(first.to_ascii_uppercase());
    }
    out.push_str(chars.as_str());

    if !out.ends_with(&['.', '?', '!'][..]) {
        if out.ends_with(|c: char| !c.is_ascii_alphabetic()) {
            out.pop();
        }
        out.push('.');
    }
    out
}

/// Rewrites spoken decimals such as `3 point 1 4` into `3.14`, after
/// collapsing runs of spaces.
pub fn fix_decimals(text: &str) -> String {
    let collapsed = space_run_pattern().replace_all(text, " ");
    decimal_pattern()
        .replace_all(&collapsed, |caps: &Captures<'_>| {
            let stripped: String = caps[0]
                .chars()
                .filter(|c| !matches!(c, '.' | ',' | '?'))
                .collect();
            let parts: Vec<&str> = stripped.split_whitespace().collect();
            let mut out = String::from(parts[0]);
            out.push('.');
            for digit in parts.iter().skip(2) {
                out.push_str(digit);
            }
            out
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intact_sentence_capitalizes_and_terminates() {
        assert_eq!(make_intact_sentence(", hello world"), "Hello world.");
        assert_eq!(make_intact_sentence("hello world,"), "Hello world.");
        assert_eq!(make_intact_sentence("Is it?"), "Is it?");
        assert_eq!(make_intact_sentence("  wow!  "), "Wow!");
    }

    #[test]
    fn intact_sentence_of_punctuation_only_is_empty() {
        assert_eq!(make_intact_sentence(" ,. 42 "), "");
        assert_eq!(make_intact_sentence(""), "");
    }

    #[test]
    fn decimals_are_joined() {
        assert_eq!(fix_decimals("it costs 3 point 1 4 dollars"), "it costs 3.14 dollars");
        assert_eq!(fix_decimals("about 12, Point, 5 percent"), "about 12.5 percent");
        assert_eq!(fix_decimals("a  b   c"), "a b c");
        assert_eq!(fix_decimals("the point is 5"), "the point is 5");
    }
}
