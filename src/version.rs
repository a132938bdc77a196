// src/version.rs

//! Version comparison
//!
//! Package versions are free-form strings ("1.0", "2.7.5", "1.0.0-rc1",
//! "2016.1_p1"). They are compared segment by segment: numeric runs
//! numerically, alphabetic runs lexically. A word directly after `-` or `~`
//! marks a pre-release and sorts before the bare version; any other word
//! sorts after it.
//!
//! Every string maps to one token sequence and sequences compare
//! lexicographically, so the order is total and transitive.

use std::cmp::Ordering;

/// Compare two version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = tokenize(a);
    let right = tokenize(b);

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).unwrap_or(&Token::End);
        let r = right.get(i).unwrap_or(&Token::End);
        let ord = l.cmp(r);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    Ordering::Equal
}

/// Decimal digits without leading zeros, ordered by value
#[derive(Debug, PartialEq, Eq)]
struct Digits<'a>(&'a str);

impl Ord for Digits<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(other.0))
    }
}

impl PartialOrd for Digits<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Variant order is the sort order: 1.0-rc1 < 1.0 < 1.0p1 < 1.0.1
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Token<'a> {
    PreRelease(&'a str),
    End,
    Alpha(&'a str),
    Numeric(Digits<'a>),
}

fn tokenize(version: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = version.as_bytes();
    let mut start = 0;

    while start < bytes.len() {
        if !bytes[start].is_ascii_alphanumeric() {
            start += 1;
            continue;
        }

        let numeric = bytes[start].is_ascii_digit();
        let mut end = start;
        while end < bytes.len()
            && bytes[end].is_ascii_alphanumeric()
            && bytes[end].is_ascii_digit() == numeric
        {
            end += 1;
        }

        let run = &version[start..end];
        if numeric {
            tokens.push(Token::Numeric(Digits(run.trim_start_matches('0'))));
        } else if start > 0 && matches!(bytes[start - 1], b'-' | b'~') {
            tokens.push(Token::PreRelease(run));
        } else {
            tokens.push(Token::Alpha(run));
        }
        start = end;
    }

    tokens
}
