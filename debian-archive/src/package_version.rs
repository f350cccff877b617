// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string comparison.

Debian versions take the form `[epoch:]upstream_version[-debian_revision]`
and sort according to the policy algorithm defined at
<https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.

Comparison operates directly on raw version strings: the catalog stores
versions as the text that appeared in control files, and malformed versions
still need a total order so indexes stay sorted.
*/

use std::cmp::Ordering;

/// Split a version string into `(epoch, upstream, revision)`.
///
/// A missing epoch is the empty string (compares as `0`); a missing revision
/// is the empty string.
fn split_version(v: &str) -> (&str, &str, &str) {
    let (epoch, remainder) = match v.find(':') {
        Some(pos) if v[..pos].chars().all(|c| c.is_ascii_digit()) => (&v[..pos], &v[pos + 1..]),
        _ => ("", v),
    };

    let (upstream, revision) = match remainder.rfind('-') {
        Some(pos) => (&remainder[..pos], &remainder[pos + 1..]),
        None => (remainder, ""),
    };

    (epoch, upstream, revision)
}

/// Order two characters for the non-digit comparison.
///
/// Letters sort before all other non-digit characters, and `~` sorts before
/// everything, including the end of a part.
fn char_order(c: char) -> u32 {
    match c {
        '~' => 0,
        c if c.is_ascii_alphabetic() => c as u32 + 256,
        c => c as u32 + 1024,
    }
}

/// Compare runs of non-digit characters.
fn compare_non_digit(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();

    loop {
        match (a_chars.next(), b_chars.next()) {
            (None, None) => return Ordering::Equal,
            // `~` sorts before the empty remainder.
            (Some('~'), None) => return Ordering::Less,
            (None, Some('~')) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => match char_order(x).cmp(&char_order(y)) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}

fn split_at_digit(s: &str) -> (&str, &str) {
    match s.find(|c: char| c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    }
}

fn split_at_non_digit(s: &str) -> (&str, &str) {
    match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Compare one version part (upstream or revision).
///
/// The comparison alternates between a non-digit run compared with the
/// modified lexical order and a digit run compared numerically with leading
/// zeros ignored. An absent digit run counts as zero.
fn compare_part(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;

    loop {
        let (a_str, a_rest) = split_at_digit(a);
        let (b_str, b_rest) = split_at_digit(b);

        match compare_non_digit(a_str, b_str) {
            Ordering::Equal => {}
            other => return other,
        }

        let (a_num, a_next) = split_at_non_digit(a_rest);
        let (b_num, b_next) = split_at_non_digit(b_rest);

        let a_val = a_num.trim_start_matches('0');
        let b_val = b_num.trim_start_matches('0');

        let num_order = match a_val.len().cmp(&b_val.len()) {
            Ordering::Equal => a_val.cmp(b_val),
            other => other,
        };

        match num_order {
            Ordering::Equal => {}
            other => return other,
        }

        if a_next.is_empty() && b_next.is_empty() {
            return Ordering::Equal;
        }

        a = a_next;
        b = b_next;
    }
}

fn compare_epoch(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

/// Compare two Debian version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_epoch, a_upstream, a_revision) = split_version(a);
    let (b_epoch, b_upstream, b_revision) = split_version(b);

    match compare_epoch(a_epoch, b_epoch) {
        Ordering::Equal => {}
        other => return other,
    }

    match compare_part(a_upstream, b_upstream) {
        Ordering::Equal => {}
        other => return other,
    }

    compare_part(a_revision, b_revision)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_less(a: &str, b: &str) {
        assert_eq!(compare_versions(a, b), Ordering::Less, "{} < {}", a, b);
        assert_eq!(compare_versions(b, a), Ordering::Greater, "{} > {}", b, a);
    }

    #[test]
    fn split() {
        assert_eq!(split_version("1:4.7.0+dfsg1-2"), ("1", "4.7.0+dfsg1", "2"));
        assert_eq!(split_version("3.3.2~github"), ("", "3.3.2~github", ""));
        assert_eq!(split_version("0.18.0+dfsg-2+b1"), ("", "0.18.0+dfsg", "2+b1"));
        // A colon not preceded by digits is not an epoch separator.
        assert_eq!(split_version("a:1.0"), ("", "a:1.0", ""));
    }

    #[test]
    fn tilde_sorts_before_everything() {
        check_less("1.0~beta1~svn1245", "1.0~beta1");
        check_less("1.0~beta1", "1.0");
        check_less("1.0~bp1", "1.0");
        check_less("1.0", "1.0a");
    }

    #[test]
    fn letters_before_non_letters() {
        check_less("1.0a", "1.0+");
        check_less("1.0z", "1.0-1");
    }

    #[test]
    fn numeric_runs() {
        check_less("1.2", "1.10");
        check_less("1.09", "1.10");
        assert_eq!(compare_versions("1.01", "1.1"), Ordering::Equal);
        check_less("8.4-3", "8.10-1");
    }

    #[test]
    fn epoch_dominates() {
        check_less("0:9", "1:0");
        check_less("9.9-9", "1:0.1");
        assert_eq!(compare_versions("0:1.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("00:1.0", "0:1.0"), Ordering::Equal);
    }

    #[test]
    fn revision_comparison() {
        check_less("1.0-1", "1.0-2");
        check_less("1.0", "1.0-1");
        check_less("1.0-1~bp1", "1.0-1");
        assert_eq!(compare_versions("1.0-1", "1.0-1"), Ordering::Equal);
    }

    #[test]
    fn trichotomy_samples() {
        let versions = [
            "1.0~bp1", "1.0", "1.0a", "1.1~bp1", "1.1", "1.1-bp1", "1:0.5", "1:1.0",
        ];

        for (i, a) in versions.iter().enumerate() {
            for (j, b) in versions.iter().enumerate() {
                let expected = i.cmp(&j);
                assert_eq!(compare_versions(a, b), expected, "{} vs {}", a, b);
            }
        }
    }
}
