//! Challenge record parsing from ACME client output
//!
//! The client prints each DNS challenge as a labelled pair of lines, in one
//! of two shapes:
//!
//! ```text
//! [Sat Oct 18 10:00:00 UTC 2026] Domain: '_acme-challenge.p2s.tech'
//! [Sat Oct 18 10:00:00 UTC 2026] TXT value: 'kJ3s...'
//! ```
//!
//! or, when a challenge alias is in effect, `Domain alias: '...'` in place of
//! `Domain: '...'`. Both shapes may appear in one run and records are
//! returned in the order the client printed them.

use once_cell::sync::Lazy;
use regex::Regex;

use wildcert_common::{canonical_name, ChallengeRecord};

/// `Domain: '<name>'` followed (within two lines) by `TXT value: '<value>'`
static DOMAIN_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Domain:[ \t]*'(?P<name>[^'\s]+)'[^\n]*\n(?:[^\n]*\n){0,2}?[^\n]*?TXT value:[ \t]*'(?P<value>[^'\s]+)'",
    )
    .expect("domain record pattern is valid")
});

/// `Domain alias: '<name>'` followed by `TXT value: '<value>'`
static ALIAS_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Domain alias:[ \t]*'(?P<name>[^'\s]+)'[^\n]*\n(?:[^\n]*\n){0,2}?[^\n]*?TXT value:[ \t]*'(?P<value>[^'\s]+)'",
    )
    .expect("alias record pattern is valid")
});

/// Parse every challenge record out of raw client output.
///
/// Names are canonicalized (lowercase, no trailing dot); values are kept
/// verbatim. A pair printed twice is reported once. Ordinals start at 1.
pub fn parse_challenges(output: &str) -> Vec<ChallengeRecord> {
    // Windows line endings would otherwise leak into the lazy gap matcher
    let output = output.replace("\r\n", "\n");

    let mut hits: Vec<(usize, String, String)> = Vec::new();
    for pattern in [&*DOMAIN_RECORD, &*ALIAS_RECORD] {
        for caps in pattern.captures_iter(&output) {
            let (Some(whole), Some(name), Some(value)) =
                (caps.get(0), caps.name("name"), caps.name("value"))
            else {
                continue;
            };
            hits.push((
                whole.start(),
                canonical_name(name.as_str()),
                value.as_str().to_string(),
            ));
        }
    }

    hits.sort_by_key(|(offset, _, _)| *offset);

    let mut records: Vec<ChallengeRecord> = Vec::with_capacity(hits.len());
    for (_, name, value) in hits {
        if records.iter().any(|r| r.name == name && r.value == value) {
            continue;
        }
        let ordinal = records.len() + 1;
        records.push(ChallengeRecord::new(name, value, ordinal));
    }

    records
}
