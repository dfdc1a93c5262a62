//! # Happening Classifier
//!
//! The happenings feed carries every kind of world event as one line of
//! marked-up text. Only two shapes matter here:
//!
//! - `@@nation@@ was founded in %%region%%.`
//! - `@@nation@@ relocated from %%from%% to %%to%%.`
//!
//! Everything else yields `None` and is dropped by the caller without noise.
//! The `@@`/`%%` markers are optional so plain-text renderings of the same
//! sentences are accepted too.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::core::event::{canonicalize, NationEvent};

static FOUNDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@@)?(?P<nation>[^@%]+?)(?:@@)? was founded in (?:%%)?(?P<region>[^%]+?)(?:%%)?\.?$")
        .expect("founding pattern is valid")
});

static MOVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:@@)?(?P<nation>[^@%]+?)(?:@@)? relocated from (?:%%)?(?P<from>[^%]+?)(?:%%)? to (?:%%)?(?P<to>[^%]+?)(?:%%)?\.?$",
    )
    .expect("move pattern is valid")
});

// Leading or trailing digit runs; also covers names made only of digits and underscores.
static NUMERIC_AFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+|\d+$").expect("numeric pattern is valid"));

// `_i` .. `_xxxix`
static ROMAN_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(?P<numeral>x{0,3}(?:ix|iv|v?i{0,3}))$").expect("roman pattern is valid"));

/// Parses one happening line into a typed event stamped with the current time.
///
/// Callers that know the upstream timestamp should override it with
/// [`NationEvent::with_time`].
pub fn classify(raw: &str) -> Option<NationEvent> {
    let text = raw.trim();

    if let Some(caps) = FOUNDING.captures(text) {
        return Some(NationEvent::Founding {
            nation: canonicalize(&caps["nation"]),
            region: canonicalize(&caps["region"]),
            at: Utc::now(),
        });
    }

    if let Some(caps) = MOVE.captures(text) {
        return Some(NationEvent::Move {
            nation: canonicalize(&caps["nation"]),
            from: canonicalize(&caps["from"]),
            to: canonicalize(&caps["to"]),
            at: Utc::now(),
        });
    }

    None
}

/// Heuristic for auto-generated throwaway nations.
///
/// Matches names built from digits and underscores, names with a leading or
/// trailing number (`12345_something`, `something_999`) and names ending in a
/// roman numeral suffix (`something_iv`).
pub fn is_likely_puppet(name: &str) -> bool {
    let name = canonicalize(name);

    if NUMERIC_AFFIX.is_match(&name) {
        return true;
    }

    ROMAN_SUFFIX
        .captures(&name)
        .is_some_and(|caps| !caps["numeral"].is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn founding_with_markers() {
        let ev = classify("@@new_nation@@ was founded in %%the_north_pacific%%.").unwrap();
        match ev {
            NationEvent::Founding { nation, region, .. } => {
                assert_eq!(nation, "new_nation");
                assert_eq!(region, "the_north_pacific");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn founding_plain_text_is_canonicalized() {
        let ev = classify("New Nation was founded in The Rejected Realms").unwrap();
        assert!(matches!(
            ev,
            NationEvent::Founding { ref nation, ref region, .. }
                if nation == "new_nation" && region == "the_rejected_realms"
        ));
    }

    #[test]
    fn move_extracts_both_regions() {
        let ev = classify("@@wanderer@@ relocated from %%lazarus%% to %%europeia%%.").unwrap();
        match ev {
            NationEvent::Move { nation, from, to, .. } => {
                assert_eq!(nation, "wanderer");
                assert_eq!(from, "lazarus");
                assert_eq!(to, "europeia");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    #[case("@@someone@@ changed its national motto to \"hello\".")]
    #[case("@@someone@@ was ceased to exist in %%balder%%.")]
    #[case("Following new legislation in @@someone@@, taxes are up.")]
    #[case("")]
    fn unrelated_text_is_ignored(#[case] raw: &str) {
        assert_eq!(classify(raw), None);
    }

    #[rstest]
    #[case("12345_something", true)]
    #[case("something_999", true)]
    #[case("123_456", true)]
    #[case("farm_iv", true)]
    #[case("Storage XII", true)]
    #[case("puppet_ix", true)]
    #[case("testlandia", false)]
    #[case("the_mix", false)]
    #[case("civil_union", false)]
    #[case("dungeon_", false)]
    fn puppet_heuristics(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_likely_puppet(name), expected, "{}", name);
    }
}
