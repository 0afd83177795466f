use habrsearch_core::dsl::{compile, DslPolicy};
use proptest::prelude::*;

fn terms(out: &str) -> Vec<&str> {
    out.split_whitespace().filter(|t| !t.starts_with('@')).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Input without letters or digits never yields terms.
    #[test]
    fn no_word_chars_no_terms(text in "[ !-/:-@\\[-`{-~]{0,40}", boost in prop::bool::ANY) {
        let fields = if boost { "title^1.6" } else { "" };
        let out = compile(fields, &text);
        prop_assert!(out.is_empty() || out == "@title^1.6 ");
    }

    /// At most eight terms, whatever the input length.
    #[test]
    fn never_more_than_eight_terms(words in prop::collection::vec("[a-z0-9]{1,6}", 0..30)) {
        let out = compile("", &words.join(" "));
        prop_assert!(terms(&out).len() <= 8);
    }

    /// Only the first term lacks the `+` join.
    #[test]
    fn later_terms_are_joined(words in prop::collection::vec("[a-z]{3,6}", 2..8)) {
        let out = compile("", &words.join(" "));
        let t = terms(&out);
        prop_assert_eq!(t.len(), words.len());
        prop_assert!(!t[0].starts_with('+'));
        prop_assert!(t[1..].iter().all(|x| x.starts_with('+')));
    }

    /// Decoration follows term length.
    #[test]
    fn decoration_by_length(word in "[a-z]{1,12}") {
        let out = compile("", &format!("{word} x"));
        let first = terms(&out)[0];
        match word.len() {
            1 => prop_assert_eq!(first, word.as_str()),
            2 => prop_assert_eq!(first, format!("{word}~*")),
            _ => prop_assert_eq!(first, format!("*{word}~*")),
        }
    }

    /// A lone short term is suppressed entirely, boosts included.
    #[test]
    fn lone_short_term_is_dropped(word in "[a-zа-я0-9]{1,2}", pad in "[ ,.!]{0,3}") {
        prop_assert_eq!(compile("title^2", &format!("{pad}{word}{pad}")), "");
    }

    /// Compilation is deterministic and never panics.
    #[test]
    fn deterministic(text in "\\PC{0,80}") {
        prop_assert_eq!(compile("user^1", &text), compile("user^1", &text));
    }

    /// Joiners inside a run of word characters keep it one term.
    #[test]
    fn joiners_do_not_split(a in "[a-z]{1,4}", j in "[-+/]", b in "[a-z]{1,4}") {
        let out = compile("", &format!("{a}{j}{b} tail"));
        prop_assert_eq!(terms(&out).len(), 2);
    }

    /// The term cap follows the policy.
    #[test]
    fn policy_cap(cap in 1usize..12, words in prop::collection::vec("[a-z]{3,5}", 0..20)) {
        let policy = DslPolicy { max_terms: cap, ..DslPolicy::default() };
        let out = policy.compile("", &words.join(" "));
        prop_assert!(terms(&out).len() <= cap);
    }
}

#[test]
fn examples_from_the_contract() {
    assert_eq!(compile("", "golang"), "*golang~* ");
    assert_eq!(compile("", "go"), "");
    assert_eq!(compile("", "go lang"), "go~* +*lang~* ");
    assert_eq!(compile("", "c++"), "*c++~* ");
    assert_eq!(compile("", "well-known"), "*well-known~* ");
}
