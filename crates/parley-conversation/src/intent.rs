// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handover intent detection.

use parley_config::model::HandoverConfig;
use parley_core::ParleyError;
use regex::{Regex, RegexBuilder};

/// Decides whether an inbound text asks for a human.
pub trait HandoverIntent: Send + Sync {
    fn matches(&self, text: &str) -> bool;
}

/// Case-insensitive whole-word phrases plus optional regexes.
///
/// A phrase matches only on word boundaries, so `human` matches "a human
/// please" but not "humanity". Whitespace inside a phrase matches any run of
/// whitespace.
#[derive(Debug, Clone)]
pub struct PhraseIntent {
    phrases: Vec<Regex>,
    patterns: Vec<Regex>,
}

impl PhraseIntent {
    /// Build from phrases and regex sources. Both match case-insensitively.
    pub fn new(phrases: &[String], patterns: &[String]) -> Result<Self, ParleyError> {
        let phrases = phrases
            .iter()
            .filter_map(|p| phrase_source(p))
            .map(|source| compile(&source))
            .collect::<Result<Vec<_>, _>>()?;
        let patterns = patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { phrases, patterns })
    }

    pub fn from_config(config: &HandoverConfig) -> Result<Self, ParleyError> {
        Self::new(&config.intent_phrases, &config.intent_patterns)
    }
}

impl HandoverIntent for PhraseIntent {
    fn matches(&self, text: &str) -> bool {
        self.phrases
            .iter()
            .chain(&self.patterns)
            .any(|re| re.is_match(text))
    }
}

fn compile(source: &str) -> Result<Regex, ParleyError> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .map_err(|e| ParleyError::Config(format!("invalid handover pattern `{source}`: {e}")))
}

/// Regex source for a literal phrase; `None` for a blank one.
fn phrase_source(phrase: &str) -> Option<String> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    let first = words.first()?.chars().next();
    let last = words.last()?.chars().last();
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');

    let mut source = String::new();
    if is_word(first) {
        source.push_str(r"\b");
    }
    source.push_str(&words.join(r"\s+"));
    if is_word(last) {
        source.push_str(r"\b");
    }
    Some(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phrases_match_case_insensitively() {
        let intent = PhraseIntent::from_config(&HandoverConfig::default()).unwrap();
        assert!(intent.matches("Can I talk to a PERSON please"));
        assert!(intent.matches("HUMAN"));
        assert!(!intent.matches("what are your opening hours?"));
    }

    #[test]
    fn phrases_match_whole_words_only() {
        let intent = PhraseIntent::from_config(&HandoverConfig::default()).unwrap();
        assert!(!intent.matches("for the good of humanity"));
        assert!(!intent.matches("that was humane of you"));
        assert!(!intent.matches("our reagent stock"));
        assert!(intent.matches("a human, please!"));
        assert!(intent.matches("can I talk  to a\nperson"));
    }

    #[test]
    fn punctuated_phrase_keeps_its_edges() {
        let intent = PhraseIntent::new(&["  help?  ".to_string(), "   ".to_string()], &[]).unwrap();
        assert!(intent.matches("HELP?"));
        assert!(intent.matches("can you help? now"));
        assert!(!intent.matches("helpful?"));
        assert!(!intent.matches("help"));
    }

    #[test]
    fn patterns_extend_phrases() {
        let intent = PhraseIntent::new(&[], &[r"\b(operator|representative)\b".to_string()]).unwrap();
        assert!(intent.matches("get me an Operator"));
        assert!(!intent.matches("operators manual"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = PhraseIntent::new(&[], &["(unclosed".to_string()]).unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}
