//! Best-effort extraction of structured fields from free-form model text.
//!
//! Nothing in this module returns an error: malformed or reformatted model
//! output degrades to tagged fallbacks (`GuessOutcome::Unparsed`, the
//! `Unknown` type sentinel, a zero confidence, `UNKNOWN_TOPIC`) so callers
//! never branch on exceptions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mbti::UNKNOWN_TYPE;

pub const UNKNOWN_TOPIC: &str = "Unknown Topic";

/// One ranked guess line plus its reasoning block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedGuess {
    pub rank: u32,
    pub code: String,
    pub percent: u32,
    pub reasoning: String,
}

/// Tagged result of a ranked-guess parse. Zero matches is a valid outcome;
/// the caller renders the raw text instead.
#[derive(Debug, Clone, PartialEq)]
pub enum GuessOutcome {
    Ranked(Vec<RankedGuess>),
    Unparsed(String),
}

/// Fields pulled from an interview analysis reply. Missing fields default
/// rather than fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFields {
    pub mbti_type: String,
    pub confidence: f64,
    pub explanation: String,
}

static RANKED_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(\d+)\.\s*([A-Z]{4})\s*-\s*(\d{1,3})%").unwrap());

static MBTI_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MBTI Type:\s*([A-Za-z]{4})").unwrap());

static CONFIDENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Confidence:\s*(\d{1,3})%").unwrap());

static EXPLANATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)Explanation:\s*(.*)").unwrap());

static TOPIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"The topic I would like to explore with you today is:\s*([^."]+)"#).unwrap()
});

/// Parses lines of the form `1. INTJ - 70%` each followed by a
/// `Reasoning:` block (case-sensitive keyword). A header without a
/// reasoning block in its segment is skipped.
pub fn parse_ranked_guesses(text: &str) -> GuessOutcome {
    let headers: Vec<_> = RANKED_HEADER_RE.captures_iter(text).collect();
    let spans: Vec<_> = RANKED_HEADER_RE.find_iter(text).collect();

    let mut guesses = Vec::new();
    for (idx, caps) in headers.iter().enumerate() {
        let segment_start = spans[idx].end();
        let segment_end = spans
            .get(idx + 1)
            .map(|next| next.start())
            .unwrap_or(text.len());
        let segment = &text[segment_start..segment_end];

        let Some(reasoning_at) = segment.find("Reasoning:") else {
            continue;
        };
        let reasoning = segment[reasoning_at + "Reasoning:".len()..].trim();
        if reasoning.is_empty() {
            continue;
        }

        let (Ok(rank), Ok(percent)) = (caps[1].parse::<u32>(), caps[3].parse::<u32>()) else {
            continue;
        };
        guesses.push(RankedGuess {
            rank,
            code: caps[2].to_string(),
            percent,
            reasoning: reasoning.to_string(),
        });
    }

    if guesses.is_empty() {
        GuessOutcome::Unparsed(text.to_string())
    } else {
        GuessOutcome::Ranked(guesses)
    }
}

/// Extracts `MBTI Type:`, optional `Confidence:`, and the `Explanation:`
/// block running to end of text. Missing fields default to
/// `Unknown` / `0.0` / empty.
pub fn parse_analysis(text: &str) -> AnalysisFields {
    let mbti_type = MBTI_TYPE_RE
        .captures(text)
        .map(|caps| caps[1].to_ascii_uppercase())
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string());
    let confidence = CONFIDENCE_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .unwrap_or(0.0);
    let explanation = EXPLANATION_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default();

    AnalysisFields {
        mbti_type,
        confidence,
        explanation,
    }
}

/// Pulls the topic label out of the assistant's lead-in sentence, ending at
/// a period or quote. Absence yields `UNKNOWN_TOPIC`.
pub fn extract_topic(text: &str) -> String {
    TOPIC_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|topic| !topic.is_empty())
        .unwrap_or_else(|| UNKNOWN_TOPIC.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_GUESSES: &str = "Here is my read.\n\
        1. INTJ - 70%\n\
        Reasoning: Structured sentences and long-range planning.\n\
        2. INTP - 20%\n\
        Reasoning: Abstract hedging in the second paragraph.\n\
        3. ENTJ - 10%\n\
        Reasoning: Occasional directive phrasing.";

    #[test]
    fn parses_three_ranked_guesses() {
        let GuessOutcome::Ranked(guesses) = parse_ranked_guesses(THREE_GUESSES) else {
            panic!("expected ranked outcome");
        };
        assert_eq!(guesses.len(), 3);
        assert_eq!(guesses[0].rank, 1);
        assert_eq!(guesses[0].code, "INTJ");
        assert_eq!(guesses[0].percent, 70);
        assert!(guesses[0].reasoning.contains("long-range planning"));
        assert_eq!(guesses[2].code, "ENTJ");
        assert!(!guesses[2].reasoning.is_empty());
    }

    #[test]
    fn reasoning_capture_stops_at_next_ranked_line() {
        let GuessOutcome::Ranked(guesses) = parse_ranked_guesses(THREE_GUESSES) else {
            panic!("expected ranked outcome");
        };
        assert!(!guesses[0].reasoning.contains("INTP"));
        assert!(!guesses[1].reasoning.contains("ENTJ"));
    }

    #[test]
    fn unranked_text_falls_back_to_raw() {
        let text = "I think you might be an INTJ, hard to say.";
        assert_eq!(
            parse_ranked_guesses(text),
            GuessOutcome::Unparsed(text.to_string())
        );
    }

    #[test]
    fn lowercase_reasoning_keyword_does_not_match() {
        let text = "1. INTJ - 70%\nreasoning: lowercase keyword.";
        assert!(matches!(parse_ranked_guesses(text), GuessOutcome::Unparsed(_)));
    }

    #[test]
    fn analysis_with_all_fields() {
        let fields = parse_analysis(
            "MBTI Type: INFP\nConfidence: 85%\nExplanation: Values-first answers throughout.",
        );
        assert_eq!(fields.mbti_type, "INFP");
        assert_eq!(fields.confidence, 85.0);
        assert_eq!(fields.explanation, "Values-first answers throughout.");
    }

    #[test]
    fn analysis_missing_confidence_defaults_to_zero() {
        let fields = parse_analysis("MBTI Type: ESTP\nExplanation: Action verbs everywhere.");
        assert_eq!(fields.mbti_type, "ESTP");
        assert_eq!(fields.confidence, 0.0);
        assert_eq!(fields.explanation, "Action verbs everywhere.");
    }

    #[test]
    fn analysis_missing_everything_uses_sentinels() {
        let fields = parse_analysis("The subject was delightful.");
        assert_eq!(fields.mbti_type, UNKNOWN_TYPE);
        assert_eq!(fields.confidence, 0.0);
        assert!(fields.explanation.is_empty());
    }

    #[test]
    fn topic_extraction_stops_at_period() {
        let text = "Welcome back. The topic I would like to explore with you today is: Childhood memories. Tell me about one.";
        assert_eq!(extract_topic(text), "Childhood memories");
    }

    #[test]
    fn topic_extraction_stops_at_quote() {
        let text = "\"The topic I would like to explore with you today is: How you recharge\" she said.";
        assert_eq!(extract_topic(text), "How you recharge");
    }

    #[test]
    fn missing_lead_in_yields_sentinel() {
        assert_eq!(extract_topic("Let's talk about your week."), UNKNOWN_TOPIC);
    }
}
