//! Matching OCR text spans against a roster of known surnames.

use serde::Serialize;

use crate::text::{best_match, normalize, NormalizeMode};

pub const DEFAULT_PLAYER_THRESHOLD: f64 = 85.0;
pub const DEFAULT_MAX_LENGTH_DELTA: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerMatch {
    /// Roster entry as configured.
    pub name: String,
    /// Raw OCR text the name was recovered from.
    pub span: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct RosterEntry {
    display: String,
    folded: String,
}

#[derive(Debug, Clone)]
pub struct PlayerMatcher {
    roster: Vec<RosterEntry>,
    exclusions: Vec<String>,
    threshold: f64,
    max_length_delta: usize,
}

impl PlayerMatcher {
    pub fn new<R, E>(roster: R, exclusions: E, threshold: f64, max_length_delta: usize) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let roster = roster
            .into_iter()
            .map(|name| RosterEntry {
                display: name.as_ref().trim().to_string(),
                folded: normalize(name.as_ref(), NormalizeMode::Player),
            })
            .filter(|entry| !entry.folded.is_empty())
            .collect();
        let exclusions = exclusions
            .into_iter()
            .map(|word| normalize(word.as_ref(), NormalizeMode::Player))
            .filter(|word| !word.is_empty())
            .collect();
        Self {
            roster,
            exclusions,
            threshold,
            max_length_delta,
        }
    }

    /// Match one span. Spans containing an exclusion word never match, whatever they score.
    pub fn match_span(&self, span: &str) -> Option<PlayerMatch> {
        let text = normalize(span, NormalizeMode::Player);
        if text.is_empty() {
            return None;
        }
        if self.exclusions.iter().any(|word| text.contains(word.as_str())) {
            return None;
        }

        let (idx, score) = best_match(&text, self.roster.iter().map(|e| e.folded.as_str()))?;
        if score < self.threshold {
            return None;
        }
        let entry = &self.roster[idx];
        let delta = text.chars().count().abs_diff(entry.folded.chars().count());
        if delta > self.max_length_delta {
            return None;
        }
        Some(PlayerMatch {
            name: entry.display.clone(),
            span: span.to_string(),
            score,
        })
    }

    /// First accepted span in detection order.
    pub fn match_spans<'a, I>(&self, spans: I) -> Option<PlayerMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        spans.into_iter().find_map(|span| self.match_span(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> PlayerMatcher {
        PlayerMatcher::new(
            ["saka", "odegaard", "saliba", "rice", "emile smith rowe", "van persie"],
            ["emirates", "fly", "rwanda", "adidas"],
            DEFAULT_PLAYER_THRESHOLD,
            DEFAULT_MAX_LENGTH_DELTA,
        )
    }

    #[test]
    fn exact_and_near_spans_resolve() {
        let m = matcher();
        assert_eq!(m.match_span("SAKA").unwrap().name, "saka");
        assert_eq!(m.match_span("ODEGAARD").unwrap().name, "odegaard");
        // Ø does not decompose, the remaining letters still score 87.5
        assert_eq!(m.match_span("ØDEGAARD").unwrap().name, "odegaard");
        assert_eq!(m.match_span("Van Persie").unwrap().name, "van persie");
        // one dropped letter still clears 85
        assert_eq!(m.match_span("SALBA").unwrap().name, "saliba");
    }

    #[test]
    fn exclusion_word_never_resolves_even_when_it_scores() {
        let m = PlayerMatcher::new(["emirates"], ["emirates"], 85.0, 3);
        assert!(m.match_span("Emirates").is_none());
        let m = matcher();
        assert!(m.match_span("Fly Emirates").is_none());
        assert!(m.match_span("sakafly").is_none());
    }

    #[test]
    fn length_guard_rejects_long_spans() {
        let m = PlayerMatcher::new(["rice"], Vec::<String>::new(), 50.0, 3);
        // "ricexxxx" vs "rice" scores 66.7 but is 4 characters longer
        assert!(m.match_span("ricexxxx").is_none());
        assert_eq!(m.match_span("ricexxx").unwrap().name, "rice");
    }

    #[test]
    fn below_threshold_is_absent() {
        let m = matcher();
        assert!(m.match_span("SAKE").is_none());
        assert!(m.match_span("").is_none());
        assert!(m.match_span("  ").is_none());
        assert!(m.match_span("7").is_none());
    }

    #[test]
    fn first_accepted_span_wins() {
        let m = matcher();
        let found = m.match_spans(["FLY EMIRATES", "7", "RICE", "SAKA"]).unwrap();
        assert_eq!(found.name, "rice");
        assert_eq!(found.span, "RICE");
        assert!(m.match_spans(["FLY EMIRATES", "41"]).is_none());
    }
}
