//! Text folding and the character-level similarity score shared by the classifiers.

use rapidfuzz::fuzz;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMode {
    /// Keeps whitespace so multi-word keywords still match.
    Kit,
    /// Drops all whitespace; surnames are matched as one token.
    Player,
}

/// Lower-case, strip combining marks after canonical decomposition, and in
/// `Player` mode remove whitespace.
pub fn normalize(input: &str, mode: NormalizeMode) -> String {
    let folded = input
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>();
    match mode {
        NormalizeMode::Kit => folded,
        NormalizeMode::Player => folded.chars().filter(|c| !c.is_whitespace()).collect(),
    }
}

/// Normalized Indel similarity on a 0-100 scale: `200 * LCS / (len(a) + len(b))`.
/// Two empty strings score 100.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    fuzz::ratio(a.chars(), b.chars()) * 100.0
}

/// Highest-scoring candidate; the first one wins on ties.
pub(crate) fn best_match<'a, I>(query: &str, candidates: I) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let score = similarity_ratio(query, candidate);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}
