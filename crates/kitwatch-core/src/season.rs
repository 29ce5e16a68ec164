//! Season extraction from listing titles.

use std::sync::OnceLock;

use regex::Regex;

struct SeasonPatterns {
    /// Tried in order at each position; the first to match with clean edges wins.
    pairs: [Regex; 3],
    bare_year: Regex,
}

fn patterns() -> &'static SeasonPatterns {
    static PATTERNS: OnceLock<SeasonPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| SeasonPatterns {
        pairs: [
            Regex::new(r"^(20[0-9]{2})[-/ ](20[0-9]{2})").expect("valid season regex"),
            Regex::new(r"^(20[0-9]{2})[-/ ]([0-9]{2})").expect("valid season regex"),
            Regex::new(r"^([0-9]{2})[-/]([0-9]{2})").expect("valid season regex"),
        ],
        bare_year: Regex::new(r"\b(20[0-9]{2})\b").expect("valid year regex"),
    })
}

/// Extract a season as `YYYY-YYYY`, or a bare `20YY` year when no range is present.
///
/// Pairs are accepted as `20YY` + (`-`, `/`, space) + `20YY`/`YY`, or `YY` + (`-`, `/`) + `YY`,
/// with no digit touching either end. Two-digit ends borrow the century of the start year;
/// two-digit pairs are placed in the 2000s.
pub fn extract_season(title: &str) -> Option<String> {
    let text = title.to_lowercase();
    let patterns = patterns();

    if let Some((start, end)) = find_pair(&text, &patterns.pairs) {
        return Some(normalize_pair(start, end));
    }

    patterns
        .bare_year
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn find_pair<'t>(text: &'t str, pairs: &[Regex]) -> Option<(&'t str, &'t str)> {
    let mut prev: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        let clean_left = !prev.is_some_and(|c| c.is_ascii_digit());
        prev = Some(ch);
        if !clean_left || !ch.is_ascii_digit() {
            continue;
        }
        let rest = &text[idx..];
        for pattern in pairs {
            let Some(caps) = pattern.captures(rest) else {
                continue;
            };
            let whole = caps.get(0)?;
            let clean_right = !rest[whole.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit());
            if clean_right {
                return Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()));
            }
        }
    }
    None
}

fn normalize_pair(start: &str, end: &str) -> String {
    if start.len() == 2 {
        return format!("20{start}-20{end}");
    }
    if end.len() == 2 {
        return format!("{start}-{}{end}", &start[..2]);
    }
    format!("{start}-{end}")
}
