//! Kit-variant classification: exact keyword pass, then token-level fuzzy fallback.

use serde::{Deserialize, Serialize};

use crate::text::{best_match, normalize, NormalizeMode};
use crate::KitVariant;

pub const DEFAULT_KIT_VARIANT_THRESHOLD: f64 = 80.0;

/// Per-variant keyword vocabulary (bilingual by default).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitKeywords {
    #[serde(default = "default_home")]
    pub home: Vec<String>,
    #[serde(default = "default_away")]
    pub away: Vec<String>,
    #[serde(default = "default_third")]
    pub third: Vec<String>,
}

impl Default for KitKeywords {
    fn default() -> Self {
        Self {
            home: default_home(),
            away: default_away(),
            third: default_third(),
        }
    }
}

fn default_home() -> Vec<String> {
    vec!["domicile".into(), "home".into()]
}

fn default_away() -> Vec<String> {
    vec!["extérieur".into(), "exterieur".into(), "away".into()]
}

fn default_third() -> Vec<String> {
    vec!["third".into(), "3rd".into(), "troisième".into(), "troisieme".into()]
}

impl KitKeywords {
    fn for_variant(&self, variant: KitVariant) -> &[String] {
        match variant {
            KitVariant::Home => &self.home,
            KitVariant::Away => &self.away,
            KitVariant::Third => &self.third,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KitVariantClassifier {
    /// Flattened `(keyword, variant)` vocabulary in home, away, third order.
    vocabulary: Vec<(String, KitVariant)>,
    threshold: f64,
}

impl Default for KitVariantClassifier {
    fn default() -> Self {
        Self::new(&KitKeywords::default(), DEFAULT_KIT_VARIANT_THRESHOLD)
    }
}

impl KitVariantClassifier {
    pub fn new(keywords: &KitKeywords, threshold: f64) -> Self {
        let vocabulary = KitVariant::ALL
            .iter()
            .flat_map(|variant| {
                keywords
                    .for_variant(*variant)
                    .iter()
                    .map(|kw| (normalize(kw, NormalizeMode::Kit), *variant))
                    .filter(|(kw, _)| !kw.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            vocabulary,
            threshold,
        }
    }

    pub fn classify(&self, title: &str) -> Option<KitVariant> {
        let text = normalize(title, NormalizeMode::Kit);
        if text.trim().is_empty() {
            return None;
        }
        self.exact(&text).or_else(|| self.fuzzy(&text))
    }

    fn exact(&self, text: &str) -> Option<KitVariant> {
        self.vocabulary
            .iter()
            .find(|(kw, _)| text.contains(kw.as_str()))
            .map(|(_, variant)| *variant)
    }

    fn fuzzy(&self, text: &str) -> Option<KitVariant> {
        let mut best: Option<(usize, f64)> = None;
        for token in text.split_whitespace() {
            let Some((idx, score)) = best_match(token, self.vocabulary.iter().map(|(kw, _)| kw.as_str()))
            else {
                continue;
            };
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((idx, score));
            }
        }

        let (idx, score) = best?;
        if score < self.threshold {
            return None;
        }
        self.vocabulary.get(idx).map(|(_, variant)| *variant)
    }
}
