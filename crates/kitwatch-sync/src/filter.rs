//! Relevance gate, seen-set dedup and ownership suppression.

use std::collections::HashSet;
use std::fmt;

use kitwatch_core::{ownership_key_for, ClassifiedCandidate, KitVariant, OwnershipKey, RawListing};

use crate::config::SearchSettings;

/// Cheap title/brand/size gate applied before any classification work.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    required_terms: Vec<String>,
    brands: HashSet<String>,
    sizes: HashSet<String>,
}

impl RelevanceFilter {
    pub fn new(settings: &SearchSettings) -> Self {
        Self {
            required_terms: settings
                .required_terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            brands: settings.brands.iter().map(|b| b.trim().to_lowercase()).collect(),
            sizes: settings.sizes.iter().map(|s| s.trim().to_string()).collect(),
        }
    }

    /// Absent brand or size passes; an empty allow-list accepts anything.
    pub fn is_relevant(&self, listing: &RawListing) -> bool {
        let title = listing.title.trim().to_lowercase();
        if title.is_empty() {
            return false;
        }
        if !self.required_terms.iter().all(|t| title.contains(t.as_str())) {
            return false;
        }
        let brand_ok = match listing.brand.as_deref() {
            None => true,
            Some(_) if self.brands.is_empty() => true,
            Some(brand) => self.brands.contains(&brand.trim().to_lowercase()),
        };
        let size_ok = match listing.size.as_deref() {
            None => true,
            Some(_) if self.sizes.is_empty() => true,
            Some(size) => self.sizes.contains(size.trim()),
        };
        brand_ok && size_ok
    }
}

/// Listing ids already accepted, in this run or a previous one. Only grows.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OwnershipCatalog {
    keys: HashSet<OwnershipKey>,
}

impl OwnershipCatalog {
    pub fn new(keys: impl IntoIterator<Item = OwnershipKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Partial keys (missing season or variant) are never owned.
    pub fn owns(&self, key: Option<&OwnershipKey>) -> bool {
        key.is_some_and(|k| self.keys.contains(k))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rejection {
    Irrelevant,
    AlreadySeen,
    Owned,
    NoPlayer,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Irrelevant => "irrelevant",
            Rejection::AlreadySeen => "already_seen",
            Rejection::Owned => "owned",
            Rejection::NoPlayer => "no_player",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DedupFilter {
    seen: SeenSet,
    owned: OwnershipCatalog,
}

impl DedupFilter {
    pub fn new(seen: SeenSet, owned: OwnershipCatalog) -> Self {
        Self { seen, owned }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Checks that need no player name, so image work can be skipped early.
    pub fn precheck(&self, id: &str, season: Option<&str>, kit_variant: Option<KitVariant>) -> Result<(), Rejection> {
        if self.seen.contains(id) {
            return Err(Rejection::AlreadySeen);
        }
        if self.owned.owns(ownership_key_for(season, kit_variant).as_ref()) {
            return Err(Rejection::Owned);
        }
        Ok(())
    }

    /// Full acceptance rule; an accepted id joins the seen-set before returning.
    pub fn admit(&mut self, candidate: &ClassifiedCandidate) -> Result<(), Rejection> {
        if candidate.player_name.is_none() {
            return Err(Rejection::NoPlayer);
        }
        self.precheck(candidate.id(), candidate.season.as_deref(), candidate.kit_variant)?;
        self.seen.insert(candidate.id());
        Ok(())
    }
}
