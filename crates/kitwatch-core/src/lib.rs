//! Core domain model and pure classifiers for kitwatch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod kit;
pub mod player;
pub mod season;
pub mod text;

pub use kit::{KitKeywords, KitVariantClassifier};
pub use player::{PlayerMatch, PlayerMatcher};
pub use season::extract_season;
pub use text::{normalize, similarity_ratio, NormalizeMode};

pub const CRATE_NAME: &str = "kitwatch-core";

/// Categorical role of a kit design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KitVariant {
    Home,
    Away,
    Third,
}

impl KitVariant {
    /// Fixed order used by the exact keyword pass.
    pub const ALL: [KitVariant; 3] = [KitVariant::Home, KitVariant::Away, KitVariant::Third];

    pub fn as_str(&self) -> &'static str {
        match self {
            KitVariant::Home => "home",
            KitVariant::Away => "away",
            KitVariant::Third => "third",
        }
    }
}

impl fmt::Display for KitVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKitVariant(pub String);

impl fmt::Display for UnknownKitVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown kit variant `{}`", self.0)
    }
}

impl std::error::Error for UnknownKitVariant {}

impl FromStr for KitVariant {
    type Err = UnknownKitVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" => Ok(KitVariant::Home),
            "away" => Ok(KitVariant::Away),
            "third" => Ok(KitVariant::Third),
            other => Err(UnknownKitVariant(other.to_string())),
        }
    }
}

/// A listing as returned by the marketplace search client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub id: String,
    pub title: String,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub status: Option<String>,
    pub url: Option<String>,
    /// Decimal amount exactly as the marketplace reports it.
    pub price: Option<String>,
    pub photo_urls: Vec<String>,
}

/// (season, kit variant) pair the operator already owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipKey {
    pub season: String,
    pub kit_variant: KitVariant,
}

/// A listing with its derived classification fields. Absent fields stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedCandidate {
    pub listing: RawListing,
    pub season: Option<String>,
    pub kit_variant: Option<KitVariant>,
    pub player_name: Option<String>,
}

impl ClassifiedCandidate {
    pub fn id(&self) -> &str {
        &self.listing.id
    }

    /// Ownership key, only when both season and variant were recovered.
    pub fn ownership_key(&self) -> Option<OwnershipKey> {
        ownership_key_for(self.season.as_deref(), self.kit_variant)
    }
}

pub fn ownership_key_for(season: Option<&str>, kit_variant: Option<KitVariant>) -> Option<OwnershipKey> {
    match (season, kit_variant) {
        (Some(season), Some(kit_variant)) => Some(OwnershipKey {
            season: season.to_string(),
            kit_variant,
        }),
        _ => None,
    }
}

/// Accepted candidate as stored for downstream notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedItem {
    pub id: String,
    pub title: String,
    pub brand: Option<String>,
    pub status: Option<String>,
    pub size: Option<String>,
    pub season: Option<String>,
    pub kit_variant: Option<KitVariant>,
    pub player_name: Option<String>,
    pub url: Option<String>,
    pub price: Option<String>,
    pub photo_urls: Vec<String>,
    pub added_at: DateTime<Utc>,
    pub notified: bool,
}

impl PersistedItem {
    pub fn from_candidate(candidate: ClassifiedCandidate, added_at: DateTime<Utc>) -> Self {
        let ClassifiedCandidate {
            listing,
            season,
            kit_variant,
            player_name,
        } = candidate;
        Self {
            id: listing.id,
            title: listing.title,
            brand: listing.brand,
            status: listing.status,
            size: listing.size,
            season,
            kit_variant,
            player_name,
            url: listing.url,
            price: listing.price,
            photo_urls: listing.photo_urls,
            added_at,
            notified: false,
        }
    }
}
