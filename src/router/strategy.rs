//! Tier Selection
//!
//! Maps model identifiers to capability tiers and tiers to a pool search order.

use crate::router::key_pool::CapabilityTier;
use std::collections::HashMap;
use std::fmt;

/// Which tier set the pool should draw from first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierPreference {
    /// Premium if any premium credential is loaded, otherwise standard
    Highest,

    /// Standard if any standard credential is loaded, otherwise premium
    StandardPreferred,
}

impl TierPreference {
    /// Tier sets in the order the pool should try them
    pub fn search_order(self) -> [CapabilityTier; 2] {
        match self {
            TierPreference::Highest => [CapabilityTier::Premium, CapabilityTier::Standard],
            TierPreference::StandardPreferred => {
                [CapabilityTier::Standard, CapabilityTier::Premium]
            }
        }
    }

    /// The tier tried first
    pub fn preferred_tier(self) -> CapabilityTier {
        self.search_order()[0]
    }
}

impl fmt::Display for TierPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierPreference::Highest => write!(f, "highest available tier"),
            TierPreference::StandardPreferred => write!(f, "standard tier (premium fallback)"),
        }
    }
}

/// Model identifier to capability tier table
///
/// Lookups try an exact match first, then the longest registered prefix, so
/// `gpt-4-0613` resolves through `gpt-4`.
#[derive(Debug, Clone, Default)]
pub struct ModelTiers {
    tiers: HashMap<String, CapabilityTier>,
}

impl ModelTiers {
    /// An empty table; every model resolves to the standard preference
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table covering the common OpenAI chat models
    pub fn builtin() -> Self {
        let mut tiers = Self::new();
        for model in ["gpt-3.5-turbo", "gpt-3.5-turbo-16k"] {
            tiers.insert(model, CapabilityTier::Standard);
        }
        for model in ["gpt-4", "gpt-4-32k", "gpt-4-turbo", "gpt-4o"] {
            tiers.insert(model, CapabilityTier::Premium);
        }
        tiers
    }

    /// Register or replace a model's tier
    pub fn insert(&mut self, model: impl Into<String>, tier: CapabilityTier) {
        self.tiers.insert(model.into(), tier);
    }

    /// Merge entries over this table (later entries win)
    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, CapabilityTier)>) {
        self.tiers.extend(entries);
    }

    /// Tier of a model, if known
    pub fn tier_for(&self, model: &str) -> Option<CapabilityTier> {
        if let Some(tier) = self.tiers.get(model) {
            return Some(*tier);
        }

        self.tiers
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, tier)| *tier)
    }

    /// Pool preference for a request against `model`
    pub fn preference_for(&self, model: &str) -> TierPreference {
        match self.tier_for(model) {
            Some(CapabilityTier::Premium) => TierPreference::Highest,
            Some(CapabilityTier::Standard) | None => TierPreference::StandardPreferred,
        }
    }
}
