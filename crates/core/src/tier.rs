//! Subscription tiers (feature gating).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Subscription tier of a tenant organization.
///
/// Tiers form a total order (`Basic < Plus < Premium`); the derived `Ord`
/// is relied on by tier-gated authorization rules, so variant order here is
/// load-bearing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Plus,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Plus => "plus",
            Tier::Premium => "premium",
        }
    }

    /// Whether this tier satisfies a gate requiring `required`.
    pub fn satisfies(&self, required: Tier) -> bool {
        *self >= required
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Tier::Basic),
            "plus" => Ok(Tier::Plus),
            "premium" => Ok(Tier::Premium),
            other => Err(DomainError::validation(format!("unknown tier '{other}'"))),
        }
    }
}
