//! Spend tier classifier
//!
//! Display/analytics classification derived from lifetime spend. This is
//! deliberately independent of the entitlement-governing `plan`: the two
//! share vocabulary in billing UIs but must never be conflated — a platinum
//! spender can be on the free plan and vice versa.

use serde::Serialize;

/// Ordered display tiers. Ordering matches threshold order so monotonicity
/// can be asserted with `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendTier {
    Standard,
    Gold,
    Platinum,
}

/// Thresholds checked highest-first; ties resolve to the higher tier.
const TIER_THRESHOLDS: &[(i64, SpendTier)] =
    &[(900_000, SpendTier::Platinum), (400_000, SpendTier::Gold)];

impl SpendTier {
    /// Pure classification of cumulative spend.
    pub fn classify(lifetime_spend: i64) -> SpendTier {
        for &(threshold, tier) in TIER_THRESHOLDS {
            if lifetime_spend >= threshold {
                return tier;
            }
        }
        SpendTier::Standard
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpendTier::Standard => "standard",
            SpendTier::Gold => "gold",
            SpendTier::Platinum => "platinum",
        }
    }
}

impl std::fmt::Display for SpendTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
