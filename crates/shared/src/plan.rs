//! Plan identifiers and capability tags
//!
//! `PlanId` is the closed set of entitlement tiers. Raw plan strings from
//! payloads or the store are validated once, at the boundary — there is no
//! silent fallback for unrecognized values.

use serde::{Deserialize, Serialize};

/// Closed set of entitlement plans. `Free` is both the initial state and the
/// state every paid plan degrades to on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Free,
    Basic,
    Pro,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Basic => "basic",
            PlanId::Pro => "pro",
        }
    }

    /// Parse a raw plan string. Returns `None` for anything outside the
    /// closed set; callers decide whether that is a validation error.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanId::Free),
            "basic" => Some(PlanId::Basic),
            "pro" => Some(PlanId::Pro),
            _ => None,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanId::Free)
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability tags gated by plan definitions. An empty allowed-capability
/// list on a plan means every capability is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Generation,
    BatchExport,
    PriorityQueue,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Generation => "generation",
            Capability::BatchExport => "batch_export",
            Capability::PriorityQueue => "priority_queue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_round_trip() {
        for plan in [PlanId::Free, PlanId::Basic, PlanId::Pro] {
            assert_eq!(PlanId::parse(plan.as_str()), Some(plan));
        }
    }

    #[test]
    fn test_unknown_plan_is_rejected() {
        assert_eq!(PlanId::parse("enterprise"), None);
        assert_eq!(PlanId::parse("Free"), None);
        assert_eq!(PlanId::parse(""), None);
    }

    #[test]
    fn test_paid_plans() {
        assert!(!PlanId::Free.is_paid());
        assert!(PlanId::Basic.is_paid());
        assert!(PlanId::Pro.is_paid());
    }
}
