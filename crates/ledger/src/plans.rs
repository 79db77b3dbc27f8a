//! Plan registry
//!
//! Immutable, process-wide catalog of purchasable products: subscription
//! plans (time-boxed credit grants with capability gates) and one-off credit
//! packs. Loaded once at startup; every product id arriving from a payload
//! is validated here and nowhere else.

use tally_shared::{Capability, PlanId};

use crate::error::{LedgerError, LedgerResult};

/// A subscription plan: price, credit grant, duration, capability gates.
#[derive(Debug, Clone)]
pub struct PlanDefinition {
    pub plan_id: PlanId,
    pub price_cents: i64,
    pub credit_grant: i64,
    /// `None` = unlimited. Every paid plan in the builtin catalog is finite;
    /// unlimited activations exist only via administrative override.
    pub duration_days: Option<i64>,
    /// Empty slice = all capabilities allowed.
    pub allowed_capabilities: &'static [Capability],
}

/// A one-off credit top-up. Never touches the plan or its expiry.
#[derive(Debug, Clone)]
pub struct CreditPack {
    pub pack_id: &'static str,
    pub price_cents: i64,
    pub credit_grant: i64,
}

/// A resolved product from the catalog.
#[derive(Debug)]
pub enum Product<'a> {
    Plan(&'a PlanDefinition),
    Pack(&'a CreditPack),
}

/// The process-wide product catalog.
pub struct PlanRegistry {
    plans: Vec<PlanDefinition>,
    packs: Vec<CreditPack>,
}

impl PlanRegistry {
    /// The builtin catalog. Paid plans are 30-day windows; the free plan has
    /// no grant of its own (the starter grant rides on account provisioning).
    pub fn builtin() -> Self {
        Self {
            plans: vec![
                PlanDefinition {
                    plan_id: PlanId::Free,
                    price_cents: 0,
                    credit_grant: 0,
                    duration_days: None,
                    allowed_capabilities: &[Capability::Generation],
                },
                PlanDefinition {
                    plan_id: PlanId::Basic,
                    price_cents: 900,
                    credit_grant: 5_000,
                    duration_days: Some(30),
                    allowed_capabilities: &[Capability::Generation, Capability::BatchExport],
                },
                PlanDefinition {
                    plan_id: PlanId::Pro,
                    price_cents: 2_900,
                    credit_grant: 20_000,
                    duration_days: Some(30),
                    // Empty = all capabilities
                    allowed_capabilities: &[],
                },
            ],
            packs: vec![
                CreditPack {
                    pack_id: "pack_small",
                    price_cents: 500,
                    credit_grant: 2_500,
                },
                CreditPack {
                    pack_id: "pack_large",
                    price_cents: 2_000,
                    credit_grant: 12_000,
                },
            ],
        }
    }

    /// Look up a plan definition. Every `PlanId` has exactly one entry in
    /// the builtin catalog.
    pub fn plan(&self, plan_id: PlanId) -> Option<&PlanDefinition> {
        self.plans.iter().find(|p| p.plan_id == plan_id)
    }

    /// Resolve a raw product id from a payment payload. Unknown ids are a
    /// hard validation error, never a silent fallback.
    pub fn resolve(&self, product_id: &str) -> LedgerResult<Product<'_>> {
        if let Some(plan_id) = PlanId::parse(product_id) {
            if plan_id.is_paid() {
                if let Some(plan) = self.plan(plan_id) {
                    return Ok(Product::Plan(plan));
                }
            }
            // "free" is not purchasable
            return Err(LedgerError::UnknownProduct(product_id.to_string()));
        }
        if let Some(pack) = self.packs.iter().find(|p| p.pack_id == product_id) {
            return Ok(Product::Pack(pack));
        }
        Err(LedgerError::UnknownProduct(product_id.to_string()))
    }

    /// Whether a plan allows a capability. An empty allowed list means the
    /// plan is unrestricted.
    pub fn allows(&self, plan_id: PlanId, capability: Capability) -> bool {
        match self.plan(plan_id) {
            Some(plan) => {
                plan.allowed_capabilities.is_empty()
                    || plan.allowed_capabilities.contains(&capability)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_paid_plans() {
        let registry = PlanRegistry::builtin();
        match registry.resolve("basic") {
            Ok(Product::Plan(plan)) => {
                assert_eq!(plan.plan_id, PlanId::Basic);
                assert_eq!(plan.credit_grant, 5_000);
                assert_eq!(plan.duration_days, Some(30));
            }
            other => panic!("expected basic plan, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_credit_pack() {
        let registry = PlanRegistry::builtin();
        match registry.resolve("pack_small") {
            Ok(Product::Pack(pack)) => assert_eq!(pack.credit_grant, 2_500),
            other => panic!("expected pack, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_product_is_hard_error() {
        let registry = PlanRegistry::builtin();
        assert!(matches!(
            registry.resolve("enterprise"),
            Err(LedgerError::UnknownProduct(_))
        ));
        assert!(matches!(
            registry.resolve(""),
            Err(LedgerError::UnknownProduct(_))
        ));
    }

    #[test]
    fn test_free_plan_is_not_purchasable() {
        let registry = PlanRegistry::builtin();
        assert!(matches!(
            registry.resolve("free"),
            Err(LedgerError::UnknownProduct(_))
        ));
    }

    #[test]
    fn test_capability_gating() {
        let registry = PlanRegistry::builtin();
        assert!(registry.allows(PlanId::Free, Capability::Generation));
        assert!(!registry.allows(PlanId::Free, Capability::BatchExport));
        assert!(registry.allows(PlanId::Basic, Capability::BatchExport));
        assert!(!registry.allows(PlanId::Basic, Capability::PriorityQueue));
        // Pro has an empty allowed list = everything
        assert!(registry.allows(PlanId::Pro, Capability::PriorityQueue));
    }

    #[test]
    fn test_every_plan_id_has_a_definition() {
        let registry = PlanRegistry::builtin();
        for plan_id in [PlanId::Free, PlanId::Basic, PlanId::Pro] {
            assert!(registry.plan(plan_id).is_some());
        }
    }

    #[test]
    fn test_paid_catalog_plans_are_time_boxed() {
        let registry = PlanRegistry::builtin();
        for plan in [PlanId::Basic, PlanId::Pro] {
            let def = registry.plan(plan).unwrap();
            assert!(def.duration_days.is_some());
        }
    }
}
