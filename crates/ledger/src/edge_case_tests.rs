// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Credit/Subscription Ledger
//!
//! Exercises the decision points that carry the concurrency guarantees:
//! - Debit outcome classification (LGR-D01 to LGR-D05)
//! - Webhook idempotency gate (LGR-W01 to LGR-W07)
//! - Lazy plan expiry (LGR-E01 to LGR-E05)
//! - Spend tier thresholds (LGR-T01 to LGR-T03)
//! - Plan registry boundary (LGR-P01 to LGR-P03)
//!
//! The store-coupled halves of these operations are single atomic statements
//! (conditional UPDATE, unique-constraint INSERT, claimed grant transaction);
//! the tests here pin down the pure logic layered around them.

mod debit_tests {
    use crate::credits::{classify_debit, validate_amount, DebitOutcome};
    use crate::error::LedgerError;

    // =========================================================================
    // LGR-D01: balance 5, debit 5 - applies and drains to exactly zero
    // =========================================================================
    #[test]
    fn test_exact_balance_debit_drains_to_zero() {
        // The conditional UPDATE uses >=, so an exact match applies
        assert_eq!(
            classify_debit(Some(0), None),
            DebitOutcome::Applied { new_balance: 0 }
        );
    }

    // =========================================================================
    // LGR-D02: two contested debits of 5 at balance 5 - loser sees the
    // drained balance, not an error that unwinds control flow
    // =========================================================================
    #[test]
    fn test_contested_debit_loser_sees_insufficient() {
        // Winner's round-trip returned the new balance
        let winner = classify_debit(Some(0), None);
        // Loser's UPDATE affected zero rows; the re-read observes the
        // winner's terminal balance
        let loser = classify_debit(None, Some(0));

        assert_eq!(winner, DebitOutcome::Applied { new_balance: 0 });
        assert_eq!(loser, DebitOutcome::InsufficientBalance { balance: 0 });
    }

    // =========================================================================
    // LGR-D03: zero rows and no account on re-read - account not found
    // =========================================================================
    #[test]
    fn test_zero_rows_without_account_is_not_found() {
        assert_eq!(classify_debit(None, None), DebitOutcome::AccountNotFound);
    }

    // =========================================================================
    // LGR-D04: amount <= 0 rejected before any round-trip
    // =========================================================================
    #[test]
    fn test_non_positive_amounts_rejected() {
        for amount in [0, -1, i64::MIN] {
            assert!(matches!(
                validate_amount(amount),
                Err(LedgerError::InvalidAmount(_))
            ));
        }
    }

    // =========================================================================
    // LGR-D05: sum of applied debits can never exceed the starting balance
    // =========================================================================
    #[test]
    fn test_applied_debits_bounded_by_starting_balance() {
        // Simulate the store serializing N contested debits of `amount`
        // against starting balance B: each debit either decrements the
        // authoritative balance (balance >= amount) or affects zero rows.
        let starting_balance: i64 = 17;
        let amount: i64 = 5;
        let mut balance = starting_balance;
        let mut applied_total = 0;

        for _ in 0..10 {
            let updated = if balance >= amount {
                balance -= amount;
                Some(balance)
            } else {
                None
            };
            let reread = if updated.is_none() { Some(balance) } else { None };

            if let DebitOutcome::Applied { .. } = classify_debit(updated, reread) {
                applied_total += amount;
            }
        }

        assert_eq!(applied_total, 15, "three of ten contested debits fit in 17");
        assert!(applied_total <= starting_balance);
        assert!(balance >= 0, "balance must never go negative");
    }
}

mod webhook_idempotency_tests {
    use crate::webhooks::{interpret_gate, parse_event, GateDecision, ParsedEvent};
    use uuid::Uuid;

    fn delivery(external_id: &str, account_id: Uuid, credits_product: &str) -> String {
        format!(
            r#"{{"type":"notification","event":"payment.succeeded",
               "data":{{"object":{{"id":"{}","status":"succeeded","paid":true,
               "account_id":"{}","product_id":"{}"}}}}}}"#,
            external_id, account_id, credits_product
        )
    }

    // =========================================================================
    // LGR-W01: same external_id delivered twice - second delivery is a
    // duplicate once the first has succeeded (balance +1000 once, not twice)
    // =========================================================================
    #[test]
    fn test_redelivery_after_success_is_duplicate() {
        // First delivery inserts the gate row and proceeds
        assert_eq!(interpret_gate(true, None), GateDecision::Proceed);
        // Redelivery conflicts and finds 'succeeded' - no second grant
        assert_eq!(
            interpret_gate(false, Some("succeeded")),
            GateDecision::Duplicate
        );
    }

    // =========================================================================
    // LGR-W02: redelivery of a partially processed event retries the grant
    // =========================================================================
    #[test]
    fn test_redelivery_of_pending_event_retries() {
        // Gate insert conflicts but the stored row never left 'pending':
        // the first delivery died between insert and grant commit
        assert_eq!(
            interpret_gate(false, Some("pending")),
            GateDecision::Proceed
        );
    }

    // =========================================================================
    // LGR-W03: N replays collapse to one grant
    // =========================================================================
    #[test]
    fn test_n_replays_one_grant() {
        let mut grants = 0;
        let mut stored_status: Option<&str> = None;

        for delivery in 0..5 {
            let inserted = stored_status.is_none();
            match interpret_gate(inserted, stored_status) {
                GateDecision::Proceed => {
                    // Grant transaction claims pending -> succeeded
                    grants += 1;
                    stored_status = Some("succeeded");
                }
                GateDecision::Duplicate => {
                    assert!(delivery > 0, "first delivery can never be a duplicate");
                }
            }
        }

        assert_eq!(grants, 1, "five deliveries must produce exactly one grant");
    }

    // =========================================================================
    // LGR-W04: malformed payload (missing data.object.id) - invalid, no
    // mutation; the transport still acknowledges with 200
    // =========================================================================
    #[test]
    fn test_missing_external_id_never_reaches_the_gate() {
        let raw = r#"{"type":"notification","event":"payment.succeeded",
            "data":{"object":{"status":"succeeded","paid":true}}}"#;
        assert!(matches!(parse_event(raw), ParsedEvent::Invalid { .. }));
    }

    // =========================================================================
    // LGR-W05: non-payment events acknowledged as no-ops
    // =========================================================================
    #[test]
    fn test_unrelated_events_are_ignored() {
        for event in ["payment.failed", "payout.created", "customer.updated"] {
            let raw = format!(
                r#"{{"type":"notification","event":"{}","data":{{"object":{{"id":"x"}}}}}}"#,
                event
            );
            assert_eq!(
                parse_event(&raw),
                ParsedEvent::Ignored {
                    event: event.to_string()
                }
            );
        }
    }

    // =========================================================================
    // LGR-W06: empty external_id treated as missing, not as a usable key
    // =========================================================================
    #[test]
    fn test_empty_external_id_is_invalid() {
        let raw = delivery("", Uuid::new_v4(), "basic");
        assert!(matches!(parse_event(&raw), ParsedEvent::Invalid { .. }));
    }

    // =========================================================================
    // LGR-W07: well-formed delivery parses to the exact notice fields
    // =========================================================================
    #[test]
    fn test_notice_fields_survive_parsing() {
        let account_id = Uuid::new_v4();
        match parse_event(&delivery("pay_123", account_id, "pack_large")) {
            ParsedEvent::PaymentSucceeded(notice) => {
                assert_eq!(notice.external_id, "pay_123");
                assert_eq!(notice.account_id, account_id);
                assert_eq!(notice.product_id, "pack_large");
            }
            other => panic!("expected payment, got {:?}", other),
        }
    }
}

mod lazy_expiry_tests {
    use crate::subscription::{evaluate_plan, PlanStatus};
    use tally_shared::PlanId;
    use time::{Duration, OffsetDateTime};

    // =========================================================================
    // LGR-E01: 30-day activation read at day 31 - effective plan is free
    // =========================================================================
    #[test]
    fn test_day_31_read_of_30_day_plan_is_free() {
        let t0 = OffsetDateTime::now_utc() - Duration::days(31);
        let stored = PlanStatus {
            plan: PlanId::Basic,
            plan_started_at: Some(t0),
            plan_expires_at: Some(t0 + Duration::days(30)),
        };

        let (effective, needs_correction) = evaluate_plan(stored, OffsetDateTime::now_utc());
        assert_eq!(effective.plan, PlanId::Free);
        assert_eq!(effective.plan_expires_at, None);
        assert_eq!(effective.plan_started_at, None);
        assert!(needs_correction);
    }

    // =========================================================================
    // LGR-E02: concurrent readers converge - every evaluation of the same
    // stale row yields the same corrected values
    // =========================================================================
    #[test]
    fn test_concurrent_corrections_converge() {
        let now = OffsetDateTime::now_utc();
        let stale = PlanStatus {
            plan: PlanId::Pro,
            plan_started_at: Some(now - Duration::days(60)),
            plan_expires_at: Some(now - Duration::days(30)),
        };

        let results: Vec<_> = (0..8).map(|_| evaluate_plan(stale, now)).collect();
        for (effective, _) in &results {
            assert_eq!(*effective, PlanStatus::free());
        }

        // After any one corrector wins, the rest observe the corrected row
        // and ask for no further write
        let (_, still_needs) = evaluate_plan(PlanStatus::free(), now);
        assert!(!still_needs);
    }

    // =========================================================================
    // LGR-E03: activation restarts the clock instead of stacking - a second
    // purchase's expiry is measured from activation, not from the old expiry
    // =========================================================================
    #[test]
    fn test_reactivation_window_measured_from_now() {
        // activate() always overwrites plan_expires_at with now + duration;
        // the stored state never remembers the prior window
        let now = OffsetDateTime::now_utc();
        let reactivated = PlanStatus {
            plan: PlanId::Basic,
            plan_started_at: Some(now),
            plan_expires_at: Some(now + Duration::days(30)),
        };

        let (effective, needs_correction) = evaluate_plan(reactivated, now + Duration::days(29));
        assert_eq!(effective.plan, PlanId::Basic);
        assert!(!needs_correction);
    }

    // =========================================================================
    // LGR-E04: free plan never needs correction, whatever the timestamps say
    // =========================================================================
    #[test]
    fn test_free_plan_is_terminal_for_the_corrector() {
        let now = OffsetDateTime::now_utc();
        let odd = PlanStatus {
            plan: PlanId::Free,
            plan_started_at: Some(now - Duration::days(9)),
            plan_expires_at: Some(now - Duration::days(2)),
        };
        let (_, needs_correction) = evaluate_plan(odd, now);
        assert!(!needs_correction);
    }

    // =========================================================================
    // LGR-E05: admin unlimited override (paid plan, NULL expiry) never lapses
    // =========================================================================
    #[test]
    fn test_unlimited_override_survives_any_clock() {
        let stored = PlanStatus {
            plan: PlanId::Pro,
            plan_started_at: Some(OffsetDateTime::UNIX_EPOCH),
            plan_expires_at: None,
        };
        let far_future = OffsetDateTime::now_utc() + Duration::days(10_000);
        let (effective, needs_correction) = evaluate_plan(stored, far_future);
        assert_eq!(effective.plan, PlanId::Pro);
        assert!(!needs_correction);
    }
}

mod spend_tier_tests {
    use crate::tier::SpendTier;

    // =========================================================================
    // LGR-T01: ties resolve to the higher tier (>= comparison)
    // =========================================================================
    #[test]
    fn test_ties_resolve_upward() {
        assert_eq!(SpendTier::classify(400_000), SpendTier::Gold);
        assert_eq!(SpendTier::classify(900_000), SpendTier::Platinum);
    }

    // =========================================================================
    // LGR-T02: one unit below each threshold stays in the lower tier
    // =========================================================================
    #[test]
    fn test_just_below_thresholds() {
        assert_eq!(SpendTier::classify(399_999), SpendTier::Standard);
        assert_eq!(SpendTier::classify(899_999), SpendTier::Gold);
    }

    // =========================================================================
    // LGR-T03: tier is a pure function of spend, independent of plan - the
    // classifier never consults entitlement state
    // =========================================================================
    #[test]
    fn test_classification_is_deterministic() {
        for spend in [0, 1, 400_000, 650_000, 900_000, i64::MAX] {
            assert_eq!(SpendTier::classify(spend), SpendTier::classify(spend));
        }
    }
}

mod plan_registry_tests {
    use crate::error::LedgerError;
    use crate::plans::{PlanRegistry, Product};

    // =========================================================================
    // LGR-P01: unknown product ids are hard errors, never a fallback to free
    // =========================================================================
    #[test]
    fn test_unknown_product_fails_loudly() {
        let registry = PlanRegistry::builtin();
        for bogus in ["premium", "basic_monthly", "pack_medium", "FREE"] {
            assert!(
                matches!(
                    registry.resolve(bogus),
                    Err(LedgerError::UnknownProduct(_))
                ),
                "'{}' must not resolve",
                bogus
            );
        }
    }

    // =========================================================================
    // LGR-P02: packs grant credits without a plan; plans carry a duration
    // =========================================================================
    #[test]
    fn test_pack_and_plan_are_distinct_products() {
        let registry = PlanRegistry::builtin();
        assert!(matches!(registry.resolve("pack_small"), Ok(Product::Pack(_))));
        match registry.resolve("pro") {
            Ok(Product::Plan(plan)) => assert!(plan.duration_days.is_some()),
            other => panic!("expected plan, got {:?}", other),
        }
    }

    // =========================================================================
    // LGR-P03: grants come from the catalog, so a forged payload cannot
    // mint arbitrary credits - the resolved grant is fixed per product
    // =========================================================================
    #[test]
    fn test_grant_size_is_catalog_authoritative() {
        let registry = PlanRegistry::builtin();
        let grant = |id: &str| match registry.resolve(id) {
            Ok(Product::Plan(p)) => p.credit_grant,
            Ok(Product::Pack(p)) => p.credit_grant,
            Err(e) => panic!("{}", e),
        };
        assert_eq!(grant("basic"), 5_000);
        assert_eq!(grant("pro"), 20_000);
        assert_eq!(grant("pack_small"), 2_500);
        assert_eq!(grant("pack_large"), 12_000);
    }
}
