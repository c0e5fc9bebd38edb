use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{AggregateId, Entity};

use crate::error::LedgerError;
use crate::obligation::ObligationId;
use crate::payment::PaymentId;

/// Allocation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub AggregateId);

impl AllocationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Caller-requested split of a payment across obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub obligation_id: ObligationId,
    pub amount: i64,
}

/// The mapping of a portion of one payment to one obligation it settles.
///
/// An allocation contributes to the obligation's verified total only while
/// its payment is verified and it has not been voided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    id: AllocationId,
    payment_id: PaymentId,
    obligation_id: ObligationId,
    /// Allocated amount in centavos, strictly positive.
    amount: i64,
    created_at: DateTime<Utc>,
    voided_at: Option<DateTime<Utc>>,
}

impl Allocation {
    pub fn new(
        id: AllocationId,
        payment_id: PaymentId,
        obligation_id: ObligationId,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(Self {
            id,
            payment_id,
            obligation_id,
            amount,
            created_at,
            voided_at: None,
        })
    }

    pub fn id_typed(&self) -> AllocationId {
        self.id
    }

    pub fn payment_id(&self) -> PaymentId {
        self.payment_id
    }

    pub fn obligation_id(&self) -> ObligationId {
        self.obligation_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn is_voided(&self) -> bool {
        self.voided_at.is_some()
    }

    /// Void this allocation (payment rejected). Idempotent.
    pub fn void(&mut self, at: DateTime<Utc>) {
        if self.voided_at.is_none() {
            self.voided_at = Some(at);
        }
    }
}

impl Entity for Allocation {
    type Id = AllocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_or_negative_allocations_are_rejected() {
        for amount in [0, -500] {
            let result = Allocation::new(
                AllocationId::new(AggregateId::new()),
                PaymentId::new(AggregateId::new()),
                ObligationId::new(AggregateId::new()),
                amount,
                Utc::now(),
            );
            assert!(matches!(result, Err(LedgerError::InvalidAmount)));
        }
    }

    #[test]
    fn void_is_idempotent() {
        let mut allocation = Allocation::new(
            AllocationId::new(AggregateId::new()),
            PaymentId::new(AggregateId::new()),
            ObligationId::new(AggregateId::new()),
            5_000,
            Utc::now(),
        )
        .unwrap();

        let first = Utc::now();
        allocation.void(first);
        allocation.void(first + chrono::Duration::seconds(10));
        assert!(allocation.is_voided());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of allocation attempts validated
        /// against the obligation's remaining balance, the accepted total
        /// never exceeds the obligation amount, and a rejected attempt
        /// leaves the total unchanged.
        #[test]
        fn accepted_allocations_never_exceed_the_obligation(
            amount in 1i64..1_000_000i64,
            requests in prop::collection::vec(1i64..400_000i64, 1..20),
        ) {
            use crate::obligation::{Obligation, ObligationId, ObligationKind};
            use bursar_core::{AggregateId, PeriodId, SubjectId, TenantId};

            let obligation = Obligation::new(
                ObligationId::new(AggregateId::new()),
                SubjectId::new(),
                TenantId::new(),
                PeriodId::new(),
                ObligationKind::Fine { reason: "test".to_string() },
                amount,
                Utc::now(),
            ).unwrap();

            let mut total_verified: i64 = 0;
            for requested in requests {
                let remaining = obligation.remaining(total_verified);
                if requested <= remaining {
                    total_verified += requested;
                } else {
                    // Rejected attempt: balance unchanged.
                    prop_assert_eq!(obligation.remaining(total_verified), remaining);
                }
                prop_assert!(total_verified <= amount);
            }
        }
    }
}
