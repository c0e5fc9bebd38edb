use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bursar_core::{AggregateId, TenantId};

/// Envelope for an event, containing multi-tenant + entity metadata.
///
/// This is the unit published on the bus after a ledger transaction commits.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`; consumers must scope
///   their work to it.
/// - `sequence` is assigned by the publisher and increases monotonically per
///   publisher, letting idempotent consumers drop replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    entity_id: AggregateId,
    entity_kind: String,

    /// Monotonically increasing publisher-side position.
    sequence: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        entity_id: AggregateId,
        entity_kind: impl Into<String>,
        sequence: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            entity_id,
            entity_kind: entity_kind.into(),
            sequence,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn entity_id(&self) -> AggregateId {
        self.entity_id
    }

    pub fn entity_kind(&self) -> &str {
        &self.entity_kind
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
