//! Receipt blob-store boundary.
//!
//! The ledger persists only a deterministic path reference for each receipt
//! image; time-limited signed URLs are requested on demand and never stored.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use bursar_core::TenantId;
use bursar_ledger::{PaymentId, ReceiptRef};

/// Upload URLs expire within 15 minutes.
pub const MAX_WRITE_TTL: Duration = Duration::from_secs(15 * 60);
/// Download URLs expire within 30 minutes.
pub const MAX_READ_TTL: Duration = Duration::from_secs(30 * 60);

/// Deterministic blob path for a payment's receipt image.
pub fn receipt_path(tenant_id: TenantId, payment_id: PaymentId, ext: &str) -> ReceiptRef {
    ReceiptRef::new(format!("{tenant_id}/{payment_id}.{ext}"))
}

/// A time-limited signed URL. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ReceiptStoreError {
    #[error("requested ttl {requested:?} exceeds the cap {cap:?}")]
    TtlTooLong {
        requested: Duration,
        cap: Duration,
    },

    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// Blob-store contract for receipt images.
///
/// Implementations must reject TTLs beyond the caps rather than clamping
/// silently.
pub trait ReceiptStore: Send + Sync {
    fn signed_upload_url(
        &self,
        path: &ReceiptRef,
        ttl: Duration,
    ) -> Result<SignedUrl, ReceiptStoreError>;

    fn signed_download_url(
        &self,
        path: &ReceiptRef,
        ttl: Duration,
    ) -> Result<SignedUrl, ReceiptStoreError>;
}

/// In-memory stand-in for tests/dev; issues fake signed URLs.
#[derive(Debug, Default)]
pub struct InMemoryReceiptStore;

impl InMemoryReceiptStore {
    pub fn new() -> Self {
        Self
    }

    fn sign(&self, path: &ReceiptRef, ttl: Duration, op: &str) -> SignedUrl {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        SignedUrl {
            url: format!("mem://receipts/{}?op={op}&exp={}", path.as_str(), expires_at.timestamp()),
            expires_at,
        }
    }
}

impl ReceiptStore for InMemoryReceiptStore {
    fn signed_upload_url(
        &self,
        path: &ReceiptRef,
        ttl: Duration,
    ) -> Result<SignedUrl, ReceiptStoreError> {
        if ttl > MAX_WRITE_TTL {
            return Err(ReceiptStoreError::TtlTooLong {
                requested: ttl,
                cap: MAX_WRITE_TTL,
            });
        }
        Ok(self.sign(path, ttl, "put"))
    }

    fn signed_download_url(
        &self,
        path: &ReceiptRef,
        ttl: Duration,
    ) -> Result<SignedUrl, ReceiptStoreError> {
        if ttl > MAX_READ_TTL {
            return Err(ReceiptStoreError::TtlTooLong {
                requested: ttl,
                cap: MAX_READ_TTL,
            });
        }
        Ok(self.sign(path, ttl, "get"))
    }
}
