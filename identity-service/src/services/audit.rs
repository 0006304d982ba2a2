//! Audit Logger - durable, append-only transparency trail.

use std::sync::Arc;
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoff;
use service_core::error::AppError;

use super::metrics::AUDIT_APPEND_FAILURES_TOTAL;
use crate::models::AuditEntry;
use crate::store::{AuditPage, AuditQuery, IdentityStore};

pub struct AuditLogger {
    store: Arc<dyn IdentityStore>,
    max_elapsed: Duration,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn IdentityStore>, max_elapsed: Duration) -> Self {
        Self { store, max_elapsed }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }

    /// Append an entry, retrying store failures with exponential backoff.
    ///
    /// Retries reuse the entry id, so a write that succeeded but reported failure
    /// is not stored twice. Returns false if every attempt failed; the entry is
    /// then emitted in full to the error log.
    pub async fn append(&self, entry: AuditEntry) -> bool {
        let result = retry(self.backoff(), || async {
            self.store.append_audit_entry(&entry).await.map_err(|e| {
                tracing::warn!(entry_id = %entry.entry_id, error = %e, "Audit append failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                AUDIT_APPEND_FAILURES_TOTAL.inc();
                tracing::error!(
                    entry_id = %entry.entry_id,
                    action = %entry.action_code,
                    actor_id = ?entry.actor_id,
                    target_id = ?entry.target_id,
                    context_id = ?entry.context_id,
                    resolved_name = ?entry.resolved_name,
                    request_id = ?entry.request_id,
                    details = ?entry.details,
                    created_utc = %entry.created_utc,
                    error = %e,
                    "Audit entry could not be stored"
                );
                false
            }
        }
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AppError> {
        self.store.query_audit_entries(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use crate::store::{FaultPoint, MemoryStore};
    use uuid::Uuid;

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        store.inject_fault(FaultPoint::AppendAudit, 2);
        let audit = AuditLogger::new(store.clone(), Duration::from_secs(5));

        let entry = AuditEntry::new(AuditAction::ConsentGranted, Some(Uuid::new_v4()), None, None);
        assert!(audit.append(entry).await);
        assert_eq!(store.audit_len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_are_counted() {
        let store = Arc::new(MemoryStore::new());
        store.inject_fault(FaultPoint::AppendAudit, u32::MAX);
        let audit = AuditLogger::new(store.clone(), Duration::from_millis(50));

        let before = AUDIT_APPEND_FAILURES_TOTAL.get();
        let entry = AuditEntry::new(AuditAction::NameDisclosed, None, Some(Uuid::new_v4()), None);
        assert!(!audit.append(entry).await);
        assert!(AUDIT_APPEND_FAILURES_TOTAL.get() > before);
        assert_eq!(store.audit_len(), 0);
    }
}
