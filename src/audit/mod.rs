//! Usage reporting and audit trail
//!
//! Every completed generation is recorded with its usage metrics and a hash
//! of the returned content, so a stored response can be checked later.

use crate::models::{AssistantType, GenerationResponse, Scope, UsageMetrics};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub assistant_type: AssistantType,
    pub usage: UsageMetrics,
    pub valid: Option<bool>,
    pub content_hash: String,
    pub response: GenerationResponse,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(scope: &Scope, response: &GenerationResponse) -> Self {
        Self {
            request_id: response.request_id,
            tenant_id: scope.tenant_id,
            user_id: scope.user_id,
            assistant_type: response.assistant_type,
            usage: response.usage.clone(),
            valid: response.validation.as_ref().map(|v| v.valid),
            content_hash: compute_content_hash(response),
            response: response.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Sink for per-request usage. Called fire-and-forget by the executor.
#[async_trait::async_trait]
pub trait UsageReporter: Send + Sync {
    async fn record_usage(&self, record: UsageRecord) -> Result<()>;
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, UsageRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, request_id: Uuid) -> Option<UsageRecord> {
        let records = self.records.read().await;
        records.get(&request_id).cloned()
    }

    /// Request ids for a tenant, oldest first.
    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Vec<Uuid> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.tenant_id == tenant_id)
            .map(|record| (record.request_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);
        items.into_iter().map(|(id, _)| id).collect()
    }

    /// Sum of cost across a tenant's records, in cents.
    pub async fn total_cost_cents(&self, tenant_id: Uuid) -> f64 {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.usage.cost_cents)
            .sum()
    }

    /// Recompute the stored response's hash and compare.
    pub async fn verify_integrity(&self, request_id: Uuid) -> bool {
        let records = self.records.read().await;
        match records.get(&request_id) {
            Some(record) => compute_content_hash(&record.response) == record.content_hash,
            None => false,
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UsageReporter for AuditLog {
    async fn record_usage(&self, record: UsageRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.request_id, record);
        Ok(())
    }
}

/// SHA-256 over the sections and sources, streamed into the hasher.
pub fn compute_content_hash(response: &GenerationResponse) -> String {
    let mut hasher = Sha256::new();

    let content = (&response.sections, &response.sources);
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &content).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;

    fn scope() -> Scope {
        Scope {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            document_ids: vec![],
        }
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let mut response = GenerationResponse::error(Uuid::new_v4(), AssistantType::General, "boom");
        let first = compute_content_hash(&response);
        assert_eq!(first.len(), 64);
        assert_eq!(first, compute_content_hash(&response));

        response.sections.push(Section::new("Extra", "text"));
        assert_ne!(first, compute_content_hash(&response));
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let scope = scope();
        let mut response = GenerationResponse::error(Uuid::new_v4(), AssistantType::Pitch, "boom");
        response.usage.cost_cents = 1.25;

        log.record_usage(UsageRecord::new(&scope, &response)).await.unwrap();

        assert!(log.verify_integrity(response.request_id).await);
        assert!(!log.verify_integrity(Uuid::new_v4()).await);
        assert_eq!(log.list_for_tenant(scope.tenant_id).await, vec![response.request_id]);
        assert_eq!(log.total_cost_cents(scope.tenant_id).await, 1.25);
    }

    #[tokio::test]
    async fn test_tampered_record_fails_integrity() {
        let log = AuditLog::new();
        let scope = scope();
        let response = GenerationResponse::error(Uuid::new_v4(), AssistantType::General, "boom");

        let mut record = UsageRecord::new(&scope, &response);
        record.response.sections[0].content = "edited".to_string();
        log.record_usage(record).await.unwrap();

        assert!(!log.verify_integrity(response.request_id).await);
    }
}
