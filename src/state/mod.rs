//! Quota and result persistence
//!
//! External collaborators behind narrow traits. The in-memory versions are
//! used by the binaries until a real backend is plugged in.

use crate::error::GenerationError;
use crate::models::{GenerationResponse, PlanOutput, Scope};
use crate::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Budget check run before any other work. The only stage allowed to abort
/// a request.
#[async_trait::async_trait]
pub trait QuotaGate: Send + Sync {
    async fn preflight(&self, plan: &PlanOutput, scope: &Scope) -> Result<()>;
}

/// Per-tenant daily request budget. Escalated plans cost two units.
pub struct InMemoryQuota {
    daily_limit: u32,
    used: Arc<RwLock<HashMap<(Uuid, NaiveDate), u32>>>,
}

impl InMemoryQuota {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            used: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn units(plan: &PlanOutput) -> u32 {
        if plan.escalate_model {
            2
        } else {
            1
        }
    }

    pub async fn preflight_at(&self, plan: &PlanOutput, scope: &Scope, now: DateTime<Utc>) -> Result<()> {
        let day = now.date_naive();
        let units = Self::units(plan);

        let mut used = self.used.write().await;
        let spent = used.entry((scope.tenant_id, day)).or_insert(0);

        if *spent + units > self.daily_limit {
            let reset_at = (day + Duration::days(1))
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc())
                .unwrap_or(now);
            return Err(GenerationError::QuotaExceeded {
                message: format!("daily limit of {} requests reached", self.daily_limit),
                reset_at,
            });
        }

        *spent += units;
        Ok(())
    }

    pub async fn used_today(&self, tenant_id: Uuid) -> u32 {
        let used = self.used.read().await;
        used.get(&(tenant_id, Utc::now().date_naive())).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl QuotaGate for InMemoryQuota {
    async fn preflight(&self, plan: &PlanOutput, scope: &Scope) -> Result<()> {
        self.preflight_at(plan, scope, Utc::now()).await
    }
}

/// Never refuses.
pub struct UnlimitedQuota;

#[async_trait::async_trait]
impl QuotaGate for UnlimitedQuota {
    async fn preflight(&self, _plan: &PlanOutput, _scope: &Scope) -> Result<()> {
        Ok(())
    }
}

/// Trait for result persistence
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    async fn persist_result(&self, scope: &Scope, response: &GenerationResponse) -> Result<()>;
}

/// In-memory result store for development
pub struct InMemoryResultStore {
    results: Arc<RwLock<HashMap<Uuid, (Uuid, GenerationResponse)>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, request_id: Uuid) -> Option<GenerationResponse> {
        let results = self.results.read().await;
        results.get(&request_id).map(|(_, r)| r.clone())
    }

    /// Request ids for a tenant, oldest first.
    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Vec<Uuid> {
        let results = self.results.read().await;
        let mut items: Vec<_> = results
            .values()
            .filter(|(tenant, _)| *tenant == tenant_id)
            .map(|(_, r)| (r.request_id, r.created_at))
            .collect();
        items.sort_by_key(|(_, created_at)| *created_at);
        items.into_iter().map(|(id, _)| id).collect()
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn persist_result(&self, scope: &Scope, response: &GenerationResponse) -> Result<()> {
        let mut results = self.results.write().await;
        results.insert(response.request_id, (scope.tenant_id, response.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssistantType;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    fn plan(escalate: bool) -> PlanOutput {
        PlanOutput {
            assistant_type: AssistantType::General,
            sections: vec!["Answer".to_string()],
            requires_retrieval: false,
            requires_web_search: false,
            query_terms: vec![],
            metrics_needed: vec![],
            escalate_model: escalate,
        }
    }

    fn scope() -> Scope {
        Scope {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            document_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_quota_exhaustion_and_reset_time() {
        let quota = InMemoryQuota::new(3);
        let scope = scope();
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 15, 30, 0).unwrap();

        quota.preflight_at(&plan(false), &scope, now).await.unwrap();
        quota.preflight_at(&plan(true), &scope, now).await.unwrap();

        let err = quota.preflight_at(&plan(false), &scope, now).await.unwrap_err();
        match err {
            GenerationError::QuotaExceeded { reset_at, .. } => {
                assert_eq!(reset_at, Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap());
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // next day starts fresh
        let tomorrow = now + Duration::days(1);
        assert!(quota.preflight_at(&plan(false), &scope, tomorrow).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_is_per_tenant() {
        let quota = InMemoryQuota::new(1);
        let first = scope();
        assert_ok!(quota.preflight(&plan(false), &first).await);
        assert_ok!(quota.preflight(&plan(false), &scope()).await);
        assert_err!(quota.preflight(&plan(false), &first).await);
        assert_eq!(quota.used_today(first.tenant_id).await, 1);
    }

    #[tokio::test]
    async fn test_result_store() {
        let store = InMemoryResultStore::new();
        let scope = scope();
        let response = GenerationResponse::error(Uuid::new_v4(), AssistantType::General, "boom");

        store.persist_result(&scope, &response).await.unwrap();
        assert_eq!(store.get(response.request_id).await.unwrap().request_id, response.request_id);
        assert_eq!(store.list_for_tenant(scope.tenant_id).await, vec![response.request_id]);
        assert!(store.list_for_tenant(Uuid::new_v4()).await.is_empty());
    }
}
