//! External collaborator interfaces and the HTTP backend client.
//!
//! The orchestrator consumes three services: case-detail retrieval, the
//! plan-execution persistence record, and the plan-level case-status
//! rollup endpoint. Each is a trait so the presentation layer (and the
//! tests) can substitute implementations; [`HttpBackendClient`]
//! implements all three against the platform's REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    CaseDefinition, CaseKind, CaseVerdict, ExecutionKind, SessionUpdate, StatusReport,
};

/// Read-only case-detail lookup. Idempotent, no side effects on the
/// orchestrator's state.
#[async_trait]
pub trait CaseDetailService: Send + Sync {
    async fn get(&self, case_id: &str) -> OrchestratorResult<CaseDefinition>;
}

/// Persistence of the backend execution record. The record is the single
/// source of truth for cross-reload resumability.
#[async_trait]
pub trait PlanExecutionStore: Send + Sync {
    /// Create the execution record and return its session id.
    async fn create(
        &self,
        plan_id: &str,
        executor_id: &str,
        kind: ExecutionKind,
        case_ids: &[String],
    ) -> OrchestratorResult<String>;

    /// Store the full session update (complete snapshot, never a delta).
    async fn update(&self, session_id: &str, update: &SessionUpdate) -> OrchestratorResult<()>;

    /// Delete the record. A record that is already gone is a success
    /// outcome for this operation specifically.
    async fn delete(&self, session_id: &str) -> OrchestratorResult<()>;

    /// Authoritative status fetch used by the reconciliation poll.
    async fn get_status(&self, session_id: &str) -> OrchestratorResult<StatusReport>;
}

/// Records case-level verdicts for plan-level rollups, independent of the
/// session snapshot.
#[async_trait]
pub trait CaseStatusSink: Send + Sync {
    async fn set_case_status(
        &self,
        plan_id: &str,
        case_id: &str,
        case_kind: CaseKind,
        verdict: CaseVerdict,
    ) -> OrchestratorResult<()>;
}

/// HTTP client for the caseflow backend API.
#[derive(Clone)]
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(serde::Serialize)]
struct CreateSessionBody<'a> {
    plan_id: &'a str,
    executor_id: &'a str,
    execution_kind: ExecutionKind,
    case_ids: &'a [String],
}

#[derive(serde::Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(serde::Serialize)]
struct CaseStatusBody {
    case_kind: CaseKind,
    verdict: CaseVerdict,
}

impl HttpBackendClient {
    /// Create a new backend client.
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn persistence_error(phase: &'static str, message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::Persistence {
            phase,
            message: message.into(),
        }
    }
}

#[async_trait]
impl CaseDetailService for HttpBackendClient {
    async fn get(&self, case_id: &str) -> OrchestratorResult<CaseDefinition> {
        let response = self
            .client
            .get(format!("{}/api/cases/{}", self.base_url, case_id))
            .send()
            .await
            .map_err(|e| OrchestratorError::CaseService {
                case_id: case_id.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::CaseService {
                case_id: case_id.to_string(),
                message: format!("status {}: {}", status, body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| OrchestratorError::CaseService {
                case_id: case_id.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl PlanExecutionStore for HttpBackendClient {
    async fn create(
        &self,
        plan_id: &str,
        executor_id: &str,
        kind: ExecutionKind,
        case_ids: &[String],
    ) -> OrchestratorResult<String> {
        let body = CreateSessionBody {
            plan_id,
            executor_id,
            execution_kind: kind,
            case_ids,
        };

        let response = self
            .client
            .post(format!("{}/api/plan-executions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::persistence_error("create", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::persistence_error(
                "create",
                format!("status {}: {}", status, text),
            ));
        }

        let created: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| Self::persistence_error("create", e.to_string()))?;
        Ok(created.session_id)
    }

    async fn update(&self, session_id: &str, update: &SessionUpdate) -> OrchestratorResult<()> {
        let response = self
            .client
            .patch(format!("{}/api/plan-executions/{}", self.base_url, session_id))
            .json(update)
            .send()
            .await
            .map_err(|e| Self::persistence_error("update", e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(OrchestratorError::NotFound(session_id.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::persistence_error(
                "update",
                format!("status {}: {}", status, text),
            ));
        }

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> OrchestratorResult<()> {
        let response = self
            .client
            .delete(format!("{}/api/plan-executions/{}", self.base_url, session_id))
            .send()
            .await
            .map_err(|e| Self::persistence_error("delete", e.to_string()))?;

        // An already-removed record is success for delete.
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(session_id = %session_id, "Execution record already deleted");
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::persistence_error(
                "delete",
                format!("status {}: {}", status, text),
            ));
        }

        Ok(())
    }

    async fn get_status(&self, session_id: &str) -> OrchestratorResult<StatusReport> {
        let response = self
            .client
            .get(format!(
                "{}/api/plan-executions/{}/status",
                self.base_url, session_id
            ))
            .send()
            .await
            .map_err(|e| Self::persistence_error("get_status", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::persistence_error(
                "get_status",
                format!("status {}: {}", status, text),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Self::persistence_error("get_status", e.to_string()))
    }
}

#[async_trait]
impl CaseStatusSink for HttpBackendClient {
    async fn set_case_status(
        &self,
        plan_id: &str,
        case_id: &str,
        case_kind: CaseKind,
        verdict: CaseVerdict,
    ) -> OrchestratorResult<()> {
        let response = self
            .client
            .post(format!(
                "{}/api/plans/{}/cases/{}/status",
                self.base_url, plan_id, case_id
            ))
            .json(&CaseStatusBody { case_kind, verdict })
            .send()
            .await
            .map_err(|e| Self::persistence_error("set_case_status", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::persistence_error(
                "set_case_status",
                format!("status {}: {}", status, text),
            ));
        }

        Ok(())
    }
}
