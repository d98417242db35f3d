//! PostgREST-backed store (Supabase)
//!
//! Tables: `users`, `api_credentials`, `trading_operations`,
//! `risk_profiles`, `risk_events`, `risk_alerts`.
//!
//! Status transitions are conditional PATCHes filtered on the expected
//! current status with `Prefer: return=representation`; an empty result
//! set means another writer moved the row first.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use super::{
    is_legal_transition, DirectoryRecord, DirectorySource, OperationPatch, OperationStore,
    StoreError, StoreResult,
};
use crate::config::constants::{settlement_max_attempts, store_timeout};
use crate::config::SupabaseConfig;
use crate::domain::{
    settle_balances, Alert, ApiCredential, CredentialId, OperationId, OperationStatus, RiskEvent,
    RiskProfile, TradingOperation, User, UserId, ValidationStatus,
};

const USERS: &str = "users";
const CREDENTIALS: &str = "api_credentials";
const OPERATIONS: &str = "trading_operations";
const PROFILES: &str = "risk_profiles";
const EVENTS: &str = "risk_events";
const ALERTS: &str = "risk_alerts";

const OPEN_STATUSES: &str = "in.(pending,active)";

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Deserialize)]
struct BalanceRow {
    balance: Decimal,
    #[serde(default)]
    bonus_balance: Decimal,
}

#[derive(Deserialize)]
struct NotionalRow {
    notional: Decimal,
}

pub struct SupabaseStore {
    base_url: String,
    client: reqwest::Client,
    settlement_attempts: u32,
}

impl SupabaseStore {
    /// Build a client carrying the `apikey` and bearer headers PostgREST expects
    pub fn new(config: &SupabaseConfig) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| StoreError::InvalidData("Invalid apikey header value".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| StoreError::InvalidData("Invalid authorization header value".to_string()))?;
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(store_timeout())
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            settlement_attempts: settlement_max_attempts(),
        })
    }

    /// Override the optimistic settlement retry budget
    pub fn with_settlement_attempts(mut self, attempts: u32) -> Self {
        self.settlement_attempts = attempts.max(1);
        self
    }

    fn table(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Map PostgREST status codes onto `StoreError`
    async fn check(table: &str, response: Response) -> StoreResult<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
                Err(StoreError::Conflict(format!("{}: {}", table, body)))
            }
            StatusCode::UNAUTHORIZED => {
                error!(table = %table, "[STORE] Invalid Supabase credentials");
                Err(StoreError::DatabaseError("Invalid Supabase credentials".to_string()))
            }
            status => {
                let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
                error!(table = %table, status = %status, response_body = %body, "[STORE] Request failed");
                Err(StoreError::DatabaseError(format!("Supabase error {}: {}", status, body)))
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, table: &str, request: RequestBuilder) -> StoreResult<Vec<T>> {
        let response = Self::check(table, request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| StoreError::InvalidData(format!("{}: {}", table, e)))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> StoreResult<Vec<T>> {
        let request = self.client.get(self.table(table)).query(query);
        self.fetch(table, request).await
    }

    /// Conditional PATCH returning the rows it changed
    async fn patch_returning<T: DeserializeOwned>(
        &self,
        table: &str,
        filter: &[(&str, String)],
        body: &serde_json::Value,
    ) -> StoreResult<Vec<T>> {
        let request = self
            .client
            .patch(self.table(table))
            .query(filter)
            .header("Prefer", "return=representation")
            .json(body);
        self.fetch(table, request).await
    }

    async fn insert<B: serde::Serialize + ?Sized>(&self, table: &str, row: &B, prefer: &str, query: &[(&str, String)]) -> StoreResult<()> {
        let response = self
            .client
            .post(self.table(table))
            .query(query)
            .header("Prefer", prefer)
            .json(row)
            .send()
            .await?;
        Self::check(table, response).await?;
        Ok(())
    }
}

#[async_trait]
impl OperationStore for SupabaseStore {
    async fn get_credential(&self, id: CredentialId) -> StoreResult<ApiCredential> {
        let rows: Vec<ApiCredential> = self
            .select(CREDENTIALS, &[("id", eq(id)), ("limit", "1".to_string())])
            .await?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn list_credentials_for_validation(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<ApiCredential>> {
        self.select(
            CREDENTIALS,
            &[
                ("or", claim_filter(stale_before)),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn claim_credential_for_validation(
        &self,
        id: CredentialId,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let body = json!({
            "status": ValidationStatus::Validating.to_string(),
            "updated_at": Utc::now(),
        });
        let rows: Vec<serde_json::Value> = self
            .patch_returning(CREDENTIALS, &[("id", eq(id)), ("or", claim_filter(stale_before))], &body)
            .await?;
        Ok(!rows.is_empty())
    }

    async fn complete_credential_validation(
        &self,
        id: CredentialId,
        result: &ValidationStatus,
    ) -> StoreResult<bool> {
        let body = json!({ "status": result.to_string(), "updated_at": Utc::now() });
        let rows: Vec<serde_json::Value> = self
            .patch_returning(
                CREDENTIALS,
                &[("id", eq(id)), ("status", eq(ValidationStatus::Validating.keyword()))],
                &body,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn touch_credential(&self, id: CredentialId, at: DateTime<Utc>) -> StoreResult<()> {
        let rows: Vec<serde_json::Value> = self
            .patch_returning(CREDENTIALS, &[("id", eq(id))], &json!({ "last_used_at": at }))
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_operation(&self, op: &TradingOperation) -> StoreResult<()> {
        self.insert(OPERATIONS, op, "return=minimal", &[]).await?;
        debug!(operation_id = %op.id, user_id = %op.user_id, "[STORE] Operation inserted");
        Ok(())
    }

    async fn get_operation(&self, id: OperationId) -> StoreResult<TradingOperation> {
        let rows: Vec<TradingOperation> = self
            .select(OPERATIONS, &[("id", eq(id)), ("limit", "1".to_string())])
            .await?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn transition_operation(
        &self,
        id: OperationId,
        from: OperationStatus,
        patch: &OperationPatch,
    ) -> StoreResult<TradingOperation> {
        if !is_legal_transition(from, patch.status) {
            return Err(StoreError::InvalidData(format!(
                "illegal transition {} -> {}",
                from, patch.status
            )));
        }

        let body = serde_json::to_value(patch).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let rows: Vec<TradingOperation> = self
            .patch_returning(OPERATIONS, &[("id", eq(id)), ("status", eq(from))], &body)
            .await?;

        rows.into_iter().next().ok_or_else(|| {
            StoreError::Conflict(format!("operation {} is no longer {}", id, from))
        })
    }

    async fn update_mark(&self, id: OperationId, price: Decimal, unrealized_pnl: Decimal) -> StoreResult<bool> {
        let body = json!({ "current_price": price, "unrealized_pnl": unrealized_pnl });
        let rows: Vec<serde_json::Value> = self
            .patch_returning(
                OPERATIONS,
                &[
                    ("id", eq(id)),
                    ("status", eq(OperationStatus::Active)),
                    ("select", "id".to_string()),
                ],
                &body,
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn load_operations_by_status(&self, status: OperationStatus) -> StoreResult<Vec<TradingOperation>> {
        self.select(
            OPERATIONS,
            &[("status", eq(status)), ("order", "created_at.asc".to_string())],
        )
        .await
    }

    async fn count_open_operations(&self, user_id: UserId) -> StoreResult<u32> {
        let rows: Vec<serde_json::Value> = self
            .select(
                OPERATIONS,
                &[
                    ("select", "id".to_string()),
                    ("user_id", eq(user_id)),
                    ("status", OPEN_STATUSES.to_string()),
                ],
            )
            .await?;
        Ok(rows.len() as u32)
    }

    async fn total_open_notional(&self) -> StoreResult<Decimal> {
        let rows: Vec<NotionalRow> = self
            .select(
                OPERATIONS,
                &[("select", "notional".to_string()), ("status", OPEN_STATUSES.to_string())],
            )
            .await?;
        Ok(rows.iter().map(|r| r.notional).sum())
    }

    async fn get_risk_profile(&self, user_id: UserId) -> StoreResult<Option<RiskProfile>> {
        let rows: Vec<RiskProfile> = self
            .select(PROFILES, &[("user_id", eq(user_id)), ("limit", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn save_risk_profile(&self, profile: &RiskProfile) -> StoreResult<()> {
        self.insert(
            PROFILES,
            profile,
            "resolution=merge-duplicates,return=minimal",
            &[("on_conflict", "user_id".to_string())],
        )
        .await
    }

    async fn record_risk_event(&self, event: &RiskEvent) -> StoreResult<()> {
        self.insert(EVENTS, event, "return=minimal", &[]).await
    }

    async fn record_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.insert(ALERTS, alert, "return=minimal", &[]).await
    }

    /// Optimistic read-modify-write: the PATCH is filtered on the balances
    /// that were read, so a concurrent settlement forces a re-read
    async fn apply_settlement(&self, user_id: UserId, realized_pnl: Decimal) -> StoreResult<(Decimal, Decimal)> {
        for attempt in 1..=self.settlement_attempts {
            let rows: Vec<BalanceRow> = self
                .select(
                    USERS,
                    &[("select", "balance,bonus_balance".to_string()), ("id", eq(user_id))],
                )
                .await?;
            let current = rows.into_iter().next().ok_or(StoreError::NotFound)?;

            let (balance, bonus) = settle_balances(current.balance, current.bonus_balance, realized_pnl);
            let updated: Vec<serde_json::Value> = self
                .patch_returning(
                    USERS,
                    &[
                        ("id", eq(user_id)),
                        ("balance", eq(current.balance)),
                        ("bonus_balance", eq(current.bonus_balance)),
                        ("select", "id".to_string()),
                    ],
                    &json!({ "balance": balance, "bonus_balance": bonus }),
                )
                .await?;

            if !updated.is_empty() {
                return Ok((balance, bonus));
            }
            debug!(user_id = %user_id, attempt, "[STORE] Balance changed underneath settlement, retrying");
        }

        warn!(user_id = %user_id, pnl = %realized_pnl, "[STORE] Settlement retries exhausted");
        Err(StoreError::Conflict(format!(
            "balance of user {} kept changing during settlement",
            user_id
        )))
    }
}

#[async_trait]
impl DirectorySource for SupabaseStore {
    async fn load_directory(&self) -> StoreResult<Vec<DirectoryRecord>> {
        let users: Vec<User> = self.select(USERS, &[("select", "*".to_string())]).await?;
        let credentials: Vec<ApiCredential> =
            self.select(CREDENTIALS, &[("select", "*".to_string())]).await?;

        let mut by_user: HashMap<UserId, Vec<ApiCredential>> = HashMap::new();
        for credential in credentials {
            by_user.entry(credential.user_id).or_default().push(credential);
        }

        Ok(users
            .into_iter()
            .map(|user| DirectoryRecord {
                credentials: by_user.remove(&user.id).unwrap_or_default(),
                user,
            })
            .collect())
    }
}

/// `pending`, or `validating` with a claim older than `stale_before`
fn claim_filter(stale_before: DateTime<Utc>) -> String {
    format!(
        "(status.eq.pending,and(status.eq.validating,updated_at.lt.{}))",
        timestamp(stale_before)
    )
}
