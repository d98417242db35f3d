//! Durable operation store and user/key directory source
//!
//! The store is the source of truth for operation status. Every status
//! transition is a conditional single-row update (`WHERE status = from`), so
//! two components racing on the same row cannot both win.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    Alert, ApiCredential, CloseReason, CredentialId, OperationId, OperationStatus, RiskEvent,
    RiskProfile, TradingOperation, User, UserId, ValidationStatus,
};

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// Errors that can occur during persistence operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Record not found")]
    NotFound,

    /// Conditional update matched no row (status moved underneath us)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lifecycle edges: pending -> active | error, active -> closed
pub fn is_legal_transition(from: OperationStatus, to: OperationStatus) -> bool {
    matches!(
        (from, to),
        (OperationStatus::Pending, OperationStatus::Active)
            | (OperationStatus::Pending, OperationStatus::Error)
            | (OperationStatus::Active, OperationStatus::Closed)
    )
}

/// Field changes applied together with a status transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationPatch {
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl OperationPatch {
    fn to(status: OperationStatus) -> Self {
        Self {
            status,
            exchange_order_id: None,
            opened_at: None,
            current_price: None,
            unrealized_pnl: None,
            realized_pnl: None,
            close_reason: None,
            closed_at: None,
            error_reason: None,
        }
    }

    /// pending -> active once the exchange acknowledged the order
    pub fn activate(exchange_order_id: String, at: DateTime<Utc>) -> Self {
        Self {
            exchange_order_id: Some(exchange_order_id),
            opened_at: Some(at),
            ..Self::to(OperationStatus::Active)
        }
    }

    /// pending -> error with a human-readable reason
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            ..Self::to(OperationStatus::Error)
        }
    }

    /// Record the exchange order id on a non-activating patch
    pub fn with_exchange_order_id(mut self, exchange_order_id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(exchange_order_id.into());
        self
    }

    /// active -> closed at `price`
    pub fn close(reason: CloseReason, price: Decimal, realized_pnl: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            current_price: Some(price),
            unrealized_pnl: Some(Decimal::ZERO),
            realized_pnl: Some(realized_pnl),
            close_reason: Some(reason),
            closed_at: Some(at),
            ..Self::to(OperationStatus::Closed)
        }
    }

    pub fn apply(&self, op: &mut TradingOperation) {
        op.status = self.status;
        if let Some(order_id) = &self.exchange_order_id {
            op.exchange_order_id = Some(order_id.clone());
        }
        if let Some(at) = self.opened_at {
            op.opened_at = Some(at);
        }
        if let Some(price) = self.current_price {
            op.current_price = Some(price);
        }
        if let Some(pnl) = self.unrealized_pnl {
            op.unrealized_pnl = pnl;
        }
        if let Some(pnl) = self.realized_pnl {
            op.realized_pnl = Some(pnl);
        }
        if let Some(reason) = self.close_reason {
            op.close_reason = Some(reason);
        }
        if let Some(at) = self.closed_at {
            op.closed_at = Some(at);
        }
        if let Some(reason) = &self.error_reason {
            op.error_reason = Some(reason.clone());
        }
    }
}

/// Persistence for credentials, operations and risk records
#[async_trait]
pub trait OperationStore: Send + Sync {
    // ---- credentials ----

    async fn get_credential(&self, id: CredentialId) -> StoreResult<ApiCredential>;

    /// `pending` credentials plus `validating` ones last touched before `stale_before`
    async fn list_credentials_for_validation(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<ApiCredential>>;

    /// Atomically move a claimable credential to `validating`.
    /// Returns `false` when another validator got there first.
    async fn claim_credential_for_validation(
        &self,
        id: CredentialId,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `validating -> valid | invalid:<reason>`; `false` if no longer validating
    async fn complete_credential_validation(
        &self,
        id: CredentialId,
        result: &ValidationStatus,
    ) -> StoreResult<bool>;

    async fn touch_credential(&self, id: CredentialId, at: DateTime<Utc>) -> StoreResult<()>;

    // ---- operations ----

    async fn insert_operation(&self, op: &TradingOperation) -> StoreResult<()>;

    async fn get_operation(&self, id: OperationId) -> StoreResult<TradingOperation>;

    /// Conditional transition; `Conflict` when the row is not in `from`
    async fn transition_operation(
        &self,
        id: OperationId,
        from: OperationStatus,
        patch: &OperationPatch,
    ) -> StoreResult<TradingOperation>;

    /// Mark-to-market for an `active` row; `false` if the row is no longer active
    async fn update_mark(&self, id: OperationId, price: Decimal, unrealized_pnl: Decimal) -> StoreResult<bool>;

    async fn load_operations_by_status(&self, status: OperationStatus) -> StoreResult<Vec<TradingOperation>>;

    /// `pending` + `active` operations of one user
    async fn count_open_operations(&self, user_id: UserId) -> StoreResult<u32>;

    /// Margin committed by all `pending` + `active` operations
    async fn total_open_notional(&self) -> StoreResult<Decimal>;

    // ---- risk ----

    async fn get_risk_profile(&self, user_id: UserId) -> StoreResult<Option<RiskProfile>>;

    async fn save_risk_profile(&self, profile: &RiskProfile) -> StoreResult<()>;

    async fn record_risk_event(&self, event: &RiskEvent) -> StoreResult<()>;

    async fn record_alert(&self, alert: &Alert) -> StoreResult<()>;

    // ---- settlement ----

    /// Apply realized PnL to the user's balances; returns (balance, bonus)
    async fn apply_settlement(&self, user_id: UserId, realized_pnl: Decimal) -> StoreResult<(Decimal, Decimal)>;
}

/// One user with all of their credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub user: User,
    #[serde(default)]
    pub credentials: Vec<ApiCredential>,
}

/// Full read of the user/key directory, used by hot reload
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn load_directory(&self) -> StoreResult<Vec<DirectoryRecord>>;
}
