//! In-memory store for tests and dry runs
//!
//! Implements both `OperationStore` and `DirectorySource` behind a single
//! `tokio::sync::RwLock`, so every conditional transition is atomic with
//! respect to concurrent callers exactly as the database versions are.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{
    is_legal_transition, DirectoryRecord, DirectorySource, OperationPatch, OperationStore,
    StoreError, StoreResult,
};
use crate::domain::{
    settle_balances, Alert, ApiCredential, CredentialId, OperationId, OperationStatus, RiskEvent,
    RiskProfile, TradingOperation, User, UserId, ValidationStatus,
};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    credentials: HashMap<CredentialId, ApiCredential>,
    operations: HashMap<OperationId, TradingOperation>,
    profiles: HashMap<UserId, RiskProfile>,
    events: Vec<RiskEvent>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_directory: AtomicBool,
    fail_profiles: AtomicBool,
    fail_transitions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON array of `DirectoryRecord`s
    pub async fn from_seed_file(path: &Path) -> StoreResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("read {}: {}", path.display(), e)))?;
        let records: Vec<DirectoryRecord> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::InvalidData(format!("seed {}: {}", path.display(), e)))?;

        let store = Self::new();
        for record in records {
            store.insert_user(record.user).await;
            for credential in record.credentials {
                store.insert_credential(credential).await;
            }
        }
        Ok(store)
    }

    // ---- seeding / inspection ----

    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id, user);
    }

    pub async fn user(&self, id: UserId) -> Option<User> {
        self.inner.read().await.users.get(&id).cloned()
    }

    pub async fn set_user_active(&self, id: UserId, active: bool) {
        if let Some(user) = self.inner.write().await.users.get_mut(&id) {
            user.active = active;
        }
    }

    pub async fn remove_user(&self, id: UserId) {
        let mut inner = self.inner.write().await;
        inner.users.remove(&id);
        inner.credentials.retain(|_, c| c.user_id != id);
    }

    pub async fn insert_credential(&self, credential: ApiCredential) {
        self.inner.write().await.credentials.insert(credential.id, credential);
    }

    pub async fn credential(&self, id: CredentialId) -> Option<ApiCredential> {
        self.inner.read().await.credentials.get(&id).cloned()
    }

    /// Mutate a credential in place (simulates edits by the account service)
    pub async fn update_credential<F>(&self, id: CredentialId, f: F)
    where
        F: FnOnce(&mut ApiCredential),
    {
        if let Some(credential) = self.inner.write().await.credentials.get_mut(&id) {
            f(credential);
            credential.updated_at = Utc::now();
        }
    }

    pub async fn operations(&self) -> Vec<TradingOperation> {
        self.inner.read().await.operations.values().cloned().collect()
    }

    pub async fn risk_events(&self) -> Vec<RiskEvent> {
        self.inner.read().await.events.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.inner.read().await.alerts.clone()
    }

    /// Make `load_directory` fail until reset
    pub fn set_directory_failure(&self, fail: bool) {
        self.fail_directory.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` operation transitions fail with a database error
    pub fn fail_next_transitions(&self, count: usize) {
        self.fail_transitions.store(count, Ordering::SeqCst);
    }

    /// Make risk profile reads fail until reset
    pub fn set_profile_failure(&self, fail: bool) {
        self.fail_profiles.store(fail, Ordering::SeqCst);
    }
}

fn is_open(status: OperationStatus) -> bool {
    matches!(status, OperationStatus::Pending | OperationStatus::Active)
}

fn claimable(credential: &ApiCredential, stale_before: DateTime<Utc>) -> bool {
    match credential.status {
        ValidationStatus::Pending => true,
        ValidationStatus::Validating => credential.updated_at < stale_before,
        _ => false,
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn get_credential(&self, id: CredentialId) -> StoreResult<ApiCredential> {
        self.credential(id).await.ok_or(StoreError::NotFound)
    }

    async fn list_credentials_for_validation(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<ApiCredential>> {
        let inner = self.inner.read().await;
        let mut due: Vec<ApiCredential> = inner
            .credentials
            .values()
            .filter(|c| claimable(c, stale_before))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.created_at);
        Ok(due)
    }

    async fn claim_credential_for_validation(
        &self,
        id: CredentialId,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let credential = inner.credentials.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !claimable(credential, stale_before) {
            return Ok(false);
        }
        credential.status = ValidationStatus::Validating;
        credential.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_credential_validation(
        &self,
        id: CredentialId,
        result: &ValidationStatus,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let credential = inner.credentials.get_mut(&id).ok_or(StoreError::NotFound)?;
        if credential.status != ValidationStatus::Validating {
            return Ok(false);
        }
        credential.status = result.clone();
        credential.updated_at = Utc::now();
        Ok(true)
    }

    async fn touch_credential(&self, id: CredentialId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let credential = inner.credentials.get_mut(&id).ok_or(StoreError::NotFound)?;
        credential.last_used_at = Some(at);
        Ok(())
    }

    async fn insert_operation(&self, op: &TradingOperation) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.operations.contains_key(&op.id) {
            return Err(StoreError::Conflict(format!("operation {} already exists", op.id)));
        }
        inner.operations.insert(op.id, op.clone());
        Ok(())
    }

    async fn get_operation(&self, id: OperationId) -> StoreResult<TradingOperation> {
        self.inner
            .read()
            .await
            .operations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
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

        if self
            .fail_transitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::DatabaseError("operation write failed".to_string()));
        }

        let mut inner = self.inner.write().await;
        let op = inner.operations.get_mut(&id).ok_or(StoreError::NotFound)?;
        if op.status != from {
            return Err(StoreError::Conflict(format!(
                "operation {} is {}, expected {}",
                id, op.status, from
            )));
        }
        patch.apply(op);
        Ok(op.clone())
    }

    async fn update_mark(&self, id: OperationId, price: Decimal, unrealized_pnl: Decimal) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let op = inner.operations.get_mut(&id).ok_or(StoreError::NotFound)?;
        if op.status != OperationStatus::Active {
            return Ok(false);
        }
        op.current_price = Some(price);
        op.unrealized_pnl = unrealized_pnl;
        Ok(true)
    }

    async fn load_operations_by_status(&self, status: OperationStatus) -> StoreResult<Vec<TradingOperation>> {
        let inner = self.inner.read().await;
        let mut ops: Vec<TradingOperation> = inner
            .operations
            .values()
            .filter(|op| op.status == status)
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.created_at);
        Ok(ops)
    }

    async fn count_open_operations(&self, user_id: UserId) -> StoreResult<u32> {
        let inner = self.inner.read().await;
        let count = inner
            .operations
            .values()
            .filter(|op| op.user_id == user_id && is_open(op.status))
            .count();
        Ok(count as u32)
    }

    async fn total_open_notional(&self) -> StoreResult<Decimal> {
        let inner = self.inner.read().await;
        Ok(inner
            .operations
            .values()
            .filter(|op| is_open(op.status))
            .map(|op| op.notional)
            .sum())
    }

    async fn get_risk_profile(&self, user_id: UserId) -> StoreResult<Option<RiskProfile>> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError("risk profile read failed".to_string()));
        }
        Ok(self.inner.read().await.profiles.get(&user_id).cloned())
    }

    async fn save_risk_profile(&self, profile: &RiskProfile) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn record_risk_event(&self, event: &RiskEvent) -> StoreResult<()> {
        self.inner.write().await.events.push(event.clone());
        Ok(())
    }

    async fn record_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.inner.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn apply_settlement(&self, user_id: UserId, realized_pnl: Decimal) -> StoreResult<(Decimal, Decimal)> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        let (balance, bonus) = settle_balances(user.balance, user.bonus_balance, realized_pnl);
        user.balance = balance;
        user.bonus_balance = bonus;
        Ok((balance, bonus))
    }
}

#[async_trait]
impl DirectorySource for MemoryStore {
    async fn load_directory(&self) -> StoreResult<Vec<DirectoryRecord>> {
        if self.fail_directory.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError("directory unavailable".to_string()));
        }

        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .map(|user| DirectoryRecord {
                user: user.clone(),
                credentials: inner
                    .credentials
                    .values()
                    .filter(|c| c.user_id == user.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Exchange, PlanTier, Side, Signal};
    use crate::sizing::OrderParams;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            active: true,
            plan: PlanTier::Pro,
            balance: dec!(1000),
            bonus_balance: dec!(50),
            custom_trading_enabled: false,
            custom_leverage: None,
            custom_stop_loss_pct: None,
            custom_take_profit_pct: None,
        }
    }

    fn pending_op(user_id: UserId, notional: Decimal) -> TradingOperation {
        let signal = Signal::new("BTCUSDT", Side::Long, dec!(100));
        let params = OrderParams {
            quantity: notional / dec!(100),
            notional,
            entry_price: dec!(100),
            stop_loss: dec!(90),
            take_profit: dec!(115),
            leverage: 5,
            stop_loss_pct: dec!(10),
            take_profit_pct: dec!(15),
        };
        TradingOperation::new_pending(user_id, Uuid::new_v4(), Exchange::Binance, &signal, &params)
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryStore::new();
        let op = pending_op(Uuid::new_v4(), dec!(300));
        store.insert_operation(&op).await.unwrap();

        let active = store
            .transition_operation(op.id, OperationStatus::Pending, &OperationPatch::activate("x-1".into(), Utc::now()))
            .await
            .unwrap();
        assert_eq!(active.status, OperationStatus::Active);
        assert_eq!(active.exchange_order_id.as_deref(), Some("x-1"));

        // Second writer expecting pending loses
        let err = store
            .transition_operation(op.id, OperationStatus::Pending, &OperationPatch::fail("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_closed_is_immutable() {
        let store = MemoryStore::new();
        let op = pending_op(Uuid::new_v4(), dec!(300));
        store.insert_operation(&op).await.unwrap();
        store
            .transition_operation(op.id, OperationStatus::Pending, &OperationPatch::activate("x".into(), Utc::now()))
            .await
            .unwrap();
        store
            .transition_operation(
                op.id,
                OperationStatus::Active,
                &OperationPatch::close(crate::domain::CloseReason::Manual, dec!(101), dec!(15), Utc::now()),
            )
            .await
            .unwrap();

        assert!(!store.update_mark(op.id, dec!(120), dec!(100)).await.unwrap());
        let err = store
            .transition_operation(op.id, OperationStatus::Closed, &OperationPatch::fail("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
        assert_eq!(store.get_operation(op.id).await.unwrap().current_price, Some(dec!(101)));
    }

    #[tokio::test]
    async fn test_open_counts_and_notional() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let a = pending_op(user_id, dec!(300));
        let b = pending_op(user_id, dec!(200));
        let other = pending_op(Uuid::new_v4(), dec!(100));
        for op in [&a, &b, &other] {
            store.insert_operation(op).await.unwrap();
        }
        store
            .transition_operation(b.id, OperationStatus::Pending, &OperationPatch::fail("rejected"))
            .await
            .unwrap();

        assert_eq!(store.count_open_operations(user_id).await.unwrap(), 1);
        assert_eq!(store.total_open_notional().await.unwrap(), dec!(400));
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let store = MemoryStore::new();
        let cred = ApiCredential::new(Uuid::new_v4(), Exchange::Binance, "k", "s");
        store.insert_credential(cred.clone()).await;
        let stale_before = Utc::now() - chrono::Duration::seconds(120);

        assert!(store.claim_credential_for_validation(cred.id, stale_before).await.unwrap());
        assert!(!store.claim_credential_for_validation(cred.id, stale_before).await.unwrap());

        // Stale validating rows become claimable again
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert!(store.claim_credential_for_validation(cred.id, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_requires_validating() {
        let store = MemoryStore::new();
        let cred = ApiCredential::new(Uuid::new_v4(), Exchange::Binance, "k", "s");
        store.insert_credential(cred.clone()).await;

        assert!(!store
            .complete_credential_validation(cred.id, &ValidationStatus::Valid)
            .await
            .unwrap());
        store.claim_credential_for_validation(cred.id, Utc::now()).await.unwrap();
        assert!(store
            .complete_credential_validation(cred.id, &ValidationStatus::Valid)
            .await
            .unwrap());
        assert_eq!(store.credential(cred.id).await.unwrap().status, ValidationStatus::Valid);
    }

    #[tokio::test]
    async fn test_settlement_consumes_bonus_first() {
        let store = MemoryStore::new();
        let u = user();
        store.insert_user(u.clone()).await;

        let (balance, bonus) = store.apply_settlement(u.id, dec!(-70)).await.unwrap();
        assert_eq!((balance, bonus), (dec!(980), dec!(0)));

        let (balance, bonus) = store.apply_settlement(u.id, dec!(20)).await.unwrap();
        assert_eq!((balance, bonus), (dec!(1000), dec!(0)));
    }

    #[tokio::test]
    async fn test_directory_groups_credentials() {
        let store = MemoryStore::new();
        let u = user();
        store.insert_user(u.clone()).await;
        store
            .insert_credential(ApiCredential::new(u.id, Exchange::Binance, "k1", "s1"))
            .await;
        store
            .insert_credential(ApiCredential::new(Uuid::new_v4(), Exchange::Binance, "orphan", "s"))
            .await;

        let records = store.load_directory().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].credentials.len(), 1);

        store.set_directory_failure(true);
        assert!(store.load_directory().await.is_err());
    }

    #[tokio::test]
    async fn test_seed_file() {
        let u = user();
        let record = DirectoryRecord {
            user: u.clone(),
            credentials: vec![ApiCredential::new(u.id, Exchange::Binance, "k", "s")],
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&vec![record]).unwrap().as_bytes())
            .unwrap();
        file.flush().unwrap();

        let store = MemoryStore::from_seed_file(file.path()).await.unwrap();
        assert_eq!(store.user(u.id).await.unwrap().balance, dec!(1000));
        assert_eq!(store.load_directory().await.unwrap()[0].credentials.len(), 1);
    }
}
