//! Credential validation
//!
//! New credentials start `pending`. The validator claims them
//! (`pending -> validating`, conditional), performs one authenticated
//! read-only call and records `valid` or `invalid:<reason>`. A failed
//! validation is terminal for that credential; only a user re-submitting
//! their key starts over.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::adapters::AdapterFactory;
use crate::config::ValidationConfig;
use crate::core::schedule::{JitteredInterval, JitteredTicker};
use crate::directory::RefreshHandle;
use crate::domain::{CredentialId, ValidationStatus};
use crate::store::{OperationStore, StoreResult};

pub struct KeyValidator {
    store: Arc<dyn OperationStore>,
    factory: Arc<dyn AdapterFactory>,
    refresh: RefreshHandle,
    sweep_interval: JitteredInterval,
    stale_after: chrono::Duration,
    timeout: Duration,
}

impl KeyValidator {
    pub fn new(
        store: Arc<dyn OperationStore>,
        factory: Arc<dyn AdapterFactory>,
        refresh: RefreshHandle,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            store,
            factory,
            refresh,
            sweep_interval: JitteredInterval::from_secs(config.sweep_interval_secs, 10),
            stale_after: chrono::Duration::seconds(config.stale_after_secs as i64),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the per-credential check timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate one credential.
    ///
    /// Returns `None` when the credential could not be claimed (already
    /// validated, or another validator holds a fresh claim).
    pub async fn validate_credential(&self, id: CredentialId) -> StoreResult<Option<ValidationStatus>> {
        let stale_before = Utc::now() - self.stale_after;
        if !self.store.claim_credential_for_validation(id, stale_before).await? {
            debug!(credential_id = %id, "[KEYS] Credential not claimable, skipping");
            return Ok(None);
        }

        let credential = self.store.get_credential(id).await?;
        let result = match self.factory.for_credential(&credential) {
            Ok(adapter) => match tokio::time::timeout(self.timeout, adapter.ping()).await {
                Ok(Ok(())) => ValidationStatus::Valid,
                Ok(Err(e)) => ValidationStatus::Invalid(e.to_string()),
                Err(_) => ValidationStatus::Invalid(format!(
                    "timeout after {}ms",
                    self.timeout.as_millis()
                )),
            },
            Err(e) => ValidationStatus::Invalid(e.to_string()),
        };

        if !self.store.complete_credential_validation(id, &result).await? {
            warn!(credential_id = %id, "[KEYS] Claim lost before completion, result discarded");
            return Ok(None);
        }

        match &result {
            ValidationStatus::Valid => {
                info!(
                    credential_id = %id,
                    user_id = %credential.user_id,
                    exchange = %credential.exchange,
                    "[KEYS] Credential validated"
                );
                self.refresh.request_refresh();
            }
            ValidationStatus::Invalid(reason) => {
                warn!(
                    credential_id = %id,
                    user_id = %credential.user_id,
                    reason = %reason,
                    "[KEYS] Credential rejected"
                );
            }
            _ => {}
        }

        Ok(Some(result))
    }

    /// Validate every `pending` credential plus stale `validating` ones.
    /// Returns how many were completed by this call.
    pub async fn sweep(&self) -> StoreResult<usize> {
        let stale_before = Utc::now() - self.stale_after;
        let due = self.store.list_credentials_for_validation(stale_before).await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(count = due.len(), "[KEYS] Sweep found credentials to validate");
        let mut completed = 0;
        for credential in due {
            match self.validate_credential(credential.id).await {
                Ok(Some(_)) => completed += 1,
                Ok(None) => {}
                Err(e) => error!(credential_id = %credential.id, error = %e, "[KEYS] Validation failed"),
            }
        }
        Ok(completed)
    }

    /// Validation loop: on-demand requests plus the periodic sweep
    pub async fn run(
        self: Arc<Self>,
        mut credential_rx: mpsc::Receiver<CredentialId>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            sweep_interval_secs = self.sweep_interval.base().as_secs(),
            "[KEYS] Key validator started"
        );
        let mut ticker = JitteredTicker::new(self.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("[KEYS] Shutdown signal received");
                    break;
                }
                Some(id) = credential_rx.recv() => {
                    if let Err(e) = self.validate_credential(id).await {
                        error!(credential_id = %id, error = %e, "[KEYS] Validation failed");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "[KEYS] Sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::{TestAdapterFactory, TestMockAdapter};
    use crate::directory::HotReloadCoordinator;
    use crate::domain::{ApiCredential, Exchange, PlanTier, User};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        adapter: Arc<TestMockAdapter>,
        coordinator: Arc<HotReloadCoordinator>,
        validator: KeyValidator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(TestMockAdapter::new());
        let coordinator = Arc::new(HotReloadCoordinator::new(
            store.clone(),
            JitteredInterval::from_secs(3600, 0),
        ));
        let validator = KeyValidator::new(
            store.clone(),
            Arc::new(TestAdapterFactory::new(adapter.clone())),
            coordinator.refresh_handle(),
            &ValidationConfig::default(),
        );
        Fixture {
            store,
            adapter,
            coordinator,
            validator,
        }
    }

    async fn seed_credential(store: &MemoryStore) -> ApiCredential {
        let user = User {
            id: Uuid::new_v4(),
            active: true,
            plan: PlanTier::Basic,
            balance: dec!(100),
            bonus_balance: dec!(0),
            custom_trading_enabled: false,
            custom_leverage: None,
            custom_stop_loss_pct: None,
            custom_take_profit_pct: None,
        };
        let credential = ApiCredential::new(user.id, Exchange::Binance, "key", "secret");
        store.insert_user(user).await;
        store.insert_credential(credential.clone()).await;
        credential
    }

    #[tokio::test]
    async fn test_valid_key_is_marked_valid() {
        let fx = fixture();
        let credential = seed_credential(&fx.store).await;

        let result = fx.validator.validate_credential(credential.id).await.unwrap();
        assert_eq!(result, Some(ValidationStatus::Valid));
        assert_eq!(fx.store.credential(credential.id).await.unwrap().status, ValidationStatus::Valid);
    }

    #[tokio::test]
    async fn test_rejected_key_is_invalid_with_reason() {
        let fx = fixture();
        fx.adapter.set_ping_error(Some("Invalid API-key, IP, or permissions for action (-2015)"));
        let credential = seed_credential(&fx.store).await;

        fx.validator.validate_credential(credential.id).await.unwrap();
        let status = fx.store.credential(credential.id).await.unwrap().status;
        match status {
            ValidationStatus::Invalid(reason) => assert!(reason.contains("-2015"), "reason: {}", reason),
            other => panic!("expected invalid, got {}", other),
        }

        // Terminal: a second attempt cannot claim it back
        fx.adapter.set_ping_error(None);
        assert_eq!(fx.validator.validate_credential(credential.id).await.unwrap(), None);
        assert!(matches!(
            fx.store.credential(credential.id).await.unwrap().status,
            ValidationStatus::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_invalid() {
        let fx = fixture();
        *fx.adapter.ping_delay.lock() = Some(Duration::from_millis(500));
        let validator = fx.validator.with_timeout(Duration::from_millis(20));
        let credential = seed_credential(&fx.store).await;

        let result = validator.validate_credential(credential.id).await.unwrap();
        assert!(matches!(result, Some(ValidationStatus::Invalid(reason)) if reason.contains("timeout")));
    }

    #[tokio::test]
    async fn test_fresh_claim_is_not_stolen() {
        let fx = fixture();
        let credential = seed_credential(&fx.store).await;
        fx.store
            .update_credential(credential.id, |c| c.status = ValidationStatus::Validating)
            .await;

        assert_eq!(fx.validator.validate_credential(credential.id).await.unwrap(), None);
        let due = fx
            .store
            .list_credentials_for_validation(Utc::now() - chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_validates_pending() {
        let fx = fixture();
        seed_credential(&fx.store).await;
        seed_credential(&fx.store).await;

        assert_eq!(fx.validator.sweep().await.unwrap(), 2);
        assert_eq!(fx.validator.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_runs_while_requests_keep_arriving() {
        let fx = fixture();
        let validator = Arc::new(KeyValidator::new(
            fx.store.clone(),
            Arc::new(TestAdapterFactory::new(fx.adapter.clone())),
            fx.coordinator.refresh_handle(),
            &ValidationConfig {
                sweep_interval_secs: 1,
                stale_after_secs: 0,
                ..ValidationConfig::default()
            },
        ));
        // Claimed by a validator that crashed mid-check
        let abandoned = seed_credential(&fx.store).await;
        fx.store
            .update_credential(abandoned.id, |c| c.status = ValidationStatus::Validating)
            .await;
        let already_valid = seed_credential(&fx.store).await;
        fx.store
            .update_credential(already_valid.id, |c| c.status = ValidationStatus::Valid)
            .await;

        let (credential_tx, credential_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(validator.run(credential_rx, shutdown_rx));

        // Requests every 200ms, faster than the sweep interval
        for _ in 0..15 {
            credential_tx.send(already_valid.id).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        assert_eq!(
            fx.store.credential(abandoned.id).await.unwrap().status,
            ValidationStatus::Valid
        );
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_success_triggers_directory_refresh() {
        let fx = fixture();
        let credential = seed_credential(&fx.store).await;
        let directory = fx.coordinator.directory();
        let mut watch = directory.watch();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let reload = tokio::spawn(fx.coordinator.clone().run(shutdown_rx));

        fx.validator.validate_credential(credential.id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), watch.changed())
            .await
            .expect("no refresh after validation")
            .unwrap();
        assert!(directory
            .current()
            .eligible_credential(credential.user_id, Exchange::Binance)
            .is_some());

        shutdown_tx.send(()).unwrap();
        reload.await.unwrap();
    }
}
