use caramba_db::models::{Metadata, NewTransaction, Transaction, TransactionStatus};
use caramba_db::TransactionStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api_client::ApiClient;
use crate::error::{GatewayError, PaymentError, PaymentErrorKind};
use crate::gateways::{self, GatewayRegistry, PaymentAdapter};
use crate::models::{GatewayConfig, PaymentLink, PaymentRequest, VerificationResult, VerifyOutcome};


/// Public entry point of the payment subsystem.
///
/// Owns the create/verify state machine: `Pending -> Verified | Failed`.
/// Balances are never touched here. `VerifyOutcome::newly_verified` marks
/// the one call that performed the `Pending -> Verified` transition; callers
/// that credit must still key the credit on the transaction.
pub struct PaymentOrchestrator {
    registry: GatewayRegistry,
    adapters: HashMap<&'static str, Arc<dyn PaymentAdapter>>,
    store: Arc<dyn TransactionStore>,
    deadline: Option<Duration>,
}

impl PaymentOrchestrator {
    /// Orchestrator over the built-in adapters.
    pub fn new(registry: GatewayRegistry, store: Arc<dyn TransactionStore>, client: &ApiClient) -> Self {
        Self::with_adapters(registry, store, gateways::default_adapters(client))
    }

    pub fn with_adapters(
        registry: GatewayRegistry,
        store: Arc<dyn TransactionStore>,
        adapters: Vec<Arc<dyn PaymentAdapter>>,
    ) -> Self {
        Self {
            registry,
            adapters: adapters.into_iter().map(|a| (a.provider_id(), a)).collect(),
            store,
            deadline: None,
        }
    }

    /// Bounds every provider round trip, retries included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn enabled_providers(&self) -> Vec<&str> {
        self.registry
            .enabled_providers()
            .into_iter()
            .filter(|id| self.adapters.contains_key(*id))
            .collect()
    }

    fn resolve(&self, provider_id: &str) -> Result<(&GatewayConfig, &Arc<dyn PaymentAdapter>), PaymentError> {
        let config = self.registry.config_for(provider_id)?;
        let adapter = self
            .adapters
            .get(provider_id)
            .ok_or_else(|| PaymentError::gateway_disabled(provider_id))?;
        Ok((config, adapter))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .unwrap_or_else(|_| Err(GatewayError::Transport(format!("no answer within {:?}", deadline)))),
            None => call.await,
        }
    }

    /// Token carried by a provider callback, looked up by the adapter's keys.
    pub fn callback_token(&self, provider_id: &str, params: &HashMap<String, String>) -> Option<String> {
        let adapter = self.adapters.get(provider_id)?;
        adapter
            .callback_token_keys()
            .iter()
            .find_map(|key| params.get(*key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub async fn find_transaction(&self, provider_id: &str, token: &str) -> Result<Option<Transaction>, PaymentError> {
        self.store
            .find_by_token(provider_id, token)
            .await
            .map_err(|e| PaymentError::persistence(provider_id, &e))
    }

    /// Starts a payment. The pending row is durable before this returns `Ok`.
    pub async fn create_payment(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
        metadata: Metadata,
        provider_id: &str,
    ) -> Result<PaymentLink, PaymentError> {
        let (config, adapter) = self.resolve(provider_id)?;
        let request = PaymentRequest {
            user_id,
            amount,
            description: description.to_string(),
            metadata,
        };

        let created = self
            .bounded(adapter.create(&request, config))
            .await
            .map_err(|e| PaymentError::from_gateway(provider_id, e))?;

        let row = NewTransaction {
            user_id,
            provider: provider_id.to_string(),
            token: created.token.clone(),
            amount,
            description: request.description,
            metadata: created.metadata,
        };
        let tx = self.store.insert_pending(row).await.map_err(|e| {
            error!(
                "Failed to record {} payment {} for user {} (amount {}): {}. Provider side exists, reconcile manually",
                provider_id, created.token, user_id, amount, e
            );
            PaymentError::persistence(provider_id, &e)
        })?;

        info!("Created {} payment #{} for user {} ({} Toman)", provider_id, tx.id, user_id, amount);
        Ok(PaymentLink {
            transaction_id: tx.id,
            redirect_url: created.redirect_url,
            token: created.token,
        })
    }

    /// Verifies a payment at most once. Repeat calls on a terminal row
    /// answer from the store without calling the provider.
    pub async fn verify_payment(
        &self,
        provider_id: &str,
        token: &str,
        amount: i64,
    ) -> Result<VerifyOutcome, PaymentError> {
        let tx = self
            .find_transaction(provider_id, token)
            .await?
            .ok_or_else(|| PaymentError::unknown_transaction(provider_id))?;

        if tx.status.is_terminal() {
            return Ok(stored_outcome(&tx));
        }

        if amount != tx.amount {
            error!(
                "Amount mismatch on {} token {}: caller sent {}, transaction #{} holds {}",
                provider_id, token, amount, tx.id, tx.amount
            );
            return Err(PaymentError::new(
                provider_id,
                PaymentErrorKind::AmountMismatch {
                    expected: tx.amount,
                    reported: amount,
                },
            ));
        }

        let (config, adapter) = self.resolve(provider_id)?;

        match self.bounded(adapter.verify(&tx, config)).await {
            Ok(result) => {
                let won = self
                    .store
                    .mark_verified(tx.id, result.ref_id.as_deref(), result.card_mask.as_deref())
                    .await
                    .map_err(|e| PaymentError::persistence(provider_id, &e))?;
                if !won {
                    return self.reread(provider_id, &tx).await;
                }
                info!(
                    "Verified {} payment #{} for user {} (ref {:?})",
                    provider_id, tx.id, tx.user_id, result.ref_id
                );
                Ok(VerifyOutcome {
                    transaction_id: tx.id,
                    user_id: tx.user_id,
                    amount: tx.amount,
                    status: TransactionStatus::Verified,
                    result,
                    newly_verified: true,
                })
            }
            Err(GatewayError::Transport(detail)) => {
                // A concurrent caller may have settled the row meanwhile.
                if let Some(current) = self.find_transaction(provider_id, token).await? {
                    if current.status.is_terminal() {
                        debug!(
                            "Verify of {} payment #{} failed in transit but the row is already {}",
                            provider_id,
                            tx.id,
                            current.status.as_str()
                        );
                        return Ok(stored_outcome(&current));
                    }
                }
                warn!("Verify of {} payment #{} did not complete: {}", provider_id, tx.id, detail);
                Err(PaymentError::new(provider_id, PaymentErrorKind::Transport(detail)))
            }
            Err(err) => {
                if let GatewayError::AmountMismatch { expected, reported } = &err {
                    error!(
                        "{} reported amount {} for payment #{} (expected {}), possible tampering",
                        provider_id, reported, tx.id, expected
                    );
                } else {
                    warn!("{} declined payment #{}: {}", provider_id, tx.id, err);
                }
                let message = err.to_string();
                let won = self
                    .store
                    .mark_failed(tx.id, err.code(), &message)
                    .await
                    .map_err(|e| PaymentError::persistence(provider_id, &e))?;
                if !won {
                    return self.reread(provider_id, &tx).await;
                }
                Ok(VerifyOutcome {
                    transaction_id: tx.id,
                    user_id: tx.user_id,
                    amount: tx.amount,
                    status: TransactionStatus::Failed,
                    result: VerificationResult::failed(err.code(), message),
                    newly_verified: false,
                })
            }
        }
    }

    /// Another caller finished this row first; report what it stored.
    async fn reread(&self, provider_id: &str, tx: &Transaction) -> Result<VerifyOutcome, PaymentError> {
        let current = self
            .find_transaction(provider_id, &tx.token)
            .await?
            .ok_or_else(|| PaymentError::unknown_transaction(provider_id))?;
        if !current.status.is_terminal() {
            return Err(PaymentError::new(
                provider_id,
                PaymentErrorKind::Persistence(format!(
                    "transaction #{} is still pending after a lost status update",
                    current.id
                )),
            ));
        }
        Ok(stored_outcome(&current))
    }
}

fn stored_outcome(tx: &Transaction) -> VerifyOutcome {
    let result = match tx.status {
        TransactionStatus::Verified => VerificationResult::verified(tx.ref_id.clone(), tx.card_mask.clone()),
        _ => VerificationResult::failed(
            tx.failure_code.as_deref().unwrap_or("provider_rejected"),
            tx.failure_message.as_deref().unwrap_or("payment failed"),
        ),
    };
    VerifyOutcome {
        transaction_id: tx.id,
        user_id: tx.user_id,
        amount: tx.amount,
        status: tx.status,
        result,
        newly_verified: false,
    }
}
