/// This module implements payment settlement for grid purchases. Given an
/// amount in lamports, it drives a single purchase attempt through the
/// CHECK_BALANCE -> BUILD -> SIGN -> SUBMIT -> CONFIRM state machine against
/// the ledger connection, failing over to the next RPC endpoint on transient
/// errors and retrying up to a fixed attempt budget. A signature is returned
/// only once the ledger has reported the transaction confirmed; every other
/// outcome is a typed failure the orchestrator records.
use crate::error::ApiError;
use crate::ledger::{ConfirmationOutcome, LedgerGateway};
use crate::wallet::WalletSigner;
use anyhow::anyhow;
use log::{debug, info, warn};
use solana_sdk::{
    pubkey::Pubkey, signature::Signature, system_instruction, transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;

/// Retry knobs for the payment path. Observed production behavior is 5
/// attempts with a fixed 1 second delay; both are configuration, not law.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Builds, signs, submits, and confirms transfer transactions.
///
/// Generic over the ledger gateway and the wallet signer so the whole payment
/// path runs against fakes in tests. One instance per process, shared by
/// reference from the orchestrator.
pub struct PaymentProcessor<L, S> {
    ledger: Arc<L>,
    signer: Arc<S>,
    treasury: Pubkey,
    config: PaymentConfig,
}

impl<L: LedgerGateway, S: WalletSigner> PaymentProcessor<L, S> {
    pub fn new(ledger: Arc<L>, signer: Arc<S>, treasury: Pubkey, config: PaymentConfig) -> Self {
        Self {
            ledger,
            signer,
            treasury,
            config,
        }
    }

    /// The payer address funds are drawn from.
    pub fn payer(&self) -> Pubkey {
        self.signer.address()
    }

    /// Moves `amount_lamports` from the payer to the treasury and returns the
    /// confirmed signature.
    ///
    /// # Workflow
    ///
    /// 1. **Balance check**: payer balance below the amount is terminal
    ///    `InsufficientFunds`; a shortage does not clear itself by retrying.
    /// 2. **Attempt loop** (up to `max_attempts`): fetch a fresh anchor, build
    ///    a single transfer instruction, sign via the wallet seam, submit, and
    ///    poll for confirmation.
    /// 3. **Failure routing**: `Network`/`Protocol` errors and an `Expired`
    ///    confirmation advance the endpoint pool, rebind the connection, wait
    ///    the fixed backoff, and consume an attempt. A ledger `Rejected` or a
    ///    `Failed` confirmation kills the payload but not the purchase; a
    ///    fresh BUILD+SIGN+SUBMIT cycle runs on the same endpoint and also
    ///    consumes an attempt. A signer refusal is terminal `UserRejected`.
    /// 4. **Exhaustion**: once the budget is spent, `ExhaustedRetries` is
    ///    returned carrying the last underlying cause.
    ///
    /// # Errors
    ///
    /// * `ApiError::InsufficientFunds` - balance below `amount_lamports`.
    /// * `ApiError::UserRejected` - the signer declined.
    /// * `ApiError::ExhaustedRetries` - no confirmation within the budget.
    pub async fn pay(&self, amount_lamports: u64) -> Result<Signature, ApiError> {
        let payer = self.signer.address();

        let balance = self.balance_with_failover(&payer).await?;
        if balance < amount_lamports {
            warn!(
                "Payer {} has {} lamports, purchase needs {}",
                payer, balance, amount_lamports
            );
            return Err(ApiError::InsufficientFunds {
                required: amount_lamports,
                available: balance,
            });
        }

        let mut last_err = ApiError::Internal("no attempt made".to_string());
        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            debug!(
                "Payment attempt {}/{} for {} lamports",
                attempt, self.config.max_attempts, amount_lamports
            );

            // BUILD: anchors expire, so every attempt needs a fresh one.
            let (anchor, expiry_height) = match self.ledger.get_anchor().await {
                Ok(v) => v,
                Err(e @ (ApiError::Network(_) | ApiError::Protocol(_))) => {
                    let endpoint = self.ledger.failover().await;
                    warn!("Anchor fetch failed ({}), failing over to {}", e, endpoint);
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let ix = system_instruction::transfer(&payer, &self.treasury, amount_lamports);
            let mut tx = Transaction::new_with_payer(&[ix], Some(&payer));

            // SIGN: a refusal is terminal, the user must re-initiate.
            self.signer.sign(&mut tx, anchor)?;

            // SUBMIT
            let signature = match self.ledger.submit(&tx).await {
                Ok(sig) => sig,
                Err(ApiError::Rejected(reason)) => {
                    warn!(
                        "Ledger rejected payload on attempt {}: {}",
                        attempt, reason
                    );
                    last_err = ApiError::Rejected(reason);
                    continue;
                }
                Err(e @ (ApiError::Network(_) | ApiError::Protocol(_))) => {
                    let endpoint = self.ledger.failover().await;
                    warn!("Submit failed ({}), failing over to {}", e, endpoint);
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            };

            // CONFIRM
            match self.ledger.await_confirmation(&signature, expiry_height).await {
                Ok(ConfirmationOutcome::Confirmed) => {
                    info!(
                        "Payment of {} lamports confirmed as {} on attempt {}",
                        amount_lamports, signature, attempt
                    );
                    return Ok(signature);
                }
                Ok(ConfirmationOutcome::Expired) => {
                    let endpoint = self.ledger.failover().await;
                    warn!(
                        "Anchor expired before {} confirmed, failing over to {}",
                        signature, endpoint
                    );
                    last_err = ApiError::Network(anyhow!(
                        "anchor expired before confirmation of {}",
                        signature
                    ));
                    continue;
                }
                Ok(ConfirmationOutcome::Failed(reason)) => {
                    warn!("Transaction {} failed on ledger: {}", signature, reason);
                    last_err = ApiError::Rejected(reason);
                    continue;
                }
                Err(e @ (ApiError::Network(_) | ApiError::Protocol(_))) => {
                    let endpoint = self.ledger.failover().await;
                    warn!(
                        "Confirmation polling failed ({}), failing over to {}",
                        e, endpoint
                    );
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "Payment abandoned after {} attempts: {}",
            self.config.max_attempts, last_err
        );
        Err(ApiError::ExhaustedRetries {
            attempts: self.config.max_attempts,
            last: Box::new(last_err),
        })
    }

    /// Balance query with the same failover-and-retry treatment as the
    /// network-facing attempt steps.
    async fn balance_with_failover(&self, payer: &Pubkey) -> Result<u64, ApiError> {
        let mut last_err = None;
        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.ledger.get_balance(payer).await {
                Ok(balance) => return Ok(balance),
                Err(e @ (ApiError::Network(_) | ApiError::Protocol(_))) => {
                    let endpoint = self.ledger.failover().await;
                    warn!("Balance query failed ({}), failing over to {}", e, endpoint);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ApiError::ExhaustedRetries {
            attempts: self.config.max_attempts,
            last: Box::new(last_err.unwrap_or_else(|| {
                ApiError::Internal("balance query made no attempt".to_string())
            })),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted ledger fake: each call pops the next scripted result, falling
    /// back to success when the script runs dry.
    pub(crate) struct FakeLedger {
        pub balance: u64,
        pub submit_script: Mutex<VecDeque<Result<Signature, ApiError>>>,
        pub confirm_script: Mutex<VecDeque<ConfirmationOutcome>>,
        pub submits: AtomicUsize,
        pub failovers: AtomicUsize,
    }

    impl FakeLedger {
        pub fn with_balance(balance: u64) -> Self {
            Self {
                balance,
                submit_script: Mutex::new(VecDeque::new()),
                confirm_script: Mutex::new(VecDeque::new()),
                submits: AtomicUsize::new(0),
                failovers: AtomicUsize::new(0),
            }
        }

        pub fn script_submit(self, results: Vec<Result<Signature, ApiError>>) -> Self {
            *self.submit_script.lock().unwrap() = results.into();
            self
        }

        pub fn script_confirm(self, outcomes: Vec<ConfirmationOutcome>) -> Self {
            *self.confirm_script.lock().unwrap() = outcomes.into();
            self
        }

        fn network_error() -> ApiError {
            ApiError::Network(anyhow!("connection refused"))
        }
    }

    impl LedgerGateway for FakeLedger {
        async fn get_balance(&self, _address: &Pubkey) -> Result<u64, ApiError> {
            Ok(self.balance)
        }

        async fn get_anchor(&self) -> Result<(Hash, u64), ApiError> {
            Ok((Hash::new_unique(), 1_000))
        }

        async fn submit(&self, _tx: &Transaction) -> Result<Signature, ApiError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.submit_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Signature::new_unique()))
        }

        async fn await_confirmation(
            &self,
            _signature: &Signature,
            _expiry_height: u64,
        ) -> Result<ConfirmationOutcome, ApiError> {
            Ok(self
                .confirm_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ConfirmationOutcome::Confirmed))
        }

        async fn failover(&self) -> String {
            self.failovers.fetch_add(1, Ordering::SeqCst);
            "http://fake-rpc.example".to_string()
        }
    }

    /// Signer fake that can be told to refuse.
    pub(crate) struct FakeSigner {
        pub address: Pubkey,
        pub refuse: bool,
        pub sign_calls: AtomicUsize,
    }

    impl FakeSigner {
        pub fn willing() -> Self {
            Self {
                address: Pubkey::new_unique(),
                refuse: false,
                sign_calls: AtomicUsize::new(0),
            }
        }

        pub fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::willing()
            }
        }
    }

    impl WalletSigner for FakeSigner {
        fn address(&self) -> Pubkey {
            self.address
        }

        fn sign(&self, _tx: &mut Transaction, _anchor: Hash) -> Result<(), ApiError> {
            self.sign_calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                Err(ApiError::UserRejected)
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> PaymentConfig {
        PaymentConfig {
            max_attempts: 5,
            retry_delay: Duration::from_millis(0),
        }
    }

    fn processor(
        ledger: FakeLedger,
        signer: FakeSigner,
    ) -> (PaymentProcessor<FakeLedger, FakeSigner>, Arc<FakeLedger>, Arc<FakeSigner>) {
        let ledger = Arc::new(ledger);
        let signer = Arc::new(signer);
        (
            PaymentProcessor::new(
                ledger.clone(),
                signer.clone(),
                Pubkey::new_unique(),
                fast_config(),
            ),
            ledger,
            signer,
        )
    }

    #[tokio::test]
    async fn confirmed_payment_returns_signature_first_attempt() {
        let sig = Signature::new_unique();
        let (p, ledger, _signer) = processor(
            FakeLedger::with_balance(10_000).script_submit(vec![Ok(sig)]),
            FakeSigner::willing(),
        );

        assert_eq!(p.pay(4_000).await.unwrap(), sig);
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.failovers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn insufficient_funds_is_terminal_without_submission() {
        let (p, ledger, _signer) =
            processor(FakeLedger::with_balance(100), FakeSigner::willing());

        let err = p.pay(4_000).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::InsufficientFunds {
                required: 4_000,
                available: 100
            }
        ));
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signer_refusal_is_terminal_after_one_prompt() {
        let (p, ledger, signer) =
            processor(FakeLedger::with_balance(10_000), FakeSigner::refusing());

        let err = p.pay(4_000).await.unwrap_err();
        assert!(matches!(err, ApiError::UserRejected));
        assert_eq!(signer.sign_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_submit_failure_fails_over_then_succeeds() {
        let sig = Signature::new_unique();
        let (p, ledger, _signer) = processor(
            FakeLedger::with_balance(10_000)
                .script_submit(vec![Err(FakeLedger::network_error()), Ok(sig)]),
            FakeSigner::willing(),
        );

        assert_eq!(p.pay(4_000).await.unwrap(), sig);
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 2);
        assert_eq!(ledger.failovers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_confirmation_gets_a_fresh_anchor_and_endpoint() {
        let (p, ledger, _signer) = processor(
            FakeLedger::with_balance(10_000).script_confirm(vec![
                ConfirmationOutcome::Expired,
                ConfirmationOutcome::Confirmed,
            ]),
            FakeSigner::willing(),
        );

        p.pay(4_000).await.unwrap();
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 2);
        assert_eq!(ledger.failovers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_network_failure_exhausts_the_budget() {
        let (p, ledger, _signer) = processor(
            FakeLedger::with_balance(10_000).script_submit(
                (0..5).map(|_| Err(FakeLedger::network_error())).collect(),
            ),
            FakeSigner::willing(),
        );

        let err = p.pay(4_000).await.unwrap_err();
        match err {
            ApiError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(matches!(*last, ApiError::Network(_)));
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 5);
        assert_eq!(ledger.failovers.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn ledger_rejection_retries_fresh_payload_without_failover() {
        let (p, ledger, _signer) = processor(
            FakeLedger::with_balance(10_000).script_submit(
                (0..5)
                    .map(|_| Err(ApiError::Rejected("blockhash not found".into())))
                    .collect(),
            ),
            FakeSigner::willing(),
        );

        let err = p.pay(4_000).await.unwrap_err();
        match err {
            ApiError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(matches!(*last, ApiError::Rejected(_)));
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
        // The endpoint answered correctly every time; no failover happened.
        assert_eq!(ledger.failovers.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.submits.load(Ordering::SeqCst), 5);
    }
}
