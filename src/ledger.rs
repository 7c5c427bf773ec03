/// This module implements the ledger connection for the pixel-grid marketplace
/// node. It wraps a Solana nonblocking RPC client bound to exactly one endpoint
/// from the `EndpointPool` at a time, and exposes the four operations the
/// payment path needs: balance lookup, anchor (blockhash) fetch, transaction
/// submission, and confirmation polling. Failing over replaces the entire inner
/// client; there is no partial reconfiguration.
use crate::endpoint_pool::EndpointPool;
use crate::error::ApiError;
use anyhow::anyhow;
use log::{debug, info, trace, warn};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Terminal outcome of waiting on a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The ledger confirmed the transaction.
    Confirmed,
    /// The anchor's expiry height passed without a confirmation; the payload
    /// is dead and a fresh anchor is required.
    Expired,
    /// The ledger executed and rejected the transaction.
    Failed(String),
}

/// The four-method ledger interface consumed by the payment processor.
///
/// The production implementation is `LedgerRpc`; tests substitute a scripted
/// fake. One instance per process, constructed at startup and passed down by
/// reference (no globals).
pub trait LedgerGateway: Send + Sync {
    /// Spendable balance of `address` in lamports.
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ApiError>;

    /// Fresh transaction anchor: latest blockhash plus the last block height
    /// at which it is still valid.
    async fn get_anchor(&self) -> Result<(Hash, u64), ApiError>;

    /// Broadcasts a signed transaction and returns its signature without
    /// waiting for confirmation.
    async fn submit(&self, tx: &Transaction) -> Result<Signature, ApiError>;

    /// Polls until the transaction reaches a terminal outcome or the anchor's
    /// expiry height passes.
    async fn await_confirmation(
        &self,
        signature: &Signature,
        expiry_height: u64,
    ) -> Result<ConfirmationOutcome, ApiError>;

    /// Advances the endpoint pool and rebinds the connection to the new
    /// endpoint. Returns the new endpoint URL. In-flight calls on the old
    /// binding are treated as failed by the caller.
    async fn failover(&self) -> String;
}

/// Ledger connection over Solana JSON-RPC.
///
/// Holds the endpoint pool and the currently bound `RpcClient` behind an
/// `RwLock`; `failover` swaps the whole client so the advertised current
/// endpoint and the bound session can never drift apart.
pub struct LedgerRpc {
    pool: Arc<EndpointPool>,
    client: RwLock<RpcClient>,
    rpc_timeout: Duration,
    confirm_poll_interval: Duration,
    commitment: CommitmentConfig,
}

impl LedgerRpc {
    /// Binds a new connection to the pool's current endpoint.
    ///
    /// # Arguments
    ///
    /// * `pool` - Shared endpoint pool; the connection binds to `pool.current()`.
    /// * `rpc_timeout` - Per-call timeout applied to every RPC request.
    /// * `confirm_poll_interval` - Sleep between confirmation-status polls.
    pub fn new(
        pool: Arc<EndpointPool>,
        rpc_timeout: Duration,
        confirm_poll_interval: Duration,
    ) -> Self {
        let commitment = CommitmentConfig::confirmed();
        let client = Self::bind(pool.current(), rpc_timeout, commitment);
        info!("Ledger connection bound to {}", pool.current());
        Self {
            pool,
            client: RwLock::new(client),
            rpc_timeout,
            confirm_poll_interval,
            commitment,
        }
    }

    fn bind(url: &str, timeout: Duration, commitment: CommitmentConfig) -> RpcClient {
        RpcClient::new_with_timeout_and_commitment(url.to_string(), timeout, commitment)
    }

    /// Maps a Solana client error onto the purchase taxonomy.
    ///
    /// Transaction-level errors mean the ledger looked at the payload and said
    /// no (`Rejected`); transport failures are `Network`; everything else the
    /// endpoint answered with is `Protocol`. Both of the latter are transient
    /// and drive endpoint failover in the payment path.
    fn classify(err: ClientError) -> ApiError {
        if let Some(tx_err) = err.get_transaction_error() {
            return ApiError::Rejected(tx_err.to_string());
        }
        match &err.kind {
            ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
                ApiError::Network(anyhow!(err.to_string()))
            }
            _ => ApiError::Protocol(anyhow!(err.to_string())),
        }
    }
}

impl LedgerGateway for LedgerRpc {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, ApiError> {
        trace!("Fetching balance for {}", address);
        let client = self.client.read().await;
        let balance = client.get_balance(address).await.map_err(Self::classify)?;
        debug!("Balance of {}: {} lamports", address, balance);
        Ok(balance)
    }

    async fn get_anchor(&self) -> Result<(Hash, u64), ApiError> {
        let client = self.client.read().await;
        let (anchor, expiry_height) = client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(Self::classify)?;
        debug!(
            "Fetched anchor {} valid until block height {}",
            anchor, expiry_height
        );
        Ok((anchor, expiry_height))
    }

    async fn submit(&self, tx: &Transaction) -> Result<Signature, ApiError> {
        let client = self.client.read().await;
        let signature = client.send_transaction(tx).await.map_err(Self::classify)?;
        info!("Submitted transaction {}", signature);
        Ok(signature)
    }

    async fn await_confirmation(
        &self,
        signature: &Signature,
        expiry_height: u64,
    ) -> Result<ConfirmationOutcome, ApiError> {
        trace!("Awaiting confirmation of {}", signature);
        loop {
            let status = {
                let client = self.client.read().await;
                client
                    .get_signature_status_with_commitment(signature, self.commitment)
                    .await
                    .map_err(Self::classify)?
            };

            match status {
                Some(Ok(())) => {
                    info!("Transaction {} confirmed", signature);
                    return Ok(ConfirmationOutcome::Confirmed);
                }
                Some(Err(tx_err)) => {
                    warn!("Transaction {} failed on ledger: {}", signature, tx_err);
                    return Ok(ConfirmationOutcome::Failed(tx_err.to_string()));
                }
                None => {
                    let height = {
                        let client = self.client.read().await;
                        client.get_block_height().await.map_err(Self::classify)?
                    };
                    if height > expiry_height {
                        warn!(
                            "Anchor for {} expired at height {} (now {})",
                            signature, expiry_height, height
                        );
                        return Ok(ConfirmationOutcome::Expired);
                    }
                    trace!(
                        "Transaction {} still pending at height {} (expires {})",
                        signature,
                        height,
                        expiry_height
                    );
                    tokio::time::sleep(self.confirm_poll_interval).await;
                }
            }
        }
    }

    async fn failover(&self) -> String {
        let next = self.pool.advance().to_string();
        let mut client = self.client.write().await;
        *client = Self::bind(&next, self.rpc_timeout, self.commitment);
        warn!("Ledger connection rebound to {}", next);
        next
    }
}
