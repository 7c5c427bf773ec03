/// This module implements the purchase orchestrator: the one entry point that
/// turns a validated grid request into a confirmed payment and a persisted
/// reservation, with exactly one history record per completed attempt. It
/// composes the payment processor and the reservation store and owns the
/// policy around the known inconsistency window, where a payment confirms
/// on-chain but the reservation loses a concurrent race.
use crate::error::ApiError;
use crate::history::{AttemptStatus, HistoryStore};
use crate::ledger::{LedgerGateway, LedgerRpc};
use crate::payment::PaymentProcessor;
use crate::reservation::{Rect, Reservation, ReservationStore, PIXELS_PER_CELL};
use crate::wallet::{KeypairSigner, WalletSigner};
use log::{error, info, warn};
use serde::Serialize;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use std::sync::Arc;

/// Result of a successful purchase, returned to the HTTP caller.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub reservation: Reservation,
    pub payment_signature: String,
    pub price_lamports: u64,
}

/// Orchestrates validate -> pre-check -> pay -> reserve -> record.
pub struct PurchaseService<L, S> {
    payments: PaymentProcessor<L, S>,
    reservations: Arc<ReservationStore>,
    history: Arc<HistoryStore>,
    /// Price of one pixel in SOL. One grid cell is a 10x10 pixel block.
    price_per_pixel_sol: f64,
}

/// Concrete service wired in `main`: real RPC ledger, local keypair signer.
pub type NodePurchaseService = PurchaseService<LedgerRpc, KeypairSigner>;

impl<L: LedgerGateway, S: WalletSigner> PurchaseService<L, S> {
    pub fn new(
        payments: PaymentProcessor<L, S>,
        reservations: Arc<ReservationStore>,
        history: Arc<HistoryStore>,
        price_per_pixel_sol: f64,
    ) -> Self {
        Self {
            payments,
            reservations,
            history,
            price_per_pixel_sol,
        }
    }

    pub fn reservations(&self) -> &ReservationStore {
        &self.reservations
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn payer_address(&self) -> String {
        self.payments.payer().to_string()
    }

    /// Price of a region in lamports: cells x 100 pixels x per-pixel price,
    /// rounded down into minor units.
    pub fn price_lamports(&self, rect: &Rect) -> u64 {
        let pixels = rect.cell_count() * PIXELS_PER_CELL;
        (pixels as f64 * self.price_per_pixel_sol * LAMPORTS_PER_SOL as f64).floor() as u64
    }

    /// Runs one purchase end to end.
    ///
    /// # Workflow
    ///
    /// 1. **Validate**: geometry against the grid bounds, computed price > 0.
    ///    Rejected before any network traffic.
    /// 2. **Pre-check**: advisory overlap test against the in-memory snapshot.
    ///    A visible conflict is rejected without attempting payment.
    /// 3. **Pay**: the full submit-and-confirm state machine. Any failure is
    ///    recorded as a failed attempt and surfaced; the grid is unchanged.
    /// 4. **Reserve**: atomic insert against the persisted grid. Losing the
    ///    race here, after the money moved, is the one inconsistency this
    ///    system admits: it is recorded, logged at error level, and surfaced
    ///    as `PaidButUnreserved`, distinct from a pre-payment `Overlap`.
    /// 5. **Record**: a completed attempt linked to the new reservation.
    pub async fn purchase(
        &self,
        rect: Rect,
        image_ref: Option<String>,
        link: Option<String>,
    ) -> Result<PurchaseReceipt, ApiError> {
        rect.validate()?;
        let price = self.price_lamports(&rect);
        if price == 0 {
            return Err(ApiError::InvalidGeometry(
                "computed price is zero".to_string(),
            ));
        }
        let owner = self.payments.payer().to_string();

        if let Some(holder) = self.reservations.find_conflict(&rect) {
            info!(
                "Purchase of ({}, {}) {}x{} rejected pre-payment: overlaps {}",
                rect.x, rect.y, rect.width, rect.height, holder
            );
            return Err(ApiError::Overlap);
        }

        let signature = match self.payments.pay(price).await {
            Ok(sig) => sig,
            Err(e) => {
                warn!("Payment failed for ({}, {}): {}", rect.x, rect.y, e);
                self.record_failure(&owner, rect, price, None, &e);
                return Err(e);
            }
        };

        let reservation = Reservation::new(
            rect,
            owner.clone(),
            price,
            signature.to_string(),
            image_ref,
            link,
        );
        match self.reservations.insert(reservation.clone()).await {
            Ok(()) => {}
            Err(ApiError::Overlap) => {
                // The race was lost after the money moved. Nothing here can
                // roll the payment back; operators reconcile out of band.
                let inconsistency = ApiError::PaidButUnreserved {
                    signature: signature.to_string(),
                };
                error!(
                    "Payment {} confirmed but region ({}, {}) {}x{} was claimed concurrently",
                    signature, rect.x, rect.y, rect.width, rect.height
                );
                self.record_failure(&owner, rect, price, Some(signature.to_string()), &inconsistency);
                return Err(inconsistency);
            }
            Err(e) => {
                error!(
                    "Payment {} confirmed but reservation could not be persisted: {}",
                    signature, e
                );
                self.record_failure(&owner, rect, price, Some(signature.to_string()), &e);
                return Err(e);
            }
        }

        if let Err(e) = self.history.append(
            &owner,
            rect,
            price,
            AttemptStatus::Completed,
            Some(signature.to_string()),
            None,
            Some(reservation.id),
        ) {
            // The purchase itself succeeded; a missing audit row is logged,
            // not surfaced.
            error!("Failed to append completed history record: {}", e);
        }

        info!(
            "Purchase complete: reservation {} at ({}, {}) {}x{} for {} lamports",
            reservation.id, rect.x, rect.y, rect.width, rect.height, price
        );
        Ok(PurchaseReceipt {
            reservation,
            payment_signature: signature.to_string(),
            price_lamports: price,
        })
    }

    fn record_failure(
        &self,
        owner: &str,
        rect: Rect,
        price: u64,
        signature: Option<String>,
        cause: &ApiError,
    ) {
        if let Err(e) = self.history.append(
            owner,
            rect,
            price,
            AttemptStatus::Failed,
            signature,
            Some(cause.reason_tag().to_string()),
            None,
        ) {
            error!("Failed to append failed history record: {}", e);
        }
    }
}
