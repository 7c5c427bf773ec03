/// This module defines the wallet signing seam. The purchase path never touches
/// key material directly; it asks a `WalletSigner` to sign the built transfer
/// against a given anchor. The production implementation wraps a local
/// `Keypair`; tests substitute a fake that can decline.
use crate::error::ApiError;
use log::debug;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::Transaction,
};
use std::sync::Arc;

/// Signing boundary between the payment processor and whatever holds the keys.
///
/// A refusal to sign (the user cancelled in their wallet, or the signer could
/// not produce a signature for the payload) is `ApiError::UserRejected` and is
/// terminal for the purchase; the processor never re-prompts.
pub trait WalletSigner: Send + Sync {
    /// The payer address whose funds move.
    fn address(&self) -> Pubkey;

    /// Signs `tx` in place against `anchor`.
    fn sign(&self, tx: &mut Transaction, anchor: Hash) -> Result<(), ApiError>;
}

/// Signer backed by a locally held keypair, shared via `Arc`.
pub struct KeypairSigner {
    payer: Arc<Keypair>,
}

impl KeypairSigner {
    pub fn new(payer: Arc<Keypair>) -> Self {
        Self { payer }
    }
}

impl WalletSigner for KeypairSigner {
    fn address(&self) -> Pubkey {
        self.payer.pubkey()
    }

    fn sign(&self, tx: &mut Transaction, anchor: Hash) -> Result<(), ApiError> {
        tx.try_sign(&[self.payer.as_ref()], anchor).map_err(|e| {
            debug!("Keypair refused to sign: {}", e);
            ApiError::UserRejected
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::system_instruction;

    #[test]
    fn keypair_signer_signs_a_transfer() {
        let payer = Arc::new(Keypair::new());
        let signer = KeypairSigner::new(payer.clone());
        let recipient = Pubkey::new_unique();

        let ix = system_instruction::transfer(&signer.address(), &recipient, 1_000);
        let mut tx = Transaction::new_with_payer(&[ix], Some(&signer.address()));
        signer.sign(&mut tx, Hash::new_unique()).unwrap();

        assert!(tx.is_signed());
        assert_eq!(tx.message.account_keys[0], payer.pubkey());
    }
}
