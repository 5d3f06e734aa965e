use alloy::network::TxSignerSync;
use alloy::primitives::TxHash;
use alloy::signers::local::PrivateKeySigner;
use alloy_consensus::{SignableTransaction, TxLegacy};

use crate::eth;
use crate::rpc::{JsonRpc, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to sign transaction: {0}")]
    Sign(#[from] alloy::signers::Error),
    #[error("eth_sendRawTransaction failed: {0}")]
    Rpc(#[from] RpcError),
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub hash: TxHash,
    pub raw: Vec<u8>,
}

pub fn sign_and_encode_tx(signer: &PrivateKeySigner, mut tx: TxLegacy) -> Result<SignedPayload, alloy::signers::Error> {
    let signature = signer.sign_transaction_sync(&mut tx)?;
    let signed = tx.into_signed(signature);
    let hash = *signed.hash();
    let mut raw = Vec::new();
    signed.eip2718_encode(&mut raw);
    Ok(SignedPayload { hash, raw })
}

/// Sign `tx` and post it. Exactly one network write per call; a failure may or may not
/// have consumed the nonce on the node.
pub async fn submit<R: JsonRpc>(rpc: &R, signer: &PrivateKeySigner, tx: TxLegacy) -> Result<TxHash, SubmitError> {
    let payload = sign_and_encode_tx(signer, tx)?;
    let hash = eth::send_raw_transaction(rpc, &payload.raw).await?;
    Ok(hash)
}
