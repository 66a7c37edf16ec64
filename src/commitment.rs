//! Trade-commitment verification seam.
//!
//! Every execute carries an opaque commitment blob. The engine treats it as a
//! black box: it is handed to a `CommitmentVerifier` before any state is
//! staged, and the trade is rejected with `InvalidCommitment` if verification
//! fails. The trait is async because real verifiers sit behind an external
//! proof system; the engine makes no latency or synchrony assumptions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Opaque commitment accompanying a trade request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCommitment {
    /// Account the trade settles against.
    pub account: String,
    /// Caller-chosen nonce, echoed in the receipt.
    pub nonce: u64,
    /// Opaque proof payload. The engine never inspects it.
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait CommitmentVerifier: Send + Sync {
    async fn verify(&self, commitment: &TradeCommitment) -> Result<()>;
}

/// Policy-table verifier for binaries and tests: accepts everything except
/// explicitly listed accounts.
#[derive(Debug, Default)]
pub struct StaticVerifier {
    rejected_accounts: Vec<String>,
}

impl StaticVerifier {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn rejecting<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rejected_accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CommitmentVerifier for StaticVerifier {
    async fn verify(&self, commitment: &TradeCommitment) -> Result<()> {
        if self.rejected_accounts.contains(&commitment.account) {
            return Err(EngineError::InvalidCommitment(format!(
                "account {} is not cleared to trade",
                commitment.account
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(account: &str) -> TradeCommitment {
        TradeCommitment {
            account: account.into(),
            nonce: 1,
            payload: vec![0xAB; 32],
        }
    }

    #[tokio::test]
    async fn accept_all_passes_everything() {
        let v = StaticVerifier::accept_all();
        assert!(v.verify(&commitment("anyone")).await.is_ok());
    }

    #[tokio::test]
    async fn reject_list_blocks_listed_accounts() {
        let v = StaticVerifier::rejecting(["mallory"]);
        assert!(v.verify(&commitment("alice")).await.is_ok());
        let err = v.verify(&commitment("mallory")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidCommitment(_)));
    }
}
