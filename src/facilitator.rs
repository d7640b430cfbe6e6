//! The verification/settlement contract every payment scheme implements.
//!
//! The three schemes (native, erc20, eip3009) share this two-method
//! interface and differ entirely in internals. Dispatch is by
//! [`PaymentMethod`](crate::network::PaymentMethod) in [`crate::scheme`].

use crate::chain::{ChainError, EvmChain};
use crate::types::{SchemeRequest, SettlementResult, VerifyOutcome};

/// A verify/settle pair encapsulating one blockchain interaction pattern.
///
/// `verify` never moves funds. `settle` is only ever called after a
/// successful `verify`, at most once per proof — the orchestrator on the
/// seller side enforces that sequencing.
pub trait SchemeHandler {
    /// Checks a payment proof against the chain without side effects.
    ///
    /// Verification failures (insufficient amount, bad signature, expired
    /// window, …) come back as [`VerifyOutcome::Invalid`] with a
    /// human-readable reason. `Err` is reserved for infrastructure faults
    /// where no judgement about the proof could be made.
    fn verify(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> impl Future<Output = Result<VerifyOutcome, ChainError>> + Send;

    /// Finalizes the payment on-chain, or confirms it was already finalized.
    ///
    /// A revert, RPC error, or timeout yields `Ok` with
    /// `success: false` — the payment is then not collected and the caller
    /// must restart the flow end-to-end. No retries happen here.
    fn settle(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> impl Future<Output = Result<SettlementResult, ChainError>> + Send;
}
