//! Engine error taxonomy.
//!
//! Configuration errors (`InvalidEventCount`, `InvalidWorldCount`, ...) are
//! rejected at market creation. Business-rule rejections leave market state
//! untouched and are surfaced synchronously; the executor never retries and
//! never partially fills.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid event count {given}: must be between 1 and {max}")]
    InvalidEventCount { given: usize, max: usize },

    #[error("unknown event index {event}: market has {n_events} events")]
    UnknownEvent { event: usize, n_events: usize },

    #[error("event index {event} constrained more than once in slice")]
    DuplicateEvent { event: usize },

    #[error("slice contract must constrain at least one event")]
    EmptySlice,

    #[error("world vector length {given} does not match expected {expected}")]
    InvalidWorldCount { expected: usize, given: usize },

    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient LP shares: requested {requested}, held {held}")]
    InsufficientShares { requested: i128, held: i128 },

    #[error(
        "insufficient outstanding position: requested {requested} shares, world holds {held}"
    )]
    InsufficientPosition { requested: f64, held: f64 },

    #[error(
        "vault locked: withdrawal would leave {remaining} against {liability} outstanding liability"
    )]
    VaultLocked { remaining: i128, liability: i128 },

    #[error("vault cap exceeded: trade would commit {committed} against cap {cap}")]
    VaultCapExceeded { committed: i128, cap: i128 },

    #[error("trade commitment rejected: {0}")]
    InvalidCommitment(String),

    #[error("market {0} not found")]
    MarketNotFound(u64),

    #[error("market {0} is past its resolution deadline")]
    MarketClosed(u64),

    #[error("numerical instability: {0}")]
    NumericalInstability(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
