use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Every error kind the observer core can surface, per the error design in
/// the spec. Variants map 1:1 onto the "Error kinds observed by the core"
/// list: transport/RPC failures, fork-recovery signals, user-visible write
/// rejections, and the fatal startup conditions.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// A JSON-RPC call kept timing out past `requestMaxRetries`.
    #[error("bitcoin RPC transport unresolvable after retries: {0}")]
    UnresolvableTransport(String),

    /// The node returned a JSON-RPC error object (not a transport failure).
    #[error("bitcoin RPC error: {0}")]
    RpcError(String),

    /// `transactions(since, hash)` was asked about a time/hash pair that no
    /// longer matches the live chain. Expected during reorg.
    #[error("invalid transaction number or time hash")]
    InvalidTransactionNumberOrTimeHash,

    /// `processBlock` observed a previous-hash mismatch against the stored
    /// chain. Internal fork-detection signal; triggers revert on next tick.
    #[error("invalid previous block hash at height {height}")]
    InvalidPreviousBlockHash { height: u32 },

    /// `writeTransaction` would exceed `bitcoinFeeSpendingCutoff` within the
    /// rolling `bitcoinFeeSpendingCutoffPeriodInBlocks` window.
    #[error("spending cap for the current period has been reached")]
    SpendingCapReached,

    /// Wallet balance cannot cover the requested anchor's fee.
    #[error("not enough wallet balance to write this anchor")]
    NotEnoughBalanceForWrite,

    /// `getNormalizedFee` was asked about a block before genesis, or before
    /// the quantile window has enough history.
    #[error("requested block is out of the range the observer has fee data for")]
    BlockchainTimeOutOfRange,

    /// A value-time-lock referenced by id is unknown to the lock store.
    #[error("value time lock not found")]
    ValueTimeLockNotFound,

    /// A value-time-lock transaction exists but has not confirmed yet.
    #[error("value time lock transaction is still pending confirmation")]
    ValueTimeLockInPendingState,

    /// `since`/`hash` on `transactions()` must be given together or not at
    /// all; exactly one present is a bad request.
    #[error("`since` and `transaction-time-hash` must be supplied together")]
    BadRequest,

    /// The persisted `databaseVersion` is newer than this build understands.
    #[error("persisted database version {found} is newer than supported {expected}")]
    DatabaseDowngradeNotAllowed { found: String, expected: String },

    /// A `transactionNumber` was constructed (or parsed) outside its valid
    /// domain (`blockHeight <= 9e9`, `indexInBlock <= 999_999`).
    #[error("invalid transaction number: height={height} index={index}")]
    InvalidTransactionNumber { height: u64, index: u64 },

    /// Catch-all for store/IO failures that aren't duplicate-key (those are
    /// swallowed at the call site, per the idempotency contract).
    #[error("storage error: {0}")]
    Storage(String),

    /// Unexpected failure in the periodic poll loop. Logged and retried on
    /// the next tick; never aborts the process.
    #[error("unexpected observer failure: {0}")]
    Unexpected(#[from] anyhow::Error),
}

pub type ObserverResult<T> = Result<T, ObserverError>;

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ObserverError::InvalidTransactionNumberOrTimeHash => {
                (StatusCode::BAD_REQUEST, "invalid_transaction_number_or_time_hash")
            }
            ObserverError::BadRequest => {
                (StatusCode::BAD_REQUEST, "since_and_hash_must_be_supplied_together")
            }
            ObserverError::SpendingCapReached => {
                (StatusCode::BAD_REQUEST, "spending_cap_per_period_reached")
            }
            ObserverError::NotEnoughBalanceForWrite => {
                (StatusCode::BAD_REQUEST, "not_enough_balance_for_write")
            }
            ObserverError::BlockchainTimeOutOfRange => {
                (StatusCode::BAD_REQUEST, "blockchain_time_out_of_range")
            }
            ObserverError::InvalidTransactionNumber { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_transaction_number")
            }
            ObserverError::ValueTimeLockNotFound => (StatusCode::NOT_FOUND, "value_time_lock_not_found"),
            ObserverError::ValueTimeLockInPendingState => {
                (StatusCode::NOT_FOUND, "value_time_lock_in_pending_state")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({ "code": code, "message": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
