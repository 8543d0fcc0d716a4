//! Thin `axum` HTTP front-end mapping the wire contract of spec §6 onto
//! `BitcoinProcessor`'s read/write API (§4.14). Routing and (de)serialization
//! live here; every behavior the routes expose is implemented by the core.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

use crate::error::{ObserverError, ObserverResult};
use crate::processor::BitcoinProcessor;
use crate::types::{SidetreeTransaction, TransactionNumber};

pub fn router(processor: Arc<BitcoinProcessor>) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/time", get(time_latest))
        .route("/time/:hash", get(time_at_hash))
        .route("/transactions", get(transactions).post(write_transaction))
        .route("/transactions/firstValid", post(first_valid_transaction))
        .route("/fee/:block", get(normalized_fee))
        .with_state(processor)
}

#[derive(Serialize)]
struct TimeResponse {
    time: u32,
    hash: String,
}

async fn time_latest(State(processor): State<Arc<BitcoinProcessor>>) -> ObserverResult<Json<TimeResponse>> {
    let (time, hash) = processor.time(None).await?;
    Ok(Json(TimeResponse { time, hash: hash.to_string() }))
}

async fn time_at_hash(
    State(processor): State<Arc<BitcoinProcessor>>,
    Path(hash): Path<String>,
) -> ObserverResult<Json<TimeResponse>> {
    let hash = parse_block_hash(&hash)?;
    let (time, hash) = processor.time(Some(hash)).await?;
    Ok(Json(TimeResponse { time, hash: hash.to_string() }))
}

#[derive(Deserialize)]
struct TransactionsQuery {
    since: Option<u64>,
    #[serde(rename = "transaction-time-hash")]
    transaction_time_hash: Option<String>,
}

#[derive(Serialize)]
struct TransactionWire {
    #[serde(rename = "transactionNumber")]
    transaction_number: u64,
    #[serde(rename = "transactionTime")]
    transaction_time: u32,
    #[serde(rename = "transactionTimeHash")]
    transaction_time_hash: String,
    #[serde(rename = "anchorString")]
    anchor_string: String,
    #[serde(rename = "transactionFeePaid")]
    transaction_fee_paid: u64,
    #[serde(rename = "normalizedTransactionFee")]
    normalized_transaction_fee: Option<u64>,
    writer: String,
}

impl From<SidetreeTransaction> for TransactionWire {
    fn from(tx: SidetreeTransaction) -> Self {
        TransactionWire {
            transaction_number: tx.transaction_number.value(),
            transaction_time: tx.transaction_time,
            transaction_time_hash: tx.transaction_time_hash.to_string(),
            anchor_string: tx.anchor_string,
            transaction_fee_paid: tx.transaction_fee_paid,
            normalized_transaction_fee: tx.normalized_transaction_fee,
            writer: tx.writer.as_opaque_str().to_string(),
        }
    }
}

#[derive(Serialize)]
struct TransactionsResponse {
    #[serde(rename = "moreTransactions")]
    more_transactions: bool,
    transactions: Vec<TransactionWire>,
}

async fn transactions(
    State(processor): State<Arc<BitcoinProcessor>>,
    Query(query): Query<TransactionsQuery>,
) -> ObserverResult<Json<TransactionsResponse>> {
    let since = query.since.map(TransactionNumber::from_raw);
    let since_hash = query
        .transaction_time_hash
        .as_deref()
        .map(parse_block_hash)
        .transpose()?;

    let (more_transactions, rows) = processor.transactions(since, since_hash).await?;
    Ok(Json(TransactionsResponse {
        more_transactions,
        transactions: rows.into_iter().map(TransactionWire::from).collect(),
    }))
}

#[derive(Deserialize)]
struct WriteTransactionRequest {
    #[serde(rename = "anchorString")]
    anchor_string: String,
    fee: u64,
}

#[derive(Serialize)]
struct WriteTransactionResponse {
    #[serde(rename = "transactionId")]
    transaction_id: String,
}

async fn write_transaction(
    State(processor): State<Arc<BitcoinProcessor>>,
    Json(body): Json<WriteTransactionRequest>,
) -> ObserverResult<Json<WriteTransactionResponse>> {
    let txid = processor.write_transaction(&body.anchor_string, body.fee).await?;
    Ok(Json(WriteTransactionResponse { transaction_id: txid.to_string() }))
}

#[derive(Deserialize)]
struct FirstValidCandidateWire {
    #[serde(rename = "transactionNumber")]
    transaction_number: u64,
    #[serde(rename = "transactionTimeHash")]
    transaction_time_hash: String,
}

#[derive(Deserialize)]
struct FirstValidRequest {
    transactions: Vec<FirstValidCandidateWire>,
}

async fn first_valid_transaction(
    State(processor): State<Arc<BitcoinProcessor>>,
    Json(body): Json<FirstValidRequest>,
) -> ObserverResult<axum::response::Response> {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let mut candidates = Vec::with_capacity(body.transactions.len());
    for candidate in &body.transactions {
        candidates.push((
            TransactionNumber::from_raw(candidate.transaction_number),
            parse_block_hash(&candidate.transaction_time_hash)?,
        ));
    }

    match processor.first_valid_transaction(&candidates).await? {
        Some(tx) => Ok(Json(TransactionWire::from(tx)).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[derive(Serialize)]
struct FeeResponse {
    #[serde(rename = "normalizedTransactionFee")]
    normalized_transaction_fee: u64,
}

async fn normalized_fee(
    State(processor): State<Arc<BitcoinProcessor>>,
    Path(block): Path<u32>,
) -> ObserverResult<Json<FeeResponse>> {
    let fee = processor.get_normalized_fee(block).await?;
    Ok(Json(FeeResponse { normalized_transaction_fee: fee }))
}

#[derive(Serialize)]
struct VersionResponse {
    name: &'static str,
    version: &'static str,
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn parse_block_hash(raw: &str) -> ObserverResult<BlockHash> {
    BlockHash::from_str(raw).map_err(|_| ObserverError::BadRequest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_block_hash_rejects_garbage() {
        assert!(parse_block_hash("not-a-hash").is_err());
    }

    #[test]
    fn parse_block_hash_accepts_all_zero_hash() {
        let hash = parse_block_hash(
            "0000000000000000000000000000000000000000000000000000000000000000000000000000",
        );
        // 82 hex chars is not a valid 32-byte hash; this asserts the parser
        // rejects malformed lengths rather than panicking.
        assert!(hash.is_err());
    }
}
