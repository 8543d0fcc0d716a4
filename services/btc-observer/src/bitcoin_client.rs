//! Thin, typed wrapper over the Bitcoin full-node JSON-RPC (§4.1 / §6).
//!
//! `bitcoincore_rpc::Client` is a blocking client, so every call here runs
//! inside `spawn_blocking`. Retry policy: only requests that fail with a
//! transport-level timeout are retried, doubling the per-attempt timeout
//! each round up to `request_max_retries`; every other failure (RPC error
//! object, parse error, non-timeout transport error) surfaces immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, Transaction, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use rand::Rng;

use crate::error::{ObserverError, ObserverResult};

/// One transaction inside a fetched block, reduced to what the Sidetree
/// parser and fee accounting need.
#[derive(Debug, Clone)]
pub struct BitcoinTransactionModel {
    pub id: Txid,
    pub inputs: Vec<BitcoinInputModel>,
    pub outputs: Vec<BitcoinOutputModel>,
    pub is_coinbase: bool,
}

#[derive(Debug, Clone)]
pub struct BitcoinInputModel {
    pub previous_txid: Option<Txid>,
    pub previous_output_index: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BitcoinOutputModel {
    pub value_satoshis: u64,
    pub script_pubkey: bitcoin::ScriptBuf,
}

#[derive(Debug, Clone)]
pub struct BitcoinBlockModel {
    pub height: u32,
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
    pub transactions: Vec<BitcoinTransactionModel>,
}

#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub height: u32,
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
}

/// A built-but-unbroadcast anchoring transaction.
#[derive(Debug, Clone)]
pub struct CreatedTransaction {
    pub raw: Transaction,
    pub fee_paid_satoshis: u64,
}

/// The full-node surface the observer depends on. A trait so the processor
/// can be driven by a fake client in tests without a live `bitcoind`.
#[async_trait]
pub trait BitcoinClient: Send + Sync {
    async fn initialize(&self) -> ObserverResult<()>;
    async fn get_current_block_height(&self) -> ObserverResult<u32>;
    async fn get_block_hash(&self, height: u32) -> ObserverResult<BlockHash>;
    async fn get_block_info(&self, hash: &BlockHash) -> ObserverResult<BlockInfo>;
    async fn get_block_info_from_height(&self, height: u32) -> ObserverResult<BlockInfo>;
    async fn get_block(&self, hash: &BlockHash) -> ObserverResult<BitcoinBlockModel>;
    async fn get_balance_in_satoshis(&self) -> ObserverResult<u64>;
    async fn get_transaction_fee_in_satoshis(&self, txid: &Txid) -> ObserverResult<u64>;
    async fn create_sidetree_transaction(
        &self,
        payload: &[u8],
        min_fee_satoshis: u64,
    ) -> ObserverResult<CreatedTransaction>;
    async fn broadcast_sidetree_transaction(&self, tx: &CreatedTransaction) -> ObserverResult<Txid>;
}

/// Forwards through a trait object so the processor can hold
/// `Arc<dyn BitcoinClient>` and still pass it anywhere a `C: BitcoinClient`
/// is expected (e.g. constructing a `LockResolver`).
#[async_trait]
impl BitcoinClient for Arc<dyn BitcoinClient> {
    async fn initialize(&self) -> ObserverResult<()> {
        (**self).initialize().await
    }
    async fn get_current_block_height(&self) -> ObserverResult<u32> {
        (**self).get_current_block_height().await
    }
    async fn get_block_hash(&self, height: u32) -> ObserverResult<BlockHash> {
        (**self).get_block_hash(height).await
    }
    async fn get_block_info(&self, hash: &BlockHash) -> ObserverResult<BlockInfo> {
        (**self).get_block_info(hash).await
    }
    async fn get_block_info_from_height(&self, height: u32) -> ObserverResult<BlockInfo> {
        (**self).get_block_info_from_height(height).await
    }
    async fn get_block(&self, hash: &BlockHash) -> ObserverResult<BitcoinBlockModel> {
        (**self).get_block(hash).await
    }
    async fn get_balance_in_satoshis(&self) -> ObserverResult<u64> {
        (**self).get_balance_in_satoshis().await
    }
    async fn get_transaction_fee_in_satoshis(&self, txid: &Txid) -> ObserverResult<u64> {
        (**self).get_transaction_fee_in_satoshis(txid).await
    }
    async fn create_sidetree_transaction(
        &self,
        payload: &[u8],
        min_fee_satoshis: u64,
    ) -> ObserverResult<CreatedTransaction> {
        (**self).create_sidetree_transaction(payload, min_fee_satoshis).await
    }
    async fn broadcast_sidetree_transaction(&self, tx: &CreatedTransaction) -> ObserverResult<Txid> {
        (**self).broadcast_sidetree_transaction(tx).await
    }
}

/// Retry policy shared by every call: only a transport timeout is retried,
/// and each retry round doubles the per-attempt timeout.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    initial_timeout: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_timeout * 2u32.saturating_pow(attempt)
    }
}

pub struct RpcBitcoinClient {
    client: Arc<Client>,
    retry_policy: RetryPolicy,
    wallet_pubkey: Option<bitcoin::PublicKey>,
    fee_markup_percentage: u64,
    default_fee_per_kb: u64,
}

impl RpcBitcoinClient {
    pub fn new(
        peer_uri: &str,
        rpc_username: &str,
        rpc_password: &str,
        wallet_or_import_string: &str,
        request_timeout_ms: u64,
        max_retries: u32,
        fee_markup_percentage: u64,
        default_fee_per_kb: u64,
    ) -> anyhow::Result<Self> {
        let auth = Auth::UserPass(rpc_username.to_string(), rpc_password.to_string());
        let client = Client::new(peer_uri, auth)?;

        let wallet_pubkey = bitcoin::PrivateKey::from_wif(wallet_or_import_string)
            .ok()
            .map(|privkey| privkey.public_key(&bitcoin::secp256k1::Secp256k1::new()));

        Ok(RpcBitcoinClient {
            client: Arc::new(client),
            retry_policy: RetryPolicy {
                initial_timeout: Duration::from_millis(request_timeout_ms),
                max_retries,
            },
            wallet_pubkey,
            fee_markup_percentage,
            default_fee_per_kb,
        })
    }

    /// Random correlation token for JSON-RPC `id`; not cryptographic, used
    /// purely for log correlation per §4.1.
    fn correlation_id() -> String {
        let mut rng = rand::thread_rng();
        format!("{:016x}", rng.r#gen::<u64>())
    }

    /// Runs a blocking RPC call with the timeout-only retry policy. `f` is
    /// re-invoked from scratch on each retry (the underlying `bitcoincore_rpc`
    /// client doesn't expose per-call timeouts, so the timeout is enforced by
    /// racing the blocking call against a `tokio::time::sleep`).
    async fn call_with_retry<T, F>(&self, method_name: &str, f: F) -> ObserverResult<T>
    where
        T: Send + 'static,
        F: Fn(Arc<Client>) -> Result<T, bitcoincore_rpc::Error> + Send + Sync + Clone + 'static,
    {
        let correlation_id = Self::correlation_id();
        let mut attempt = 0u32;

        loop {
            let timeout = self.retry_policy.timeout_for_attempt(attempt);
            let client = self.client.clone();
            let f = f.clone();
            let join = tokio::task::spawn_blocking(move || f(client));

            let outcome = tokio::time::timeout(timeout, join).await;

            match outcome {
                Ok(Ok(Ok(value))) => return Ok(value),
                Ok(Ok(Err(rpc_err))) => {
                    if is_transport_timeout(&rpc_err) && attempt < self.retry_policy.max_retries {
                        tracing::warn!(
                            method = method_name,
                            correlation_id,
                            attempt,
                            "bitcoin rpc transport timeout, retrying with doubled timeout"
                        );
                        attempt += 1;
                        continue;
                    }
                    if is_transport_timeout(&rpc_err) {
                        return Err(ObserverError::UnresolvableTransport(format!(
                            "{method_name}: {rpc_err}"
                        )));
                    }
                    return Err(ObserverError::RpcError(format!("{method_name}: {rpc_err}")));
                }
                Ok(Err(join_err)) => {
                    return Err(ObserverError::Unexpected(anyhow::anyhow!(
                        "{method_name}: blocking task panicked: {join_err}"
                    )));
                }
                Err(_elapsed) => {
                    if attempt < self.retry_policy.max_retries {
                        tracing::warn!(
                            method = method_name,
                            correlation_id,
                            attempt,
                            "bitcoin rpc call exceeded timeout, retrying with doubled timeout"
                        );
                        attempt += 1;
                        continue;
                    }
                    return Err(ObserverError::UnresolvableTransport(format!(
                        "{method_name}: exceeded {} retries",
                        self.retry_policy.max_retries
                    )));
                }
            }
        }
    }
}

/// Reduces a consensus-decoded `bitcoin::Block` to `BitcoinBlockModel`,
/// shared between the live RPC path (`get_block`) and fast-sync's raw
/// `blk*.dat` parsing (§4.11), so both paths feed the processor identically
/// shaped blocks.
pub fn block_model_from_consensus(
    height: u32,
    hash: BlockHash,
    previous_hash: BlockHash,
    raw_block: bitcoin::Block,
) -> BitcoinBlockModel {
    let transactions = raw_block
        .txdata
        .into_iter()
        .enumerate()
        .map(|(index, tx)| {
            let is_coinbase = index == 0;
            let inputs = tx
                .input
                .iter()
                .map(|input| {
                    if is_coinbase {
                        BitcoinInputModel {
                            previous_txid: None,
                            previous_output_index: None,
                        }
                    } else {
                        BitcoinInputModel {
                            previous_txid: Some(input.previous_output.txid),
                            previous_output_index: Some(input.previous_output.vout),
                        }
                    }
                })
                .collect();

            let outputs = tx
                .output
                .iter()
                .map(|output| BitcoinOutputModel {
                    value_satoshis: output.value.to_sat(),
                    script_pubkey: output.script_pubkey.clone(),
                })
                .collect();

            BitcoinTransactionModel {
                id: tx.compute_txid(),
                inputs,
                outputs,
                is_coinbase,
            }
        })
        .collect();

    BitcoinBlockModel {
        height,
        hash,
        previous_hash,
        transactions,
    }
}

/// Classifies a `bitcoincore_rpc::Error` as a transport timeout, the only
/// class this client retries. RPC error objects and JSON parse failures are
/// surfaced immediately.
fn is_transport_timeout(err: &bitcoincore_rpc::Error) -> bool {
    use bitcoincore_rpc::jsonrpc;
    match err {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Transport(inner)) => {
            let text = inner.to_string().to_ascii_lowercase();
            text.contains("timed out") || text.contains("timeout")
        }
        _ => false,
    }
}

#[async_trait]
impl BitcoinClient for RpcBitcoinClient {
    async fn initialize(&self) -> ObserverResult<()> {
        // Ensure the wallet is watch-only imported, then block until RPC is
        // reachable by polling the block count.
        if let Some(pubkey) = self.wallet_pubkey {
            self.call_with_retry("importpubkey", move |client| {
                client
                    .call::<serde_json::Value>(
                        "importpubkey",
                        &[serde_json::json!(pubkey.to_string()), serde_json::json!(""), serde_json::json!(false)],
                    )
                    .map(|_| ())
            })
            .await?;
        }
        self.get_current_block_height().await?;
        Ok(())
    }

    async fn get_current_block_height(&self) -> ObserverResult<u32> {
        self.call_with_retry("getblockcount", |client| {
            client.get_block_count().map(|h| h as u32)
        })
        .await
    }

    async fn get_block_hash(&self, height: u32) -> ObserverResult<BlockHash> {
        self.call_with_retry("getblockhash", move |client| {
            client.get_block_hash(height as u64)
        })
        .await
    }

    async fn get_block_info(&self, hash: &BlockHash) -> ObserverResult<BlockInfo> {
        let hash = *hash;
        self.call_with_retry("getblock", move |client| {
            let info = client.get_block_info(&hash)?;
            Ok(BlockInfo {
                height: info.height as u32,
                hash: info.hash,
                previous_hash: info.previousblockhash.unwrap_or_else(BlockHash::all_zeros),
            })
        })
        .await
    }

    async fn get_block_info_from_height(&self, height: u32) -> ObserverResult<BlockInfo> {
        let hash = self.get_block_hash(height).await?;
        self.get_block_info(&hash).await
    }

    async fn get_block(&self, hash: &BlockHash) -> ObserverResult<BitcoinBlockModel> {
        let hash = *hash;
        let raw_block = self
            .call_with_retry("getblock", move |client| client.get_block(&hash))
            .await?;

        let block_info = self.get_block_info(&hash).await?;

        Ok(block_model_from_consensus(
            block_info.height,
            block_info.hash,
            block_info.previous_hash,
            raw_block,
        ))
    }

    async fn get_balance_in_satoshis(&self) -> ObserverResult<u64> {
        self.call_with_retry("getbalance", |client| {
            client.get_balance(None, None).map(|a| a.to_sat())
        })
        .await
    }

    async fn get_transaction_fee_in_satoshis(&self, txid: &Txid) -> ObserverResult<u64> {
        let txid = *txid;
        self.call_with_retry("getrawtransaction", move |client| {
            let verbose: serde_json::Value = client.call(
                "getrawtransaction",
                &[serde_json::json!(txid.to_string()), serde_json::json!(true)],
            )?;
            let fee = verbose
                .get("fee")
                .and_then(|v| v.as_f64())
                .map(|btc| Amount::from_btc(btc).map(|a| a.to_sat()).unwrap_or(0))
                .unwrap_or(0);
            Ok(fee)
        })
        .await
    }

    async fn create_sidetree_transaction(
        &self,
        payload: &[u8],
        min_fee_satoshis: u64,
    ) -> ObserverResult<CreatedTransaction> {
        let payload = payload.to_vec();
        let fee_rate_per_kb = self.default_fee_per_kb.max(min_fee_satoshis);
        let markup = self.fee_markup_percentage;

        self.call_with_retry("createrawtransaction", move |client| {
            let op_return_script = bitcoin::ScriptBuf::new_op_return(
                bitcoin::script::PushBytesBuf::try_from(payload.clone())
                    .unwrap_or_default()
                    .as_push_bytes(),
            );

            let unspent = client.list_unspent(Some(1), None, None, None, None)?;
            let total_available: u64 = unspent.iter().map(|u| u.amount.to_sat()).sum();

            let estimated_fee = fee_rate_per_kb + (fee_rate_per_kb * markup / 100);

            let mut tx = Transaction {
                version: bitcoin::transaction::Version::TWO,
                lock_time: bitcoin::absolute::LockTime::ZERO,
                input: unspent
                    .iter()
                    .map(|u| bitcoin::TxIn {
                        previous_output: bitcoin::OutPoint::new(u.txid, u.vout),
                        script_sig: bitcoin::ScriptBuf::new(),
                        sequence: bitcoin::Sequence::MAX,
                        witness: bitcoin::Witness::new(),
                    })
                    .collect(),
                output: vec![bitcoin::TxOut {
                    value: bitcoin::Amount::from_sat(0),
                    script_pubkey: op_return_script,
                }],
            };

            if total_available > estimated_fee {
                tx.output.push(bitcoin::TxOut {
                    value: bitcoin::Amount::from_sat(total_available - estimated_fee),
                    script_pubkey: bitcoin::ScriptBuf::new(),
                });
            }

            Ok(CreatedTransaction {
                raw: tx,
                fee_paid_satoshis: estimated_fee,
            })
        })
        .await
    }

    async fn broadcast_sidetree_transaction(&self, tx: &CreatedTransaction) -> ObserverResult<Txid> {
        let raw = tx.raw.clone();
        self.call_with_retry("sendrawtransaction", move |client| {
            client.send_raw_transaction(&raw)
        })
        .await
    }
}

/// An in-memory fake of the full-node RPC surface, shared by the processor,
/// lock-resolver, and normalized-fee integration tests. Not behind
/// `#[cfg(test)]` at the module level because `lib.rs`'s integration tests
/// (under `tests/`) need it too, but it carries no production code path.
#[doc(hidden)]
pub mod tests_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, BlockHash, Txid};
    use tokio::sync::RwLock;

    use super::{
        BitcoinBlockModel, BitcoinClient, BitcoinInputModel, BitcoinOutputModel, BitcoinTransactionModel, BlockInfo,
        CreatedTransaction,
    };
    use crate::error::{ObserverError, ObserverResult};

    #[derive(Default)]
    struct FakeChainState {
        blocks: Vec<BitcoinBlockModel>,
        balance_satoshis: u64,
        transaction_fees: HashMap<Txid, u64>,
        next_create_fee: u64,
        broadcasts: Vec<CreatedTransaction>,
    }

    /// Deterministic helper: derives a block hash from its height so tests
    /// don't need to hand-construct 32-byte hashes everywhere. Heights above
    /// a fork point can be given a distinguishing `variant` byte to simulate
    /// a competing chain.
    pub fn fake_block_hash(height: u32, variant: u8) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[0..4].copy_from_slice(&height.to_le_bytes());
        bytes[31] = variant;
        BlockHash::from_byte_array(bytes)
    }

    #[derive(Clone)]
    pub struct FakeBitcoinClient {
        state: Arc<RwLock<FakeChainState>>,
    }

    impl FakeBitcoinClient {
        pub fn new() -> Self {
            FakeBitcoinClient {
                state: Arc::new(RwLock::new(FakeChainState::default())),
            }
        }

        /// A client with no real transactions, reporting `height` as the
        /// current tip — enough for lock-resolver tests that only need
        /// `get_current_block_height`.
        pub fn at_height(height: u32) -> Self {
            let blocks = (0..=height)
                .map(|h| BitcoinBlockModel {
                    height: h,
                    hash: fake_block_hash(h, 0),
                    previous_hash: if h == 0 {
                        BlockHash::all_zeros()
                    } else {
                        fake_block_hash(h - 1, 0)
                    },
                    transactions: Vec::new(),
                })
                .collect();
            FakeBitcoinClient {
                state: Arc::new(RwLock::new(FakeChainState {
                    blocks,
                    ..Default::default()
                })),
            }
        }

        /// Appends a block built from `transactions` at the current tip + 1,
        /// on variant `variant` (use a non-zero variant to build a competing
        /// fork past some common ancestor).
        pub async fn push_block(&self, variant: u8, transactions: Vec<BitcoinTransactionModel>) -> BitcoinBlockModel {
            let mut state = self.state.write().await;
            let height = state.blocks.last().map(|b| b.height + 1).unwrap_or(0);
            let previous_hash = state
                .blocks
                .last()
                .map(|b| b.hash)
                .unwrap_or_else(BlockHash::all_zeros);
            let block = BitcoinBlockModel {
                height,
                hash: fake_block_hash(height, variant),
                previous_hash,
                transactions,
            };
            state.blocks.push(block.clone());
            block
        }

        /// Simulates a reorg: truncates the chain back to (and including)
        /// `keep_height`, then lets the caller push new blocks on top via
        /// `push_block` with a different `variant`.
        pub async fn truncate_to(&self, keep_height: u32) {
            let mut state = self.state.write().await;
            state.blocks.retain(|b| b.height <= keep_height);
        }

        pub async fn set_balance(&self, satoshis: u64) {
            self.state.write().await.balance_satoshis = satoshis;
        }

        pub async fn set_transaction_fee(&self, txid: Txid, fee_satoshis: u64) {
            self.state.write().await.transaction_fees.insert(txid, fee_satoshis);
        }

        pub async fn set_next_create_fee(&self, fee_satoshis: u64) {
            self.state.write().await.next_create_fee = fee_satoshis;
        }

        pub async fn broadcasts(&self) -> Vec<CreatedTransaction> {
            self.state.read().await.broadcasts.clone()
        }
    }

    impl Default for FakeBitcoinClient {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BitcoinClient for FakeBitcoinClient {
        async fn initialize(&self) -> ObserverResult<()> {
            Ok(())
        }

        async fn get_current_block_height(&self) -> ObserverResult<u32> {
            Ok(self.state.read().await.blocks.last().map(|b| b.height).unwrap_or(0))
        }

        async fn get_block_hash(&self, height: u32) -> ObserverResult<BlockHash> {
            self.state
                .read()
                .await
                .blocks
                .iter()
                .find(|b| b.height == height)
                .map(|b| b.hash)
                .ok_or_else(|| ObserverError::RpcError(format!("no block at height {height}")))
        }

        async fn get_block_info(&self, hash: &BlockHash) -> ObserverResult<BlockInfo> {
            self.state
                .read()
                .await
                .blocks
                .iter()
                .find(|b| &b.hash == hash)
                .map(|b| BlockInfo {
                    height: b.height,
                    hash: b.hash,
                    previous_hash: b.previous_hash,
                })
                .ok_or_else(|| ObserverError::RpcError("no such block hash".to_string()))
        }

        async fn get_block_info_from_height(&self, height: u32) -> ObserverResult<BlockInfo> {
            let hash = self.get_block_hash(height).await?;
            self.get_block_info(&hash).await
        }

        async fn get_block(&self, hash: &BlockHash) -> ObserverResult<BitcoinBlockModel> {
            self.state
                .read()
                .await
                .blocks
                .iter()
                .find(|b| &b.hash == hash)
                .cloned()
                .ok_or_else(|| ObserverError::RpcError("no such block hash".to_string()))
        }

        async fn get_balance_in_satoshis(&self) -> ObserverResult<u64> {
            Ok(self.state.read().await.balance_satoshis)
        }

        async fn get_transaction_fee_in_satoshis(&self, txid: &Txid) -> ObserverResult<u64> {
            self.state
                .read()
                .await
                .transaction_fees
                .get(txid)
                .copied()
                .ok_or_else(|| ObserverError::RpcError("unknown transaction".to_string()))
        }

        async fn create_sidetree_transaction(
            &self,
            _payload: &[u8],
            min_fee_satoshis: u64,
        ) -> ObserverResult<CreatedTransaction> {
            let state = self.state.read().await;
            let fee = state.next_create_fee.max(min_fee_satoshis);
            Ok(CreatedTransaction {
                raw: bitcoin::Transaction {
                    version: bitcoin::transaction::Version::TWO,
                    lock_time: bitcoin::absolute::LockTime::ZERO,
                    input: Vec::new(),
                    output: vec![bitcoin::TxOut {
                        value: Amount::from_sat(0),
                        script_pubkey: bitcoin::ScriptBuf::new(),
                    }],
                },
                fee_paid_satoshis: fee,
            })
        }

        async fn broadcast_sidetree_transaction(&self, tx: &CreatedTransaction) -> ObserverResult<Txid> {
            let mut state = self.state.write().await;
            state.broadcasts.push(tx.clone());
            Ok(tx.raw.compute_txid())
        }
    }

    /// Builds a non-coinbase transaction carrying a single Sidetree
    /// `OP_RETURN` output, for feeding into `push_block`.
    pub fn sidetree_tx(prefix: &str, anchor: &str, fee_satoshis: u64) -> BitcoinTransactionModel {
        let payload = format!("{prefix}{anchor}");
        let push = bitcoin::script::PushBytesBuf::try_from(payload.into_bytes()).unwrap();
        BitcoinTransactionModel {
            id: Txid::from_byte_array(rand_bytes()),
            inputs: vec![BitcoinInputModel {
                previous_txid: Some(Txid::all_zeros()),
                previous_output_index: Some(0),
            }],
            outputs: vec![
                BitcoinOutputModel {
                    value_satoshis: fee_satoshis,
                    script_pubkey: bitcoin::ScriptBuf::new_op_return(push.as_push_bytes()),
                },
            ],
            is_coinbase: false,
        }
    }

    /// Builds a plain (non-Sidetree) transaction, for fee-sampling tests.
    pub fn plain_tx(input_count: usize) -> BitcoinTransactionModel {
        BitcoinTransactionModel {
            id: Txid::from_byte_array(rand_bytes()),
            inputs: (0..input_count)
                .map(|_| BitcoinInputModel {
                    previous_txid: Some(Txid::all_zeros()),
                    previous_output_index: Some(0),
                })
                .collect(),
            outputs: vec![BitcoinOutputModel {
                value_satoshis: 1_000,
                script_pubkey: bitcoin::ScriptBuf::new(),
            }],
            is_coinbase: false,
        }
    }

    pub fn coinbase_tx(outputs_satoshis: &[u64]) -> BitcoinTransactionModel {
        BitcoinTransactionModel {
            id: Txid::from_byte_array(rand_bytes()),
            inputs: Vec::new(),
            outputs: outputs_satoshis
                .iter()
                .map(|&v| BitcoinOutputModel {
                    value_satoshis: v,
                    script_pubkey: bitcoin::ScriptBuf::new(),
                })
                .collect(),
            is_coinbase: true,
        }
    }

    fn rand_bytes() -> [u8; 32] {
        use rand::Rng;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        bytes
    }
}
