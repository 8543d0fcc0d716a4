//! Resolves whether a value-time-lock transaction's collateral output is
//! still time-locked, by inspecting its `OP_CHECKLOCKTIMEVERIFY` redeem
//! script against the current chain tip (§2 row / §4.15 **[ADDED]**).
//!
//! This does not construct redeem scripts, sign spends, or decide
//! renewal/bidding policy — that's Sidetree Core's job. It only answers
//! "is this lock still active right now."

use bitcoin::blockdata::opcodes::all::OP_CLTV;
use bitcoin::blockdata::script::Instruction;
use bitcoin::Txid;

use crate::bitcoin_client::BitcoinClient;
use crate::error::{ObserverError, ObserverResult};
use crate::lock::store::LockTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The redeem script's CLTV height is still above the current tip.
    Locked { unlock_height: u32 },
    /// The CLTV height has passed; the collateral can be reclaimed.
    Unlockable,
    /// The referenced lock transaction isn't confirmed, or doesn't exist.
    NotFound,
}

pub struct LockResolver<C> {
    client: C,
}

impl<C: BitcoinClient> LockResolver<C> {
    pub fn new(client: C) -> Self {
        LockResolver { client }
    }

    /// Resolves the current status of `lock`, using the redeem script
    /// stored alongside the lock transaction rather than fetching it back
    /// from the chain (the observer created it, so it already has it).
    pub async fn resolve(&self, lock: &LockTransaction) -> ObserverResult<LockStatus> {
        let tip = self.client.get_current_block_height().await?;

        match cltv_unlock_height(&lock.redeem_script) {
            Some(unlock_height) if unlock_height > tip => Ok(LockStatus::Locked { unlock_height }),
            Some(_) => Ok(LockStatus::Unlockable),
            None => Ok(LockStatus::NotFound),
        }
    }

    /// Confirms the lock transaction itself is actually on-chain (not just
    /// broadcast) by checking it has a recorded fee; a mempool-only
    /// transaction has none to query yet.
    pub async fn is_confirmed(&self, txid: &Txid) -> ObserverResult<bool> {
        match self.client.get_transaction_fee_in_satoshis(txid).await {
            Ok(_) => Ok(true),
            Err(ObserverError::RpcError(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

/// Extracts the unlock height from a `<height> OP_CHECKLOCKTIMEVERIFY ...`
/// redeem script, if that's the script's shape.
fn cltv_unlock_height(redeem_script: &bitcoin::ScriptBuf) -> Option<u32> {
    let mut instructions = redeem_script.instructions();

    let height = match instructions.next()? {
        Ok(Instruction::PushBytes(bytes)) => {
            let mut buf = [0u8; 4];
            let data = bytes.as_bytes();
            if data.len() > 4 {
                return None;
            }
            buf[..data.len()].copy_from_slice(data);
            u32::from_le_bytes(buf)
        }
        _ => return None,
    };

    match instructions.next()? {
        Ok(Instruction::Op(op)) if op == OP_CLTV => Some(height),
        _ => None,
    }
}
