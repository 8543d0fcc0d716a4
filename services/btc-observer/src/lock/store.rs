use async_trait::async_trait;
use bitcoin::Txid;
use tokio::sync::RwLock;

use crate::error::ObserverResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Create,
    Relock,
    ReturnToWallet,
}

/// One value-time-lock transaction this node has broadcast, append-only.
#[derive(Debug, Clone)]
pub struct LockTransaction {
    pub transaction_id: Txid,
    pub redeem_script: bitcoin::ScriptBuf,
    pub create_transaction_time: u32,
    pub lock_type: LockType,
}

/// Append-only store of this node's own lock transactions, separate from
/// `TransactionStore` (that one tracks Sidetree anchors, this one tracks
/// the node's collateral).
#[async_trait]
pub trait LockTransactionStore: Send + Sync {
    async fn add(&self, entry: LockTransaction) -> ObserverResult<()>;
    async fn get(&self, transaction_id: &Txid) -> ObserverResult<Option<LockTransaction>>;
    async fn latest(&self) -> ObserverResult<Option<LockTransaction>>;
}

#[derive(Default)]
pub struct InMemoryLockTransactionStore {
    rows: RwLock<Vec<LockTransaction>>,
}

impl InMemoryLockTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockTransactionStore for InMemoryLockTransactionStore {
    async fn add(&self, entry: LockTransaction) -> ObserverResult<()> {
        self.rows.write().await.push(entry);
        Ok(())
    }

    async fn get(&self, transaction_id: &Txid) -> ObserverResult<Option<LockTransaction>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|row| &row.transaction_id == transaction_id)
            .cloned())
    }

    async fn latest(&self) -> ObserverResult<Option<LockTransaction>> {
        Ok(self.rows.read().await.last().cloned())
    }
}

impl Clone for LockTransaction {
    fn clone(&self) -> Self {
        LockTransaction {
            transaction_id: self.transaction_id,
            redeem_script: self.redeem_script.clone(),
            create_transaction_time: self.create_transaction_time,
            lock_type: self.lock_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_returns_most_recently_added() {
        let store = InMemoryLockTransactionStore::new();
        store
            .add(LockTransaction {
                transaction_id: Txid::all_zeros(),
                redeem_script: bitcoin::ScriptBuf::new(),
                create_transaction_time: 1,
                lock_type: LockType::Create,
            })
            .await
            .unwrap();
        store
            .add(LockTransaction {
                transaction_id: Txid::from_byte_array([9u8; 32]),
                redeem_script: bitcoin::ScriptBuf::new(),
                create_transaction_time: 2,
                lock_type: LockType::Relock,
            })
            .await
            .unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.create_transaction_time, 2);
    }
}
