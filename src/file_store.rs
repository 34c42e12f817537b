// src/file_store.rs
use crate::error::{Error, Result, StorageError};
use crate::models::{Lot, LotId, NewLot};
use crate::store::{plan_batch, sort_fifo, DecrementBatch, LotStore};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Table {
    next_id: LotId,
    lots: Vec<Lot>,
}

/// Embedded lot table. Reads come from memory; every mutation rewrites the
/// JSON snapshot (temp file + rename) before it becomes visible.
pub struct FileLotStore {
    path: Option<PathBuf>,
    table: RwLock<Table>,
}

impl FileLotStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::from)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::default(),
            Err(e) => return Err(StorageError::from(e).into()),
        };
        info!(
            "Opened lot store at {} with {} lots.",
            path.display(),
            table.lots.len()
        );
        Ok(FileLotStore {
            path: Some(path),
            table: RwLock::new(table),
        })
    }

    /// Non-durable variant, handy for tests.
    pub fn in_memory() -> Self {
        FileLotStore {
            path: None,
            table: RwLock::new(Table::default()),
        }
    }

    async fn persist(&self, table: &Table) -> std::result::Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(table)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted {} lots to {}", table.lots.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl LotStore for FileLotStore {
    async fn append(&self, lot: NewLot) -> Result<Lot> {
        if !(lot.shares.is_finite() && lot.shares >= 0.0) || !lot.purchase_price.is_finite() {
            return Err(Error::InvalidInput(format!(
                "lot for {} has shares {} and price {}",
                lot.symbol, lot.shares, lot.purchase_price
            )));
        }
        let mut table = self.table.write().await;
        let stored = lot.into_lot(table.next_id);
        table.next_id += 1;
        table.lots.push(stored.clone());
        if let Err(e) = self.persist(&table).await {
            table.lots.pop();
            table.next_id -= 1;
            return Err(e.into());
        }
        Ok(stored)
    }

    async fn active_lots(&self, symbol: &str) -> Result<Vec<Lot>> {
        let table = self.table.read().await;
        let mut lots: Vec<Lot> = table
            .lots
            .iter()
            .filter(|l| l.symbol == symbol && l.is_active())
            .cloned()
            .collect();
        sort_fifo(&mut lots);
        Ok(lots)
    }

    async fn all_active_lots(&self) -> Result<Vec<Lot>> {
        let table = self.table.read().await;
        let mut lots: Vec<Lot> = table.lots.iter().filter(|l| l.is_active()).cloned().collect();
        sort_fifo(&mut lots);
        Ok(lots)
    }

    async fn all_lots(&self) -> Result<Vec<Lot>> {
        let table = self.table.read().await;
        let mut lots = table.lots.clone();
        sort_fifo(&mut lots);
        Ok(lots)
    }

    async fn commit(&self, batch: DecrementBatch) -> Result<()> {
        let mut table = self.table.write().await;
        let next = plan_batch(&table.lots, &batch)?;

        let mut previous = Vec::with_capacity(next.len());
        for lot in table.lots.iter_mut() {
            if let Some(shares) = next.get(&lot.id) {
                previous.push((lot.id, lot.shares));
                lot.shares = *shares;
            }
        }

        if let Err(e) = self.persist(&table).await {
            for lot in table.lots.iter_mut() {
                if let Some((_, shares)) = previous.iter().find(|(id, _)| *id == lot.id) {
                    lot.shares = *shares;
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HoldingKind;
    use crate::store::Decrement;
    use chrono::{TimeZone, Utc};

    fn new_lot(symbol: &str, shares: f64, day: u32) -> NewLot {
        NewLot {
            symbol: symbol.into(),
            shares,
            purchase_price: 10.0,
            purchased_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            holding_kind: HoldingKind::Equity,
            start_of_year_price: Some(9.5),
        }
    }

    #[tokio::test]
    async fn active_lots_are_fifo_and_skip_inert() {
        let store = FileLotStore::in_memory();
        let late = store.append(new_lot("AAPL", 1.0, 5)).await.unwrap();
        let early = store.append(new_lot("AAPL", 2.0, 1)).await.unwrap();
        store.append(new_lot("MSFT", 3.0, 1)).await.unwrap();

        let lots = store.active_lots("AAPL").await.unwrap();
        assert_eq!(lots.iter().map(|l| l.id).collect::<Vec<_>>(), vec![early.id, late.id]);

        store.decrement(&early, 2.0).await.unwrap();
        let lots = store.active_lots("AAPL").await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(store.all_lots().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_commit_leaves_table_untouched() {
        let store = FileLotStore::in_memory();
        let a = store.append(new_lot("AAPL", 5.0, 1)).await.unwrap();
        let b = store.append(new_lot("AAPL", 5.0, 2)).await.unwrap();
        let before = store.all_lots().await.unwrap();

        let batch = vec![Decrement::of(&a, 5.0), Decrement::of(&b, 6.0)];
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(store.all_lots().await.unwrap(), before);
    }

    #[tokio::test]
    async fn append_rejects_negative_shares() {
        let store = FileLotStore::in_memory();
        assert!(store.append(new_lot("AAPL", -1.0, 1)).await.is_err());
        assert!(store.all_lots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");

        let store = FileLotStore::open(&path).await.unwrap();
        let lot = store.append(new_lot("aapl", 4.0, 1)).await.unwrap();
        store.decrement(&lot, 1.5).await.unwrap();
        drop(store);

        let reopened = FileLotStore::open(&path).await.unwrap();
        let lots = reopened.all_lots().await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].shares, 2.5);
        assert_eq!(lots[0].start_of_year_price, Some(9.5));

        let next = reopened.append(new_lot("aapl", 1.0, 2)).await.unwrap();
        assert_eq!(next.id, lot.id + 1);
    }

    #[tokio::test]
    async fn unwritable_snapshot_rolls_back_memory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("data");
        std::fs::create_dir(&sub).unwrap();

        let store = FileLotStore::open(sub.join("portfolio.json")).await.unwrap();
        let lot = store.append(new_lot("AAPL", 5.0, 1)).await.unwrap();
        std::fs::remove_dir_all(&sub).unwrap();

        let err = store.decrement(&lot, 2.0).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.active_lots("AAPL").await.unwrap()[0].shares, 5.0);

        assert!(store.append(new_lot("AAPL", 1.0, 2)).await.is_err());
        let lots = store.all_lots().await.unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].shares, 5.0);
    }
}
