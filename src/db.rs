// src/db.rs
use crate::error::{Result, StorageError};
use crate::models::{HoldingKind, Lot, LotId, NewLot};
use crate::store::{plan_batch, sort_fifo, DecrementBatch, LotStore};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{error, info};
use scylla::batch::Batch;
use scylla::frame::response::result::Row;
use scylla::{query::Query, Session, SessionBuilder};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

const SELECT_LOTS: &str = "SELECT symbol, purchased_ms, id, shares, purchase_price, holding_kind, start_of_year_price FROM lot_tracker.lots";

pub async fn init(node: &str) -> Result<Session> {
    let session = SessionBuilder::new()
        .known_node(node)
        .build()
        .await
        .map_err(StorageError::from)?;

    session.query("CREATE KEYSPACE IF NOT EXISTS lot_tracker WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await.map_err(StorageError::from)?;
    session.query("CREATE TABLE IF NOT EXISTS lot_tracker.lots (symbol TEXT, purchased_ms BIGINT, id BIGINT, shares DOUBLE, purchase_price DOUBLE, holding_kind TEXT, start_of_year_price DOUBLE, PRIMARY KEY (symbol, purchased_ms, id)) WITH CLUSTERING ORDER BY (purchased_ms ASC, id ASC)", &[]).await.map_err(StorageError::from)?;

    info!("Successfully connected to ScyllaDB at {}.", node);
    Ok(session)
}

/// Lot table in ScyllaDB. Ids come from a process-local counter seeded from
/// the table, so only one writer process may run at a time.
pub struct ScyllaLotStore {
    session: Session,
    next_id: AtomicU64,
}

impl ScyllaLotStore {
    pub async fn new(session: Session) -> Result<Self> {
        let result = session
            .query("SELECT id FROM lot_tracker.lots", &[])
            .await
            .map_err(StorageError::from)?;
        let max_id = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| row.columns[0].as_ref().and_then(|v| v.as_bigint()))
            .max();
        let next_id = max_id.map(|id| id as u64 + 1).unwrap_or(0);
        Ok(ScyllaLotStore {
            session,
            next_id: AtomicU64::new(next_id),
        })
    }

    async fn select(&self, query: Query, symbol: Option<&str>) -> Result<Vec<Lot>> {
        let result = match symbol {
            Some(symbol) => self.session.query(query, (symbol,)).await,
            None => self.session.query(query, &[]).await,
        }
        .map_err(StorageError::from)?;

        let mut lots: Vec<Lot> = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| match parse_row(&row) {
                Some(lot) => Some(lot),
                None => {
                    error!("Skipping malformed lot row: {:?}", row.columns);
                    None
                }
            })
            .collect();
        sort_fifo(&mut lots);
        Ok(lots)
    }

    /// One partition, inert lots included.
    async fn lots_of(&self, symbol: &str) -> Result<Vec<Lot>> {
        let query = Query::new(format!("{} WHERE symbol = ?", SELECT_LOTS));
        self.select(query, Some(symbol)).await
    }
}

fn parse_row(row: &Row) -> Option<Lot> {
    let col = |i: usize| row.columns.get(i).and_then(|c| c.as_ref());
    let symbol = col(0)?.as_text()?.to_string();
    let purchased_ms = col(1)?.as_bigint()?;
    let id = col(2)?.as_bigint()?;
    let shares = col(3)?.as_double()?;
    let purchase_price = col(4)?.as_double()?;
    let holding_kind = HoldingKind::parse(col(5)?.as_text()?)?;
    let start_of_year_price = col(6).and_then(|v| v.as_double());
    Some(Lot {
        id: id as LotId,
        symbol,
        shares,
        purchase_price,
        purchased_at: Utc.timestamp_millis_opt(purchased_ms).single()?,
        holding_kind,
        start_of_year_price,
    })
}

#[async_trait]
impl LotStore for ScyllaLotStore {
    async fn append(&self, lot: NewLot) -> Result<Lot> {
        if !(lot.shares.is_finite() && lot.shares >= 0.0) || !lot.purchase_price.is_finite() {
            return Err(crate::error::Error::InvalidInput(format!(
                "lot for {} has shares {} and price {}",
                lot.symbol, lot.shares, lot.purchase_price
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = lot.into_lot(id);
        let query = Query::new("INSERT INTO lot_tracker.lots (symbol, purchased_ms, id, shares, purchase_price, holding_kind, start_of_year_price) VALUES (?, ?, ?, ?, ?, ?, ?)");
        self.session
            .query(
                query,
                (
                    stored.symbol.as_str(),
                    stored.purchased_at.timestamp_millis(),
                    stored.id as i64,
                    stored.shares,
                    stored.purchase_price,
                    stored.holding_kind.as_str(),
                    stored.start_of_year_price,
                ),
            )
            .await
            .map_err(StorageError::from)?;
        Ok(stored)
    }

    async fn active_lots(&self, symbol: &str) -> Result<Vec<Lot>> {
        let lots = self.lots_of(symbol).await?;
        Ok(lots.into_iter().filter(|l| l.is_active()).collect())
    }

    async fn all_active_lots(&self) -> Result<Vec<Lot>> {
        let lots = self.all_lots().await?;
        Ok(lots.into_iter().filter(|l| l.is_active()).collect())
    }

    async fn all_lots(&self) -> Result<Vec<Lot>> {
        self.select(Query::new(SELECT_LOTS), None).await
    }

    /// A logged batch so that every decrement of one disposal lands together.
    async fn commit(&self, batch: DecrementBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let symbols: BTreeSet<&str> = batch.iter().map(|d| d.symbol.as_str()).collect();
        let mut lots = Vec::new();
        for symbol in symbols {
            lots.extend(self.lots_of(symbol).await?);
        }
        let next = plan_batch(&lots, &batch)?;

        let mut statements = Batch::default();
        let mut values = Vec::with_capacity(next.len());
        for lot in lots.iter().filter(|l| next.contains_key(&l.id)) {
            statements.append_statement(
                "UPDATE lot_tracker.lots SET shares = ? WHERE symbol = ? AND purchased_ms = ? AND id = ?",
            );
            values.push((
                next[&lot.id],
                lot.symbol.clone(),
                lot.purchased_at.timestamp_millis(),
                lot.id as i64,
            ));
        }

        self.session
            .batch(&statements, values)
            .await
            .map_err(StorageError::from)?;
        info!("Committed {} lot decrements.", batch.len());
        Ok(())
    }
}
