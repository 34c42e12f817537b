// src/store.rs
use crate::error::{Error, Result};
use crate::models::{Lot, LotId, NewLot, SHARE_EPSILON};
use async_trait::async_trait;
use std::collections::HashMap;

/// Reduce one lot's shares by `amount`. `symbol` is the lot's partition, so
/// stores can read back only the rows a batch touches.
#[derive(Debug, Clone, PartialEq)]
pub struct Decrement {
    pub symbol: String,
    pub lot_id: LotId,
    pub amount: f64,
}

impl Decrement {
    pub fn of(lot: &Lot, amount: f64) -> Self {
        Decrement {
            symbol: lot.symbol.clone(),
            lot_id: lot.id,
            amount,
        }
    }
}

/// Decrements that must land together or not at all.
pub type DecrementBatch = Vec<Decrement>;

/// Durable home of every lot. Implementations own the records; callers only
/// ever see clones.
#[async_trait]
pub trait LotStore: Send + Sync {
    /// Persists a new lot and returns it with its assigned id.
    async fn append(&self, lot: NewLot) -> Result<Lot>;

    /// Active lots for `symbol`, oldest purchase first, ties by id.
    async fn active_lots(&self, symbol: &str) -> Result<Vec<Lot>>;

    /// Active lots across every symbol, in the same order as `active_lots`.
    async fn all_active_lots(&self) -> Result<Vec<Lot>>;

    /// Every lot ever recorded, inert ones included.
    async fn all_lots(&self) -> Result<Vec<Lot>>;

    /// Applies the whole batch atomically. Fails with `InvariantViolation`
    /// before touching anything if any decrement exceeds the lot's shares.
    async fn commit(&self, batch: DecrementBatch) -> Result<()>;

    async fn decrement(&self, lot: &Lot, amount: f64) -> Result<()> {
        self.commit(vec![Decrement::of(lot, amount)]).await
    }
}

/// FIFO order: purchase time, then insertion order.
pub fn sort_fifo(lots: &mut [Lot]) {
    lots.sort_by(|a, b| {
        a.purchased_at
            .cmp(&b.purchased_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Computes the post-commit share count for every lot named in `batch`.
/// Decrements that target the same lot accumulate.
pub fn plan_batch<'a, I>(lots: I, batch: &[Decrement]) -> Result<HashMap<LotId, f64>>
where
    I: IntoIterator<Item = &'a Lot>,
{
    let current: HashMap<LotId, (&str, f64)> = lots
        .into_iter()
        .map(|l| (l.id, (l.symbol.as_str(), l.shares)))
        .collect();
    let mut next: HashMap<LotId, f64> = HashMap::new();

    for d in batch {
        if !d.amount.is_finite() || d.amount < 0.0 {
            return Err(Error::InvariantViolation(format!(
                "decrement of {} on lot {} is not a non-negative amount",
                d.amount, d.lot_id
            )));
        }
        let (symbol, shares) = *current.get(&d.lot_id).ok_or_else(|| {
            Error::InvariantViolation(format!("lot {} does not exist", d.lot_id))
        })?;
        if symbol != d.symbol {
            return Err(Error::InvariantViolation(format!(
                "lot {} belongs to {}, not {}",
                d.lot_id, symbol, d.symbol
            )));
        }
        let available = next.get(&d.lot_id).copied().unwrap_or(shares);
        if d.amount > available + SHARE_EPSILON {
            return Err(Error::InvariantViolation(format!(
                "cannot take {} shares from lot {} holding {}",
                d.amount, d.lot_id, available
            )));
        }
        let remaining = available - d.amount;
        next.insert(d.lot_id, if remaining < SHARE_EPSILON { 0.0 } else { remaining });
    }

    Ok(next)
}
