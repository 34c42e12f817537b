// src/portfolio.rs
use crate::error::{Error, Result};
use crate::models::{
    AddedLot, Disposal, HoldingKind, Lot, LotView, NewLot, PortfolioPosition, PortfolioSummary,
    SHARE_EPSILON,
};
use crate::store::{Decrement, LotStore};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything `add` needs besides the required triple.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub holding_kind: HoldingKind,
    pub purchased_at: Option<DateTime<Utc>>,
    pub start_of_year_price: Option<f64>,
}

/// Lot accounting over a `LotStore`. Mutations are serialized by `gate`;
/// reads share it so they never see half of a disposal.
pub struct PortfolioManager {
    store: Arc<dyn LotStore>,
    gate: RwLock<()>,
}

pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(Error::InvalidInput("Symbol must not be empty".into()));
    }
    Ok(symbol)
}

/// Amounts under `SHARE_EPSILON` would be snapped to zero by the lot walk,
/// so they are refused here rather than booked as a no-op.
fn validate_shares(shares: f64) -> Result<()> {
    if !shares.is_finite() || shares < SHARE_EPSILON {
        return Err(Error::InvalidInput(format!(
            "Shares must be at least {}, got {}",
            SHARE_EPSILON, shares
        )));
    }
    Ok(())
}

fn validate_price(label: &str, price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::InvalidInput(format!(
            "{} must not be negative, got {}",
            label, price
        )));
    }
    Ok(())
}

impl PortfolioManager {
    pub fn new(store: Arc<dyn LotStore>) -> Self {
        PortfolioManager {
            store,
            gate: RwLock::new(()),
        }
    }

    pub async fn add(
        &self,
        symbol: &str,
        shares: f64,
        price: f64,
        options: AddOptions,
    ) -> Result<AddedLot> {
        let symbol = normalize_symbol(symbol)?;
        validate_shares(shares)?;
        validate_price("Price", price)?;
        if let Some(soy) = options.start_of_year_price {
            validate_price("Start of year price", soy)?;
        }

        let _write = self.gate.write().await;
        let lot = self
            .store
            .append(NewLot {
                symbol: symbol.clone(),
                shares,
                purchase_price: price,
                purchased_at: options.purchased_at.unwrap_or_else(Utc::now),
                holding_kind: options.holding_kind,
                start_of_year_price: options.start_of_year_price,
            })
            .await?;

        info!("Added lot {} for {}: {} @ {:.2}", lot.id, symbol, shares, price);
        Ok(AddedLot {
            message: format!("Added {} shares of {} at ${:.2}", shares, symbol, price),
            symbol,
            shares,
            price,
        })
    }

    /// Sells `shares` oldest-lot-first and returns the realized profit.
    /// Either every touched lot is decremented or none is.
    pub async fn dispose(&self, symbol: &str, shares: f64, sell_price: f64) -> Result<Disposal> {
        let symbol = normalize_symbol(symbol)?;
        validate_shares(shares)?;
        validate_price("Price", sell_price)?;

        let _write = self.gate.write().await;
        let lots = self.store.active_lots(&symbol).await?;
        if lots.is_empty() {
            return Err(Error::NotFound(symbol));
        }

        let (batch, profit, remaining) = plan_fifo(&lots, shares, sell_price);
        if remaining > SHARE_EPSILON {
            let available: f64 = lots.iter().map(|l| l.shares).sum();
            warn!(
                "Rejected sale of {} {}: only {} available",
                shares, symbol, available
            );
            return Err(Error::InsufficientShares {
                symbol,
                requested: shares,
                available,
            });
        }

        let touched = batch.len();
        self.store.commit(batch).await?;

        info!(
            "Sold {} {} @ {:.2} across {} lots, profit {:.2}",
            shares, symbol, sell_price, touched, profit
        );
        Ok(Disposal {
            message: format!("Sold {} shares of {} at ${:.2}", shares, symbol, sell_price),
            symbol,
            shares,
            price: sell_price,
            profit,
        })
    }

    /// Positions keyed by symbol. An empty portfolio is an empty map.
    pub async fn summarize(&self) -> Result<PortfolioSummary> {
        let _read = self.gate.read().await;
        let lots = self.store.all_active_lots().await?;
        Ok(aggregate(lots))
    }

    /// Every lot ever recorded, inert ones included.
    pub async fn history(&self) -> Result<Vec<Lot>> {
        let _read = self.gate.read().await;
        self.store.all_lots().await
    }
}

/// Walks `lots` (already FIFO-ordered) and returns the decrements, the
/// realized profit and whatever could not be covered.
fn plan_fifo(lots: &[Lot], shares: f64, sell_price: f64) -> (Vec<Decrement>, f64, f64) {
    let mut remaining = shares;
    let mut profit = 0.0;
    let mut batch = Vec::new();

    for lot in lots {
        if remaining <= 0.0 {
            break;
        }
        let take = remaining.min(lot.shares);
        profit += take * (sell_price - lot.purchase_price);
        remaining -= take;
        batch.push(Decrement::of(lot, take));
    }

    (batch, profit, remaining)
}

/// Groups FIFO-ordered active lots into positions.
fn aggregate(lots: Vec<Lot>) -> PortfolioSummary {
    let mut by_symbol: BTreeMap<String, Vec<Lot>> = BTreeMap::new();
    for lot in lots.into_iter().filter(|l| l.is_active()) {
        by_symbol.entry(lot.symbol.clone()).or_default().push(lot);
    }

    by_symbol
        .into_iter()
        .map(|(symbol, lots)| (symbol, position(&lots)))
        .collect()
}

fn position(lots: &[Lot]) -> PortfolioPosition {
    let total_shares: f64 = lots.iter().map(|l| l.shares).sum();
    let total_cost: f64 = lots.iter().map(|l| l.shares * l.purchase_price).sum();
    let average_price = if total_shares > 0.0 {
        total_cost / total_shares
    } else {
        0.0
    };
    let start_of_year_total = lots
        .iter()
        .filter_map(|l| l.start_of_year_price.map(|p| l.shares * p))
        .sum();

    PortfolioPosition {
        total_shares,
        total_cost,
        average_price,
        holding_type: representative_kind(lots),
        start_of_year_total,
        lots: lots
            .iter()
            .map(|l| LotView {
                shares: l.shares,
                purchase_price: l.purchase_price,
                purchase_date: l.purchased_at,
                start_of_year_price: l.start_of_year_price,
            })
            .collect(),
    }
}

/// Majority by shares; a tie goes to the oldest lot's kind.
fn representative_kind(lots: &[Lot]) -> HoldingKind {
    let cash: f64 = lots
        .iter()
        .filter(|l| l.holding_kind == HoldingKind::Cash)
        .map(|l| l.shares)
        .sum();
    let equity: f64 = lots
        .iter()
        .filter(|l| l.holding_kind == HoldingKind::Equity)
        .map(|l| l.shares)
        .sum();

    if cash > equity {
        HoldingKind::Cash
    } else if equity > cash {
        HoldingKind::Equity
    } else {
        lots.first().map(|l| l.holding_kind).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::FileLotStore;
    use chrono::{Duration, TimeZone};

    fn manager() -> PortfolioManager {
        PortfolioManager::new(Arc::new(FileLotStore::in_memory()))
    }

    fn day(n: i64) -> AddOptions {
        AddOptions {
            purchased_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)),
            ..AddOptions::default()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn fifo_disposal_splits_partial_lot() {
        let pm = manager();
        pm.add("abc", 10.0, 1.0, day(1)).await.unwrap();
        pm.add("ABC", 10.0, 2.0, day(2)).await.unwrap();
        pm.add("Abc", 10.0, 3.0, day(3)).await.unwrap();

        let sale = pm.dispose("abc", 15.0, 5.0).await.unwrap();
        assert!(approx(sale.profit, 55.0));

        let summary = pm.summarize().await.unwrap();
        let pos = &summary["ABC"];
        let shares: Vec<f64> = pos.lots.iter().map(|l| l.shares).collect();
        assert_eq!(shares, vec![5.0, 10.0]);
        assert_eq!(pos.lots[0].purchase_price, 2.0);
        assert_eq!(pos.lots[1].purchase_price, 3.0);
    }

    #[tokio::test]
    async fn average_price_tracks_remaining_lots() {
        let pm = manager();
        pm.add("XYZ", 10.0, 10.0, day(1)).await.unwrap();
        pm.add("XYZ", 10.0, 20.0, day(2)).await.unwrap();
        assert!(approx(pm.summarize().await.unwrap()["XYZ"].average_price, 15.0));

        pm.dispose("XYZ", 5.0, 12.0).await.unwrap();
        let pos = &pm.summarize().await.unwrap()["XYZ"];
        assert!(approx(pos.total_shares, 15.0));
        assert!(approx(pos.total_cost, 250.0));
        assert!((pos.average_price - 16.6667).abs() < 1e-3);
    }

    #[tokio::test]
    async fn insufficient_shares_changes_nothing() {
        let pm = manager();
        pm.add("AAPL", 4.0, 100.0, day(1)).await.unwrap();
        pm.add("AAPL", 4.0, 110.0, day(2)).await.unwrap();
        let before = pm.history().await.unwrap();

        let err = pm.dispose("aapl", 9.0, 120.0).await.unwrap_err();
        match err {
            Error::InsufficientShares { available, requested, .. } => {
                assert!(approx(available, 8.0));
                assert!(approx(requested, 9.0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pm.history().await.unwrap(), before);
    }

    #[tokio::test]
    async fn disposal_without_lots_is_not_found() {
        let pm = manager();
        assert!(matches!(
            pm.dispose("TSLA", 1.0, 1.0).await,
            Err(Error::NotFound(s)) if s == "TSLA"
        ));

        pm.add("TSLA", 1.0, 1.0, day(1)).await.unwrap();
        pm.dispose("TSLA", 1.0, 1.0).await.unwrap();
        assert!(matches!(pm.dispose("TSLA", 1.0, 1.0).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_mutation() {
        let pm = manager();
        assert!(matches!(pm.add("AAPL", 0.0, 1.0, day(1)).await, Err(Error::InvalidInput(_))));
        assert!(matches!(pm.add("AAPL", 1.0, -1.0, day(1)).await, Err(Error::InvalidInput(_))));
        assert!(matches!(pm.add("  ", 1.0, 1.0, day(1)).await, Err(Error::InvalidInput(_))));
        assert!(matches!(pm.add("AAPL", f64::NAN, 1.0, day(1)).await, Err(Error::InvalidInput(_))));
        let bad_soy = AddOptions {
            start_of_year_price: Some(-3.0),
            ..day(1)
        };
        assert!(matches!(pm.add("AAPL", 1.0, 1.0, bad_soy).await, Err(Error::InvalidInput(_))));
        assert!(matches!(pm.dispose("AAPL", -1.0, 1.0).await, Err(Error::InvalidInput(_))));
        assert!(pm.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dust_amounts_are_rejected_for_add_and_dispose() {
        let pm = manager();
        assert!(matches!(pm.add("AAA", 1e-10, 1.0, day(1)).await, Err(Error::InvalidInput(_))));
        assert!(pm.history().await.unwrap().is_empty());

        pm.add("AAA", 2.0, 1.0, day(1)).await.unwrap();
        let before = pm.history().await.unwrap();
        assert!(matches!(pm.dispose("AAA", 1e-10, 5.0).await, Err(Error::InvalidInput(_))));
        assert_eq!(pm.history().await.unwrap(), before);

        let smallest = pm.dispose("AAA", SHARE_EPSILON, 5.0).await.unwrap();
        assert!(smallest.profit > 0.0);
        assert!(pm.summarize().await.unwrap()["AAA"].total_shares < 2.0);
    }

    #[tokio::test]
    async fn concurrent_disposals_never_oversell() {
        let pm = Arc::new(manager());
        pm.add("RACE", 10.0, 1.0, day(1)).await.unwrap();

        let (a, b) = tokio::join!(
            pm.dispose("RACE", 6.0, 2.0),
            pm.dispose("RACE", 6.0, 2.0)
        );
        let outcomes = [a, b];
        let sold: f64 = outcomes.iter().filter_map(|r| r.as_ref().ok()).map(|d| d.shares).sum();
        let rejected = outcomes
            .iter()
            .filter(|r| matches!(r, Err(Error::InsufficientShares { .. })))
            .count();
        assert_eq!(rejected, 1);
        assert!(approx(sold, 6.0));

        let remaining = pm.summarize().await.unwrap()["RACE"].total_shares;
        assert!(approx(remaining, 4.0));
        assert!(approx(remaining + sold, 10.0));
    }

    #[tokio::test]
    async fn zero_price_lot_is_allowed() {
        let pm = manager();
        let added = pm.add("gift", 3.0, 0.0, day(1)).await.unwrap();
        assert_eq!(added.symbol, "GIFT");
        assert_eq!(added.message, "Added 3 shares of GIFT at $0.00");
        let sale = pm.dispose("GIFT", 3.0, 2.0).await.unwrap();
        assert!(approx(sale.profit, 6.0));
    }

    #[tokio::test]
    async fn loss_is_negative_profit() {
        let pm = manager();
        pm.add("DOG", 2.0, 50.0, day(1)).await.unwrap();
        let sale = pm.dispose("DOG", 2.0, 30.0).await.unwrap();
        assert!(approx(sale.profit, -40.0));
        assert!(pm.summarize().await.unwrap().is_empty());
        assert_eq!(pm.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_timestamp_breaks_ties_by_insertion() {
        let pm = manager();
        pm.add("EQ", 1.0, 1.0, day(1)).await.unwrap();
        pm.add("EQ", 1.0, 100.0, day(1)).await.unwrap();
        let sale = pm.dispose("EQ", 1.0, 10.0).await.unwrap();
        assert!(approx(sale.profit, 9.0));
    }

    #[tokio::test]
    async fn shares_are_conserved_across_operations() {
        let pm = manager();
        let mut added = 0.0;
        let mut sold = 0.0;
        for (i, shares) in [3.5, 1.25, 7.0, 0.75].iter().enumerate() {
            pm.add("CONS", *shares, 10.0 + i as f64, day(i as i64)).await.unwrap();
            added += shares;
        }
        for shares in [2.0, 4.5, 10.0, 1.0] {
            if pm.dispose("CONS", shares, 11.0).await.is_ok() {
                sold += shares;
            }
        }
        let remaining = pm
            .summarize()
            .await
            .unwrap()
            .get("CONS")
            .map(|p| p.total_shares)
            .unwrap_or(0.0);
        assert!(approx(remaining + sold, added));
    }

    #[tokio::test]
    async fn empty_portfolio_summarizes_to_empty_map() {
        assert!(manager().summarize().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_reports_start_of_year_and_kind() {
        let pm = manager();
        let with_soy = AddOptions {
            start_of_year_price: Some(8.0),
            ..day(1)
        };
        pm.add("MIX", 10.0, 10.0, with_soy).await.unwrap();
        let cash = AddOptions {
            holding_kind: HoldingKind::Cash,
            ..day(2)
        };
        pm.add("MIX", 4.0, 1.0, cash).await.unwrap();

        let pos = &pm.summarize().await.unwrap()["MIX"];
        assert!(approx(pos.start_of_year_total, 80.0));
        assert_eq!(pos.holding_type, HoldingKind::Equity);
    }

    #[test]
    fn kind_tie_goes_to_oldest_lot() {
        let lot = |id, kind| Lot {
            id,
            symbol: "T".into(),
            shares: 5.0,
            purchase_price: 1.0,
            purchased_at: Utc.with_ymd_and_hms(2024, 1, id as u32 + 1, 0, 0, 0).unwrap(),
            holding_kind: kind,
            start_of_year_price: None,
        };
        let lots = vec![lot(0, HoldingKind::Cash), lot(1, HoldingKind::Equity)];
        assert_eq!(representative_kind(&lots), HoldingKind::Cash);
    }
}
