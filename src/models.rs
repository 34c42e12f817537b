// src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shares below this are treated as zero when walking lots.
pub const SHARE_EPSILON: f64 = 1e-9;

pub type LotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HoldingKind {
    #[default]
    #[serde(rename = "stock")]
    Equity,
    Cash,
}

impl HoldingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingKind::Equity => "stock",
            HoldingKind::Cash => "cash",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stock" | "equity" => Some(HoldingKind::Equity),
            "cash" => Some(HoldingKind::Cash),
            _ => None,
        }
    }
}

/// One acquisition event. Only `shares` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub symbol: String,
    pub shares: f64,
    pub purchase_price: f64,
    pub purchased_at: DateTime<Utc>,
    pub holding_kind: HoldingKind,
    #[serde(default)]
    pub start_of_year_price: Option<f64>,
}

impl Lot {
    pub fn is_active(&self) -> bool {
        self.shares > 0.0
    }
}

/// A lot that has not been assigned an id by a store yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLot {
    pub symbol: String,
    pub shares: f64,
    pub purchase_price: f64,
    pub purchased_at: DateTime<Utc>,
    pub holding_kind: HoldingKind,
    pub start_of_year_price: Option<f64>,
}

impl NewLot {
    pub fn into_lot(self, id: LotId) -> Lot {
        Lot {
            id,
            symbol: self.symbol,
            shares: self.shares,
            purchase_price: self.purchase_price,
            purchased_at: self.purchased_at,
            holding_kind: self.holding_kind,
            start_of_year_price: self.start_of_year_price,
        }
    }
}

/// Body of `POST /api/portfolio/add` and `/remove`.
#[derive(Debug, Clone, Deserialize)]
pub struct StockTransaction {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    #[serde(default)]
    pub holding_type: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<String>,
    #[serde(default)]
    pub start_of_year_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LotView {
    pub shares: f64,
    pub purchase_price: f64,
    pub purchase_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_of_year_price: Option<f64>,
}

/// Aggregate of every active lot for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioPosition {
    pub total_shares: f64,
    pub total_cost: f64,
    pub average_price: f64,
    pub holding_type: HoldingKind,
    pub start_of_year_total: f64,
    pub lots: Vec<LotView>,
}

pub type PortfolioSummary = BTreeMap<String, PortfolioPosition>;

#[derive(Debug, Clone, Serialize)]
pub struct AddedLot {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Disposal {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub profit: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodResult {
    pub symbol: String,
    pub period: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_price: f64,
    pub end_price: f64,
    pub performance: f64,
    pub absolute_performance: f64,
    pub data_points: Vec<f64>,
}

pub type PerformanceReport = BTreeMap<String, BTreeMap<String, PeriodResult>>;

#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub total_value: f64,
    pub stock_allocation: BTreeMap<String, f64>,
    pub sector_allocation: BTreeMap<String, f64>,
    pub stock_values: BTreeMap<String, f64>,
    pub start_of_year_total: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Wraps a payload as `{"status": "success", ...payload}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: Status,
    #[serde(flatten)]
    pub body: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(body: T) -> Self {
        Envelope {
            status: Status::Success,
            body,
        }
    }
}
