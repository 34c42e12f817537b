// src/performance.rs
use crate::cache::PriceCache;
use crate::error::{Error, Result};
use crate::models::{Insights, PerformanceReport, PeriodResult};
use crate::portfolio::{normalize_symbol, PortfolioManager};
use crate::quotes::PriceSeries;
use chrono::{Datelike, NaiveDate, Utc};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Chart window used when a period has no fixed lookback.
const DEFAULT_WINDOW: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    OneDay,
    FiveDays,
    OneMonth,
    SixMonths,
    OneYear,
    FiveYears,
    YearToDate,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::OneDay,
        Period::FiveDays,
        Period::OneMonth,
        Period::SixMonths,
        Period::OneYear,
        Period::FiveYears,
        Period::YearToDate,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1m",
            Period::SixMonths => "6m",
            Period::OneYear => "1y",
            Period::FiveYears => "5y",
            Period::YearToDate => "ytd",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::OneDay => "1 day",
            Period::FiveDays => "5 days",
            Period::OneMonth => "1 month",
            Period::SixMonths => "6 months",
            Period::OneYear => "1 year",
            Period::FiveYears => "5 years",
            Period::YearToDate => "Year to date",
        }
    }

    /// Lookback in trading days, not calendar days.
    pub fn trading_days(&self) -> Option<usize> {
        match self {
            Period::OneDay => Some(1),
            Period::FiveDays => Some(5),
            Period::OneMonth => Some(22),
            Period::SixMonths => Some(126),
            Period::OneYear => Some(252),
            Period::FiveYears => Some(1260),
            Period::YearToDate => None,
        }
    }

    pub fn parse(code: &str) -> Option<Period> {
        Period::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// Price change over `period` ending at the latest close in `series`.
/// `today` anchors the year-to-date baseline.
pub fn compute_period(
    symbol: &str,
    series: &PriceSeries,
    period: Period,
    today: NaiveDate,
) -> Result<PeriodResult> {
    let newest_first: Vec<(NaiveDate, f64)> = series.iter().rev().map(|(d, p)| (*d, *p)).collect();
    let Some(&(end_date, end_price)) = newest_first.first() else {
        return Err(Error::NoData(symbol.to_string()));
    };

    let (start_date, start_price) = match period.trading_days() {
        Some(days) => match newest_first.get(days) {
            Some(point) => *point,
            None => newest_first[newest_first.len() - 1],
        },
        None => nearest_to_jan1(series, today.year()).unwrap_or((end_date, end_price)),
    };

    let absolute_performance = end_price - start_price;
    let performance = if start_price != 0.0 {
        absolute_performance / start_price * 100.0
    } else {
        0.0
    };
    let window = period.trading_days().unwrap_or(DEFAULT_WINDOW) + 1;

    Ok(PeriodResult {
        symbol: symbol.to_string(),
        period: period.code().to_string(),
        start_date,
        end_date,
        start_price,
        end_price,
        performance,
        absolute_performance,
        data_points: newest_first.iter().take(window).map(|(_, p)| *p).collect(),
    })
}

/// Closest trading date to January 1st; equal distances go to the earlier date.
fn nearest_to_jan1(series: &PriceSeries, year: i32) -> Option<(NaiveDate, f64)> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    series
        .iter()
        .min_by_key(|(d, _)| (**d - jan1).num_days().abs())
        .map(|(d, p)| (*d, *p))
}

pub struct PerformanceAnalyzer {
    portfolio: Arc<PortfolioManager>,
    cache: Arc<PriceCache>,
}

impl PerformanceAnalyzer {
    pub fn new(portfolio: Arc<PortfolioManager>, cache: Arc<PriceCache>) -> Self {
        PerformanceAnalyzer { portfolio, cache }
    }

    pub async fn period_performance(&self, symbol: &str, period: Period) -> Result<PeriodResult> {
        let symbol = normalize_symbol(symbol)?;
        let series = self.cache.series(&symbol).await;
        compute_period(&symbol, &series, period, Utc::now().date_naive())
    }

    /// Every held symbol against every period. Periods without data are left out.
    pub async fn portfolio_performance(&self) -> Result<PerformanceReport> {
        let summary = self.portfolio.summarize().await?;
        let held: Vec<String> = summary.keys().cloned().collect();
        self.cache.ensure_fresh(&held).await;

        let today = Utc::now().date_naive();
        let mut report = PerformanceReport::new();
        for symbol in held {
            let series = self.cache.series(&symbol).await;
            let mut periods = BTreeMap::new();
            for period in Period::ALL {
                match compute_period(&symbol, &series, period, today) {
                    Ok(result) => {
                        periods.insert(period.label().to_string(), result);
                    }
                    Err(e) => debug!("Skipping {} {}: {}", symbol, period.code(), e),
                }
            }
            report.insert(symbol, periods);
        }
        Ok(report)
    }

    /// Valuation and allocation at current prices. A symbol without a
    /// price is worth 0.
    pub async fn portfolio_insights(&self) -> Result<Insights> {
        let summary = self.portfolio.summarize().await?;
        let held: Vec<String> = summary.keys().cloned().collect();
        self.cache.ensure_fresh(&held).await;

        let mut stock_values = BTreeMap::new();
        let mut total_value = 0.0;
        let mut start_of_year_total = 0.0;
        for (symbol, pos) in &summary {
            let value = self.cache.current_price(symbol).await * pos.total_shares;
            total_value += value;
            start_of_year_total += pos.start_of_year_total;
            stock_values.insert(symbol.clone(), value);
        }

        let stock_allocation = stock_values
            .iter()
            .map(|(symbol, value)| {
                let pct = if total_value > 0.0 {
                    value / total_value * 100.0
                } else {
                    0.0
                };
                (symbol.clone(), pct)
            })
            .collect();

        // Sectors are not classified; everything reports as Unknown.
        let sector_allocation = BTreeMap::from([("Unknown".to_string(), 100.0)]);

        Ok(Insights {
            total_value,
            stock_allocation,
            sector_allocation,
            stock_values,
            start_of_year_total,
        })
    }
}
