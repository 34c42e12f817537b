// src/api.rs
use crate::error::{ApiError, Error, Result};
use crate::models::{Envelope, HoldingKind, Status, StockTransaction};
use crate::performance::{PerformanceAnalyzer, Period};
use crate::portfolio::{AddOptions, PortfolioManager};
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Serialize)]
struct SummaryBody<T: Serialize> {
    portfolio: T,
}

#[derive(Serialize)]
struct PerformanceBody<T: Serialize> {
    performance: T,
}

pub fn routes(
    portfolio: Arc<PortfolioManager>,
    analyzer: Arc<PerformanceAnalyzer>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let add = warp::path!("api" / "portfolio" / "add")
        .and(warp::post())
        .and(with_portfolio(portfolio.clone()))
        .and(warp::body::json())
        .and_then(add_lot_handler);

    let remove = warp::path!("api" / "portfolio" / "remove")
        .and(warp::post())
        .and(with_portfolio(portfolio.clone()))
        .and(warp::body::json())
        .and_then(dispose_lot_handler);

    let summary = warp::path!("api" / "portfolio" / "summary")
        .and(warp::get())
        .and(with_portfolio(portfolio.clone()))
        .and_then(summary_handler);

    let history = warp::path!("api" / "portfolio" / "history")
        .and(warp::get())
        .and(with_portfolio(portfolio))
        .and_then(history_handler);

    let metrics = warp::path!("api" / "performance" / "metrics")
        .and(warp::get())
        .and(with_analyzer(analyzer.clone()))
        .and_then(metrics_handler);

    let period = warp::path!("api" / "performance" / String / String)
        .and(warp::get())
        .and(with_analyzer(analyzer.clone()))
        .and_then(period_handler);

    let insights = warp::path!("api" / "performance" / "insights")
        .and(warp::get())
        .and(with_analyzer(analyzer))
        .and_then(insights_handler);

    add.or(remove)
        .or(summary)
        .or(history)
        .or(metrics)
        .or(insights)
        .or(period)
        .recover(handle_rejection)
}

fn with_portfolio(
    portfolio: Arc<PortfolioManager>,
) -> impl Filter<Extract = (Arc<PortfolioManager>,), Error = Infallible> + Clone {
    warp::any().map(move || portfolio.clone())
}

fn with_analyzer(
    analyzer: Arc<PerformanceAnalyzer>,
) -> impl Filter<Extract = (Arc<PerformanceAnalyzer>,), Error = Infallible> + Clone {
    warp::any().map(move || analyzer.clone())
}

fn reject(e: Error) -> Rejection {
    match &e {
        Error::InvalidInput(_) | Error::NotFound(_) | Error::InsufficientShares { .. } => {
            warn!("Request refused: {}", e)
        }
        _ => error!("Request failed: {}", e),
    }
    warp::reject::custom(ApiError::from(e))
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
fn parse_purchase_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::InvalidInput(format!("Unrecognized purchase date '{}'", raw)))
}

fn add_options(tx: &StockTransaction) -> Result<AddOptions> {
    let holding_kind = match tx.holding_type.as_deref() {
        None => HoldingKind::default(),
        Some(raw) => HoldingKind::parse(raw)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown holding type '{}'", raw)))?,
    };
    let purchased_at = tx.purchase_date.as_deref().map(parse_purchase_date).transpose()?;
    Ok(AddOptions {
        holding_kind,
        purchased_at,
        start_of_year_price: tx.start_of_year_price,
    })
}

async fn add_lot_handler(
    portfolio: Arc<PortfolioManager>,
    tx: StockTransaction,
) -> std::result::Result<impl Reply, Rejection> {
    let options = add_options(&tx).map_err(reject)?;
    let added = portfolio
        .add(&tx.symbol, tx.shares, tx.price, options)
        .await
        .map_err(reject)?;
    info!("{}", added.message);
    Ok(warp::reply::json(&json!({
        "status": Status::Success,
        "message": added.message,
    })))
}

async fn dispose_lot_handler(
    portfolio: Arc<PortfolioManager>,
    tx: StockTransaction,
) -> std::result::Result<impl Reply, Rejection> {
    let sold = portfolio
        .dispose(&tx.symbol, tx.shares, tx.price)
        .await
        .map_err(reject)?;
    info!("{}", sold.message);
    Ok(warp::reply::json(&json!({
        "status": Status::Success,
        "message": sold.message,
        "profit": sold.profit,
    })))
}

async fn summary_handler(
    portfolio: Arc<PortfolioManager>,
) -> std::result::Result<impl Reply, Rejection> {
    let summary = portfolio.summarize().await.map_err(reject)?;
    Ok(warp::reply::json(&Envelope::success(SummaryBody {
        portfolio: summary,
    })))
}

async fn history_handler(
    portfolio: Arc<PortfolioManager>,
) -> std::result::Result<impl Reply, Rejection> {
    let lots = portfolio.history().await.map_err(reject)?;
    Ok(warp::reply::json(&json!({
        "status": Status::Success,
        "lots": lots,
    })))
}

async fn metrics_handler(
    analyzer: Arc<PerformanceAnalyzer>,
) -> std::result::Result<impl Reply, Rejection> {
    let report = analyzer.portfolio_performance().await.map_err(reject)?;
    Ok(warp::reply::json(&Envelope::success(PerformanceBody {
        performance: report,
    })))
}

async fn period_handler(
    symbol: String,
    code: String,
    analyzer: Arc<PerformanceAnalyzer>,
) -> std::result::Result<impl Reply, Rejection> {
    let period = Period::parse(&code)
        .ok_or_else(|| reject(Error::InvalidInput(format!("Unknown period '{}'", code))))?;
    let result = analyzer
        .period_performance(&symbol, period)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&Envelope::success(result)))
}

async fn insights_handler(
    analyzer: Arc<PerformanceAnalyzer>,
) -> std::result::Result<impl Reply, Rejection> {
    let insights = analyzer.portfolio_insights().await.map_err(reject)?;
    Ok(warp::reply::json(&Envelope::success(insights)))
}

async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ApiError>() {
        (e.status, e.message.clone())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    };

    let body = json!({ "status": Status::Error, "message": message });
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
