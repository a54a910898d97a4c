//! The three output tables (plus diagnostics) as Polars DataFrames.

use polars::prelude::*;

use navcycle_traits::{
    BacktestRecord, BacktestSummary, CompositeScore, Diagnostic, DiagnosticKind, Result,
    SignalKind, TurningPoint, TurningPointKind,
};

/// Ranking table: one row per analyzed instrument, composite descending.
///
/// Component columns carry each signal's weighted contribution; NaN marks
/// a component whose stage was skipped.
pub fn ranking_table(ranking: &[CompositeScore]) -> Result<DataFrame> {
    let ids: Vec<String> = ranking.iter().map(|s| s.instrument_id.clone()).collect();
    let as_of: Vec<String> = ranking.iter().map(|s| s.as_of.to_string()).collect();
    let composite: Vec<f64> = ranking.iter().map(|s| s.composite_value).collect();
    let votes: Vec<u32> = ranking.iter().map(|s| s.vote_count as u32).collect();

    let mut df = df! {
        "instrument_id" => ids,
        "as_of" => as_of,
        "composite" => composite,
    }?;
    for kind in SignalKind::ALL {
        let column: Vec<f64> = ranking
            .iter()
            .map(|s| s.contributions.get(&kind).copied().unwrap_or(f64::NAN))
            .collect();
        df.with_column(Column::new(kind.as_str().into(), column))?;
    }
    df.with_column(Column::new("vote_count".into(), votes))?;
    Ok(df)
}

/// Turning-point table: one row per confirmed extremum.
pub fn turning_point_table(points: &[TurningPoint]) -> Result<DataFrame> {
    let ids: Vec<String> = points.iter().map(|p| p.instrument_id.clone()).collect();
    let dates: Vec<String> = points.iter().map(|p| p.date.to_string()).collect();
    let kinds: Vec<String> = points
        .iter()
        .map(|p| {
            match p.kind {
                TurningPointKind::Trough => "trough",
                TurningPointKind::Peak => "peak",
            }
            .to_string()
        })
        .collect();
    let confidence: Vec<f64> = points.iter().map(|p| p.confidence).collect();
    let evidence: Vec<String> = points
        .iter()
        .map(|p| {
            p.evidence
                .iter()
                .map(|e| format!("{e:?}"))
                .collect::<Vec<_>>()
                .join(",")
                .to_lowercase()
        })
        .collect();

    Ok(df! {
        "instrument_id" => ids,
        "date" => dates,
        "kind" => kinds,
        "confidence" => confidence,
        "evidence" => evidence,
    }?)
}

/// Backtest table: one row per (trough, horizon) with a full window.
pub fn backtest_table(records: &[BacktestRecord]) -> Result<DataFrame> {
    let ids: Vec<String> = records.iter().map(|r| r.instrument_id.clone()).collect();
    let dates: Vec<String> = records.iter().map(|r| r.trough_date.to_string()).collect();
    let horizons: Vec<u32> = records.iter().map(|r| r.horizon as u32).collect();
    let returns: Vec<f64> = records.iter().map(|r| r.forward_return).collect();
    let hits: Vec<bool> = records.iter().map(|r| r.hit).collect();

    Ok(df! {
        "instrument_id" => ids,
        "trough_date" => dates,
        "horizon" => horizons,
        "forward_return" => returns,
        "hit" => hits,
    }?)
}

/// Backtest aggregate table: one row per (instrument, horizon).
pub fn backtest_summary_table(summaries: &[BacktestSummary]) -> Result<DataFrame> {
    let ids: Vec<String> = summaries.iter().map(|s| s.instrument_id.clone()).collect();
    let horizons: Vec<u32> = summaries.iter().map(|s| s.horizon as u32).collect();
    let signals: Vec<u32> = summaries.iter().map(|s| s.signals as u32).collect();
    let hit_rates: Vec<f64> = summaries.iter().map(|s| s.hit_rate).collect();
    let means: Vec<f64> = summaries.iter().map(|s| s.mean_return).collect();
    let medians: Vec<f64> = summaries.iter().map(|s| s.median_return).collect();

    Ok(df! {
        "instrument_id" => ids,
        "horizon" => horizons,
        "signals" => signals,
        "hit_rate" => hit_rates,
        "mean_return" => means,
        "median_return" => medians,
    }?)
}

/// Diagnostics table: one row per excluded or failed instrument.
pub fn diagnostics_table(diagnostics: &[Diagnostic]) -> Result<DataFrame> {
    let ids: Vec<String> = diagnostics
        .iter()
        .map(|d| d.instrument_id.clone())
        .collect();
    let kinds: Vec<String> = diagnostics
        .iter()
        .map(|d| {
            match &d.kind {
                DiagnosticKind::Skipped { .. } => "skipped",
                DiagnosticKind::Failed { .. } => "failed",
                DiagnosticKind::DeadlineSkipped => "deadline_skipped",
            }
            .to_string()
        })
        .collect();
    let details: Vec<String> = diagnostics
        .iter()
        .map(|d| match &d.kind {
            DiagnosticKind::Skipped { reason } => reason.to_string(),
            DiagnosticKind::Failed { message } => message.clone(),
            DiagnosticKind::DeadlineSkipped => "not scheduled before the run deadline".to_string(),
        })
        .collect();

    Ok(df! {
        "instrument_id" => ids,
        "kind" => kinds,
        "detail" => details,
    }?)
}
