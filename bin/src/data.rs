//! Data loading and report writing for the navcycle CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

use navcycle_traits::{
    AnalysisParams, BacktestRecord, BacktestSummary, CompositeScore, Diagnostic, DiagnosticKind,
    InstrumentId, RawObservation, SignalKind, SkipReason, TurningPoint, TurningPointKind,
};

/// One row of the input price file.
///
/// Header aliases let NAV exports load without renaming columns.
#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(alias = "scheme_code", alias = "symbol")]
    instrument_id: String,
    date: String,
    #[serde(alias = "nav", alias = "close", alias = "price")]
    value: f64,
}

/// Load a universe of observations from a CSV file, grouped by
/// instrument.
///
/// Each instrument's rows must appear in non-decreasing date order;
/// duplicate-date conflicts are only resolvable ("keep last") on an
/// ordered stream. Instruments whose dates go backwards are dropped and
/// reported as diagnostics instead of aborting the load.
pub(crate) fn load_observations(
    path: &Path,
) -> anyhow::Result<(BTreeMap<InstrumentId, Vec<RawObservation>>, Vec<Diagnostic>)> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut universe: BTreeMap<InstrumentId, Vec<RawObservation>> = BTreeMap::new();
    let mut unordered: BTreeSet<InstrumentId> = BTreeSet::new();
    for (i, row) in reader.deserialize::<PriceRow>().enumerate() {
        let row = row.with_context(|| format!("parsing row {} of {}", i + 2, path.display()))?;
        let date = parse_date(&row.date)
            .with_context(|| format!("row {} of {}", i + 2, path.display()))?;
        let observations = universe.entry(row.instrument_id.clone()).or_default();
        if observations.last().is_some_and(|last| date < last.date) {
            unordered.insert(row.instrument_id.clone());
        }
        observations.push(RawObservation {
            instrument_id: row.instrument_id,
            date,
            value: row.value,
        });
    }

    let diagnostics = unordered
        .into_iter()
        .map(|instrument_id| {
            universe.remove(&instrument_id);
            Diagnostic::skipped(instrument_id, SkipReason::NonMonotonicTimestamps)
        })
        .collect();
    Ok((universe, diagnostics))
}

/// Load the parameter bundle from a TOML file, or the defaults when no
/// file is given.
pub(crate) fn load_params(path: Option<&Path>) -> anyhow::Result<AnalysisParams> {
    let params = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => AnalysisParams::default(),
    };
    params.validate().context("invalid parameter bundle")?;
    Ok(params)
}

/// Parse a date string in YYYY-MM-DD format.
pub(crate) fn parse_date(date_str: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("invalid date {date_str:?}, expected YYYY-MM-DD"))
}

/// Write the ranking table, one component contribution column per
/// signal.
pub(crate) fn write_ranking_csv(path: &Path, ranking: &[CompositeScore]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut header = vec!["instrument_id".to_string(), "as_of".to_string(), "composite".to_string()];
    header.extend(SignalKind::ALL.iter().map(|k| k.as_str().to_string()));
    header.push("vote_count".to_string());
    writer.write_record(&header)?;

    for score in ranking {
        let mut row = vec![
            score.instrument_id.clone(),
            score.as_of.to_string(),
            format!("{:.6}", score.composite_value),
        ];
        for kind in SignalKind::ALL {
            row.push(
                score
                    .contributions
                    .get(&kind)
                    .map_or_else(String::new, |v| format!("{v:.6}")),
            );
        }
        row.push(score.vote_count.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the turning-point table.
pub(crate) fn write_turning_points_csv(
    path: &Path,
    points: &[TurningPoint],
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["instrument_id", "date", "kind", "confidence", "evidence"])?;
    for point in points {
        let kind = match point.kind {
            TurningPointKind::Trough => "trough",
            TurningPointKind::Peak => "peak",
        };
        let evidence = point
            .evidence
            .iter()
            .map(|e| format!("{e:?}").to_lowercase())
            .collect::<Vec<_>>()
            .join(",");
        writer.write_record([
            point.instrument_id.as_str(),
            &point.date.to_string(),
            kind,
            &format!("{:.4}", point.confidence),
            &evidence,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write per-trough backtest rows.
pub(crate) fn write_backtest_csv(path: &Path, records: &[BacktestRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "instrument_id",
        "trough_date",
        "horizon",
        "forward_return",
        "hit",
    ])?;
    for record in records {
        writer.write_record([
            record.instrument_id.as_str(),
            &record.trough_date.to_string(),
            &record.horizon.to_string(),
            &format!("{:.6}", record.forward_return),
            if record.hit { "true" } else { "false" },
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write per-(instrument, horizon) backtest aggregates.
pub(crate) fn write_backtest_summary_csv(
    path: &Path,
    summaries: &[BacktestSummary],
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "instrument_id",
        "horizon",
        "signals",
        "hit_rate",
        "mean_return",
        "median_return",
    ])?;
    for summary in summaries {
        writer.write_record([
            summary.instrument_id.as_str(),
            &summary.horizon.to_string(),
            &summary.signals.to_string(),
            &format!("{:.4}", summary.hit_rate),
            &format!("{:.6}", summary.mean_return),
            &format!("{:.6}", summary.median_return),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one diagnostics row per excluded or failed instrument.
pub(crate) fn write_diagnostics_csv(
    path: &Path,
    diagnostics: &[Diagnostic],
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["instrument_id", "kind", "detail"])?;
    for diagnostic in diagnostics {
        let (kind, detail) = match &diagnostic.kind {
            DiagnosticKind::Skipped { reason } => ("skipped", reason.to_string()),
            DiagnosticKind::Failed { message } => ("failed", message.clone()),
            DiagnosticKind::DeadlineSkipped => (
                "deadline_skipped",
                "not scheduled before the run deadline".to_string(),
            ),
        };
        writer.write_record([diagnostic.instrument_id.as_str(), kind, &detail])?;
    }
    writer.flush()?;
    Ok(())
}
