//! Corporate-level patent table, green flag and per-company yearly counts.

use crate::classification::PatentClassRow;
use crate::config::{PipelineConfig, GREEN_CLASS_TABLE};
use crate::output::write_table;
use crate::reference::read_columns;
use crate::ProcessingStats;
use anyhow::Result;
use arrow::array::*;
use arrow::datatypes::*;
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

const RAW_DATE_FORMAT: &str = "%Y%m%d";
const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorporatePatentRow {
    pub patent_id: Option<String>,
    pub patent_kind: Option<String>,
    pub assignee_name: String,
    pub assignee_gvkey: String,
    pub date_recorded: String,
    pub date_last_update: Option<String>,
    pub patent_cpc_group: Option<String>,
    pub patent_uspc_group: Option<String>,
    pub patent_is_green: i32,
    pub year_recorded: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub assignee_gvkey: String,
    pub assignee_name: String,
    pub year: i32,
    pub patent_num: u64,
    pub patent_green_num: u64,
    pub patent_green_total: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearSummaryRow {
    pub year_recorded: i32,
    pub total: u64,
    pub green: u64,
}

// ====== RECORD BATCH CREATORS ======
fn corporate_rows_to_record_batch(records: Vec<CorporatePatentRow>) -> Result<RecordBatch> {
    let schema = schema! {
        "patent_id" => DataType::Utf8;
        "patent_kind" => DataType::Utf8;
        "assignee_name" => DataType::Utf8, false;
        "assignee_gvkey" => DataType::Utf8, false;
        "date_recorded" => DataType::Utf8, false;
        "date_last_update" => DataType::Utf8;
        "patent_cpc_group" => DataType::Utf8;
        "patent_uspc_group" => DataType::Utf8;
        "patent_is_green" => DataType::Int32, false;
        "year_recorded" => DataType::Int32, false;
    };

    let batch = batch_of!(
        schema,
        string_array_optional!(records, patent_id),
        string_array_optional!(records, patent_kind),
        string_array_required!(records, assignee_name),
        string_array_required!(records, assignee_gvkey),
        string_array_required!(records, date_recorded),
        string_array_optional!(records, date_last_update),
        string_array_optional!(records, patent_cpc_group),
        string_array_optional!(records, patent_uspc_group),
        int32_array!(records, patent_is_green),
        int32_array!(records, year_recorded),
    )?;

    Ok(batch)
}

fn aggregate_rows_to_record_batch(records: Vec<AggregateRow>) -> Result<RecordBatch> {
    let schema = schema! {
        "assignee_gvkey" => DataType::Utf8, false;
        "assignee_name" => DataType::Utf8, false;
        "year" => DataType::Int32, false;
        "patent_num" => DataType::Int64, false;
        "patent_green_num" => DataType::Int64, false;
        "patent_green_total" => DataType::Float64, false;
    };

    let batch = batch_of!(
        schema,
        string_array_required!(records, assignee_gvkey),
        string_array_required!(records, assignee_name),
        int32_array!(records, year),
        int64_array!(records, patent_num),
        int64_array!(records, patent_green_num),
        float64_array!(records, patent_green_total),
    )?;

    Ok(batch)
}

fn year_summary_to_record_batch(records: Vec<YearSummaryRow>) -> Result<RecordBatch> {
    let schema = schema! {
        "year_recorded" => DataType::Int32, false;
        "total" => DataType::Int64, false;
        "green" => DataType::Int64, false;
    };

    let batch = batch_of!(
        schema,
        int32_array!(records, year_recorded),
        int64_array!(records, total),
        int64_array!(records, green),
    )?;

    Ok(batch)
}

/// CPC groups counted as environment-related technology.
#[derive(Debug, Default)]
pub struct GreenClasses(HashSet<String>);

impl GreenClasses {
    pub fn load(path: &Path) -> Result<Self> {
        let classes: HashSet<String> = read_columns(path, b',', &["cpc_group"])?
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();
        info!("Loaded {} green CPC groups", classes.len());
        Ok(Self(classes))
    }

    pub fn contains(&self, cpc_group: Option<&str>) -> bool {
        cpc_group.map(|g| self.0.contains(g.trim())).unwrap_or(false)
    }
}

fn parse_raw_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(v.trim(), RAW_DATE_FORMAT).ok())
}

/// Linked rows inside `[start, end]` (by recorded date) in the corporate
/// layout. Rows without a gvkey are dropped, as are rows whose recorded date
/// is not `YYYYMMDD`.
pub fn build_corporate_rows(
    rows: &[PatentClassRow],
    green: &GreenClasses,
    start: NaiveDate,
    end: NaiveDate,
    stats: &ProcessingStats,
) -> Vec<CorporatePatentRow> {
    let mut corporate = Vec::new();
    let mut bad_dates = 0u64;

    for row in rows {
        let Some(gvkey) = &row.gvkey else {
            continue;
        };
        let Some(recorded) = parse_raw_date(row.recorded_date.as_deref()) else {
            bad_dates += 1;
            continue;
        };
        if recorded < start || recorded > end {
            continue;
        }

        corporate.push(CorporatePatentRow {
            patent_id: row.patent_doc_num.clone(),
            patent_kind: row.patent_doc_kind.clone(),
            assignee_name: row.patent_assignees.clone(),
            assignee_gvkey: gvkey.clone(),
            date_recorded: recorded.format(OUTPUT_DATE_FORMAT).to_string(),
            date_last_update: parse_raw_date(row.last_update_date.as_deref())
                .map(|d| d.format(OUTPUT_DATE_FORMAT).to_string()),
            patent_cpc_group: row.cpc_group.clone(),
            patent_uspc_group: row.uspc_subclass_id.clone(),
            patent_is_green: i32::from(green.contains(row.cpc_group.as_deref())),
            year_recorded: recorded.year(),
        });
    }

    if bad_dates > 0 {
        warn!("Dropped {} linked rows with an unreadable recorded date", bad_dates);
    }
    stats.bad_dates.fetch_add(bad_dates, Ordering::Relaxed);
    corporate
}

/// Distinct patents per recording year, overall and green.
pub fn year_summary(rows: &[CorporatePatentRow]) -> Vec<YearSummaryRow> {
    let mut years: BTreeMap<i32, (HashSet<&str>, HashSet<&str>)> = BTreeMap::new();
    for row in rows {
        let (total, green) = years.entry(row.year_recorded).or_default();
        if let Some(patent_id) = row.patent_id.as_deref() {
            total.insert(patent_id);
            if row.patent_is_green == 1 {
                green.insert(patent_id);
            }
        }
    }

    years
        .into_iter()
        .map(|(year, (total, green))| YearSummaryRow {
            year_recorded: year,
            total: total.len() as u64,
            green: green.len() as u64,
        })
        .collect()
}

/// Sort key for gvkeys: numeric ids in numeric order (`999` before
/// `1004`), anything non-numeric after them by text.
fn gvkey_order(gvkey: &str) -> (bool, u64, &str) {
    match gvkey.parse::<u64>() {
        Ok(id) => (false, id, gvkey),
        Err(_) => (true, 0, gvkey),
    }
}

/// Row and green counts per (gvkey, assignee, year), ordered by that key.
pub fn aggregate(rows: &[CorporatePatentRow]) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<((bool, u64, &str), &str, i32), (u64, u64)> = BTreeMap::new();
    for row in rows {
        let counts = groups
            .entry((
                gvkey_order(&row.assignee_gvkey),
                row.assignee_name.as_str(),
                row.year_recorded,
            ))
            .or_default();
        counts.0 += 1;
        counts.1 += row.patent_is_green as u64;
    }

    groups
        .into_iter()
        .map(|(((_, _, gvkey), name, year), (total, green))| AggregateRow {
            assignee_gvkey: gvkey.to_string(),
            assignee_name: name.to_string(),
            year,
            patent_num: total,
            patent_green_num: green,
            patent_green_total: green as f64 / total as f64,
        })
        .collect()
}

/// Stage 4: write `patent_corporate`, `patent_year_summary` and
/// `patent_aggregate`.
pub fn finalize_and_aggregate(
    config: &PipelineConfig,
    rows: &[PatentClassRow],
    stats: &ProcessingStats,
) -> Result<()> {
    info!("Finalizing and aggregating");

    let green = GreenClasses::load(&config.uspatent_dir.join(GREEN_CLASS_TABLE))?;
    let corporate = build_corporate_rows(rows, &green, config.start_date, config.end_date, stats);

    let green_rows = corporate.iter().filter(|r| r.patent_is_green == 1).count();
    info!(
        "Total records between {} and {}: {}",
        config.start_date,
        config.end_date,
        corporate.len()
    );
    info!(
        "Total green records between {} and {}: {}",
        config.start_date, config.end_date, green_rows
    );
    stats
        .corporate_rows
        .fetch_add(corporate.len() as u64, Ordering::Relaxed);

    let summary = year_summary(&corporate);
    for year in &summary {
        info!(
            "  {}: {} patents, {} green",
            year.year_recorded, year.total, year.green
        );
    }
    let aggregated = aggregate(&corporate);

    write_table(
        &config.output_file("patent_year_summary"),
        &summary,
        config.format,
        config.batch_size,
        year_summary_to_record_batch,
    )?;
    write_table(
        &config.output_file("patent_corporate"),
        &corporate,
        config.format,
        config.batch_size,
        corporate_rows_to_record_batch,
    )?;
    write_table(
        &config.output_file("patent_aggregate"),
        &aggregated,
        config.format,
        config.batch_size,
        aggregate_rows_to_record_batch,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn linked(doc: &str, assignee: &str, gvkey: Option<&str>, recorded: &str, cpc: &str) -> PatentClassRow {
        PatentClassRow {
            reel_no: None,
            frame_no: None,
            last_update_date: Some("20060102".into()),
            recorded_date: Some(recorded.into()),
            purge_indicator: None,
            patent_assignors: None,
            patent_assignees: assignee.into(),
            patent_doc_num: Some(doc.into()),
            patent_doc_kind: Some("B2".into()),
            cpc_group: Some(cpc.into()),
            uspc_subclass_id: None,
            assg_name: gvkey.map(|_| assignee.to_string()),
            gvkey: gvkey.map(str::to_string),
        }
    }

    fn green() -> GreenClasses {
        GreenClasses(["Y02E10/50".to_string()].into_iter().collect())
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample() -> Vec<PatentClassRow> {
        vec![
            linked("7000001", "acme", Some("1004"), "20050301", "Y02E10/50"),
            linked("7000002", "acme", Some("1004"), "20051231", "H01L21/00"),
            linked("7000001", "acme", Some("1004"), "20050401", "Y02E10/50"),
            linked("7000003", "globex", Some("2001"), "20060115", "H01L21/00"),
            linked("7000004", "initech", None, "20050301", "Y02E10/50"),
            linked("7000005", "acme", Some("1004"), "20011231", "Y02E10/50"),
            linked("7000006", "acme", Some("1004"), "2005-03-01", "Y02E10/50"),
        ]
    }

    #[test]
    fn corporate_rows_respect_window_and_gvkey() {
        let stats = ProcessingStats::new();
        let rows = build_corporate_rows(
            &sample(),
            &green(),
            date("2002-01-01"),
            date("2006-01-15"),
            &stats,
        );

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].date_recorded, "2005-03-01");
        assert_eq!(rows[0].date_last_update.as_deref(), Some("2006-01-02"));
        assert_eq!(rows[0].patent_is_green, 1);
        assert_eq!(rows[1].patent_is_green, 0);
        assert_eq!(rows[3].year_recorded, 2006);
        assert_eq!(stats.bad_dates.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn summaries_count_distinct_patents_and_rows() {
        let stats = ProcessingStats::new();
        let rows = build_corporate_rows(
            &sample(),
            &green(),
            date("2002-01-01"),
            date("2023-12-31"),
            &stats,
        );

        assert_eq!(
            year_summary(&rows),
            vec![
                YearSummaryRow { year_recorded: 2005, total: 2, green: 1 },
                YearSummaryRow { year_recorded: 2006, total: 1, green: 0 },
            ]
        );

        let aggregated = aggregate(&rows);
        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[0].assignee_gvkey, "1004");
        assert_eq!(aggregated[0].year, 2005);
        assert_eq!(aggregated[0].patent_num, 3);
        assert_eq!(aggregated[0].patent_green_num, 2);
        assert!((aggregated[0].patent_green_total - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(aggregated[1].assignee_name, "globex");
        assert_eq!(aggregated[1].patent_green_total, 0.0);
    }

    #[test]
    fn gvkeys_sort_numerically() {
        let stats = ProcessingStats::new();
        let rows = build_corporate_rows(
            &[
                linked("7000001", "acme", Some("1004"), "20050301", "H01L21/00"),
                linked("7000002", "umbrella", Some("C-77"), "20050301", "H01L21/00"),
                linked("7000003", "globex", Some("999"), "20050301", "H01L21/00"),
                linked("7000004", "initech", Some("012"), "20050301", "H01L21/00"),
            ],
            &green(),
            date("2002-01-01"),
            date("2023-12-31"),
            &stats,
        );

        let order: Vec<String> = aggregate(&rows)
            .into_iter()
            .map(|r| r.assignee_gvkey)
            .collect();
        assert_eq!(order, vec!["012", "999", "1004", "C-77"]);
    }

    #[test]
    fn green_classes_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(GREEN_CLASS_TABLE);
        fs::write(&path, "env_tech,cpc_group\nsolar,Y02E10/50\nwind, Y02E10/70 \n").unwrap();

        let classes = GreenClasses::load(&path).unwrap();
        assert!(classes.contains(Some("Y02E10/70")));
        assert!(classes.contains(Some("Y02E10/50")));
        assert!(!classes.contains(Some("H01L21/00")));
        assert!(!classes.contains(None));
    }
}
