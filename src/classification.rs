//! CPC / USPC classification merge over the intermediate assignment tables.

use crate::assignments::PatentAssignmentRow;
use crate::config::{PipelineConfig, CPC_TABLE, USPC_TABLE};
use crate::normalize::patent_key;
use crate::reference::read_columns;
use crate::ProcessingStats;
use anyhow::{Context, Result};
use arrow::array::*;
use arrow::datatypes::*;
use arrow::record_batch::RecordBatch;
use glob::{glob, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

/// An assignment row with its classification and, once linked, the
/// matching corporate identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PatentClassRow {
    pub reel_no: Option<String>,
    pub frame_no: Option<String>,
    pub last_update_date: Option<String>,
    pub recorded_date: Option<String>,
    pub purge_indicator: Option<String>,
    pub patent_assignors: Option<String>,
    pub patent_assignees: String,
    pub patent_doc_num: Option<String>,
    pub patent_doc_kind: Option<String>,
    pub cpc_group: Option<String>,
    pub uspc_subclass_id: Option<String>,
    pub assg_name: Option<String>,
    pub gvkey: Option<String>,
}

pub fn patent_class_rows_to_record_batch(records: Vec<PatentClassRow>) -> Result<RecordBatch> {
    let schema = schema! {
        "reel_no" => DataType::Utf8;
        "frame_no" => DataType::Utf8;
        "last_update_date" => DataType::Utf8;
        "recorded_date" => DataType::Utf8;
        "purge_indicator" => DataType::Utf8;
        "patent_assignors" => DataType::Utf8;
        "patent_assignees" => DataType::Utf8, false;
        "patent_doc_num" => DataType::Utf8;
        "patent_doc_kind" => DataType::Utf8;
        "cpc_group" => DataType::Utf8;
        "uspc_subclass_id" => DataType::Utf8;
        "assg_name" => DataType::Utf8;
        "gvkey" => DataType::Utf8;
    };

    let batch = batch_of!(
        schema,
        string_array_optional!(records, reel_no),
        string_array_optional!(records, frame_no),
        string_array_optional!(records, last_update_date),
        string_array_optional!(records, recorded_date),
        string_array_optional!(records, purge_indicator),
        string_array_optional!(records, patent_assignors),
        string_array_required!(records, patent_assignees),
        string_array_optional!(records, patent_doc_num),
        string_array_optional!(records, patent_doc_kind),
        string_array_optional!(records, cpc_group),
        string_array_optional!(records, uspc_subclass_id),
        string_array_optional!(records, assg_name),
        string_array_optional!(records, gvkey),
    )?;

    Ok(batch)
}

/// Patent number → class lookups. A patent listed more than once keeps its
/// last listed class.
#[derive(Debug, Default)]
pub struct ClassificationIndex {
    cpc: HashMap<String, Option<String>>,
    uspc: HashMap<String, Option<String>>,
}

fn load_last_wins(path: &Path, value_column: &str) -> Result<HashMap<String, Option<String>>> {
    let mut index = HashMap::new();
    for row in read_columns(path, b'\t', &["patent_id", value_column])? {
        let mut cells = row.into_iter();
        if let Some(patent_id) = cells.next().flatten() {
            index.insert(patent_key(&patent_id), cells.next().flatten());
        }
    }
    Ok(index)
}

impl ClassificationIndex {
    pub fn load(uspatent_dir: &Path) -> Result<Self> {
        let cpc = load_last_wins(&uspatent_dir.join(CPC_TABLE), "cpc_group")?;
        let uspc = load_last_wins(&uspatent_dir.join(USPC_TABLE), "uspc_subclass_id")?;
        info!(
            "Loaded classification for {} CPC and {} USPC patents",
            cpc.len(),
            uspc.len()
        );
        Ok(Self { cpc, uspc })
    }

    pub fn cpc_group(&self, patent_number: &str) -> Option<String> {
        self.cpc.get(&patent_key(patent_number)).cloned().flatten()
    }

    pub fn uspc_subclass(&self, patent_number: &str) -> Option<String> {
        self.uspc.get(&patent_key(patent_number)).cloned().flatten()
    }

    /// Left-joins both schemes onto `rows`, keeps rows classified under at
    /// least one of them and drops exact duplicates (first one wins).
    pub fn classify(&self, rows: Vec<PatentAssignmentRow>) -> Vec<PatentClassRow> {
        let mut seen = HashSet::with_capacity(rows.len());
        let mut classified = Vec::with_capacity(rows.len());

        for row in rows {
            let doc_num = row.patent_doc_num.as_deref().unwrap_or("");
            let cpc_group = self.cpc_group(doc_num);
            let uspc_subclass_id = self.uspc_subclass(doc_num);
            if cpc_group.is_none() && uspc_subclass_id.is_none() {
                continue;
            }

            let class_row = PatentClassRow {
                reel_no: row.reel_no,
                frame_no: row.frame_no,
                last_update_date: row.last_update_date,
                recorded_date: row.recorded_date,
                purge_indicator: row.purge_indicator,
                patent_assignors: row.patent_assignors,
                patent_assignees: row.patent_assignees,
                patent_doc_num: row.patent_doc_num,
                patent_doc_kind: row.patent_doc_kind,
                cpc_group,
                uspc_subclass_id,
                assg_name: None,
                gvkey: None,
            };
            if seen.insert(class_row.clone()) {
                classified.push(class_row);
            }
        }

        classified
    }
}

fn find_intermediate_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/ad*.csv", Pattern::escape(&dir.to_string_lossy()));
    info!("Searching for intermediate files with pattern: {}", pattern);

    let mut files = Vec::new();
    for entry in glob(&pattern)? {
        match entry {
            Ok(path) => files.push(path),
            Err(e) => warn!("Error reading glob entry: {}", e),
        }
    }

    files.sort();
    info!("Found {} intermediate files", files.len());
    Ok(files)
}

pub fn read_intermediate(path: &Path) -> Result<Vec<PatentAssignmentRow>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<PatentAssignmentRow>, _>>()
        .with_context(|| format!("reading {}", path.display()))
}

/// Stage 2: classify every intermediate file and concatenate the results
/// in file order.
pub fn merge_with_classification(
    config: &PipelineConfig,
    stats: &ProcessingStats,
) -> Result<Vec<PatentClassRow>> {
    info!("Merging with patent classification data");

    let index = ClassificationIndex::load(&config.uspatent_dir)?;
    let files = config.limit_files(find_intermediate_files(&config.uspatent_dir)?);
    let progress = stage_progress!(files.len(), "tables", "Merging classification...");

    let per_file = files
        .par_iter()
        .map(|path| -> Result<Vec<PatentClassRow>> {
            let classified = index.classify(read_intermediate(path)?);
            stats
                .classified_rows
                .fetch_add(classified.len() as u64, Ordering::Relaxed);
            progress.inc(1);
            Ok(classified)
        })
        .collect::<Result<Vec<_>>>()?;

    progress.finish_with_message("Classification merge complete");
    Ok(per_file.into_iter().flatten().collect())
}
