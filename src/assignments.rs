//! Assignment extraction: XML trees to flat per-patent, per-assignee rows.

use crate::config::PipelineConfig;
use crate::normalize::clean_assignee;
use crate::xml::{as_list, open_xml, AssignmentReader};
use crate::ProcessingStats;
use anyhow::{Context, Result};
use glob::{glob, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Kind code of application-number document ids.
const APPLICATION_KIND: &str = "X0";

static EMPTY: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatentDocument {
    pub doc_number: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentRecord {
    pub reel_no: Option<String>,
    pub frame_no: Option<String>,
    pub last_update_date: Option<String>,
    pub purge_indicator: Option<String>,
    pub recorded_date: Option<String>,
    pub assignors: Option<Vec<String>>,
    pub assignees: Option<Vec<String>>,
    pub documents: Vec<PatentDocument>,
}

/// One (patent document × assignee) pair of an assignment. Assignors stay
/// together as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatentAssignmentRow {
    pub reel_no: Option<String>,
    pub frame_no: Option<String>,
    pub last_update_date: Option<String>,
    pub recorded_date: Option<String>,
    pub purge_indicator: Option<String>,
    pub patent_assignors: Option<String>,
    pub patent_assignees: String,
    pub patent_doc_num: Option<String>,
    pub patent_doc_kind: Option<String>,
}

fn party_names(tree: &Value, container: &str, item: &str) -> Option<Vec<String>> {
    let names: Vec<String> = as_list(tree.get(container).and_then(|c| c.get(item)))
        .into_iter()
        .filter_map(|party| extract_string!(party, "name"))
        .collect();

    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

impl AssignmentRecord {
    /// Reads one `<patent-assignment>` tree. Missing branches become empty
    /// values rather than errors.
    pub fn from_tree(tree: &Value) -> Self {
        let meta = tree.get("assignment-record").unwrap_or(&EMPTY);

        let mut documents = Vec::new();
        let properties = tree
            .get("patent-properties")
            .and_then(|p| p.get("patent-property"));
        for property in as_list(properties) {
            for doc in as_list(property.get("document-id")) {
                if doc.is_object() {
                    documents.push(PatentDocument {
                        doc_number: extract_string!(doc, "doc-number"),
                        kind: extract_string!(doc, "kind"),
                    });
                }
            }
        }

        Self {
            reel_no: extract_string!(meta, "reel-no"),
            frame_no: extract_string!(meta, "frame-no"),
            last_update_date: extract_nested_string!(meta, "last-update-date", "date"),
            purge_indicator: extract_string!(meta, "purge-indicator"),
            recorded_date: extract_nested_string!(meta, "recorded-date", "date"),
            assignors: party_names(tree, "patent-assignors", "patent-assignor"),
            assignees: party_names(tree, "patent-assignees", "patent-assignee"),
            documents,
        }
    }
}

/// Cartesian flattening of one assignment: every non-application document
/// paired with every assignee, documents outermost.
pub fn flatten(record: &AssignmentRecord) -> Vec<PatentAssignmentRow> {
    let assignees: Vec<String> = match &record.assignees {
        Some(names) => names
            .iter()
            .map(|name| clean_assignee(name))
            .filter(|name| !name.is_empty())
            .collect(),
        None => return Vec::new(),
    };

    let assignors = record.assignors.as_ref().and_then(|names| {
        let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        serde_json::to_string(&lowered).ok()
    });

    let mut rows = Vec::with_capacity(record.documents.len() * assignees.len());
    for doc in &record.documents {
        if doc.kind.as_deref() == Some(APPLICATION_KIND) {
            continue;
        }
        for assignee in &assignees {
            rows.push(PatentAssignmentRow {
                reel_no: record.reel_no.clone(),
                frame_no: record.frame_no.clone(),
                last_update_date: record.last_update_date.clone(),
                recorded_date: record.recorded_date.clone(),
                purge_indicator: record.purge_indicator.clone(),
                patent_assignors: assignors.clone(),
                patent_assignees: assignee.clone(),
                patent_doc_num: doc.doc_number.clone(),
                patent_doc_kind: doc.kind.clone(),
            });
        }
    }

    rows
}

fn find_xml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let escaped = Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();

    for pattern in [format!("{}/*.xml", escaped), format!("{}/*.xml.gz", escaped)] {
        info!("Searching for assignment files with pattern: {}", pattern);
        for entry in glob(&pattern)? {
            match entry {
                Ok(path) => {
                    if path.metadata()?.len() > 0 {
                        files.push(path);
                    }
                }
                Err(e) => warn!("Error reading glob entry: {}", e),
            }
        }
    }

    files.sort();

    // a plain and a gzipped copy of one bulk file share an intermediate
    let mut targets = HashSet::new();
    files.retain(|path| {
        let target = intermediate_path(path);
        if targets.insert(target.clone()) {
            true
        } else {
            warn!(
                "Skipping {}: another bulk file already writes {}",
                path.display(),
                target.display()
            );
            false
        }
    });

    info!("Found {} assignment files", files.len());
    Ok(files)
}

/// `ad20230101-01.xml` and `ad20230101-01.xml.gz` both map to
/// `ad20230101-01.csv` in the same directory.
pub fn intermediate_path(xml_path: &Path) -> PathBuf {
    let name = xml_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    let stem = name.strip_suffix(".xml").unwrap_or(name);
    xml_path.with_file_name(format!("{}.csv", stem))
}

/// Reads every assignment of one bulk file and flattens it.
pub fn extract_file(path: &Path) -> Result<(u64, Vec<PatentAssignmentRow>)> {
    let reader = AssignmentReader::new(open_xml(path)?);
    let mut records = 0u64;
    let mut rows = Vec::new();

    for tree in reader {
        let tree = tree.with_context(|| format!("parsing {}", path.display()))?;
        rows.extend(flatten(&AssignmentRecord::from_tree(&tree)));
        records += 1;
    }

    Ok((records, rows))
}

fn write_intermediate(path: &Path, rows: &[PatentAssignmentRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Stage 1: one intermediate CSV per bulk XML file, files in parallel.
/// Returns the intermediates that were written.
pub fn process_xml_files(config: &PipelineConfig, stats: &ProcessingStats) -> Result<Vec<PathBuf>> {
    info!("Starting XML file processing");

    let files = config.limit_files(find_xml_files(&config.uspatent_dir)?);
    let progress = stage_progress!(files.len(), "XML files", "Extracting assignments...");

    let written = files
        .par_iter()
        .map(|xml_path| -> Result<Option<PathBuf>> {
            let (records, rows) = extract_file(xml_path)?;
            stats
                .assignment_records
                .fetch_add(records, Ordering::Relaxed);
            stats.files_processed.fetch_add(1, Ordering::Relaxed);
            progress.inc(1);

            if rows.is_empty() {
                debug!("No assignment rows in {}", xml_path.display());
                return Ok(None);
            }

            let csv_path = intermediate_path(xml_path);
            write_intermediate(&csv_path, &rows)?;
            stats
                .assignment_rows
                .fetch_add(rows.len() as u64, Ordering::Relaxed);
            Ok(Some(csv_path))
        })
        .collect::<Result<Vec<_>>>()?;

    progress.finish_with_message("Extraction complete");
    Ok(written.into_iter().flatten().collect())
}
