//! Assignee → GVKEY linkage against the corporate patent dataset.

use crate::classification::{patent_class_rows_to_record_batch, PatentClassRow};
use crate::config::{PipelineConfig, CORPORATE_TABLE};
use crate::normalize::name_key;
use crate::output::write_table;
use crate::reference::read_columns;
use crate::ProcessingStats;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::info;

/// Normalized assignee name → gvkeys, in first-seen order.
#[derive(Debug, Default)]
pub struct CorporateIndex {
    by_name: HashMap<String, Vec<String>>,
}

impl CorporateIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::default();
        let mut seen = HashSet::new();

        for row in read_columns(path, b',', &["assg_name", "gvkey"])? {
            let mut cells = row.into_iter();
            let (Some(name), Some(gvkey)) = (cells.next().flatten(), cells.next().flatten()) else {
                continue;
            };
            let key = name_key(&name);
            if key.is_empty() || !seen.insert((key.clone(), gvkey.clone())) {
                continue;
            }
            index.by_name.entry(key).or_default().push(gvkey);
        }

        info!("Loaded {} corporate assignee names", index.by_name.len());
        Ok(index)
    }

    pub fn gvkeys(&self, assignee: &str) -> &[String] {
        self.by_name
            .get(&name_key(assignee))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Left join on the normalized name. The assignee column is replaced by
    /// its key; a name shared by several gvkeys fans out into one row each.
    pub fn link(&self, rows: Vec<PatentClassRow>) -> Vec<PatentClassRow> {
        let mut linked = Vec::with_capacity(rows.len());

        for mut row in rows {
            let key = name_key(&row.patent_assignees);
            row.patent_assignees = key.clone();

            match self.by_name.get(&key) {
                Some(gvkeys) => {
                    for gvkey in gvkeys {
                        let mut matched = row.clone();
                        matched.assg_name = Some(key.clone());
                        matched.gvkey = Some(gvkey.clone());
                        linked.push(matched);
                    }
                }
                None => linked.push(row),
            }
        }

        linked
    }
}

/// Stage 3: link and persist `patent_assignment_with_class`.
pub fn merge_with_corporate_data(
    config: &PipelineConfig,
    rows: Vec<PatentClassRow>,
    stats: &ProcessingStats,
) -> Result<Vec<PatentClassRow>> {
    info!("Merging with corporate data");

    let index = CorporateIndex::load(&config.reference_dir.join(CORPORATE_TABLE))?;
    let linked = index.link(rows);

    let matched = linked.iter().filter(|r| r.gvkey.is_some()).count();
    stats
        .linked_rows
        .fetch_add(matched as u64, Ordering::Relaxed);
    info!("{} of {} rows linked to a gvkey", matched, linked.len());

    write_table(
        &config.output_file("patent_assignment_with_class"),
        &linked,
        config.format,
        config.batch_size,
        patent_class_rows_to_record_batch,
    )?;

    Ok(linked)
}
