use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::ValueEnum;
use std::path::{Path, PathBuf};

pub const CPC_TABLE: &str = "g_cpc_current.tsv";
pub const USPC_TABLE: &str = "g_uspc_at_issue.tsv";
pub const GREEN_CLASS_TABLE: &str = "OECD_ENV_Tech_Patent_Group.csv";
pub const CORPORATE_TABLE: &str = "GCPD_granular_data.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Everything a stage needs to know about where data lives and which
/// window to keep.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub uspatent_dir: PathBuf,
    pub reference_dir: PathBuf,
    pub output_dir: PathBuf,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub format: OutputFormat,
    pub batch_size: usize,
    pub files_limit: usize,
}

impl PipelineConfig {
    /// Standard layout: `uspatent/`, `uva_darden/` and `results/` under
    /// `base_path`.
    pub fn new(base_path: &Path, start_date: NaiveDate, end_date: NaiveDate) -> Result<Self> {
        if start_date > end_date {
            bail!("start date {} is after end date {}", start_date, end_date);
        }

        Ok(Self {
            uspatent_dir: base_path.join("uspatent"),
            reference_dir: base_path.join("uva_darden"),
            output_dir: base_path.join("results"),
            start_date,
            end_date,
            format: OutputFormat::Csv,
            batch_size: 1_000_000,
            files_limit: 0,
        })
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", name, self.format.extension()))
    }

    /// Applies `--files-limit` (0 keeps everything).
    pub fn limit_files<T>(&self, mut files: Vec<T>) -> Vec<T> {
        if self.files_limit > 0 && self.files_limit < files.len() {
            files.truncate(self.files_limit);
        }
        files
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_and_window() {
        let start = parse_date("2002-01-01").unwrap();
        let end = parse_date("2023-12-31").unwrap();
        let config = PipelineConfig::new(Path::new("/data"), start, end).unwrap();

        assert_eq!(config.uspatent_dir, Path::new("/data/uspatent"));
        assert_eq!(config.reference_dir, Path::new("/data/uva_darden"));
        assert_eq!(
            config.output_file("patent_aggregate"),
            Path::new("/data/results/patent_aggregate.csv")
        );
        assert!(PipelineConfig::new(Path::new("/data"), end, start).is_err());
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_date("20020101").is_err());
        assert!(parse_date("2002-13-01").is_err());
    }

    #[test]
    fn file_limit() {
        let mut config =
            PipelineConfig::new(Path::new("."), NaiveDate::MIN, NaiveDate::MAX).unwrap();
        assert_eq!(config.limit_files(vec![1, 2, 3]), vec![1, 2, 3]);
        config.files_limit = 2;
        assert_eq!(config.limit_files(vec![1, 2, 3]), vec![1, 2]);
    }
}
