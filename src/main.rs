use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[macro_use]
mod macros;

mod aggregate;
mod assignments;
mod classification;
mod config;
mod corporate;
mod normalize;
mod output;
mod reference;
mod xml;

use config::{parse_date, OutputFormat, PipelineConfig};

#[derive(Parser)]
#[command(name = "uspto_assignment_processor")]
#[command(about = "USPTO Patent Assignment Cleaner and Corporate Linker")]
struct Cli {
    /// Base directory holding uspatent/, uva_darden/ and results/
    #[arg(short = 'p', long, default_value = ".")]
    base_path: PathBuf,

    /// First recorded date kept in the corporate tables (YYYY-MM-DD)
    #[arg(short, long, default_value = "2002-01-01", value_parser = parse_date)]
    start_date: NaiveDate,

    /// Last recorded date kept in the corporate tables (YYYY-MM-DD)
    #[arg(short, long, default_value = "2023-12-31", value_parser = parse_date)]
    end_date: NaiveDate,

    /// Number of parallel workers (default: all cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Rows per Parquet batch
    #[arg(short, long, default_value = "1000000")]
    batch_size: usize,

    /// Format of the tables written to results/
    #[arg(short, long, value_enum, default_value = "csv")]
    format: OutputFormat,

    /// Limit bulk files per stage for testing (0 = no limit)
    #[arg(short = 'l', long, default_value = "0")]
    files_limit: usize,

    /// Reuse intermediate CSVs from a previous run instead of parsing XML
    #[arg(long)]
    skip_extract: bool,
}

// ====== PROCESSING STATISTICS ======
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub files_processed: AtomicU64,
    pub assignment_records: AtomicU64,
    pub assignment_rows: AtomicU64,
    pub classified_rows: AtomicU64,
    pub linked_rows: AtomicU64,
    pub corporate_rows: AtomicU64,
    pub bad_dates: AtomicU64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Default::default()
    }
}

// ====== MEMORY MONITORING ======
fn get_memory_usage() -> String {
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            if line.starts_with("VmRSS:") {
                return line.to_string();
            }
        }
    }
    "Memory info unavailable".to_string()
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

/// Runs extract → classify → link → aggregate.
pub fn run_pipeline(config: &PipelineConfig, skip_extract: bool, stats: &ProcessingStats) -> Result<()> {
    create_dir_all(&config.output_dir)?;
    info!("Output directory: {}", config.output_dir.display());

    if skip_extract {
        warn!("Skipping XML extraction, reusing intermediate tables");
    } else {
        let written = assignments::process_xml_files(config, stats)?;
        info!(
            "Wrote {} intermediate tables. Memory: {}",
            written.len(),
            get_memory_usage()
        );
    }

    let classified = classification::merge_with_classification(config, stats)?;
    let linked = corporate::merge_with_corporate_data(config, classified, stats)?;
    aggregate::finalize_and_aggregate(config, &linked, stats)?;

    Ok(())
}

fn main() -> Result<()> {
    init_logging();

    let args = Cli::parse();

    let num_workers = args.workers.unwrap_or_else(num_cpus::get);
    info!("Using {} workers (max available: {})", num_workers, num_cpus::get());

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("uspto-worker-{}", i))
        .build_global()?;

    let mut config = PipelineConfig::new(&args.base_path, args.start_date, args.end_date)?;
    config.format = args.format;
    config.batch_size = args.batch_size;
    config.files_limit = args.files_limit;

    let stats = ProcessingStats::new();
    run_pipeline(&config, args.skip_extract, &stats)?;

    // Print final statistics
    info!("Final Processing Statistics:");
    info!("  XML files processed: {}", stats.files_processed.load(Ordering::Relaxed));
    info!("  Assignment records: {}", stats.assignment_records.load(Ordering::Relaxed));
    info!("  Assignment rows: {}", stats.assignment_rows.load(Ordering::Relaxed));
    info!("  Classified rows: {}", stats.classified_rows.load(Ordering::Relaxed));
    info!("  Rows linked to a gvkey: {}", stats.linked_rows.load(Ordering::Relaxed));
    info!("  Corporate rows in window: {}", stats.corporate_rows.load(Ordering::Relaxed));
    info!("  Unreadable recorded dates: {}", stats.bad_dates.load(Ordering::Relaxed));

    info!("Results written to: {}", config.output_dir.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CORPORATE_TABLE, CPC_TABLE, GREEN_CLASS_TABLE, USPC_TABLE};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const BULK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<us-patent-assignments dtd-version="0.2">
  <action-key-code>DA</action-key-code>
  <patent-assignments>
    <patent-assignment>
      <assignment-record>
        <reel-no>016000</reel-no>
        <frame-no>0001</frame-no>
        <last-update-date><date>20050310</date></last-update-date>
        <purge-indicator>N</purge-indicator>
        <recorded-date><date>20050301</date></recorded-date>
        <conveyance-text>ASSIGNMENT OF ASSIGNORS INTEREST</conveyance-text>
      </assignment-record>
      <patent-assignors>
        <patent-assignor><name>DOE, JOHN</name></patent-assignor>
      </patent-assignors>
      <patent-assignees>
        <patent-assignee><name>ACME WIDGETS, INC.</name></patent-assignee>
        <patent-assignee><name>UNKNOWN HOLDINGS</name></patent-assignee>
      </patent-assignees>
      <patent-properties>
        <patent-property>
          <document-id><country>US</country><doc-number>10123456</doc-number><kind>X0</kind></document-id>
          <document-id><country>US</country><doc-number>07000001</doc-number><kind>B2</kind></document-id>
        </patent-property>
        <patent-property>
          <document-id><country>US</country><doc-number>7000002</doc-number><kind>B1</kind></document-id>
        </patent-property>
      </patent-properties>
    </patent-assignment>
    <patent-assignment>
      <assignment-record>
        <reel-no>017000</reel-no>
        <frame-no>0002</frame-no>
        <recorded-date><date>19990101</date></recorded-date>
      </assignment-record>
      <patent-assignees>
        <patent-assignee><name>Acme Widgets Inc</name></patent-assignee>
      </patent-assignees>
      <patent-properties>
        <patent-property>
          <document-id><doc-number>7000003</doc-number><kind>B2</kind></document-id>
        </patent-property>
      </patent-properties>
    </patent-assignment>
  </patent-assignments>
</us-patent-assignments>
"#;

    fn fixture(base: &Path) {
        let uspatent = base.join("uspatent");
        let reference = base.join("uva_darden");
        fs::create_dir_all(&uspatent).unwrap();
        fs::create_dir_all(&reference).unwrap();

        fs::write(uspatent.join("ad20050301-01.xml"), BULK_XML).unwrap();
        fs::write(
            uspatent.join(CPC_TABLE),
            "patent_id\tcpc_group\n7000001\tY02E10/50\n7000003\tH01L21/00\n",
        )
        .unwrap();
        fs::write(
            uspatent.join(USPC_TABLE),
            "patent_id\tuspc_subclass_id\n7000002\t438/57\n",
        )
        .unwrap();
        fs::write(uspatent.join(GREEN_CLASS_TABLE), "cpc_group\nY02E10/50\n").unwrap();
        fs::write(
            reference.join(CORPORATE_TABLE),
            "assg_name,gvkey\nAcme Widgets Inc.,1004\n",
        )
        .unwrap();
    }

    fn config(base: &Path) -> PipelineConfig {
        PipelineConfig::new(
            base,
            parse_date("2002-01-01").unwrap(),
            parse_date("2023-12-31").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn end_to_end_csv() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        let config = config(dir.path());
        let stats = ProcessingStats::new();

        run_pipeline(&config, false, &stats).unwrap();

        assert_eq!(stats.files_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.assignment_records.load(Ordering::Relaxed), 2);
        // 2 grants x 2 assignees + 1 grant x 1 assignee
        assert_eq!(stats.assignment_rows.load(Ordering::Relaxed), 5);
        assert!(dir.path().join("uspatent/ad20050301-01.csv").exists());

        let corporate =
            fs::read_to_string(dir.path().join("results/patent_corporate.csv")).unwrap();
        let lines: Vec<&str> = corporate.lines().collect();
        assert_eq!(
            lines[0],
            "patent_id,patent_kind,assignee_name,assignee_gvkey,date_recorded,date_last_update,\
             patent_cpc_group,patent_uspc_group,patent_is_green,year_recorded"
        );
        assert_eq!(
            &lines[1..],
            [
                "07000001,B2,acme widgets inc,1004,2005-03-01,2005-03-10,Y02E10/50,,1,2005",
                "7000002,B1,acme widgets inc,1004,2005-03-01,2005-03-10,,438/57,0,2005",
            ]
        );

        let aggregate =
            fs::read_to_string(dir.path().join("results/patent_aggregate.csv")).unwrap();
        assert_eq!(
            aggregate,
            "assignee_gvkey,assignee_name,year,patent_num,patent_green_num,patent_green_total\n\
             1004,acme widgets inc,2005,2,1,0.5\n"
        );

        let with_class =
            fs::read_to_string(dir.path().join("results/patent_assignment_with_class.csv"))
                .unwrap();
        // unknown holdings stays unlinked, the 1999 assignment is linked but outside the window
        assert_eq!(with_class.lines().count(), 1 + 5);
        assert_eq!(stats.linked_rows.load(Ordering::Relaxed), 3);

        let summary =
            fs::read_to_string(dir.path().join("results/patent_year_summary.csv")).unwrap();
        assert_eq!(summary, "year_recorded,total,green\n2005,2,1\n");
    }

    #[test]
    fn skip_extract_reuses_intermediates_and_writes_parquet() {
        let dir = TempDir::new().unwrap();
        fixture(dir.path());
        let mut config = config(dir.path());
        run_pipeline(&config, false, &ProcessingStats::new()).unwrap();

        fs::remove_file(dir.path().join("uspatent/ad20050301-01.xml")).unwrap();
        config.format = OutputFormat::Parquet;
        let stats = ProcessingStats::new();
        run_pipeline(&config, true, &stats).unwrap();

        assert_eq!(stats.files_processed.load(Ordering::Relaxed), 0);
        assert_eq!(stats.corporate_rows.load(Ordering::Relaxed), 2);
        for table in [
            "patent_assignment_with_class",
            "patent_corporate",
            "patent_aggregate",
            "patent_year_summary",
        ] {
            assert!(dir.path().join(format!("results/{}.parquet", table)).exists());
        }
    }
}
