use crate::config::OutputFormat;
use anyhow::{Context, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::info;

pub type BatchConverter<T> = fn(Vec<T>) -> Result<RecordBatch>;

fn create_parquet_writer(output_path: &Path, schema: SchemaRef) -> Result<ArrowWriter<File>> {
    let file = File::create(output_path)
        .with_context(|| format!("creating {}", output_path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .set_max_row_group_size(1_000_000)
        .build();

    let writer = ArrowWriter::try_new(file, schema, Some(props))?;
    Ok(writer)
}

fn write_parquet_batch<T>(
    writer: &mut ArrowWriter<File>,
    records: Vec<T>,
    to_record_batch: BatchConverter<T>,
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let batch = to_record_batch(records)?;
    writer.write(&batch)?;
    Ok(())
}

fn write_csv<T: Serialize>(
    path: &Path,
    rows: &[T],
    to_record_batch: BatchConverter<T>,
) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    if rows.is_empty() {
        // serde only emits a header alongside the first row
        let schema = to_record_batch(Vec::new())?.schema();
        writer.write_record(schema.fields().iter().map(|f| f.name().as_str()))?;
    }
    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_parquet<T: Clone>(
    path: &Path,
    rows: &[T],
    batch_size: usize,
    to_record_batch: BatchConverter<T>,
) -> Result<()> {
    let schema = to_record_batch(Vec::new())?.schema();
    let mut writer = create_parquet_writer(path, schema)?;

    for chunk in rows.chunks(batch_size.max(1)) {
        write_parquet_batch(&mut writer, chunk.to_vec(), to_record_batch)?;
    }

    writer.close()?;
    Ok(())
}

/// Writes one output table in the configured format. CSV files always get a
/// header row, even when `rows` is empty.
pub fn write_table<T: Serialize + Clone>(
    path: &Path,
    rows: &[T],
    format: OutputFormat,
    batch_size: usize,
    to_record_batch: BatchConverter<T>,
) -> Result<()> {
    let count = rows.len();
    match format {
        OutputFormat::Csv => write_csv(path, rows, to_record_batch)?,
        OutputFormat::Parquet => write_parquet(path, rows, batch_size, to_record_batch)?,
    }

    info!("Wrote {} rows to {}", count, path.display());
    Ok(())
}
