//! Tabular data layer
//!
//! Every supported upload format has one [`TabularReader`] that loads a
//! file into a typed [`Table`] (Arrow schema + record batches):
//! - `csv`: header row plus Arrow type inference
//! - `json`: a top-level array of row objects
//! - `jsonl`: one row object per line
//! - `parquet`: Arrow reader with random row sampling for large files
//!
//! Column statistics are computed over the loaded table in [`schema`].

pub mod csv;
pub mod json;
pub mod parquet_file;
pub mod schema;

pub use schema::{infer_schema, ColumnSchema};

use crate::dataset::FileType;
use crate::Result;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::json::writer::{JsonArray, WriterBuilder};
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};
use std::path::Path;

/// Rows decoded per Arrow batch
pub const BATCH_SIZE: usize = 8192;

/// A loaded slice of a tabular file
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Convert to row objects, with nulls written explicitly
    pub fn to_rows(&self) -> Result<Vec<Map<String, Value>>> {
        if self.num_rows() == 0 {
            return Ok(Vec::new());
        }

        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(Vec::new());
        let batches: Vec<&RecordBatch> = self.batches.iter().collect();
        writer.write_batches(&batches)?;
        writer.finish()?;

        let rows = serde_json::from_slice(&writer.into_inner())?;
        Ok(rows)
    }
}

/// Loads one file format into a [`Table`]
pub trait TabularReader: Send + Sync {
    /// Format handled by this reader
    fn file_type(&self) -> FileType;

    /// The first `n` rows in file order
    fn head(&self, path: &Path, n: usize) -> Result<Table>;

    /// At most `limit` rows used for schema inference.
    ///
    /// Readers that can sample without a full scan override this; the
    /// default takes the leading rows.
    fn sample(&self, path: &Path, limit: usize) -> Result<Table> {
        self.head(path, limit)
    }
}

/// Reader for a file type
pub fn reader_for(file_type: FileType) -> Box<dyn TabularReader> {
    match file_type {
        FileType::Csv => Box::new(csv::CsvReader),
        FileType::Json => Box::new(json::JsonReader),
        FileType::Jsonl => Box::new(json::JsonLinesReader),
        FileType::Parquet => Box::new(parquet_file::ParquetReader),
    }
}

/// Drain a batch iterator, keeping at most `limit` rows
pub(crate) fn collect_limited<I>(batches: I, limit: usize) -> Result<Vec<RecordBatch>>
where
    I: Iterator<Item = std::result::Result<RecordBatch, ArrowError>>,
{
    let mut collected = Vec::new();
    let mut remaining = limit;

    for batch in batches {
        if remaining == 0 {
            break;
        }
        let batch = batch?;
        let take = batch.num_rows().min(remaining);
        if take < batch.num_rows() {
            collected.push(batch.slice(0, take));
        } else {
            collected.push(batch);
        }
        remaining -= take;
    }

    Ok(collected)
}
