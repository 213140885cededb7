//! JSON and JSON Lines readers
//!
//! Both formats hold one object per row. Rows are decoded with serde_json,
//! then converted to Arrow with a schema inferred from the same rows.
//! Only the requested rows are ever held in memory; the rest of an array
//! is scanned for well-formedness and discarded element by element.

use super::{Table, TabularReader};
use crate::dataset::FileType;
use crate::{Error, Result};
use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::json::ReaderBuilder;
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde_json::error::Category;
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Top-level array of row objects
pub struct JsonReader;

impl TabularReader for JsonReader {
    fn file_type(&self) -> FileType {
        FileType::Json
    }

    fn head(&self, path: &Path, n: usize) -> Result<Table> {
        let mut de = serde_json::Deserializer::from_reader(BufReader::new(File::open(path)?));
        let parsed = LeadingRows(n)
            .deserialize(&mut de)
            .and_then(|rows| de.end().map(|()| rows));
        let rows = match parsed {
            Ok(rows) => rows,
            Err(e) if e.classify() == Category::Data => {
                return Err(Error::Validation(
                    "JSON dataset must be an array of row objects".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        rows_to_table(rows)
    }
}

/// Keeps the first `n` elements of a JSON array and skips the rest
struct LeadingRows(usize);

impl<'de> DeserializeSeed<'de> for LeadingRows {
    type Value = Vec<Value>;

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for LeadingRows {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of row objects")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut rows = Vec::with_capacity(self.0.min(super::BATCH_SIZE));
        while rows.len() < self.0 {
            match seq.next_element::<Value>()? {
                Some(row) => rows.push(row),
                None => return Ok(rows),
            }
        }
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(rows)
    }
}

/// One row object per line; blank lines are skipped
pub struct JsonLinesReader;

impl TabularReader for JsonLinesReader {
    fn file_type(&self) -> FileType {
        FileType::Jsonl
    }

    fn head(&self, path: &Path, n: usize) -> Result<Table> {
        let reader = BufReader::new(File::open(path)?);
        let mut rows = Vec::new();

        for line in reader.lines() {
            if rows.len() >= n {
                break;
            }
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }

        rows_to_table(rows)
    }
}

fn rows_to_table(rows: Vec<Value>) -> Result<Table> {
    if let Some(pos) = rows.iter().position(|row| !row.is_object()) {
        return Err(Error::Validation(format!("Row {} is not a JSON object", pos)));
    }
    if rows.is_empty() {
        return Ok(Table::new(Arc::new(Schema::empty()), Vec::new()));
    }

    let schema = Arc::new(infer_json_schema_from_iterator(
        rows.iter().map(Ok::<_, ArrowError>),
    )?);

    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(rows.len())
        .build_decoder()?;
    decoder.serialize(&rows)?;

    let batches = decoder.flush()?.into_iter().collect();
    Ok(Table::new(schema, batches))
}
