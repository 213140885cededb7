//! CSV reader - header row required, column types inferred by Arrow

use super::{collect_limited, Table, TabularReader, BATCH_SIZE};
use crate::dataset::FileType;
use crate::Result;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub struct CsvReader;

impl TabularReader for CsvReader {
    fn file_type(&self) -> FileType {
        FileType::Csv
    }

    fn head(&self, path: &Path, n: usize) -> Result<Table> {
        let format = Format::default().with_header(true);
        // inference window matches the decode window
        let (schema, _) = format.infer_schema(File::open(path)?, Some(n.max(1)))?;
        let schema = Arc::new(schema);

        if schema.fields().is_empty() {
            return Ok(Table::new(schema, Vec::new()));
        }

        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_batch_size(n.clamp(1, BATCH_SIZE))
            .build(File::open(path)?)?;

        let batches = collect_limited(reader, n)?;
        let table = Table::new(schema, batches);
        tracing::debug!("Read {} CSV rows from {}", table.num_rows(), path.display());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_all_rows_with_types() {
        let file = write_csv("a,b\n1,x\n2,y\n,z\n");
        let table = CsvReader.head(file.path(), 100).unwrap();

        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.num_columns(), 2);
        assert_eq!(table.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(table.schema().field(1).data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_respects_row_limit() {
        let mut contents = String::from("id,score\n");
        for i in 0..50 {
            contents.push_str(&format!("{},{}.5\n", i, i));
        }
        let file = write_csv(&contents);

        let table = CsvReader.head(file.path(), 10).unwrap();
        assert_eq!(table.num_rows(), 10);

        let rows = table.to_rows().unwrap();
        assert_eq!(rows[9]["id"], serde_json::json!(9));
    }

    #[test]
    fn test_header_only_file() {
        let file = write_csv("a,b\n");
        let table = CsvReader.head(file.path(), 10).unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.num_columns(), 2);
    }
}
