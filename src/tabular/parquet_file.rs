//! Parquet reader
//!
//! Files with more rows than the sample limit are sampled uniformly at
//! random (file order preserved) through a row selection, so only the
//! chosen rows are decoded.

use super::{collect_limited, Table, TabularReader, BATCH_SIZE};
use crate::dataset::FileType;
use crate::Result;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReaderBuilder, RowSelection, RowSelector};
use rand::Rng;
use std::fs::File;
use std::path::Path;

pub struct ParquetReader;

impl TabularReader for ParquetReader {
    fn file_type(&self) -> FileType {
        FileType::Parquet
    }

    fn head(&self, path: &Path, n: usize) -> Result<Table> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let schema = builder.schema().clone();

        let reader = builder
            .with_batch_size(n.clamp(1, BATCH_SIZE))
            .with_limit(n)
            .build()?;

        Ok(Table::new(schema, collect_limited(reader, n)?))
    }

    fn sample(&self, path: &Path, limit: usize) -> Result<Table> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let schema = builder.schema().clone();
        let total_rows = usize::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);

        let builder = if total_rows > limit {
            tracing::debug!(
                "Sampling {} of {} parquet rows from {}",
                limit,
                total_rows,
                path.display()
            );
            builder.with_row_selection(sample_selection(total_rows, limit, &mut rand::thread_rng()))
        } else {
            builder
        };

        let reader = builder.with_batch_size(limit.clamp(1, BATCH_SIZE)).build()?;
        Ok(Table::new(schema, collect_limited(reader, limit)?))
    }
}

/// Select `amount` of `total_rows` rows uniformly at random, in order
pub fn sample_selection<R: Rng + ?Sized>(total_rows: usize, amount: usize, rng: &mut R) -> RowSelection {
    let amount = amount.min(total_rows);
    let mut picked = rand::seq::index::sample(rng, total_rows, amount).into_vec();
    picked.sort_unstable();

    let mut selectors = Vec::with_capacity(picked.len() * 2 + 1);
    let mut cursor = 0;
    for row in picked {
        if row > cursor {
            selectors.push(RowSelector::skip(row - cursor));
        }
        selectors.push(RowSelector::select(1));
        cursor = row + 1;
    }
    if cursor < total_rows {
        selectors.push(RowSelector::skip(total_rows - cursor));
    }

    RowSelection::from(selectors)
}
