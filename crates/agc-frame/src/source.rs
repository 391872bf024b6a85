//! Parquet event source.
//!
//! One row per event; scalar numeric columns and `List<number>` columns
//! (one list per event) are supported. Values are widened to `f64`. Only the
//! requested columns are decoded.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, AsArray, OffsetSizeTrait};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use crate::column::{Column, EventBatch, JaggedCol};

/// Default number of events per decoded batch.
pub const DEFAULT_BATCH_SIZE: usize = 65_536;

/// Error type for event source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Parquet decoding failed.
    #[error("Parquet read error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow conversion failed.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// The file could not be opened.
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    /// A requested column is absent.
    #[error("column '{column}' not found in {path}")]
    MissingColumn { column: String, path: PathBuf },

    /// A column is neither numeric nor a list of numbers.
    #[error("column '{column}' in {path} has unsupported type {data_type}")]
    UnsupportedType { column: String, path: PathBuf, data_type: DataType },

    /// Offsets or lengths are inconsistent.
    #[error("malformed batch: {0}")]
    Malformed(String),

    /// Not a Parquet file.
    #[error("unsupported input format: {0} (expected a .parquet file)")]
    UnsupportedFormat(PathBuf),
}

impl From<SourceError> for agc_core::Error {
    fn from(e: SourceError) -> Self {
        agc_core::Error::Input(e.to_string())
    }
}

/// An event file on local disk.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
    batch_size: usize,
}

impl ParquetSource {
    /// Open `path`. Only `.parquet` files are accepted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let is_parquet = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));
        if !is_parquet {
            return Err(SourceError::UnsupportedFormat(path));
        }
        Ok(Self { path, batch_size: DEFAULT_BATCH_SIZE })
    }

    /// Override the number of events per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn builder(&self) -> Result<ParquetRecordBatchReaderBuilder<File>, SourceError> {
        let file = File::open(&self.path)
            .map_err(|source| SourceError::Io { path: self.path.clone(), source })?;
        Ok(ParquetRecordBatchReaderBuilder::try_new(file)?)
    }

    /// Names of the top-level columns.
    pub fn column_names(&self) -> Result<Vec<String>, SourceError> {
        let builder = self.builder()?;
        Ok(builder.schema().fields().iter().map(|f| f.name().clone()).collect())
    }

    /// Total number of events in the file, from the footer metadata.
    pub fn num_rows(&self) -> Result<u64, SourceError> {
        let builder = self.builder()?;
        Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
    }

    /// Iterate over batches containing only `columns`.
    pub fn batches(&self, columns: &[String]) -> Result<BatchIter, SourceError> {
        let builder = self.builder()?;

        let roots = builder.parquet_schema().root_schema().get_fields();
        let mut indices = Vec::with_capacity(columns.len());
        for c in columns {
            let idx = roots.iter().position(|f| f.name() == c).ok_or_else(|| {
                SourceError::MissingColumn { column: c.clone(), path: self.path.clone() }
            })?;
            indices.push(idx);
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
        let reader = builder.with_projection(mask).with_batch_size(self.batch_size).build()?;

        Ok(BatchIter { reader, columns: columns.to_vec(), path: self.path.clone() })
    }
}

/// Iterator over decoded [`EventBatch`]es.
pub struct BatchIter {
    reader: ParquetRecordBatchReader,
    columns: Vec<String>,
    path: PathBuf,
}

impl Iterator for BatchIter {
    type Item = Result<EventBatch, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = match self.reader.next()? {
            Ok(b) => b,
            Err(e) => return Some(Err(e.into())),
        };
        Some(convert_batch(&batch, &self.columns, &self.path))
    }
}

fn convert_batch(batch: &RecordBatch, columns: &[String], path: &Path) -> Result<EventBatch, SourceError> {
    let mut out = EventBatch::new(batch.num_rows());
    for name in columns {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| SourceError::MissingColumn { column: name.clone(), path: path.to_path_buf() })?;
        let column = convert_array(array, name, path)?;
        out.insert(name.clone(), column).map_err(|e| SourceError::Malformed(e.to_string()))?;
    }
    Ok(out)
}

fn convert_array(array: &ArrayRef, name: &str, path: &Path) -> Result<Column, SourceError> {
    match array.data_type() {
        DataType::List(_) => Ok(Column::Jagged(list_to_jagged::<i32>(array)?)),
        DataType::LargeList(_) => Ok(Column::Jagged(list_to_jagged::<i64>(array)?)),
        dt if dt.is_numeric() || *dt == DataType::Boolean => Ok(Column::Scalar(to_f64(array)?)),
        dt => Err(SourceError::UnsupportedType {
            column: name.to_string(),
            path: path.to_path_buf(),
            data_type: dt.clone(),
        }),
    }
}

fn to_f64(array: &ArrayRef) -> Result<Vec<f64>, SourceError> {
    let widened = cast(array, &DataType::Float64)?;
    let values = widened.as_primitive::<Float64Type>();
    Ok(values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn list_to_jagged<O: OffsetSizeTrait>(array: &ArrayRef) -> Result<JaggedCol, SourceError> {
    let list = array.as_list::<O>();
    let offsets = list.value_offsets();
    let start = offsets[0].as_usize();
    let end = offsets[offsets.len() - 1].as_usize();

    let values = to_f64(list.values())?;
    let flat = values[start..end].to_vec();
    let offsets = offsets.iter().map(|o| o.as_usize() - start).collect();
    Ok(JaggedCol { flat, offsets })
}
