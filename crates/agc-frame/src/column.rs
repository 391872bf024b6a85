//! In-memory columnar storage for one batch of events.

use std::collections::HashMap;
use std::rc::Rc;

use agc_core::{Error, Result};

use crate::value::{Value, ValueRef};

/// A jagged (variable-length per entry) column stored as flat values plus
/// entry offsets.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JaggedCol {
    /// Flat array of all values across all entries.
    pub flat: Vec<f64>,
    /// Entry boundaries: `offsets.len() == n_entries + 1`.
    pub offsets: Vec<usize>,
}

impl JaggedCol {
    /// Empty column with zero entries.
    pub fn new() -> Self {
        Self { flat: Vec::new(), offsets: vec![0] }
    }

    /// Build from one `Vec` per entry.
    pub fn from_rows<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[f64]>,
    {
        let mut col = Self::new();
        for r in rows {
            col.push(r.as_ref());
        }
        col
    }

    /// Append one entry.
    pub fn push(&mut self, values: &[f64]) {
        self.flat.extend_from_slice(values);
        self.offsets.push(self.flat.len());
    }

    /// Values of entry `row`.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.flat[self.offsets[row]..self.offsets[row + 1]]
    }

    /// Number of entries.
    pub fn n_entries(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

/// Column shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// One value per event.
    Scalar,
    /// Variable-length values per event.
    Jagged,
}

/// One column of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per event.
    Scalar(Vec<f64>),
    /// Variable-length values per event.
    Jagged(JaggedCol),
}

impl Column {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Jagged(j) => j.n_entries(),
        }
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column shape.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Scalar(_) => ColumnKind::Scalar,
            Column::Jagged(_) => ColumnKind::Jagged,
        }
    }

    /// Borrowed entry at `row`.
    pub fn get(&self, row: usize) -> ValueRef<'_> {
        match self {
            Column::Scalar(v) => ValueRef::Scalar(v[row]),
            Column::Jagged(j) => ValueRef::Vector(j.row(row)),
        }
    }

    /// Assemble a column from per-row results.
    ///
    /// Rows without a value (filtered out upstream) become `NaN` in scalar
    /// columns and empty entries in jagged ones. With no value at all the
    /// column falls back to `kind`, or to scalar when that is unknown too.
    pub fn from_rows(rows: Vec<Option<Value>>, kind: Option<ColumnKind>, what: &str) -> Result<Column> {
        let kind = match kind {
            Some(k) => k,
            None => match rows.iter().flatten().next() {
                Some(Value::Vector(_)) => ColumnKind::Jagged,
                Some(Value::List(_)) => {
                    return Err(Error::Execution(format!(
                        "{what}: a brace list can only be used as a variation"
                    )));
                }
                _ => ColumnKind::Scalar,
            },
        };

        match kind {
            ColumnKind::Scalar => {
                let mut out = Vec::with_capacity(rows.len());
                for v in rows {
                    match v {
                        None => out.push(f64::NAN),
                        Some(Value::Scalar(x)) => out.push(x),
                        Some(other) => {
                            return Err(Error::Execution(format!(
                                "{what}: expected scalar per event, got {}",
                                other.kind()
                            )));
                        }
                    }
                }
                Ok(Column::Scalar(out))
            }
            ColumnKind::Jagged => {
                let mut out = JaggedCol::new();
                for v in rows {
                    match v {
                        None => out.push(&[]),
                        Some(Value::Vector(xs)) => out.push(&xs),
                        Some(other) => {
                            return Err(Error::Execution(format!(
                                "{what}: expected vector per event, got {}",
                                other.kind()
                            )));
                        }
                    }
                }
                Ok(Column::Jagged(out))
            }
        }
    }
}

/// A batch of events: named columns of equal length.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    n_rows: usize,
    columns: HashMap<String, Rc<Column>>,
}

impl EventBatch {
    /// Empty batch with `n_rows` events and no columns.
    pub fn new(n_rows: usize) -> Self {
        Self { n_rows, columns: HashMap::new() }
    }

    /// Add a column. Its length must match the batch.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if column.len() != self.n_rows {
            return Err(Error::Input(format!(
                "column '{name}' has {} rows, batch has {}",
                column.len(),
                self.n_rows
            )));
        }
        self.columns.insert(name, Rc::new(column));
        Ok(())
    }

    /// Number of events.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Shared handle to a column.
    pub fn column(&self, name: &str) -> Option<Rc<Column>> {
        self.columns.get(name).cloned()
    }

    /// Column names in arbitrary order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jagged_rows() {
        let j = JaggedCol::from_rows([vec![1.0, 2.0], vec![], vec![3.0]]);
        assert_eq!(j.n_entries(), 3);
        assert_eq!(j.offsets, vec![0, 2, 2, 3]);
        assert_eq!(j.row(0), &[1.0, 2.0]);
        assert!(j.row(1).is_empty());
        assert_eq!(j.row(2), &[3.0]);
    }

    #[test]
    fn from_rows_fills_inactive_rows() {
        let c = Column::from_rows(vec![Some(Value::Scalar(1.0)), None], None, "x").unwrap();
        match c {
            Column::Scalar(v) => {
                assert_eq!(v[0], 1.0);
                assert!(v[1].is_nan());
            }
            other => panic!("expected scalar column, got {other:?}"),
        }

        let c = Column::from_rows(vec![None, Some(Value::Vector(vec![2.0, 3.0]))], None, "x").unwrap();
        assert_eq!(c.kind(), ColumnKind::Jagged);
        assert_eq!(c.get(0), ValueRef::Vector(&[]));
        assert_eq!(c.get(1), ValueRef::Vector(&[2.0, 3.0]));
    }

    #[test]
    fn from_rows_rejects_mixed_shapes() {
        let rows = vec![Some(Value::Scalar(1.0)), Some(Value::Vector(vec![1.0]))];
        assert!(Column::from_rows(rows, None, "x").is_err());
        let rows = vec![Some(Value::List(vec![Value::Scalar(1.0)]))];
        assert!(Column::from_rows(rows, None, "x").is_err());
    }

    #[test]
    fn batch_checks_lengths() {
        let mut b = EventBatch::new(2);
        b.insert("a", Column::Scalar(vec![1.0, 2.0])).unwrap();
        assert!(b.insert("b", Column::Scalar(vec![1.0])).is_err());
        assert_eq!(b.column("a").unwrap().len(), 2);
        assert!(b.column("b").is_none());
    }
}
