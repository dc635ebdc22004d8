use crate::value::SqlValue;

/// Values bound to one prepared statement, keyed by 1-based position.
///
/// Storage grows only as far as the highest bound position and never past
/// `capacity`. Positions that were skipped read back as `Null`.
#[derive(Debug, Clone)]
pub(crate) struct ParamTable {
    values: Vec<SqlValue>,
    capacity: usize,
}

impl ParamTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            values: Vec::new(),
            capacity,
        }
    }

    /// Record `value` at `index`. Position 0 and positions past capacity
    /// are ignored.
    pub(crate) fn store(&mut self, index: usize, value: SqlValue) {
        if index == 0 || index > self.capacity {
            return;
        }
        if self.values.len() < index {
            self.values.resize(index, SqlValue::Null);
        }
        self.values[index - 1] = value;
    }

    /// Values from position 1 through the highest bound position.
    pub(crate) fn snapshot(&self) -> Vec<SqlValue> {
        self.values.clone()
    }
}
