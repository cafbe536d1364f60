use std::collections::HashSet;

use crate::error::PipelineError;
use crate::table::Table;

/// Distinct, non-empty lookup values taken from one column of the reference
/// table. Values are compared byte for byte.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    values: HashSet<String>,
}

impl KeySet {
    /// Collects the key column; null cells are skipped.
    pub fn from_column(table: &Table, key: &str) -> Result<Self, PipelineError> {
        let values = table
            .column(key)?
            .iter()
            .flatten()
            .filter(|value| !value.is_empty())
            .cloned()
            .collect();
        Ok(KeySet { values })
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::table_of;

    #[test]
    fn deduplicates_and_drops_missing_keys() {
        let table = table_of(
            &["NIF", "NOMBRE"],
            &[["A1", "X"], ["", "Y"], ["A1", "Z"], ["B2", "W"]],
        );
        let keys = KeySet::from_column(&table, "NIF").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("A1"));
        assert!(keys.contains("B2"));
    }

    #[test]
    fn no_normalization_is_applied() {
        let table = table_of(&["NIF", "NOMBRE"], &[["a1 ", "X"]]);
        let keys = KeySet::from_column(&table, "NIF").unwrap();
        assert!(keys.contains("a1 "));
        assert!(!keys.contains("A1"));
    }

    #[test]
    fn missing_key_column_is_reported() {
        let table = table_of(&["DNI", "NOMBRE"], &[["A1", "X"]]);
        let err = KeySet::from_column(&table, "NIF").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[test]
    fn all_null_keys_give_an_empty_set() {
        let table = table_of(&["NIF", "NOMBRE"], &[["", "X"], ["", "Y"]]);
        assert!(KeySet::from_column(&table, "NIF").unwrap().is_empty());
    }
}
