//! User-controlled row/column permutations, applied only when flattening for
//! export. Cell matrices themselves are never reordered.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExtractError;
use crate::model::CellMatrix;

/// Moves `list[from]` to position `to`, shifting the elements in between.
/// Out-of-range indices leave the list untouched and return `false`.
pub fn move_element<T>(list: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= list.len() || to >= list.len() {
        return false;
    }
    if from != to {
        let item = list.remove(from);
        list.insert(to, item);
    }
    true
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for index in order {
        match seen.get_mut(*index) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOrder {
    pub row_order: Vec<usize>,
    pub col_order: Vec<usize>,
}

impl TableOrder {
    #[must_use]
    pub fn identity(rows: usize, cols: usize) -> Self {
        Self {
            row_order: (0..rows).collect(),
            col_order: (0..cols).collect(),
        }
    }

    fn fits(&self, rows: usize, cols: usize) -> bool {
        is_permutation(&self.row_order, rows) && is_permutation(&self.col_order, cols)
    }
}

/// Orders keyed by table index in export order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingStore {
    tables: BTreeMap<usize, TableOrder>,
}

impl OrderingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_json_file(&self, path: &Path) -> Result<(), ExtractError> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    #[must_use]
    pub fn order(&self, table: usize) -> Option<&TableOrder> {
        self.tables.get(&table)
    }

    /// Aligns the stored order with a freshly rebuilt table. A missing order
    /// starts as identity; one that no longer fits the row/column counts is
    /// reset to identity and `true` is returned.
    pub fn sync(&mut self, table: usize, rows: usize, cols: usize) -> bool {
        match self.tables.get_mut(&table) {
            Some(order) if order.fits(rows, cols) => false,
            Some(order) => {
                warn!(table, rows, cols, "stored order does not fit rebuilt table, resetting");
                *order = TableOrder::identity(rows, cols);
                true
            }
            None => {
                self.tables.insert(table, TableOrder::identity(rows, cols));
                false
            }
        }
    }

    pub fn move_row(&mut self, table: usize, from: usize, to: usize) -> bool {
        self.tables
            .get_mut(&table)
            .is_some_and(|order| move_element(&mut order.row_order, from, to))
    }

    pub fn move_col(&mut self, table: usize, from: usize, to: usize) -> bool {
        self.tables
            .get_mut(&table)
            .is_some_and(|order| move_element(&mut order.col_order, from, to))
    }

    /// Drops orders for tables that no longer exist.
    pub fn retain_tables(&mut self, count: usize) {
        self.tables.retain(|table, _| *table < count);
    }

    /// Returns `cells` reordered for export. Without a fitting order the
    /// matrix comes back in detection order.
    #[must_use]
    pub fn apply(&self, table: usize, cells: &CellMatrix) -> CellMatrix {
        let rows = cells.len();
        let cols = cells.first().map_or(0, Vec::len);
        match self.tables.get(&table) {
            Some(order) if order.fits(rows, cols) => order
                .row_order
                .iter()
                .map(|row| {
                    order
                        .col_order
                        .iter()
                        .map(|col| cells[*row][*col].clone())
                        .collect()
                })
                .collect(),
            _ => cells.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{OrderingStore, TableOrder, move_element};

    fn matrix() -> Vec<Vec<String>> {
        vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["d".to_string(), "e".to_string(), "f".to_string()],
        ]
    }

    #[test]
    fn move_element_shifts_in_between() {
        let mut list = vec![0, 1, 2, 3];
        assert!(move_element(&mut list, 0, 2));
        assert_eq!(list, vec![1, 2, 0, 3]);
        assert!(move_element(&mut list, 3, 0));
        assert_eq!(list, vec![3, 1, 2, 0]);
        assert!(!move_element(&mut list, 4, 0));
        assert_eq!(list, vec![3, 1, 2, 0]);
    }

    #[test]
    fn apply_reorders_without_touching_source() {
        let mut store = OrderingStore::new();
        assert!(!store.sync(0, 2, 3));
        assert!(store.move_row(0, 1, 0));
        assert!(store.move_col(0, 2, 0));

        let cells = matrix();
        let ordered = store.apply(0, &cells);
        assert_eq!(ordered[0], vec!["f", "d", "e"]);
        assert_eq!(ordered[1], vec!["c", "a", "b"]);
        assert_eq!(cells, matrix());
    }

    #[test]
    fn count_change_resets_to_identity() {
        let mut store = OrderingStore::new();
        store.sync(0, 2, 3);
        store.move_row(0, 0, 1);
        assert!(!store.sync(0, 2, 3), "same shape keeps the order");
        assert_eq!(store.order(0).map(|order| order.row_order.clone()), Some(vec![1, 0]));

        assert!(store.sync(0, 3, 3));
        assert_eq!(store.order(0), Some(&TableOrder::identity(3, 3)));
    }

    #[test]
    fn invalid_persisted_order_is_ignored_on_apply() {
        let mut store: OrderingStore =
            serde_json::from_str(r#"{"0": {"rowOrder": [0, 0], "colOrder": [2, 1, 0]}}"#)
                .expect("order json should parse");
        assert_eq!(store.apply(0, &matrix()), matrix());
        assert!(!store.move_row(5, 0, 1));
    }

    #[test]
    fn save_and_load_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("order.json");
        let mut store = OrderingStore::new();
        store.sync(1, 2, 2);
        store.move_col(1, 1, 0);
        store.save_json_file(&path).expect("order saves");
        let loaded = OrderingStore::from_json_file(&path).expect("order loads");
        assert_eq!(loaded, store);

        let mut pruned = loaded;
        pruned.retain_tables(1);
        assert_eq!(pruned.order(1), None);
    }
}
