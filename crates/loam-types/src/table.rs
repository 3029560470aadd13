//! Tabular query results.

use std::collections::BTreeSet;

use serde::Serialize;
use time::OffsetDateTime;

use crate::record::Record;

/// One row of a [`SampleTable`], aligned with its column list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    /// Instant the row was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Values aligned with [`SampleTable::columns`]; `None` marks a field
    /// the record never reported.
    pub values: Vec<Option<f64>>,
}

/// Ordered measurement table for one client.
///
/// Columns are the union of every field name seen across the rows, sorted
/// by name; rows are sorted ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleTable {
    /// Field names, one per value slot in each row.
    pub columns: Vec<String>,
    /// Rows in ascending timestamp order.
    pub rows: Vec<SampleRow>,
}

impl SampleTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows at or after `cutoff`, keeping the full column set. `None`
    /// keeps every row.
    pub fn filter_since(&self, cutoff: Option<OffsetDateTime>) -> SampleTable {
        let rows = match cutoff {
            Some(cutoff) => self
                .rows
                .iter()
                .filter(|row| row.timestamp >= cutoff)
                .cloned()
                .collect(),
            None => self.rows.clone(),
        };
        SampleTable {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Value of `column` in row `index`, for spot checks.
    pub fn value(&self, index: usize, column: &str) -> Option<f64> {
        let position = self.columns.iter().position(|c| c == column)?;
        self.rows.get(index)?.values.get(position).copied().flatten()
    }
}

/// Accumulates records and lays them out as a [`SampleTable`].
#[derive(Debug, Default)]
pub struct TableBuilder {
    records: Vec<Record>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sort the records by timestamp and align every row against the
    /// union of field names. Records that never reported a field get
    /// `None` in that slot.
    pub fn build(mut self) -> SampleTable {
        let columns: BTreeSet<String> = self
            .records
            .iter()
            .flat_map(|record| record.fields.keys().cloned())
            .collect();
        let columns: Vec<String> = columns.into_iter().collect();

        self.records.sort_by_key(|record| record.timestamp);

        let rows = self
            .records
            .into_iter()
            .map(|record| SampleRow {
                timestamp: record.timestamp,
                values: columns
                    .iter()
                    .map(|column| record.fields.get(column).copied())
                    .collect(),
            })
            .collect();

        SampleTable { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn record(timestamp: OffsetDateTime, fields: &[(&str, f64)]) -> Record {
        Record {
            timestamp,
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_columns_are_union_of_field_names() {
        let mut builder = TableBuilder::new();
        builder.push(record(datetime!(2025-06-01 10:00 UTC), &[("temperature", 22.0)]));
        builder.push(record(
            datetime!(2025-06-01 11:00 UTC),
            &[("temperature", 23.0), ("humidity", 60.0)],
        ));

        let table = builder.build();
        assert_eq!(table.columns, vec!["humidity", "temperature"]);
        assert_eq!(table.value(0, "humidity"), None);
        assert_eq!(table.value(1, "humidity"), Some(60.0));
    }

    #[test]
    fn test_rows_sorted_ascending_regardless_of_push_order() {
        let mut builder = TableBuilder::new();
        builder.push(record(datetime!(2025-06-01 12:00 UTC), &[("x", 2.0)]));
        builder.push(record(datetime!(2025-06-01 10:00 UTC), &[("x", 1.0)]));
        builder.push(record(datetime!(2025-06-01 11:00 UTC), &[("x", 1.5)]));

        let table = builder.build();
        let values: Vec<Option<f64>> = (0..table.len()).map(|i| table.value(i, "x")).collect();
        assert_eq!(values, vec![Some(1.0), Some(1.5), Some(2.0)]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let instant = datetime!(2025-06-01 10:00 UTC);
        let mut builder = TableBuilder::new();
        builder.push(record(instant, &[("x", 1.0)]));
        builder.push(record(instant, &[("x", 2.0)]));

        let table = builder.build();
        assert_eq!(table.value(0, "x"), Some(1.0));
        assert_eq!(table.value(1, "x"), Some(2.0));
    }

    #[test]
    fn test_empty_builder_builds_empty_table() {
        let table = TableBuilder::new().build();
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn test_filter_since_keeps_columns() {
        let mut builder = TableBuilder::new();
        builder.push(record(datetime!(2025-06-01 10:00 UTC), &[("temperature", 1.0)]));
        builder.push(record(datetime!(2025-06-02 10:00 UTC), &[("temperature", 2.0)]));
        let table = builder.build();

        let filtered = table.filter_since(Some(datetime!(2025-06-02 00:00 UTC)));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.columns, table.columns);
        assert_eq!(filtered.value(0, "temperature"), Some(2.0));

        let unfiltered = table.filter_since(None);
        assert_eq!(unfiltered.len(), 2);
    }

    #[test]
    fn test_filter_since_cutoff_is_inclusive() {
        let instant = datetime!(2025-06-01 10:00 UTC);
        let mut builder = TableBuilder::new();
        builder.push(record(instant, &[("x", 1.0)]));
        let table = builder.build();

        assert_eq!(table.filter_since(Some(instant)).len(), 1);
    }

    #[test]
    fn test_serializes_with_rfc3339_timestamps() {
        let mut builder = TableBuilder::new();
        builder.push(record(datetime!(2025-06-01 10:00 UTC), &[("temperature", 23.5)]));
        let table = builder.build();

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["columns"][0], "temperature");
        assert_eq!(json["rows"][0]["timestamp"], "2025-06-01T10:00:00Z");
        assert_eq!(json["rows"][0]["values"][0], 23.5);
    }
}
