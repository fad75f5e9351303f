//! Column selection and row deduplication

use std::collections::HashSet;

use crate::dataset::{Column, Dataset, Value};

use super::{NormalizeResult, require_columns};

/// Remove the named columns
pub fn drop_columns<S: AsRef<str>>(raw: &Dataset, columns: &[S]) -> NormalizeResult<Dataset> {
    require_columns(raw, columns)?;
    let mut dataset = raw.clone();
    for name in columns {
        dataset.remove_column(name.as_ref())?;
    }
    Ok(dataset)
}

/// Keep only the named columns, in the given order
pub fn select_columns<S: AsRef<str>>(raw: &Dataset, columns: &[S]) -> NormalizeResult<Dataset> {
    require_columns(raw, columns)?;
    Ok(raw.select(columns)?)
}

/// Append a column filled with `value` for each name that is not already present
pub fn fill_missing_columns<S: AsRef<str>>(
    raw: &Dataset,
    columns: &[S],
    value: Value,
) -> NormalizeResult<Dataset> {
    let mut dataset = raw.clone();
    let rows = dataset.row_count();
    for name in columns {
        let name = name.as_ref();
        if !dataset.has_column(name) {
            tracing::debug!(column = name, "Filling missing column");
            dataset.push_column(Column::filled(name, value.clone(), rows))?;
        }
    }
    Ok(dataset)
}

/// Drop every row identical to an earlier one, keeping order
pub fn deduplicate_rows(raw: &Dataset) -> NormalizeResult<Dataset> {
    let mut seen = HashSet::with_capacity(raw.row_count());
    let mut keep = Vec::with_capacity(raw.row_count());
    for row in raw.rows() {
        let key = serde_json::Value::Array(row.iter().map(|v| v.to_json()).collect()).to_string();
        keep.push(seen.insert(key));
    }

    let mut dataset = raw.clone();
    dataset.retain_rows(&keep);
    let removed = raw.row_count() - dataset.row_count();
    if removed > 0 {
        tracing::debug!(removed, "Removed duplicate rows");
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ScalarType;
    use crate::transform::NormalizeError;

    fn sample() -> Dataset {
        Dataset::from_columns(vec![
            Column::infer("team", vec!["LAL".into(), "BOS".into(), "LAL".into(), "LAL".into()]),
            Column::infer(
                "year",
                vec![
                    Value::Integer(1990),
                    Value::Integer(1990),
                    Value::Integer(1990),
                    Value::Integer(1991),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_deduplicate_keeps_first_in_order() {
        let out = deduplicate_rows(&sample()).unwrap();
        assert_eq!(out.row_count(), 3);
        let teams: Vec<&Value> = out.column("team").unwrap().values().iter().collect();
        assert_eq!(teams, vec![&Value::from("LAL"), &Value::from("BOS"), &Value::from("LAL")]);
        assert_eq!(out.column("year").unwrap().values()[2], Value::Integer(1991));
    }

    #[test]
    fn test_deduplicate_distinguishes_null_from_empty_text() {
        let ds = Dataset::from_columns(vec![Column::infer(
            "name",
            vec![Value::Null, "".into(), Value::Null],
        )])
        .unwrap();
        assert_eq!(deduplicate_rows(&ds).unwrap().row_count(), 2);
    }

    #[test]
    fn test_select_and_drop() {
        let ds = sample();
        assert_eq!(select_columns(&ds, &["year"]).unwrap().column_names(), vec!["year"]);
        assert!(matches!(
            select_columns(&ds, &["year", "payroll"]),
            Err(NormalizeError::SchemaMismatch { .. })
        ));
        assert_eq!(drop_columns(&ds, &["team"]).unwrap().column_names(), vec!["year"]);
    }

    #[test]
    fn test_fill_missing_columns() {
        let ds = sample();
        let out = fill_missing_columns(&ds, &["year", "designer"], Value::Integer(0)).unwrap();
        assert_eq!(out.column_names(), vec!["team", "year", "designer"]);
        let designer = out.column("designer").unwrap();
        assert_eq!(designer.data_type(), ScalarType::Integer);
        assert_eq!(designer.len(), 4);
    }
}
