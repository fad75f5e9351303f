//! Flattening of nested JSON datasets

use crate::dataset::{Column, Dataset, ScalarType, Value};

use super::{NormalizeError, NormalizeResult, require_columns};

/// Separator between parent and child names of nested record fields
pub const NESTED_FIELD_SEPARATOR: &str = ".";

/// Flatten a dataset read from nested JSON
///
/// 1. Drops `columns_to_drop`.
/// 2. Joins the list cells of each column in `columns_to_stringify` into a
///    single comma separated string.
/// 3. Expands the record cells of `nested_column` into one column per distinct
///    sub-field, in first-seen order, filling absent sub-fields with zero.
/// 4. Appends those columns after the surviving original columns and removes
///    `nested_column`.
///
/// Every named column must exist in `raw`, otherwise the call fails with
/// [`NormalizeError::SchemaMismatch`] before anything is changed.
pub fn flatten_nested_tabular<S: AsRef<str>>(
    raw: &Dataset,
    columns_to_drop: &[S],
    columns_to_stringify: &[S],
    nested_column: &str,
) -> NormalizeResult<Dataset> {
    require_columns(raw, columns_to_drop)?;
    require_columns(raw, columns_to_stringify)?;
    require_columns(raw, &[nested_column])?;

    let mut dataset = raw.clone();
    for name in columns_to_drop {
        dataset.remove_column(name.as_ref())?;
    }
    tracing::debug!(
        dropped = columns_to_drop.len(),
        "Dropped columns before flattening"
    );

    let mut dataset = stringify_list_columns(&dataset, columns_to_stringify)?;

    let nested = dataset
        .remove_column(nested_column)
        .map_err(|_| NormalizeError::missing(nested_column, raw))?;
    let flattened = expand_records(&nested)?;
    let added = flattened.len();

    for column in flattened {
        dataset.push_column(column)?;
    }

    tracing::debug!(
        column = nested_column,
        new_columns = added,
        "Normalized nested column"
    );

    Ok(dataset)
}

/// Replace list cells with their elements joined by `,`
///
/// Scalar cells are treated as a one-element list, so running this on a column
/// that was already joined leaves it unchanged. Null cells stay null.
pub fn stringify_list_columns<S: AsRef<str>>(
    raw: &Dataset,
    columns: &[S],
) -> NormalizeResult<Dataset> {
    require_columns(raw, columns)?;

    let mut dataset = raw.clone();
    for name in columns {
        let name = name.as_ref();
        let Some(column) = dataset.column(name) else {
            continue;
        };
        let values = column
            .values()
            .iter()
            .map(|v| match v {
                Value::Null => Value::Null,
                Value::List(items) => Value::Text(
                    items
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                Value::Text(s) => Value::Text(s.clone()),
                other => Value::Text(other.to_string()),
            })
            .collect();
        dataset.replace_column(Column::new(name, ScalarType::Text, values)?)?;
    }
    Ok(dataset)
}

/// Expand a column of record cells into flat columns
fn expand_records(column: &Column) -> NormalizeResult<Vec<Column>> {
    let rows = column.len();
    let mut names: Vec<String> = Vec::new();
    let mut cells: Vec<Vec<Value>> = Vec::new();

    for (row, value) in column.values().iter().enumerate() {
        let mut leaves = Vec::new();
        match value {
            Value::Null => {}
            Value::Record(fields) => collect_leaves(None, fields, &mut leaves),
            other => {
                return Err(NormalizeError::TypeCoercion {
                    column: column.name().to_string(),
                    row,
                    value: other.to_string(),
                    target: ScalarType::Record,
                });
            }
        }

        for (name, leaf) in leaves {
            let idx = match names.iter().position(|n| *n == name) {
                Some(idx) => idx,
                None => {
                    names.push(name);
                    cells.push(vec![Value::Null; rows]);
                    names.len() - 1
                }
            };
            cells[idx][row] = leaf;
        }
    }

    Ok(names
        .into_iter()
        .zip(cells)
        .map(|(name, values)| fill_with_zero(name, values))
        .collect())
}

fn collect_leaves(prefix: Option<&str>, fields: &[(String, Value)], out: &mut Vec<(String, Value)>) {
    for (key, value) in fields {
        let name = match prefix {
            Some(p) => format!("{}{}{}", p, NESTED_FIELD_SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Value::Record(nested) => collect_leaves(Some(&name), nested, out),
            leaf => out.push((name, leaf.clone())),
        }
    }
}

/// Infer the column type, then replace missing cells with a zero of that type
fn fill_with_zero(name: String, values: Vec<Value>) -> Column {
    let column = Column::infer(name, values);
    let zero = match column.data_type() {
        ScalarType::Float => Value::Float(0.0),
        ScalarType::Integer => Value::Integer(0),
        _ => return column,
    };
    let name = column.name().to_string();
    let values = column
        .into_values()
        .into_iter()
        .map(|v| if v.is_null() { zero.clone() } else { v })
        .collect();
    Column::infer(name, values)
}
