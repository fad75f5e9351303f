//! Coercion of dirty string columns into numbers and dates

use chrono::NaiveDate;

use crate::dataset::{Column, Dataset, ScalarType, Value};

use super::{NormalizeError, NormalizeResult, require_columns};

/// Date format of the box score sources, e.g. `Jan 5, 2020`
pub const DEFAULT_DATE_FORMAT: &str = "%b %d, %Y";

/// Parse currency strings such as `$1,234.50` into floats
///
/// Each cell of each named column has every `$` and `,` removed before being
/// parsed. Numeric cells are widened to float and null cells stay null. The
/// call is all-or-nothing: if any cell of any column fails, no column is
/// coerced and the first failure is returned.
pub fn coerce_currency_strings_to_float<S: AsRef<str>>(
    raw: &Dataset,
    columns: &[S],
) -> NormalizeResult<Dataset> {
    require_columns(raw, columns)?;

    let mut coerced = Vec::with_capacity(columns.len());
    for name in columns {
        let name = name.as_ref();
        let Some(column) = raw.column(name) else {
            return Err(NormalizeError::missing(name, raw));
        };
        tracing::debug!(column = name, "Coercing currency column");

        let mut values = Vec::with_capacity(column.len());
        for (row, value) in column.values().iter().enumerate() {
            values.push(currency_to_float(value).ok_or_else(|| {
                NormalizeError::TypeCoercion {
                    column: name.to_string(),
                    row,
                    value: value.to_string(),
                    target: ScalarType::Float,
                }
            })?);
        }
        coerced.push(Column::new(name, ScalarType::Float, values)?);
    }

    let mut dataset = raw.clone();
    for column in coerced {
        dataset.replace_column(column)?;
    }
    Ok(dataset)
}

fn currency_to_float(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Null),
        Value::Integer(i) => Some(Value::Float(*i as f64)),
        Value::Float(f) => Some(Value::Float(*f)),
        Value::Text(s) => {
            let cleaned: String = s.chars().filter(|c| *c != '$' && *c != ',').collect();
            cleaned.trim().parse::<f64>().ok().map(Value::Float)
        }
        _ => None,
    }
}

/// Parse a text column as calendar dates in [`DEFAULT_DATE_FORMAT`]
pub fn coerce_strings_to_date(raw: &Dataset, column: &str) -> NormalizeResult<Dataset> {
    coerce_strings_to_date_with_format(raw, column, DEFAULT_DATE_FORMAT)
}

/// Parse a text column as calendar dates in a `chrono` format
///
/// Cells already holding dates are kept and null cells stay null. Any cell
/// that does not parse fails the whole call.
pub fn coerce_strings_to_date_with_format(
    raw: &Dataset,
    column: &str,
    format: &str,
) -> NormalizeResult<Dataset> {
    let source = raw
        .column(column)
        .ok_or_else(|| NormalizeError::missing(column, raw))?;

    let mut values = Vec::with_capacity(source.len());
    for (row, value) in source.values().iter().enumerate() {
        let parsed = match value {
            Value::Null => Some(Value::Null),
            Value::Date(d) => Some(Value::Date(*d)),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), format)
                .ok()
                .map(Value::Date),
            _ => None,
        };
        values.push(parsed.ok_or_else(|| NormalizeError::TypeCoercion {
            column: column.to_string(),
            row,
            value: value.to_string(),
            target: ScalarType::Date,
        })?);
    }

    let mut dataset = raw.clone();
    dataset.replace_column(Column::new(column, ScalarType::Date, values)?)?;
    tracing::debug!(column, format, "Coerced column to dates");
    Ok(dataset)
}
