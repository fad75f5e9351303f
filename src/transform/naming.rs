//! Column name standardization

use crate::dataset::Dataset;

use super::NormalizeResult;

/// Trim, lower-case and replace each space with `_`
pub fn standardize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Standardize every column name, then apply a dataset-specific alias table
///
/// Alias keys are matched against the standardized names. Renaming two
/// columns onto the same name fails with a duplicate column error and leaves
/// the input untouched.
pub fn standardize_column_names(
    raw: &Dataset,
    aliases: &[(&str, &str)],
) -> NormalizeResult<Dataset> {
    let mut columns = Vec::with_capacity(raw.column_count());
    for column in raw.columns() {
        let standard = standardize_column_name(column.name());
        let name = aliases
            .iter()
            .find(|(from, _)| *from == standard)
            .map(|(_, to)| to.to_string())
            .unwrap_or(standard);
        if name != column.name() {
            tracing::trace!(from = column.name(), to = %name, "Renaming column");
        }
        columns.push(column.clone().renamed(name));
    }

    Ok(Dataset::from_columns(columns)?)
}
