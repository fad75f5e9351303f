//! Built-in dataset jobs
//!
//! Each job knows the quirks of one downloaded file: which columns to drop,
//! which strings are really money or dates, and how its headers map onto the
//! warehouse table.

use crate::dataset::{Dataset, Value};
use crate::transform::{
    NormalizeResult, coerce_currency_strings_to_float, coerce_strings_to_date, deduplicate_rows,
    fill_missing_columns, flatten_nested_tabular, select_columns, standardize_column_names,
};
use crate::warehouse::{SqlType, TargetTable};

use super::{DatasetJob, PipelineResult};

const STARTUPS_NAMESPACE: &str = "startups_hiring";
const NBA_NAMESPACE: &str = "nba";

type ColumnSpec = (&'static str, SqlType);

/// Job categories of the startup postings, zero when a company lists none
const JOB_CATEGORIES: [&str; 10] = [
    "engineering",
    "founder",
    "investor",
    "marketing",
    "other_engineering",
    "product",
    "sales",
    "designer",
    "management",
    "operations",
];

const OPEN_POSITIONS_COLUMNS: [ColumnSpec; 8] = [
    ("company_name", SqlType::Varchar(50)),
    ("headline", SqlType::Varchar(500)),
    ("tags", SqlType::Varchar(500)),
    ("website", SqlType::Varchar(100)),
    ("employees", SqlType::Varchar(50)),
    ("about", SqlType::Varchar(1000)),
    ("locations", SqlType::Varchar(500)),
    ("industries", SqlType::Varchar(500)),
];

const NBA_PAYROLL_COLUMNS: [ColumnSpec; 4] = [
    ("team", SqlType::Varchar(30)),
    ("season_start_year", SqlType::Integer),
    ("payroll", SqlType::Float),
    ("inflation_adj_payroll", SqlType::Float),
];

const BOX_SCORE_COLUMNS: [ColumnSpec; 28] = [
    ("season", SqlType::Integer),
    ("game_id", SqlType::Integer),
    ("player_name", SqlType::Varchar(50)),
    ("team", SqlType::Varchar(30)),
    ("game_date", SqlType::Date),
    ("matchup", SqlType::Varchar(20)),
    ("wl", SqlType::Varchar(5)),
    ("min", SqlType::Integer),
    ("fgm", SqlType::Integer),
    ("fga", SqlType::Float),
    ("fg_pct", SqlType::Float),
    ("fg3m", SqlType::Float),
    ("fg3a", SqlType::Float),
    ("fg3_pct", SqlType::Float),
    ("ftm", SqlType::Integer),
    ("fta", SqlType::Float),
    ("ft_pct", SqlType::Float),
    ("oreb", SqlType::Float),
    ("dreb", SqlType::Float),
    ("reb", SqlType::Float),
    ("ast", SqlType::Float),
    ("stl", SqlType::Float),
    ("blk", SqlType::Float),
    ("tov", SqlType::Float),
    ("pf", SqlType::Float),
    ("pts", SqlType::Integer),
    ("plus_minus", SqlType::Float),
    ("video_available", SqlType::Integer),
];

const PLAYER_STATS_COLUMNS: [ColumnSpec; 29] = [
    ("season", SqlType::Integer),
    ("player_name", SqlType::Varchar(50)),
    ("pos", SqlType::Varchar(5)),
    ("age", SqlType::Integer),
    ("g", SqlType::Float),
    ("gs", SqlType::Float),
    ("mp", SqlType::Float),
    ("fg", SqlType::Float),
    ("fga", SqlType::Float),
    ("fg_percent", SqlType::Float),
    ("threep", SqlType::Float),
    ("threepa", SqlType::Float),
    ("threep_percent", SqlType::Float),
    ("twop", SqlType::Float),
    ("twopa", SqlType::Float),
    ("twop_percent", SqlType::Float),
    ("efg_percent", SqlType::Float),
    ("ft", SqlType::Float),
    ("fta", SqlType::Float),
    ("ft_percent", SqlType::Float),
    ("orb", SqlType::Float),
    ("drb", SqlType::Float),
    ("trb", SqlType::Float),
    ("ast", SqlType::Float),
    ("stl", SqlType::Float),
    ("blk", SqlType::Float),
    ("tov", SqlType::Float),
    ("pf", SqlType::Float),
    ("pts", SqlType::Float),
];

/// Stat headers such as `3P%` that are not valid identifiers
const PLAYER_STATS_ALIASES: [(&str, &str); 10] = [
    ("player", "player_name"),
    ("fg%", "fg_percent"),
    ("3p", "threep"),
    ("3pa", "threepa"),
    ("3p%", "threep_percent"),
    ("2p", "twop"),
    ("2pa", "twopa"),
    ("2p%", "twop_percent"),
    ("efg%", "efg_percent"),
    ("ft%", "ft_percent"),
];

const NBA_SALARIES_COLUMNS: [ColumnSpec; 4] = [
    ("player_name", SqlType::Varchar(50)),
    ("season_start_year", SqlType::Integer),
    ("salary", SqlType::Float),
    ("inflation_adj_salary", SqlType::Float),
];

/// All built-in jobs in run order
pub fn builtin_jobs() -> Vec<Box<dyn DatasetJob>> {
    vec![
        Box::new(OpenPositions),
        Box::new(NbaPayroll),
        Box::new(PlayerBoxScoreStats),
        Box::new(PlayerStats),
        Box::new(NbaSalaries),
    ]
}

/// Look up a built-in job by name
pub fn find_job(name: &str) -> Option<Box<dyn DatasetJob>> {
    builtin_jobs().into_iter().find(|j| j.name() == name)
}

fn open_positions_columns() -> Vec<ColumnSpec> {
    OPEN_POSITIONS_COLUMNS
        .iter()
        .copied()
        .chain(JOB_CATEGORIES.iter().map(|c| (*c, SqlType::Integer)))
        .collect()
}

fn table(namespace: &str, name: &str, columns: &[ColumnSpec]) -> PipelineResult<TargetTable> {
    Ok(TargetTable::new(namespace, name, columns)?.unique_over_all_columns())
}

/// Put the columns in table order and drop repeated rows
fn conform(dataset: &Dataset, columns: &[ColumnSpec]) -> NormalizeResult<Dataset> {
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let selected = select_columns(dataset, names.as_slice())?;
    deduplicate_rows(&selected)
}

/// Startup job postings, JSON with a nested `jobs` record per company
pub struct OpenPositions;

impl DatasetJob for OpenPositions {
    fn name(&self) -> &str {
        "open_positions"
    }

    fn source_file(&self) -> &str {
        "startups_hiring.json"
    }

    fn target(&self) -> PipelineResult<TargetTable> {
        table(STARTUPS_NAMESPACE, "open_positions", &open_positions_columns())
    }

    fn normalize(&self, raw: &Dataset) -> NormalizeResult<Dataset> {
        let flat = flatten_nested_tabular(
            raw,
            &["id", "logo_url"],
            &["tags", "locations", "industries"],
            "jobs",
        )?;
        let filled = fill_missing_columns(&flat, &JOB_CATEGORIES, Value::Integer(0))?;
        conform(&filled, &open_positions_columns())
    }
}

/// Team payroll per season, amounts formatted as dollars
pub struct NbaPayroll;

impl DatasetJob for NbaPayroll {
    fn name(&self) -> &str {
        "nba_payroll"
    }

    fn source_file(&self) -> &str {
        "nba_payrolls.csv"
    }

    fn target(&self) -> PipelineResult<TargetTable> {
        table(NBA_NAMESPACE, "nba_payroll", &NBA_PAYROLL_COLUMNS)
    }

    fn normalize(&self, raw: &Dataset) -> NormalizeResult<Dataset> {
        let renamed = standardize_column_names(
            raw,
            &[
                ("seasonstartyear", "season_start_year"),
                ("inflationadjpayroll", "inflation_adj_payroll"),
            ],
        )?;
        let coerced =
            coerce_currency_strings_to_float(&renamed, &["payroll", "inflation_adj_payroll"])?;
        conform(&coerced, &NBA_PAYROLL_COLUMNS)
    }
}

/// Per-game player box scores with `Jan 5, 2020` style dates
pub struct PlayerBoxScoreStats;

impl DatasetJob for PlayerBoxScoreStats {
    fn name(&self) -> &str {
        "player_box_score_stats"
    }

    fn source_file(&self) -> &str {
        "nba_player_box_score_stats.csv"
    }

    fn target(&self) -> PipelineResult<TargetTable> {
        table(NBA_NAMESPACE, "player_box_score_stats", &BOX_SCORE_COLUMNS)
    }

    fn normalize(&self, raw: &Dataset) -> NormalizeResult<Dataset> {
        let renamed = standardize_column_names(raw, &[])?;
        let dated = coerce_strings_to_date(&renamed, "game_date")?;
        conform(&dated, &BOX_SCORE_COLUMNS)
    }
}

/// Season totals per player
pub struct PlayerStats;

impl DatasetJob for PlayerStats {
    fn name(&self) -> &str {
        "player_stats"
    }

    fn source_file(&self) -> &str {
        "nba_player_stats.csv"
    }

    fn target(&self) -> PipelineResult<TargetTable> {
        table(NBA_NAMESPACE, "player_stats", &PLAYER_STATS_COLUMNS)
    }

    fn normalize(&self, raw: &Dataset) -> NormalizeResult<Dataset> {
        let renamed = standardize_column_names(raw, &PLAYER_STATS_ALIASES)?;
        conform(&renamed, &PLAYER_STATS_COLUMNS)
    }
}

/// Player salaries per season, amounts formatted as dollars
pub struct NbaSalaries;

impl DatasetJob for NbaSalaries {
    fn name(&self) -> &str {
        "nba_salaries"
    }

    fn source_file(&self) -> &str {
        "nba_salaries.csv"
    }

    fn target(&self) -> PipelineResult<TargetTable> {
        table(NBA_NAMESPACE, "nba_salaries", &NBA_SALARIES_COLUMNS)
    }

    fn normalize(&self, raw: &Dataset) -> NormalizeResult<Dataset> {
        let renamed = standardize_column_names(
            raw,
            &[
                ("playername", "player_name"),
                ("seasonstartyear", "season_start_year"),
                ("inflationadjsalary", "inflation_adj_salary"),
            ],
        )?;
        let coerced =
            coerce_currency_strings_to_float(&renamed, &["salary", "inflation_adj_salary"])?;
        conform(&coerced, &NBA_SALARIES_COLUMNS)
    }
}
