//! Provisioning and merge tests against a file-backed DuckDB warehouse

#![cfg(feature = "duckdb-backend")]

use tempfile::tempdir;
use warehouse_etl::load::{
    ColumnOrder, MergeOptions, Provisioned, ensure_namespace, ensure_table, evolve_table,
    merge_into,
};
use warehouse_etl::transform::{coerce_currency_strings_to_float, deduplicate_rows};
use warehouse_etl::warehouse::{Connector, DuckDBConnector, SqlType, TargetTable};
use warehouse_etl::{Dataset, dataset::parse_csv};

fn payroll_table() -> TargetTable {
    TargetTable::new(
        "nba",
        "nba_payroll",
        &[
            ("team", SqlType::Varchar(30)),
            ("season_start_year", SqlType::Integer),
            ("payroll", SqlType::Float),
        ],
    )
    .unwrap()
    .unique_over_all_columns()
}

fn payroll_rows() -> Dataset {
    let raw = parse_csv(
        "team,season_start_year,payroll\n\
         Lakers,1990,\"$14,403,000\"\n\
         Celtics,1990,\"$13,201,000\"\n\
         Celtics,1990,\"$13,201,000\"\n"
            .as_bytes(),
    )
    .unwrap();
    let coerced = coerce_currency_strings_to_float(&raw, &["payroll"]).unwrap();
    deduplicate_rows(&coerced).unwrap()
}

#[tokio::test]
async fn test_merge_is_idempotent_across_reopened_warehouse() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("warehouse.duckdb");
    let table = payroll_table();

    {
        let connector = DuckDBConnector::new(&path).unwrap();
        let session = connector.open().await.unwrap();
        assert_eq!(
            ensure_namespace(session.as_ref(), &table.name.namespace)
                .await
                .unwrap(),
            Provisioned::Created
        );
        ensure_table(session.as_ref(), &table).await.unwrap();
        let outcome = merge_into(
            session.as_ref(),
            &table.name,
            &payroll_rows(),
            &MergeOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.inserted, 2);
        evolve_table(session.as_ref(), &table.name).await.unwrap();
        session.close().await.unwrap();
    }

    let connector = DuckDBConnector::new(&path).unwrap();
    let session = connector.open().await.unwrap();
    assert_eq!(
        ensure_table(session.as_ref(), &table).await.unwrap(),
        Provisioned::AlreadyExisted
    );
    let outcome = merge_into(
        session.as_ref(),
        &table.name,
        &payroll_rows(),
        &MergeOptions::evolved(ColumnOrder::Strict),
    )
    .await
    .unwrap();
    assert_eq!(outcome.inserted, 0);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(session.row_count(&table.name).await.unwrap(), 2);
    assert_eq!(
        session.table_columns(&table.name).await.unwrap(),
        vec!["team", "season_start_year", "payroll", "created_at", "updated_at", "id"]
    );
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_merge_without_managed_columns_rejects_evolved_table() {
    let connector = DuckDBConnector::in_memory().unwrap();
    let session = connector.open().await.unwrap();
    let table = payroll_table();
    ensure_namespace(session.as_ref(), &table.name.namespace)
        .await
        .unwrap();
    ensure_table(session.as_ref(), &table).await.unwrap();
    merge_into(
        session.as_ref(),
        &table.name,
        &payroll_rows(),
        &MergeOptions::default(),
    )
    .await
    .unwrap();
    evolve_table(session.as_ref(), &table.name).await.unwrap();

    let err = merge_into(
        session.as_ref(),
        &table.name,
        &payroll_rows(),
        &MergeOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Column mismatch"));
    assert!(
        !session
            .table_exists(&table.name.staging().unwrap())
            .await
            .unwrap()
    );
}
