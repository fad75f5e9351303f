//! Loader tests against a live PostgreSQL server
//!
//! Set `ETL_TEST_POSTGRES=1` together with the usual `ETL_DB_HOST`,
//! `ETL_DB_PORT`, `ETL_DB_NAME`, `ETL_DB_USER` and `ETL_DB_PASSWORD` to run
//! them. Without `ETL_TEST_POSTGRES` every test returns early. Each test works
//! in its own schema and drops it when done.

#![cfg(feature = "postgres-backend")]

use uuid::Uuid;
use warehouse_etl::dataset::parse_csv;
use warehouse_etl::load::{
    ColumnOrder, MergeOptions, ensure_namespace, ensure_table, evolve_table, merge_into,
};
use warehouse_etl::warehouse::{
    Connector, EtlConfig, PostgresConnector, SqlType, TargetTable, Warehouse,
};
use warehouse_etl::{Dataset, Value};

fn connector() -> Option<PostgresConnector> {
    std::env::var("ETL_TEST_POSTGRES").ok()?;
    let mut config = EtlConfig::new();
    config.apply_env_overrides().unwrap();
    Some(PostgresConnector::new(config.postgres))
}

fn stats(csv: &str) -> Dataset {
    parse_csv(csv.as_bytes()).unwrap()
}

async fn provisioned(session: &dyn Warehouse) -> TargetTable {
    let namespace = format!("etl_test_{}", Uuid::new_v4().simple());
    let table = TargetTable::new(
        &namespace,
        "player_stats",
        &[
            ("player_name", SqlType::Varchar(50)),
            ("threep_percent", SqlType::Float),
        ],
    )
    .unwrap()
    .unique_over_all_columns();
    ensure_namespace(session, &table.name.namespace)
        .await
        .unwrap();
    ensure_table(session, &table).await.unwrap();
    table
}

async fn drop_namespace(session: &dyn Warehouse, table: &TargetTable) {
    session
        .execute(
            &format!("DROP SCHEMA {} CASCADE", table.name.namespace.quoted()),
            &[],
        )
        .await
        .unwrap();
}

async fn count_player(session: &dyn Warehouse, table: &TargetTable, player: &str) -> i64 {
    let result = session
        .query(
            &format!(
                "SELECT COUNT(*) AS n FROM {} WHERE player_name = $1",
                table.name.quoted()
            ),
            &[Value::from(player)],
        )
        .await
        .unwrap();
    result.rows[0]["n"].as_i64().unwrap()
}

#[tokio::test]
async fn test_rows_with_nulls_merge_once() {
    let Some(connector) = connector() else {
        return;
    };
    let session = connector.open().await.unwrap();
    let table = provisioned(session.as_ref()).await;
    let rows = stats("player_name,threep_percent\nA,0.3\nB,\n");
    let options = MergeOptions::evolved(ColumnOrder::Strict);

    let first = merge_into(session.as_ref(), &table.name, &rows, &options)
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);
    evolve_table(session.as_ref(), &table.name).await.unwrap();

    let second = merge_into(session.as_ref(), &table.name, &rows, &options)
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(session.row_count(&table.name).await.unwrap(), 2);
    assert_eq!(count_player(session.as_ref(), &table, "B").await, 1);

    drop_namespace(session.as_ref(), &table).await;
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_all_null_column_merges_into_float_column() {
    let Some(connector) = connector() else {
        return;
    };
    let session = connector.open().await.unwrap();
    let table = provisioned(session.as_ref()).await;
    let rows = stats("player_name,threep_percent\nB,\n");

    let first = merge_into(session.as_ref(), &table.name, &rows, &MergeOptions::default())
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);
    let second = merge_into(session.as_ref(), &table.name, &rows, &MergeOptions::default())
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);

    drop_namespace(session.as_ref(), &table).await;
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_staged_duplicates_insert_once() {
    let Some(connector) = connector() else {
        return;
    };
    let session = connector.open().await.unwrap();
    let table = provisioned(session.as_ref()).await;
    let rows = stats("player_name,threep_percent\nA,0.5\nA,0.5\n");

    let outcome = merge_into(session.as_ref(), &table.name, &rows, &MergeOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.staged, 2);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(count_player(session.as_ref(), &table, "A").await, 1);

    drop_namespace(session.as_ref(), &table).await;
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_evolved_table_numbers_new_rows() {
    let Some(connector) = connector() else {
        return;
    };
    let session = connector.open().await.unwrap();
    let table = provisioned(session.as_ref()).await;
    let options = MergeOptions::evolved(ColumnOrder::Strict);

    merge_into(
        session.as_ref(),
        &table.name,
        &stats("player_name,threep_percent\nA,0.3\nB,0.4\n"),
        &options,
    )
    .await
    .unwrap();
    let evolution = evolve_table(session.as_ref(), &table.name).await.unwrap();
    assert!(evolution.audit_columns_added && evolution.surrogate_key_added);
    assert!(session.has_primary_key(&table.name).await.unwrap());
    assert_eq!(
        session.table_columns(&table.name).await.unwrap(),
        vec!["player_name", "threep_percent", "created_at", "updated_at", "id"]
    );

    merge_into(
        session.as_ref(),
        &table.name,
        &stats("player_name,threep_percent\nC,0.5\n"),
        &options,
    )
    .await
    .unwrap();
    let result = session
        .query(
            &format!("SELECT id, created_at FROM {} ORDER BY id", table.name.quoted()),
            &[],
        )
        .await
        .unwrap();
    let ids: Vec<i64> = result.rows.iter().filter_map(|r| r["id"].as_i64()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(result.rows.iter().all(|r| r["created_at"].is_string()));

    drop_namespace(session.as_ref(), &table).await;
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_typed_parameters_and_server_messages() {
    let Some(connector) = connector() else {
        return;
    };
    let session = connector.open().await.unwrap();

    let result = session
        .query("SELECT $1::integer + 1 AS n", &[Value::Integer(41)])
        .await
        .unwrap();
    assert_eq!(result.rows[0]["n"], serde_json::json!(42));

    let err = session
        .execute("SELECT * FROM etl_table_that_does_not_exist", &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{}", err);

    session.close().await.unwrap();
}
