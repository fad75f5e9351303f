//! End-to-end pipeline tests against an in-memory DuckDB warehouse

#![cfg(feature = "duckdb-backend")]

use std::path::Path;

use tempfile::tempdir;
use warehouse_etl::Value;
use warehouse_etl::pipeline::{Pipeline, builtin_jobs};
use warehouse_etl::warehouse::{Connector, DuckDBConnector, EtlConfig, QualifiedName};

const STARTUPS_JSON: &str = r#"[
  {"id": 1, "company_name": "Acme", "logo_url": "https://img/a.png", "headline": "Payments for robots",
   "tags": ["b2b", "saas"], "website": "acme.io", "employees": "11-50", "about": "We build things",
   "locations": ["Berlin"], "industries": ["Fintech", "AI"],
   "jobs": {"engineering": 2, "sales": 0}},
  {"id": 2, "company_name": "Globex", "logo_url": "https://img/g.png", "headline": "Health data",
   "tags": [], "website": "globex.io", "employees": "1-10", "about": "Care",
   "locations": ["Remote", "NYC"], "industries": ["Health"],
   "jobs": {"sales": 3, "marketing": 1}},
  {"id": 3, "company_name": "Initech", "logo_url": "https://img/i.png", "headline": "TPS reports",
   "tags": ["dev"], "website": "initech.com", "employees": "51-200", "about": "Software",
   "locations": [], "industries": [],
   "jobs": {"engineering": 5, "founder": 1}}
]"#;

const PAYROLLS_CSV: &str = "\
,team,seasonStartYear,payroll,inflationAdjPayroll
0,Lakers,1990,\"$14,403,000\",\"$27,653,760\"
1,Celtics,1990,\"$13,201,000\",\"$25,345,920\"
2,Celtics,1990,\"$13,201,000\",\"$25,345,920\"
";

const BOX_SCORES_CSV: &str = "\
Season,Game_ID,PLAYER_NAME,Team,GAME_DATE,MATCHUP,WL,MIN,FGM,FGA,FG_PCT,FG3M,FG3A,FG3_PCT,FTM,FTA,FT_PCT,OREB,DREB,REB,AST,STL,BLK,TOV,PF,PTS,PLUS_MINUS,VIDEO_AVAILABLE
2020,21900001,LeBron James,LAL,\"Jan 05, 2020\",LAL vs. DET,W,35,10,20,0.5,2,6,0.333,5,6,0.833,1,7,8,9,1,1,3,2,27,12,1
2020,21900002,Anthony Davis,LAL,\"Dec 25, 2019\",LAL vs. LAC,L,38,9,18,0.5,0,2,0.0,6,8,0.75,3,8,11,2,2,3,1,4,24,-5,1
";

const PLAYER_STATS_CSV: &str = "\
Season,Player,Pos,Age,Tm,G,GS,MP,FG,FGA,FG%,3P,3PA,3P%,2P,2PA,2P%,eFG%,FT,FTA,FT%,ORB,DRB,TRB,AST,STL,BLK,TOV,PF,PTS
2020,LeBron James,PG,35,LAL,67,67,34.6,9.6,19.4,0.493,2.2,6.3,0.348,7.4,13.1,0.564,0.55,3.9,5.7,0.693,1,6.9,7.8,10.2,1.2,0.5,3.9,1.8,25.3
2020,Anthony Davis,PF,26,LAL,62,62,34.4,8.9,17.7,0.503,1.2,3.5,0.33,7.7,14.2,0.545,0.536,7.1,8.5,0.846,2.3,7,9.3,3.2,1.5,2.3,2.5,2.5,26.1
";

const SALARIES_CSV: &str = "\
playerName,seasonStartYear,salary,inflationAdjSalary
LeBron James,2019,\"$37,436,858\",\"$38,901,000\"
Anthony Davis,2019,\"$27,093,019\",\"$28,153,000\"
";

fn write_sources(dir: &Path) {
    std::fs::write(dir.join("startups_hiring.json"), STARTUPS_JSON).unwrap();
    std::fs::write(dir.join("nba_payrolls.csv"), PAYROLLS_CSV).unwrap();
    std::fs::write(dir.join("nba_player_box_score_stats.csv"), BOX_SCORES_CSV).unwrap();
    std::fs::write(dir.join("nba_player_stats.csv"), PLAYER_STATS_CSV).unwrap();
    std::fs::write(dir.join("nba_salaries.csv"), SALARIES_CSV).unwrap();
}

fn pipeline(data_dir: &Path) -> Pipeline {
    let mut pipeline = Pipeline::new(data_dir);
    for job in builtin_jobs() {
        pipeline.add_job(job);
    }
    pipeline
}

async fn row_count(connector: &DuckDBConnector, namespace: &str, table: &str) -> u64 {
    let session = connector.open().await.unwrap();
    let count = session
        .row_count(&QualifiedName::new(namespace, table).unwrap())
        .await
        .unwrap();
    session.close().await.unwrap();
    count
}

#[tokio::test]
async fn test_full_run_loads_every_dataset() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    let connector = DuckDBConnector::in_memory().unwrap();

    let report = pipeline(dir.path()).run(&connector).await;

    for dataset in &report.datasets {
        assert!(
            dataset.is_success(),
            "{} failed: {:?}",
            dataset.dataset,
            dataset.error
        );
        let evolution = dataset.evolution.unwrap();
        assert!(evolution.audit_columns_added && evolution.surrogate_key_added);
    }
    assert_eq!(report.datasets.len(), 5);

    assert_eq!(row_count(&connector, "startups_hiring", "open_positions").await, 3);
    assert_eq!(row_count(&connector, "nba", "nba_payroll").await, 2);
    assert_eq!(row_count(&connector, "nba", "player_box_score_stats").await, 2);
    assert_eq!(row_count(&connector, "nba", "player_stats").await, 2);
    assert_eq!(row_count(&connector, "nba", "nba_salaries").await, 2);

    let source = report.datasets[0].source.as_ref().unwrap();
    assert_eq!(source.content_hash.len(), 64);
}

#[tokio::test]
async fn test_second_run_inserts_nothing() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    let connector = DuckDBConnector::in_memory().unwrap();
    let pipeline = pipeline(dir.path());

    let first = pipeline.run(&connector).await;
    assert!(first.is_success());
    assert_eq!(first.rows_inserted(), 11);

    let second = pipeline.run(&connector).await;
    assert!(second.is_success());
    assert_eq!(second.rows_inserted(), 0);
    for dataset in &second.datasets {
        assert!(!dataset.evolution.unwrap().changed());
        let merge = dataset.merge.unwrap();
        assert_eq!(merge.skipped, merge.staged);
    }
    assert_ne!(first.run_id, second.run_id);

    assert_eq!(row_count(&connector, "nba", "nba_salaries").await, 2);
    assert_eq!(row_count(&connector, "startups_hiring", "open_positions").await, 3);
}

#[tokio::test]
async fn test_loaded_rows_carry_keys_and_coerced_values() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    let connector = DuckDBConnector::in_memory().unwrap();
    pipeline(dir.path()).run(&connector).await;

    let session = connector.open().await.unwrap();
    let result = session
        .query("SELECT id, created_at FROM nba.nba_salaries ORDER BY id", &[])
        .await
        .unwrap();
    let ids: Vec<i64> = result.rows.iter().filter_map(|r| r["id"].as_i64()).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(result.rows.iter().all(|r| r["created_at"].is_string()));

    let salary = session
        .query(
            "SELECT salary FROM nba.nba_salaries WHERE player_name = $1",
            &[Value::from("LeBron James")],
        )
        .await
        .unwrap();
    assert_eq!(salary.rows[0]["salary"], serde_json::json!(37436858.0));

    let dates = session
        .query(
            "SELECT CAST(game_date AS VARCHAR) AS game_date FROM nba.player_box_score_stats \
             ORDER BY game_date",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(
        dates.column_strings("game_date"),
        vec!["2019-12-25", "2020-01-05"]
    );

    let jobs = session
        .query(
            "SELECT engineering, founder, marketing FROM startups_hiring.open_positions \
             WHERE company_name = $1",
            &[Value::from("Globex")],
        )
        .await
        .unwrap();
    assert_eq!(
        jobs.rows[0],
        serde_json::json!({"engineering": 0, "founder": 0, "marketing": 1})
    );
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_failing_dataset_does_not_stop_the_run() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    std::fs::write(
        dir.path().join("nba_salaries.csv"),
        "playerName,seasonStartYear,salary,inflationAdjSalary\nX,2019,n/a,\"$1\"\n",
    )
    .unwrap();
    let connector = DuckDBConnector::in_memory().unwrap();

    let report = pipeline(dir.path()).run(&connector).await;

    assert!(!report.is_success());
    let failed: Vec<&str> = report.failures().map(|d| d.dataset.as_str()).collect();
    assert_eq!(failed, vec!["nba_salaries"]);
    assert_eq!(row_count(&connector, "nba", "player_stats").await, 2);
}

#[tokio::test]
async fn test_pipeline_from_config_uses_data_dir() {
    let dir = tempdir().unwrap();
    write_sources(dir.path());
    let mut config = EtlConfig::duckdb(":memory:");
    config.data.dir = dir.path().display().to_string();
    config.pipeline.evolve = false;

    let connector = DuckDBConnector::in_memory().unwrap();
    let report = Pipeline::from_config(&config)
        .retain_jobs(&["nba_payroll"])
        .unwrap()
        .run(&connector)
        .await;

    assert!(report.is_success());
    assert!(report.datasets[0].evolution.is_none());
    assert_eq!(report.rows_inserted(), 2);
}
