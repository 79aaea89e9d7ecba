//! End-to-end reconciliation tests over a temp database: determinism,
//! run versioning, retroactive wash amendment, and partial-failure
//! semantics.

use chrono::{Duration, NaiveDate};
use lotrecon::datasource::MockExecutionSource;
use lotrecon::db::init_db;
use lotrecon::orchestration::{Ingestor, Reconciler, RunError};
use lotrecon::{
    AccountId, AccountingMethod, Config, Decimal, LedgerError, Repository, Side, Symbol,
    TradeExecution, TradeStamp, WashStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

const ACCOUNT: &str = "acct-1";

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n as i64 - 1)
}

fn account() -> AccountId {
    AccountId::new(ACCOUNT.to_string())
}

fn test_config(db_path: &str) -> Config {
    Config {
        database_path: db_path.to_string(),
        default_method: AccountingMethod::Fifo,
        wash_window_days: 30,
        long_term_threshold_days: 365,
        accounts: vec![ACCOUNT.to_string()],
    }
}

fn exec(symbol: &str, side: Side, qty: i64, px: &str, n: u32, id: &str) -> TradeExecution {
    TradeExecution::new(
        account(),
        Symbol::new(symbol.to_string()),
        TradeStamp::new(day(n), 0),
        side,
        qty,
        d(px),
        Decimal::zero(),
        Some(id),
    )
}

async fn setup(executions: Vec<TradeExecution>) -> (Reconciler, Arc<Repository>, TempDir) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let source = Arc::new(MockExecutionSource::new().with_executions(executions));
    let ingestor = Ingestor::new(source, repo.clone());
    let reconciler = Reconciler::new(ingestor, repo.clone(), test_config(&db_path));
    (reconciler, repo, temp_dir)
}

// =============================================================================
// Determinism and idempotence
// =============================================================================

#[tokio::test]
async fn identical_logs_produce_identical_disposal_records() {
    let executions = vec![
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        exec("AAPL", Side::Buy, 50, "12", 3, "B2"),
        exec("AAPL", Side::Sell, 120, "9", 11, "S1"),
        exec("AAPL", Side::Buy, 80, "9.5", 20, "B3"),
        exec("MSFT", Side::Buy, 10, "300", 2, "M1"),
        exec("MSFT", Side::Sell, 10, "310", 40, "M2"),
    ];

    let (recon_a, repo_a, _tmp_a) = setup(executions.clone()).await;
    let (recon_b, repo_b, _tmp_b) = setup(executions).await;

    recon_a.reconcile(&account(), None, None).await.unwrap();
    recon_b.reconcile(&account(), None, None).await.unwrap();

    let disposals_a = repo_a.query_disposals(&account(), None, None).await.unwrap();
    let disposals_b = repo_b.query_disposals(&account(), None, None).await.unwrap();
    assert!(!disposals_a.is_empty());

    // Byte-identical serialization: same ids, same canonical amounts.
    let json_a = serde_json::to_string(&disposals_a).unwrap();
    let json_b = serde_json::to_string(&disposals_b).unwrap();
    assert_eq!(json_a, json_b);
}

#[tokio::test]
async fn unchanged_log_keeps_current_run() {
    let executions = vec![
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        exec("AAPL", Side::Sell, 40, "11", 5, "S1"),
    ];
    let (reconciler, repo, _tmp) = setup(executions).await;

    let first = reconciler.reconcile(&account(), None, None).await.unwrap();
    let second = reconciler.reconcile(&account(), None, None).await.unwrap();

    // Second pass re-fetched the same executions, skipped them all, and
    // published no new version.
    assert_eq!(second.duplicates_skipped, 2);
    assert_eq!(first.run_id, second.run_id);
    assert!(second.symbols_recomputed.is_empty());

    let runs = repo.query_runs(&account()).await.unwrap();
    assert_eq!(runs.len(), 1);
}

// =============================================================================
// Retroactive amendment and run versioning
// =============================================================================

#[tokio::test]
async fn later_replacement_purchase_amends_finalized_loss() {
    let phase_one = vec![
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        exec("AAPL", Side::Sell, 100, "8", 40, "S1"),
    ];
    let (reconciler, repo, _tmp) = setup(phase_one).await;
    reconciler.reconcile(&account(), None, None).await.unwrap();

    let before = repo.query_disposals(&account(), None, None).await.unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].adjusted_gain_loss, d("-200"));
    assert!(!before[0].wash_sale_flag);
    // The forward window is still open at the log horizon (day 40).
    assert_eq!(before[0].wash_status, WashStatus::Pending);

    // A qualifying purchase lands 15 days after the loss.
    repo.insert_execution(&exec("AAPL", Side::Buy, 100, "9", 55, "B2"))
        .await
        .unwrap();
    let report = reconciler.recompute(&account()).await.unwrap();
    assert_eq!(
        report.symbols_recomputed,
        vec![Symbol::new("AAPL".to_string())]
    );

    let after = repo.query_disposals(&account(), None, None).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].disposal_id, before[0].disposal_id);
    assert_eq!(after[0].disallowed_loss, d("200"));
    assert_eq!(after[0].adjusted_gain_loss, Decimal::zero());
    assert!(after[0].wash_sale_flag);

    // Both versions remain addressable: prior amounts under the superseded
    // run, amended amounts under the current one.
    let versions = repo
        .query_disposal_versions(&account(), &before[0].disposal_id)
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].1.adjusted_gain_loss, d("-200"));
    assert_eq!(versions[1].1.adjusted_gain_loss, Decimal::zero());

    let runs = repo.query_runs(&account()).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status.to_string(), "superseded");
    assert_eq!(runs[1].status.to_string(), "current");
    assert_eq!(
        runs[1].supersedes_run_id.as_deref(),
        Some(runs[0].run_id.as_str())
    );
}

#[tokio::test]
async fn untouched_symbols_are_carried_into_the_new_run() {
    let executions = vec![
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        exec("AAPL", Side::Sell, 100, "11", 5, "S1"),
        exec("MSFT", Side::Buy, 10, "300", 2, "M1"),
        exec("MSFT", Side::Sell, 10, "310", 6, "M2"),
    ];
    let (reconciler, repo, _tmp) = setup(executions).await;
    reconciler.reconcile(&account(), None, None).await.unwrap();

    repo.insert_execution(&exec("MSFT", Side::Buy, 5, "305", 10, "M3"))
        .await
        .unwrap();
    let report = reconciler.recompute(&account()).await.unwrap();

    assert_eq!(
        report.symbols_recomputed,
        vec![Symbol::new("MSFT".to_string())]
    );
    assert_eq!(report.symbols_carried, vec![Symbol::new("AAPL".to_string())]);

    // The carried symbol's disposal is present in the new current run.
    let aapl = repo
        .query_disposals(&account(), Some(&Symbol::new("AAPL".to_string())), None)
        .await
        .unwrap();
    assert_eq!(aapl.len(), 1);
    assert_eq!(aapl[0].adjusted_gain_loss, d("100"));
}

#[tokio::test]
async fn late_arriving_execution_triggers_full_symbol_recomputation() {
    let executions = vec![
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        exec("AAPL", Side::Sell, 60, "12", 20, "S1"),
    ];
    let (reconciler, repo, _tmp) = setup(executions).await;
    reconciler.reconcile(&account(), None, None).await.unwrap();

    let before = repo.query_disposals(&account(), None, None).await.unwrap();
    // FIFO against the only lot: 60 x ($12 - $10).
    assert_eq!(before[0].adjusted_gain_loss, d("120"));

    // A cheaper lot lands behind the tail (day 10 < day 20): lot order
    // changes, so the symbol is re-derived from scratch.
    repo.insert_execution(&exec("AAPL", Side::Buy, 100, "5", 10, "B0"))
        .await
        .unwrap();
    let report = reconciler.recompute(&account()).await.unwrap();
    assert_eq!(
        report.symbols_recomputed,
        vec![Symbol::new("AAPL".to_string())]
    );

    let after = repo.query_disposals(&account(), None, None).await.unwrap();
    assert_eq!(after.len(), 1);
    // Still FIFO from the day-1 lot; identical slice, identical id.
    assert_eq!(after[0].disposal_id, before[0].disposal_id);
    assert_eq!(after[0].adjusted_gain_loss, d("120"));

    let open = repo.query_open_lots(&account(), None).await.unwrap();
    let net: i64 = open.iter().map(|l| l.remaining_quantity).sum();
    assert_eq!(net, 100 + 100 - 60);
}

// =============================================================================
// Partial failure
// =============================================================================

#[tokio::test]
async fn corrupted_symbol_does_not_block_other_partitions() {
    let executions = vec![
        // Oversell: BADS is corrupt from the first derivation.
        exec("BADS", Side::Buy, 10, "10", 1, "X1"),
        exec("BADS", Side::Sell, 20, "11", 2, "X2"),
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        exec("AAPL", Side::Sell, 100, "11", 5, "S1"),
    ];
    let (reconciler, repo, _tmp) = setup(executions).await;

    let report = reconciler.reconcile(&account(), None, None).await.unwrap();
    assert_eq!(report.symbols_failed.len(), 1);
    assert_eq!(report.symbols_failed[0].0, Symbol::new("BADS".to_string()));
    assert!(report.symbols_failed[0].1.contains("insufficient lots"));
    assert_eq!(
        report.symbols_recomputed,
        vec![Symbol::new("AAPL".to_string())]
    );

    // The healthy partition still published.
    let disposals = repo.query_disposals(&account(), None, None).await.unwrap();
    assert_eq!(disposals.len(), 1);
    assert_eq!(disposals[0].symbol, Symbol::new("AAPL".to_string()));
}

// =============================================================================
// Closed-year rerun and tax summary
// =============================================================================

#[tokio::test]
async fn closed_year_refused_while_window_open() {
    let executions = vec![
        exec("AAPL", Side::Buy, 100, "10", 1, "B1"),
        // Loss on Dec 20; the log ends Dec 31: January can still reshape it.
        exec("AAPL", Side::Sell, 100, "8", 355, "S1"),
        exec("AAPL", Side::Buy, 1, "9", 366, "B2"),
    ];
    let (reconciler, _repo, _tmp) = setup(executions).await;
    reconciler.reconcile(&account(), None, None).await.unwrap();

    let err = reconciler.run_closed_year(&account(), 2024).await.unwrap_err();
    assert!(matches!(
        err,
        RunError::Ledger(LedgerError::StaleReplacementWindow { .. })
    ));
}

#[tokio::test]
async fn closed_year_summary_aggregates_terms_and_disallowances() {
    let buy_2023 = TradeExecution::new(
        account(),
        Symbol::new("AAPL".to_string()),
        TradeStamp::new(NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(), 0),
        Side::Buy,
        100,
        d("10"),
        Decimal::zero(),
        Some("B-2023"),
    );
    let executions = vec![
        buy_2023,
        // Long-term gain: held well over a year, +$500.
        exec("AAPL", Side::Sell, 100, "15", 160, "S-LT"),
        // Short-term wash loss: -$200 disallowed in full.
        exec("AAPL", Side::Buy, 100, "10", 170, "B1"),
        exec("AAPL", Side::Sell, 100, "8", 200, "S-WS"),
        exec("AAPL", Side::Buy, 100, "9", 210, "B2"),
        // Short-term gain on the replacement: $1,200 - ($900 + $200).
        exec("AAPL", Side::Sell, 100, "12", 300, "S-ST"),
        // Horizon far enough past Dec 31 + 30.
        exec("AAPL", Side::Buy, 1, "10", 420, "B-2025"),
    ];
    let (reconciler, _repo, _tmp) = setup(executions).await;
    reconciler.reconcile(&account(), None, None).await.unwrap();

    let (report, summary) = reconciler.run_closed_year(&account(), 2024).await.unwrap();
    assert!(report.run_id.is_some());

    assert_eq!(summary.tax_year, 2024);
    assert_eq!(summary.disposal_count, 3);
    assert_eq!(summary.long_term_gains, d("500"));
    assert_eq!(summary.short_term_gains, d("100"));
    // The wash loss was fully deferred: nothing recognized.
    assert_eq!(summary.short_term_losses, Decimal::zero());
    assert_eq!(summary.wash_sale_disallowed, d("200"));
    assert_eq!(summary.net_long_term, d("500"));
    assert_eq!(summary.net_short_term, d("100"));
    assert_eq!(summary.total_net, d("600"));
}

#[tokio::test]
async fn empty_account_reconciles_to_empty_report() {
    let (reconciler, _repo, _tmp) = setup(Vec::new()).await;
    let report = reconciler.reconcile(&account(), None, None).await.unwrap();
    assert!(report.run_id.is_none());
    assert_eq!(report.disposals_total, 0);
}
