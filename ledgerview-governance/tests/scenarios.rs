//! End-to-end governance scenarios over the mock ledger.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use ledgerview_core::{
    ErrorKind, LedgerConfig, LedgerResult, ManualClock, ProposalStatus, ProposalType, VoteOption,
};
use ledgerview_governance::GovernanceEngine;
use ledgerview_storage::{cache_refresh_task, LmdbStore, MemoryStore, PersistentStore};
use ledgerview_test_utils::assertions::{assert_kind, assert_status};
use ledgerview_test_utils::fixtures::{creator, ledger_with_voters, t0, voter};
use ledgerview_test_utils::MockChainReader;
use tokio::sync::watch;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(
    store: Arc<dyn PersistentStore>,
    reader: Arc<MockChainReader>,
    clock: Arc<ManualClock>,
) -> LedgerResult<GovernanceEngine> {
    GovernanceEngine::new(store, reader, clock, LedgerConfig::default())
}

fn after_close() -> chrono::Duration {
    chrono::Duration::days(7) + chrono::Duration::seconds(1)
}

#[tokio::test]
async fn scenario_quorum_met_majority_for_passes() -> LedgerResult<()> {
    init_tracing();
    let reader = Arc::new(ledger_with_voters(180, 1));
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine_with(Arc::new(MemoryStore::new()), reader, clock.clone())?;

    let proposal = engine
        .create_proposal(&creator(), ProposalType::ParameterChange, "Lower fee", "")
        .await?;

    for i in 0..130 {
        engine.cast_vote(proposal.id, &voter(i), VoteOption::For).await?;
    }
    for i in 130..180 {
        engine.cast_vote(proposal.id, &voter(i), VoteOption::Against).await?;
    }

    let open = engine.tally(proposal.id).await?;
    assert_status(open.status, ProposalStatus::Active);

    clock.advance(after_close());
    let report = engine.tally(proposal.id).await?;
    assert_eq!(report.tally.for_weight, 130);
    assert_eq!(report.tally.against_weight, 50);
    assert_eq!(report.tally.unique_voters, 180);
    assert!(report.quorum_reached);
    assert_status(report.status, ProposalStatus::Passed);
    Ok(())
}

#[tokio::test]
async fn scenario_below_quorum_is_invalid_regardless_of_margin() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(100, 1_000));
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine_with(Arc::new(MemoryStore::new()), reader, clock.clone())?;

    let proposal = engine
        .create_proposal(&creator(), ProposalType::Treasury, "Grant", "")
        .await?;
    for i in 0..100 {
        engine.cast_vote(proposal.id, &voter(i), VoteOption::For).await?;
    }

    clock.advance(after_close());
    let report = engine.tally(proposal.id).await?;
    assert_eq!(report.tally.unique_voters, 100);
    assert!(!report.quorum_reached);
    assert_status(report.status, ProposalStatus::Invalid);
    Ok(())
}

#[tokio::test]
async fn scenario_tie_with_quorum_is_rejected() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(4, 10));
    let clock = Arc::new(ManualClock::new(t0()));
    let mut config = LedgerConfig::default();
    config.governance = config.governance.with_quorum(4);
    let engine = GovernanceEngine::new(Arc::new(MemoryStore::new()), reader, clock.clone(), config)?;

    let proposal = engine
        .create_proposal(&creator(), ProposalType::General, "Coin flip", "")
        .await?;
    engine.cast_vote(proposal.id, &voter(0), VoteOption::For).await?;
    engine.cast_vote(proposal.id, &voter(1), VoteOption::Against).await?;
    engine.cast_vote(proposal.id, &voter(2), VoteOption::Abstain).await?;
    engine.cast_vote(proposal.id, &voter(3), VoteOption::Abstain).await?;

    clock.advance(after_close());
    let report = engine.tally(proposal.id).await?;
    assert_eq!(report.tally.for_weight, report.tally.against_weight);
    assert_status(report.status, ProposalStatus::Rejected);
    Ok(())
}

#[tokio::test]
async fn scenario_weight_change_after_casting_keeps_recorded_weight() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(1, 10));
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine_with(Arc::new(MemoryStore::new()), reader.clone(), clock.clone())?;

    let proposal = engine
        .create_proposal(&creator(), ProposalType::Upgrade, "v2", "")
        .await?;
    engine.cast_vote(proposal.id, &voter(0), VoteOption::For).await?;

    reader.set_weight(&voter(0), 500);
    engine.refresh_voting_power(&voter(0)).await?;
    assert_eq!(engine.voting_power(&voter(0)).await?.into_value(), 500);

    let recorded = engine.vote_of(proposal.id, &voter(0)).await?;
    assert_eq!(recorded.map(|v| v.weight), Some(10));
    assert_eq!(engine.tally(proposal.id).await?.tally.for_weight, 10);
    Ok(())
}

#[tokio::test]
async fn scenario_duplicate_vote_with_different_case_is_rejected() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(0, 1));
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine_with(Arc::new(MemoryStore::new()), reader.clone(), clock)?;

    let lower = ledgerview_core::Identity::parse("0xabcdef").unwrap();
    let upper = ledgerview_core::Identity::parse("0xABCDEF").unwrap();
    reader.set_weight(&lower, 3);

    let proposal = engine
        .create_proposal(&creator(), ProposalType::Membership, "Add member", "")
        .await?;
    engine.cast_vote(proposal.id, &lower, VoteOption::For).await?;

    let second = engine.cast_vote(proposal.id, &upper, VoteOption::Against).await;
    assert_kind(&second, ErrorKind::DuplicateVote);
    assert_eq!(engine.tally(proposal.id).await?.tally.total_votes, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_concurrent_casts_by_one_voter_admit_one() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(1, 7));
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Arc::new(engine_with(Arc::new(MemoryStore::new()), reader, clock)?);

    let proposal = engine
        .create_proposal(&creator(), ProposalType::General, "Race", "")
        .await?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let id = proposal.id;
            tokio::spawn(async move { engine.cast_vote(id, &voter(0), VoteOption::For).await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.await.expect("task should not panic") {
            Ok(_) => admitted += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::DuplicateVote),
        }
    }
    assert_eq!(admitted, 1);
    Ok(())
}

#[tokio::test]
async fn scenario_concurrent_cold_power_reads_hit_ledger_once() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(1, 5));
    reader.set_latency(Duration::from_millis(20));
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine_with(Arc::new(MemoryStore::new()), reader.clone(), clock)?;

    let alice = voter(0);
    let reads = (0..12).map(|_| engine.voting_power(&alice));
    let results = join_all(reads).await;
    for read in results {
        assert_eq!(read?.into_value(), 5);
    }
    assert_eq!(reader.weight_calls(&alice), 1);
    Ok(())
}

#[tokio::test]
async fn scenario_restart_recovers_ledger_and_power_from_lmdb() -> LedgerResult<()> {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let clock = Arc::new(ManualClock::new(t0()));
    let proposal_id = {
        let reader = Arc::new(ledger_with_voters(2, 4));
        let store = Arc::new(LmdbStore::open(dir.path(), 16)?);
        let engine = engine_with(store, reader, clock.clone())?;
        let proposal = engine
            .create_proposal(&creator(), ProposalType::General, "Durable", "")
            .await?;
        engine.cast_vote(proposal.id, &voter(0), VoteOption::For).await?;
        proposal.id
    };

    let reader = Arc::new(MockChainReader::voting_power());
    reader.set_failing(true);
    let store = Arc::new(LmdbStore::open(dir.path(), 16)?);
    let engine = engine_with(store, reader.clone(), clock.clone())?;

    let view = engine.proposal(proposal_id).await?;
    assert_eq!(view.proposal.votes.len(), 1);
    assert_status(view.status, ProposalStatus::Active);

    // Hydrated within TTL: served without touching the ledger.
    let power = engine.voting_power(&voter(0)).await?;
    assert_eq!(power.into_value(), 4);
    assert_eq!(reader.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn scenario_refresh_task_keeps_power_warm() -> LedgerResult<()> {
    let reader = Arc::new(ledger_with_voters(1, 5));
    let clock = Arc::new(ManualClock::new(t0()));
    let mut config = LedgerConfig::default();
    config.cache = config.cache.with_refresh_interval(Duration::from_millis(10));
    let engine =
        GovernanceEngine::new(Arc::new(MemoryStore::new()), reader.clone(), clock.clone(), config.clone())?;

    engine.voting_power(&voter(0)).await?;
    reader.set_weight(&voter(0), 6);
    clock.advance(chrono::Duration::seconds(31));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(cache_refresh_task(
        engine.power_cache().clone(),
        config.cache,
        shutdown_rx,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = shutdown_tx.send(true);
    let metrics = handle.await.expect("refresh task should not panic").snapshot();

    assert!(metrics.refreshes_succeeded >= 1);
    let read = engine.voting_power(&voter(0)).await?;
    assert!(read.from_cache_flag());
    assert_eq!(read.into_value(), 6);
    Ok(())
}
