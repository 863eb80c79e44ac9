//! LedgerView Test Utilities
//!
//! Centralized test infrastructure for the LedgerView workspace:
//! - A scriptable mock ledger ([`MockChainReader`])
//! - Proptest generators for identities, votes and proposals
//! - Test fixtures for common scenarios
//! - Assertions on the error taxonomy

// Re-export core types for convenience
pub use ledgerview_core::{
    CacheConfig, CacheNamespace, ChainReader, ChainValue, Clock, ErrorKind, FetchError,
    FetchResult, GovernanceConfig, Identity, LedgerConfig, LedgerError, LedgerResult, LogEntry,
    LogFilter, ManualClock, Proposal, ProposalDraft, ProposalId, ProposalStatus, ProposalType,
    SystemClock, Tally, Timestamp, ValueCall, Vote, VoteOption, Weight,
};

use async_trait::async_trait;
use ledgerview_core::config::{DEFAULT_POWER_CONTRACT, DEFAULT_POWER_METHOD};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK CHAIN READER
// ============================================================================

/// In-memory stand-in for the remote ledger.
///
/// Values are scripted per call; voting weights have a shortcut keyed by
/// identity. Every read is counted, can be delayed, and can be made to fail.
#[derive(Debug)]
pub struct MockChainReader {
    values: Mutex<HashMap<ValueCall, ChainValue>>,
    default_value: Option<ChainValue>,
    logs: Mutex<Vec<LogEntry>>,
    block_times: Mutex<HashMap<u64, i64>>,
    power_contract: String,
    power_method: String,
    latency: Mutex<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
    calls_by_key: Mutex<HashMap<String, usize>>,
}

impl Default for MockChainReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainReader {
    /// A reader with no scripted values. Unscripted calls fail.
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            default_value: None,
            logs: Mutex::new(Vec::new()),
            block_times: Mutex::new(HashMap::new()),
            power_contract: DEFAULT_POWER_CONTRACT.to_string(),
            power_method: DEFAULT_POWER_METHOD.to_string(),
            latency: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            calls_by_key: Mutex::new(HashMap::new()),
        }
    }

    /// A reader for governance tests: any unscripted call returns weight 0.
    pub fn voting_power() -> Self {
        Self::new().with_default(ChainValue::Uint(0))
    }

    /// Value returned for calls nothing was scripted for.
    pub fn with_default(mut self, value: ChainValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Contract and method that [`set_weight`](Self::set_weight) scripts.
    pub fn with_power_call(mut self, contract: impl Into<String>, method: impl Into<String>) -> Self {
        self.power_contract = contract.into();
        self.power_method = method.into();
        self
    }

    pub fn set_value(&self, call: ValueCall, value: ChainValue) {
        lock(&self.values).insert(call, value);
    }

    /// Script the voting weight of `identity`.
    pub fn set_weight(&self, identity: &Identity, weight: Weight) {
        self.set_value(self.power_call(identity), ChainValue::Uint(u128::from(weight)));
    }

    pub fn push_log(&self, entry: LogEntry) {
        lock(&self.logs).push(entry);
    }

    pub fn set_block_time(&self, block_number: u64, unix_secs: i64) {
        lock(&self.block_times).insert(block_number, unix_secs);
    }

    /// Delay every subsequent read.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Total reads of any kind.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Reads of the voting weight of `identity`.
    pub fn weight_calls(&self, identity: &Identity) -> usize {
        self.calls_for(&self.power_call(identity).to_string())
    }

    /// Reads recorded under `key` (a `ValueCall` display string, `logs:{sig}`
    /// or `block:{n}`).
    pub fn calls_for(&self, key: &str) -> usize {
        lock(&self.calls_by_key).get(key).copied().unwrap_or(0)
    }

    fn power_call(&self, identity: &Identity) -> ValueCall {
        ValueCall::new(&self.power_contract, &self.power_method).arg(identity.as_str())
    }

    async fn begin(&self, key: &str) -> FetchResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.calls_by_key).entry(key.to_string()).or_insert(0) += 1;

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Upstream {
                key: key.to_string(),
                reason: "mock ledger unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn read_value(&self, call: &ValueCall) -> FetchResult<ChainValue> {
        let key = call.to_string();
        self.begin(&key).await?;
        let scripted = lock(&self.values).get(call).cloned();
        scripted
            .or_else(|| self.default_value.clone())
            .ok_or(FetchError::Upstream {
                key,
                reason: "no value scripted".to_string(),
            })
    }

    async fn read_logs(&self, filter: &LogFilter) -> FetchResult<Vec<LogEntry>> {
        self.begin(&format!("logs:{}", filter.event_signature)).await?;
        let to_block = filter.to_block.unwrap_or(u64::MAX);
        Ok(lock(&self.logs)
            .iter()
            .filter(|entry| entry.block_number >= filter.from_block && entry.block_number <= to_block)
            .filter(|entry| {
                filter.topics.iter().all(|(name, expected)| {
                    entry
                        .fields
                        .get(name)
                        .and_then(|value| value.as_text(name).ok())
                        .is_some_and(|actual| actual.eq_ignore_ascii_case(expected))
                })
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> FetchResult<i64> {
        let key = format!("block:{}", block_number);
        self.begin(&key).await?;
        let found = lock(&self.block_times).get(&block_number).copied();
        found.ok_or(FetchError::Upstream {
            key,
            reason: "unknown block".to_string(),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating LedgerView types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a hex address identity, sometimes mixed-case.
    pub fn arb_identity() -> impl Strategy<Value = Identity> {
        (any::<[u8; 20]>(), any::<bool>()).prop_map(|(bytes, upper)| {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let raw = if upper { hex.to_uppercase() } else { hex };
            Identity::parse(&format!("0x{}", raw)).expect("hex identities are valid")
        })
    }

    pub fn arb_weight() -> impl Strategy<Value = Weight> {
        prop_oneof![1u64..1_000, 1_000u64..1_000_000_000]
    }

    pub fn arb_vote_option() -> impl Strategy<Value = VoteOption> {
        prop_oneof![
            Just(VoteOption::For),
            Just(VoteOption::Against),
            Just(VoteOption::Abstain),
        ]
    }

    pub fn arb_proposal_type() -> impl Strategy<Value = ProposalType> {
        proptest::sample::select(ProposalType::ALL.to_vec())
    }

    /// Generate votes from pairwise-distinct voters.
    pub fn arb_distinct_votes(cast_at: Timestamp, max: usize) -> impl Strategy<Value = Vec<Vote>> {
        proptest::collection::btree_map(arb_identity(), (arb_vote_option(), arb_weight()), 0..max)
            .prop_map(move |by_voter| {
                by_voter
                    .into_iter()
                    .map(|(voter, (option, weight))| Vote {
                        voter,
                        option,
                        weight,
                        cast_at,
                    })
                    .collect()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;

    /// 2024-01-01T00:00:00Z, the start of every scripted scenario.
    pub fn t0() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// The `n`-th deterministic voter identity.
    pub fn voter(n: usize) -> Identity {
        Identity::parse(&format!("0x{:040x}", n)).expect("hex identities are valid")
    }

    pub fn identity(raw: &str) -> Identity {
        Identity::parse(raw).unwrap_or_else(|e| panic!("invalid fixture identity {raw}: {e}"))
    }

    /// The creator used by proposal fixtures.
    pub fn creator() -> Identity {
        identity("0xc0ffee")
    }

    /// A mock ledger where voters `0..n` each hold `weight`.
    pub fn ledger_with_voters(n: usize, weight: Weight) -> MockChainReader {
        let reader = MockChainReader::voting_power();
        for i in 0..n {
            reader.set_weight(&voter(i), weight);
        }
        reader.set_weight(&creator(), weight.max(1));
        reader
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the error taxonomy.

    use super::*;

    /// Assert that `result` failed with an error of `kind`.
    pub fn assert_kind<T: std::fmt::Debug>(result: &LedgerResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {}", e),
            Ok(value) => panic!("Expected {:?} error, got Ok({:?})", kind, value),
        }
    }

    pub fn assert_status(proposal_status: ProposalStatus, expected: ProposalStatus) {
        assert_eq!(
            proposal_status, expected,
            "Expected proposal status {:?}, got {:?}",
            expected, proposal_status
        );
    }
}
