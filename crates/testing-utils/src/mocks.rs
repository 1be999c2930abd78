//! Mock implementations for the repository and runner traits
//!
//! In-memory doubles that can be used for unit testing without a database.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use stats_core::{
    calendar, AggregationRunner, AgentStatAggregate, RawEvent, RunRequest, RunResult,
    RunTargets, StatsError, StatsRepository, StatsResult,
};
use tokio::sync::{watch, Notify};

type AggregateKey = (String, NaiveDate, String);

/// One recorded repository call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCall {
    pub operation: &'static str,
    pub agent_id: Option<String>,
}

#[derive(Debug, Default)]
struct MockRepositoryState {
    events: Vec<RawEvent>,
    next_event_id: i64,
    aggregates: BTreeMap<AggregateKey, AgentStatAggregate>,
    registered_agents: BTreeSet<String>,
    failing_agents: HashSet<String>,
    failing_buckets: HashSet<(String, NaiveDate)>,
    unreachable: bool,
    read_latency: Option<Duration>,
    calls: Vec<RepositoryCall>,
}

/// Mock implementation of StatsRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockStatsRepository {
    state: Arc<Mutex<MockRepositoryState>>,
}

impl MockStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<RawEvent>) -> Self {
        let repo = Self::new();
        for event in events {
            repo.add_event(event);
        }
        repo
    }

    /// 写入原始事件并分配ID
    pub fn add_event(&self, mut event: RawEvent) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_event_id += 1;
        event.id = state.next_event_id;
        state.events.push(event);
        state.next_event_id
    }

    /// 没有任何数据但应出现在已知坐席列表中的坐席
    pub fn register_agent(&self, agent_id: &str) {
        self.state
            .lock()
            .unwrap()
            .registered_agents
            .insert(agent_id.to_string());
    }

    /// 该坐席的读写全部失败
    pub fn fail_agent(&self, agent_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_agents
            .insert(agent_id.to_string());
    }

    pub fn recover_agent(&self, agent_id: &str) {
        self.state.lock().unwrap().failing_agents.remove(agent_id);
    }

    /// 写入该坐席该日期的聚合行时失败
    pub fn fail_bucket_write(&self, agent_id: &str, bucket_date: NaiveDate) {
        self.state
            .lock()
            .unwrap()
            .failing_buckets
            .insert((agent_id.to_string(), bucket_date));
    }

    pub fn clear_bucket_failures(&self) {
        self.state.lock().unwrap().failing_buckets.clear();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().unwrap().read_latency = Some(latency);
    }

    pub fn aggregates_for(&self, agent_id: &str) -> Vec<AgentStatAggregate> {
        self.state
            .lock()
            .unwrap()
            .aggregates
            .values()
            .filter(|a| a.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn aggregate(
        &self,
        agent_id: &str,
        bucket_date: NaiveDate,
        group_key: &str,
    ) -> Option<AgentStatAggregate> {
        self.state
            .lock()
            .unwrap()
            .aggregates
            .get(&(agent_id.to_string(), bucket_date, group_key.to_string()))
            .cloned()
    }

    pub fn aggregate_count(&self) -> usize {
        self.state.lock().unwrap().aggregates.len()
    }

    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn check_bucket_writable(&self, aggregate: &AgentStatAggregate) -> StatsResult<()> {
        let state = self.state.lock().unwrap();
        if state
            .failing_buckets
            .contains(&(aggregate.agent_id.clone(), aggregate.bucket_date))
        {
            return Err(StatsError::database_error(format!(
                "mock write failure for agent {} on {}",
                aggregate.agent_id, aggregate.bucket_date
            )));
        }
        Ok(())
    }

    fn record_call(&self, operation: &'static str, agent_id: Option<&str>) -> StatsResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RepositoryCall {
            operation,
            agent_id: agent_id.map(str::to_string),
        });

        if state.unreachable {
            return Err(StatsError::store_unavailable("mock store unreachable"));
        }
        if let Some(agent_id) = agent_id {
            if state.failing_agents.contains(agent_id) {
                return Err(StatsError::database_error(format!(
                    "mock failure for agent {agent_id}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StatsRepository for MockStatsRepository {
    async fn health_check(&self) -> StatsResult<()> {
        self.record_call("health_check", None)
    }

    async fn read_raw_events(
        &self,
        agent_id: &str,
        since_bucket: Option<NaiveDate>,
    ) -> StatsResult<Vec<RawEvent>> {
        self.record_call("read_raw_events", Some(agent_id))?;

        let latency = self.state.lock().unwrap().read_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .filter(|e| {
                since_bucket.map_or(true, |since| calendar::bucket_date(e.occurred_at) >= since)
            })
            .cloned()
            .collect())
    }

    async fn upsert_aggregate(&self, aggregate: &AgentStatAggregate) -> StatsResult<()> {
        self.record_call("upsert_aggregate", Some(&aggregate.agent_id))?;
        self.check_bucket_writable(aggregate)?;

        let key = (
            aggregate.agent_id.clone(),
            aggregate.bucket_date,
            aggregate.group_key.clone(),
        );
        self.state
            .lock()
            .unwrap()
            .aggregates
            .insert(key, aggregate.clone());
        Ok(())
    }

    async fn upsert_aggregates(
        &self,
        agent_id: &str,
        aggregates: &[AgentStatAggregate],
    ) -> StatsResult<()> {
        self.record_call("upsert_aggregates", Some(agent_id))?;
        // 先校验整组，失败时不落任何一行
        for aggregate in aggregates {
            self.check_bucket_writable(aggregate)?;
        }

        let mut state = self.state.lock().unwrap();
        for aggregate in aggregates {
            let key = (
                aggregate.agent_id.clone(),
                aggregate.bucket_date,
                aggregate.group_key.clone(),
            );
            state.aggregates.insert(key, aggregate.clone());
        }
        Ok(())
    }

    async fn replace_agent_aggregates(
        &self,
        agent_id: &str,
        aggregates: &[AgentStatAggregate],
    ) -> StatsResult<()> {
        self.record_call("replace_agent_aggregates", Some(agent_id))?;
        for aggregate in aggregates {
            self.check_bucket_writable(aggregate)?;
        }

        let mut state = self.state.lock().unwrap();
        state.aggregates.retain(|(owner, _, _), _| owner != agent_id);
        for aggregate in aggregates {
            let key = (
                aggregate.agent_id.clone(),
                aggregate.bucket_date,
                aggregate.group_key.clone(),
            );
            state.aggregates.insert(key, aggregate.clone());
        }
        Ok(())
    }

    async fn list_known_agent_ids(&self) -> StatsResult<Vec<String>> {
        self.record_call("list_known_agent_ids", None)?;

        let state = self.state.lock().unwrap();
        let known: BTreeSet<String> = state
            .events
            .iter()
            .map(|e| e.agent_id.clone())
            .chain(state.aggregates.keys().map(|(agent_id, _, _)| agent_id.clone()))
            .chain(state.registered_agents.iter().cloned())
            .collect();
        Ok(known.into_iter().collect())
    }

    async fn last_computed_at(&self, agent_id: &str) -> StatsResult<Option<DateTime<Utc>>> {
        self.record_call("last_computed_at", Some(agent_id))?;

        let state = self.state.lock().unwrap();
        Ok(state
            .aggregates
            .values()
            .filter(|a| a.agent_id == agent_id)
            .map(|a| a.last_computed_at)
            .max())
    }
}

/// Behaviour of [`MockAggregationRunner`] once released
#[derive(Debug, Clone)]
pub enum RunnerBehavior {
    /// Every explicit agent counts as processed
    Succeed,
    /// Run-level fatal result (`success = false`)
    FailRun(String),
    /// The runner itself returns an error
    Error(String),
    /// The runner panics
    Panic(String),
}

/// Scripted AggregationRunner that records requests and can be held mid-run
pub struct MockAggregationRunner {
    requests: Mutex<Vec<RunRequest>>,
    behavior: Mutex<RunnerBehavior>,
    hold_tx: watch::Sender<bool>,
    started: Notify,
}

impl MockAggregationRunner {
    pub fn new() -> Self {
        let (hold_tx, _) = watch::channel(false);
        Self {
            requests: Mutex::new(Vec::new()),
            behavior: Mutex::new(RunnerBehavior::Succeed),
            hold_tx,
            started: Notify::new(),
        }
    }

    pub fn with_behavior(behavior: RunnerBehavior) -> Self {
        let runner = Self::new();
        runner.set_behavior(behavior);
        runner
    }

    pub fn set_behavior(&self, behavior: RunnerBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Subsequent runs block after recording their request until [`Self::release`]
    pub fn hold(&self) {
        self.hold_tx.send_replace(true);
    }

    pub fn release(&self) {
        self.hold_tx.send_replace(false);
    }

    /// Wait until a run has entered the runner
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockAggregationRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AggregationRunner for MockAggregationRunner {
    async fn run(&self, request: RunRequest) -> StatsResult<RunResult> {
        let started_at = Utc::now();
        self.requests.lock().unwrap().push(request.clone());
        self.started.notify_one();

        let mut hold_rx = self.hold_tx.subscribe();
        while *hold_rx.borrow_and_update() {
            if hold_rx.changed().await.is_err() {
                break;
            }
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            RunnerBehavior::Succeed => {
                let processed = match &request.targets {
                    RunTargets::Agents(ids) => ids.len(),
                    RunTargets::AllKnown => 0,
                };
                Ok(RunResult {
                    mode: request.mode,
                    success: true,
                    processed_count: processed,
                    failed_count: 0,
                    duration_ms: 0,
                    errors: Vec::new(),
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            RunnerBehavior::FailRun(message) => {
                Ok(RunResult::fatal(request.mode, message, started_at, 0))
            }
            RunnerBehavior::Error(message) => Err(StatsError::Internal(message)),
            RunnerBehavior::Panic(message) => panic!("{message}"),
        }
    }
}
