//! Tether Test Utilities
//!
//! Shared test infrastructure for the Tether workspace:
//! - `MockRemote`, a scripted stand-in for the remote data service
//! - Fixtures for keyword, group and file snapshots
//! - Proptest generators for keyword identity fields and payloads

pub use tether_core::{
    FileRecord, GroupAggregate, KeywordRecord, OperationPayload, RemoteError, RemoteKeyword,
    RemoteResult, RemoteService,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

// ============================================================================
// MOCK REMOTE
// ============================================================================

/// Remote endpoints, for scripting and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    FetchGroups,
    FetchKeywords,
    FetchFiles,
    CreateKeywords,
    UpdateKeyword,
    RemoveKeyword,
    RemoveGroup,
    RemoveFile,
    HealthCheck,
}

impl Endpoint {
    pub fn for_payload(payload: &OperationPayload) -> Self {
        match payload {
            OperationPayload::CreateKeywords { .. } => Endpoint::CreateKeywords,
            OperationPayload::UpdateKeyword { .. } => Endpoint::UpdateKeyword,
            OperationPayload::DeleteKeyword { .. } => Endpoint::RemoveKeyword,
            OperationPayload::DeleteGroup { .. } => Endpoint::RemoveGroup,
            OperationPayload::DeleteFile { .. } => Endpoint::RemoveFile,
        }
    }
}

/// Scripted behaviour for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Fail with a 503 for the next `n` calls, then behave normally.
    FailTimes(u32),
    /// Fail with a 503 on every call.
    FailAlways,
    /// Mutations answer `success: false`; reads behave normally.
    RefuseAlways,
}

#[derive(Debug, Default)]
struct MockState {
    groups: Vec<GroupAggregate>,
    keywords: Vec<RemoteKeyword>,
    files: Vec<FileRecord>,
    scripts: HashMap<Endpoint, Script>,
    calls: HashMap<Endpoint, u32>,
    mutations: Vec<OperationPayload>,
    delay: Option<Duration>,
}

/// Mock remote data service for testing.
///
/// Serves settable snapshots, counts calls per endpoint, records accepted
/// mutations, and fails on demand. While unreachable every call returns a
/// network error.
///
/// # Example
///
/// ```rust,ignore
/// use tether_test_utils::{fixtures, Endpoint, MockRemote, Script};
///
/// let remote = MockRemote::new();
/// remote.set_keywords(fixtures::sample_remote_keywords(50));
/// remote.script(Endpoint::FetchFiles, Script::FailAlways);
/// ```
#[derive(Debug)]
pub struct MockRemote {
    state: Mutex<MockState>,
    reachable: AtomicBool,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            reachable: AtomicBool::new(true),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_groups(&self, groups: Vec<GroupAggregate>) {
        self.state().groups = groups;
    }

    pub fn set_keywords(&self, keywords: Vec<RemoteKeyword>) {
        self.state().keywords = keywords;
    }

    pub fn set_files(&self, files: Vec<FileRecord>) {
        self.state().files = files;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn script(&self, endpoint: Endpoint, script: Script) {
        self.state().scripts.insert(endpoint, script);
    }

    pub fn clear_script(&self, endpoint: Endpoint) {
        self.state().scripts.remove(&endpoint);
    }

    /// Number of calls made to `endpoint` so far.
    pub fn calls(&self, endpoint: Endpoint) -> u32 {
        self.state().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Total calls across every endpoint except the health check.
    pub fn data_calls(&self) -> u32 {
        self.state()
            .calls
            .iter()
            .filter(|(endpoint, _)| **endpoint != Endpoint::HealthCheck)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Mutations the service accepted, in arrival order.
    pub fn mutations(&self) -> Vec<OperationPayload> {
        self.state().mutations.clone()
    }

    /// Count the call and decide its fate. `Ok(true)` means proceed,
    /// `Ok(false)` means refuse.
    async fn enter(&self, endpoint: Endpoint) -> RemoteResult<bool> {
        let delay = {
            let mut state = self.state();
            *state.calls.entry(endpoint).or_insert(0) += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network {
                reason: "connection refused".to_string(),
            });
        }

        let mut state = self.state();
        match state.scripts.get(&endpoint).cloned() {
            None => Ok(true),
            Some(Script::FailAlways) => Err(unavailable()),
            Some(Script::RefuseAlways) => Ok(false),
            Some(Script::FailTimes(n)) => {
                if n > 1 {
                    state.scripts.insert(endpoint, Script::FailTimes(n - 1));
                } else {
                    state.scripts.remove(&endpoint);
                }
                Err(unavailable())
            }
        }
    }

    async fn mutate(&self, payload: OperationPayload) -> RemoteResult<bool> {
        let proceed = self.enter(Endpoint::for_payload(&payload)).await?;
        if proceed {
            self.state().mutations.push(payload);
        }
        Ok(proceed)
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Server {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn fetch_groups(&self) -> RemoteResult<Vec<GroupAggregate>> {
        self.enter(Endpoint::FetchGroups).await?;
        Ok(self.state().groups.clone())
    }

    async fn fetch_keywords(&self) -> RemoteResult<Vec<RemoteKeyword>> {
        self.enter(Endpoint::FetchKeywords).await?;
        Ok(self.state().keywords.clone())
    }

    async fn fetch_files(&self) -> RemoteResult<Vec<FileRecord>> {
        self.enter(Endpoint::FetchFiles).await?;
        Ok(self.state().files.clone())
    }

    async fn create_keywords(&self, records: &[KeywordRecord]) -> RemoteResult<bool> {
        self.mutate(OperationPayload::CreateKeywords {
            records: records.to_vec(),
        })
        .await
    }

    async fn update_keyword(&self, record: &KeywordRecord) -> RemoteResult<bool> {
        self.mutate(OperationPayload::UpdateKeyword {
            record: record.clone(),
        })
        .await
    }

    async fn remove_keyword(&self, keyword_id: &str, group_name: &str) -> RemoteResult<bool> {
        self.mutate(OperationPayload::DeleteKeyword {
            keyword_id: keyword_id.to_string(),
            group_name: group_name.to_string(),
        })
        .await
    }

    async fn remove_group(&self, group_name: &str) -> RemoteResult<bool> {
        self.mutate(OperationPayload::DeleteGroup {
            group_name: group_name.to_string(),
        })
        .await
    }

    async fn remove_file(&self, filename: &str) -> RemoteResult<bool> {
        self.mutate(OperationPayload::DeleteFile {
            filename: filename.to_string(),
        })
        .await
    }

    async fn health_check(&self) -> RemoteResult<bool> {
        self.enter(Endpoint::HealthCheck).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tether_core::Timestamp;

    const GROUPS: [&str; 3] = ["backlinks", "technical seo", "content"];

    /// Fixed timestamp so snapshots compare equal across calls.
    pub fn fixed_timestamp() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// `n` distinct keyword records spread over three groups and two files.
    pub fn sample_keywords(n: usize) -> Vec<KeywordRecord> {
        (0..n)
            .map(|i| {
                let file = if i % 2 == 0 { "import-a.csv" } else { "import-b.csv" };
                KeywordRecord::new(
                    format!("keyword {i}"),
                    GROUPS[i % GROUPS.len()],
                    (i as i64 + 1) * 10,
                    (i % 100) as f64,
                    fixed_timestamp(),
                )
                .with_source_file(file)
            })
            .collect()
    }

    /// The same records as [`sample_keywords`], in wire shape.
    pub fn sample_remote_keywords(n: usize) -> Vec<RemoteKeyword> {
        sample_keywords(n).into_iter().map(RemoteKeyword::from).collect()
    }

    /// Group aggregates consistent with `records`.
    pub fn sample_groups(records: &[KeywordRecord]) -> Vec<GroupAggregate> {
        GROUPS
            .iter()
            .map(|name| {
                let members: Vec<_> = records.iter().filter(|r| r.group_name == *name).collect();
                let total_volume = members.iter().map(|r| r.volume).sum();
                let average_difficulty = if members.is_empty() {
                    0.0
                } else {
                    members.iter().map(|r| r.difficulty).sum::<f64>() / members.len() as f64
                };
                GroupAggregate {
                    name: name.to_string(),
                    keyword_count: members.len() as u64,
                    total_volume,
                    average_difficulty,
                    keyword_ids: members.iter().map(|r| r.id.clone()).collect(),
                    last_synced_at: fixed_timestamp(),
                }
            })
            .collect()
    }

    /// File records consistent with `records`.
    pub fn sample_files(records: &[KeywordRecord]) -> Vec<FileRecord> {
        ["import-a.csv", "import-b.csv"]
            .iter()
            .map(|filename| {
                let members: Vec<_> = records
                    .iter()
                    .filter(|r| r.source_file.as_deref() == Some(*filename))
                    .collect();
                let mut groups: Vec<String> = members.iter().map(|r| r.group_name.clone()).collect();
                groups.sort();
                groups.dedup();
                FileRecord {
                    filename: filename.to_string(),
                    keyword_count: members.len() as u64,
                    groups,
                    keyword_ids: members.iter().map(|r| r.id.clone()).collect(),
                    imported_at: fixed_timestamp(),
                }
            })
            .collect()
    }

    /// A remote seeded with a consistent snapshot of `n` keywords.
    pub fn seeded_remote(n: usize) -> MockRemote {
        let records = sample_keywords(n);
        let remote = MockRemote::new();
        remote.set_groups(sample_groups(&records));
        remote.set_files(sample_files(&records));
        remote.set_keywords(records.into_iter().map(RemoteKeyword::from).collect());
        remote
    }

    pub fn delete_keyword_payload(record: &KeywordRecord) -> OperationPayload {
        OperationPayload::DeleteKeyword {
            keyword_id: record.id.clone(),
            group_name: record.group_name.clone(),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use tether_core::Timestamp;

    pub fn arb_keyword_text() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9 ]{0,30}"
    }

    pub fn arb_group_name() -> impl Strategy<Value = String> {
        "[a-z][a-z ]{0,15}"
    }

    pub fn arb_cluster() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-z]{1,10}")
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..2_000_000_000).prop_map(|secs| {
            Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_remote_keyword() -> impl Strategy<Value = RemoteKeyword> {
        (
            arb_keyword_text(),
            arb_group_name(),
            0i64..1_000_000,
            0.0f64..100.0,
            arb_cluster(),
            arb_timestamp(),
        )
            .prop_map(
                |(keyword, group_name, volume, difficulty, cluster, created_at)| RemoteKeyword {
                    keyword,
                    group_name,
                    volume,
                    difficulty,
                    cluster,
                    source_file: None,
                    created_at,
                    updated_at: None,
                },
            )
    }

    pub fn arb_keyword_record() -> impl Strategy<Value = KeywordRecord> {
        arb_remote_keyword().prop_map(RemoteKeyword::into_record)
    }

    pub fn arb_operation_payload() -> impl Strategy<Value = OperationPayload> {
        prop_oneof![
            proptest::collection::vec(arb_keyword_record(), 0..4)
                .prop_map(|records| OperationPayload::CreateKeywords { records }),
            arb_keyword_record().prop_map(|record| OperationPayload::UpdateKeyword { record }),
            arb_keyword_record().prop_map(|record| OperationPayload::DeleteKeyword {
                keyword_id: record.id,
                group_name: record.group_name,
            }),
            arb_group_name().prop_map(|group_name| OperationPayload::DeleteGroup { group_name }),
            "[a-z]{1,8}\\.csv".prop_map(|filename| OperationPayload::DeleteFile { filename }),
        ]
    }
}
