//! Cross-referencing of local failures against upstream CI.
//!
//! One request per failed target, at most `concurrency` in flight. A query
//! that errors only loses that target's data; the batch always completes.

use crate::attr::Attr;
use crate::hydra::{guess_jobset, BuildStatus, BuildStatusProvider, HydraClient};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Default number of concurrent CI queries.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Local failures split by upstream status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiPartition {
    /// Failures this change is implicated in, in input order
    pub failed_new: Vec<String>,
    /// Failures that are already broken upstream, in input order
    pub failed_existing: Vec<String>,
    /// Upstream status per target name, where one was found
    pub statuses: BTreeMap<String, BuildStatus>,
}

/// Split failed targets by upstream status.
///
/// Upstream non-success means pre-existing; upstream success or no data
/// implicates the change.
pub fn partition_failures(
    failed: &[String],
    statuses: BTreeMap<String, BuildStatus>,
) -> CiPartition {
    let (failed_existing, failed_new): (Vec<String>, Vec<String>) = failed
        .iter()
        .cloned()
        .partition(|name| statuses.get(name).is_some_and(|s| !s.success));

    CiPartition {
        failed_new,
        failed_existing,
        statuses,
    }
}

/// Queries a [`BuildStatusProvider`] with a bounded worker pool.
#[derive(Clone)]
pub struct CrossReferencer {
    provider: Arc<dyn BuildStatusProvider>,
    concurrency: usize,
}

impl CrossReferencer {
    pub fn new(provider: Arc<dyn BuildStatusProvider>) -> Self {
        Self {
            provider,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Query Hydra with the pool width from its config.
    pub fn for_hydra(client: HydraClient) -> Self {
        let concurrency = client.config().concurrency;
        Self::new(Arc::new(client)).with_concurrency(concurrency)
    }

    /// Override the worker pool width (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch upstream status for every name.
    ///
    /// Results are merged as they complete; names without data are absent
    /// from the returned map.
    #[instrument(skip(self, names), fields(count = names.len()))]
    pub async fn query(
        &self,
        names: &[String],
        system: &str,
        channel: &str,
    ) -> BTreeMap<String, BuildStatus> {
        let jobset = guess_jobset(channel);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let results: Arc<Mutex<Vec<(String, BuildStatus)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut join_set = JoinSet::new();
        for name in names {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let jobset = jobset.clone();
            let system = system.to_string();
            let name = name.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                match provider.build_status(&jobset, &name, &system).await {
                    Ok(Some(status)) => results.lock().await.push((name, status)),
                    Ok(None) => debug!(attr = %name, "No upstream data"),
                    Err(e) => warn!(attr = %name, error = %e, "CI query failed"),
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "CI query task aborted");
            }
        }

        let collected = std::mem::take(&mut *results.lock().await);
        collected.into_iter().collect()
    }

    /// Query upstream for the failed targets and partition them.
    pub async fn partition(&self, failed: &[Attr], system: &str, channel: &str) -> CiPartition {
        let names: Vec<String> = failed.iter().map(|a| a.name.clone()).collect();
        if names.is_empty() {
            return CiPartition::default();
        }

        info!(count = names.len(), %channel, "Cross-referencing failures with CI");
        let statuses = self.query(&names, system, channel).await;
        partition_failures(&names, statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HydraConfig;
    use crate::error::ReviewError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn status(success: bool) -> BuildStatus {
        BuildStatus {
            success,
            status: if success { "Succeeded" } else { "Failed" }.to_string(),
            timestamp: None,
            build_id: None,
            build_url: None,
            name: None,
            arch: None,
        }
    }

    struct TableProvider {
        table: BTreeMap<String, BuildStatus>,
    }

    #[async_trait]
    impl BuildStatusProvider for TableProvider {
        async fn build_status(
            &self,
            _jobset: &str,
            attr: &str,
            _system: &str,
        ) -> crate::Result<Option<BuildStatus>> {
            if attr == "flaky" {
                return Err(ReviewError::ci_query(attr, "connection reset"));
            }
            Ok(self.table.get(attr).cloned())
        }
    }

    #[derive(Default)]
    struct GaugeProvider {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BuildStatusProvider for GaugeProvider {
        async fn build_status(
            &self,
            _jobset: &str,
            attr: &str,
            _system: &str,
        ) -> crate::Result<Option<BuildStatus>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            // Vary latency so completions arrive out of submission order.
            let delay = 1 + attr.len() as u64 % 7;
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(status(false)))
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_partition_failures() {
        let statuses: BTreeMap<String, BuildStatus> = [
            ("A".to_string(), status(true)),
            ("B".to_string(), status(false)),
        ]
        .into_iter()
        .collect();

        let partition = partition_failures(&names(&["A", "B", "C"]), statuses);
        assert_eq!(partition.failed_new, vec!["A", "C"]);
        assert_eq!(partition.failed_existing, vec!["B"]);
    }

    #[tokio::test]
    async fn test_partition_degrades_query_errors_to_new() {
        let provider = TableProvider {
            table: [("A".to_string(), status(true)), ("B".to_string(), status(false))]
                .into_iter()
                .collect(),
        };
        let xref = CrossReferencer::new(Arc::new(provider));
        let failed = vec![Attr::new("A"), Attr::new("B"), Attr::new("C"), Attr::new("flaky")];

        let partition = xref.partition(&failed, "x86_64-linux", "unstable").await;

        assert_eq!(partition.failed_new, vec!["A", "C", "flaky"]);
        assert_eq!(partition.failed_existing, vec!["B"]);
        assert!(!partition.statuses.contains_key("flaky"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let provider = Arc::new(GaugeProvider::default());
        let xref = CrossReferencer::new(provider.clone()).with_concurrency(10);
        let failed: Vec<Attr> = (0..100).map(|i| Attr::new(format!("pkg{i}"))).collect();

        let partition = xref.partition(&failed, "x86_64-linux", "master").await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 100);
        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 10);
        assert_eq!(partition.failed_existing.len(), 100);
        // Input order survives out-of-order completion.
        assert_eq!(partition.failed_existing[0], "pkg0");
        assert_eq!(partition.failed_existing[99], "pkg99");
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_queries() {
        let provider = Arc::new(GaugeProvider::default());
        let xref = CrossReferencer::new(provider.clone());

        let partition = xref.partition(&[], "x86_64-linux", "unstable").await;

        assert_eq!(partition, CiPartition::default());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_for_hydra_takes_width_from_config() {
        let config = HydraConfig::default().with_concurrency(3);
        assert_eq!(CrossReferencer::for_hydra(HydraClient::new(config)).concurrency(), 3);

        let xref = CrossReferencer::for_hydra(HydraClient::new(HydraConfig::default()));
        assert_eq!(xref.concurrency(), DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_with_concurrency_clamps_to_one() {
        let xref = CrossReferencer::new(Arc::new(GaugeProvider::default())).with_concurrency(0);
        assert_eq!(xref.concurrency(), 1);
    }
}
