//! Bounded worker pool for merkle root and proof jobs
//!
//! Every job runs on its own task and owns its file handles and hash
//! buffers; the only shared state is the admission semaphore and a few
//! counters. Hashing happens on the blocking thread pool so a long file
//! read never stalls the runtime, and a panicking job is reported to its
//! caller as `WorkerFailure` without taking the pool down.
//!
//! Jobs are never retried and cannot be cancelled once admitted, except
//! while they wait for the bag to finish downloading (see
//! `submit_with_cancel` and `PoolConfig::wait_timeout`). Dropping a
//! `JobHandle` detaches the job; it still runs to completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembly::{assembled_layout, wait_for_download, PollIntervals};
use crate::chunker::{BagLayout, ChunkError, ChunkReader, DEFAULT_CHUNK_SIZE};
use crate::merkle::{challenge_index, MerkleError, MerkleTree};
use crate::proof::ProofBundle;
use crate::source::{BagSource, SourceError};
use crate::types::{to_hex, Hash};

/// Default number of jobs executing at once
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Dispatcher error type
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Bag {bag_id} not assembled: {downloaded}/{size} bytes")]
    NotReady {
        bag_id: String,
        downloaded: u64,
        size: u64,
    },
    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),
    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),
    #[error("Storage node error: {0}")]
    Source(#[from] SourceError),
    #[error("Worker failed: {0}")]
    WorkerFailure(String),
    #[error("Job cancelled")]
    Cancelled,
    #[error("Timed out after {0:?} waiting for bag")]
    Timeout(Duration),
    #[error("Job returned {0} output")]
    UnexpectedOutput(&'static str),
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Merkle root of the whole bag
    RootHash { bag_id: String },
    /// Proof for the chunk selected by `random`
    Proof { bag_id: String, random: u64 },
}

impl Job {
    pub fn bag_id(&self) -> &str {
        match self {
            Job::RootHash { bag_id } | Job::Proof { bag_id, .. } => bag_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::RootHash { .. } => "root",
            Job::Proof { .. } => "proof",
        }
    }
}

/// Result of a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Root(Hash),
    Proof { root: Hash, bundle: ProofBundle },
}

impl JobOutput {
    fn kind(&self) -> &'static str {
        match self {
            JobOutput::Root(_) => "root",
            JobOutput::Proof { .. } => "proof",
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Max jobs executing at once; extra jobs queue without bound
    pub max_concurrent: usize,
    pub chunk_size: usize,
    pub intervals: PollIntervals,
    /// Wait for the download to finish (true) or fail fast with `NotReady`
    pub wait_for_download: bool,
    /// Upper bound on the download wait. None = wait forever
    pub wait_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            intervals: PollIntervals::default(),
            wait_for_download: true,
            wait_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_wait_for_download(mut self, wait: bool) -> Self {
        self.wait_for_download = wait;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    in_flight: AtomicUsize,
    queued: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the in-flight count even if the job panics
struct InFlightGuard(Arc<PoolStats>);

impl InFlightGuard {
    fn enter(stats: Arc<PoolStats>) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a submitted job
pub struct JobHandle {
    job: Job,
    inner: JoinHandle<Result<JobOutput, DispatchError>>,
}

impl JobHandle {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the job's single result
    pub async fn wait(self) -> Result<JobOutput, DispatchError> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::WorkerFailure(e.to_string())),
        }
    }
}

/// Bounded pool of concurrent merkle jobs
///
/// Construct once and share; must be used from within a tokio runtime.
pub struct WorkerPool {
    source: Arc<dyn BagSource>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(source: Arc<dyn BagSource>, config: PoolConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            source,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Jobs currently executing
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a free slot
    pub fn queued(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed since the pool was created
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Submit a job; the download wait can never be cancelled
    pub fn submit(&self, job: Job) -> JobHandle {
        self.submit_with_cancel(job, CancellationToken::new())
    }

    /// Submit a job whose queueing and download wait stop when `cancel` fires
    pub fn submit_with_cancel(&self, job: Job, cancel: CancellationToken) -> JobHandle {
        let source = self.source.clone();
        let config = self.config.clone();
        let semaphore = self.semaphore.clone();
        let stats = self.stats.clone();
        let task_job = job.clone();

        debug!("Queueing {} job for bag {}", job.kind(), job.bag_id());
        stats.queued.fetch_add(1, Ordering::SeqCst);

        let inner = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    stats.queued.fetch_sub(1, Ordering::SeqCst);
                    return Err(DispatchError::Cancelled);
                }
            };
            stats.queued.fetch_sub(1, Ordering::SeqCst);
            let _permit = match permit {
                Ok(permit) => permit,
                Err(e) => return Err(DispatchError::WorkerFailure(e.to_string())),
            };
            let _guard = InFlightGuard::enter(stats);

            let bag_id = task_job.bag_id().to_string();
            let kind = task_job.kind();
            let result = run_job(source.as_ref(), &config, task_job, &cancel).await;
            match &result {
                Ok(JobOutput::Root(root)) => info!("Bag {} root {}", bag_id, to_hex(root)),
                Ok(JobOutput::Proof { bundle, .. }) => info!(
                    "Bag {} proof for chunk {}/{}",
                    bag_id, bundle.leaf_index, bundle.leaf_count
                ),
                Err(e) => warn!("{} job for bag {} failed: {}", kind, bag_id, e),
            }
            result
        });

        JobHandle { job, inner }
    }

    /// Merkle root of an assembled bag
    pub async fn merkle_root(&self, bag_id: &str) -> Result<Hash, DispatchError> {
        let job = Job::RootHash {
            bag_id: bag_id.to_string(),
        };
        match self.submit(job).wait().await? {
            JobOutput::Root(root) => Ok(root),
            other => Err(DispatchError::UnexpectedOutput(other.kind())),
        }
    }

    /// Proof for a randomly challenged chunk, plus the root it verifies against
    pub async fn proofs(&self, bag_id: &str, random: u64) -> Result<(Hash, ProofBundle), DispatchError> {
        let job = Job::Proof {
            bag_id: bag_id.to_string(),
            random,
        };
        match self.submit(job).wait().await? {
            JobOutput::Proof { root, bundle } => Ok((root, bundle)),
            other => Err(DispatchError::UnexpectedOutput(other.kind())),
        }
    }
}

async fn ready_layout(
    source: &dyn BagSource,
    config: &PoolConfig,
    bag_id: &str,
    cancel: &CancellationToken,
) -> Result<BagLayout, DispatchError> {
    if !config.wait_for_download {
        return assembled_layout(source, bag_id).await;
    }

    let wait = wait_for_download(source, bag_id, config.intervals.download, Some(cancel));
    let details = match config.wait_timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| DispatchError::Timeout(limit))??,
        None => wait.await?,
    };
    Ok(details.layout())
}

async fn run_job(
    source: &dyn BagSource,
    config: &PoolConfig,
    job: Job,
    cancel: &CancellationToken,
) -> Result<JobOutput, DispatchError> {
    let layout = ready_layout(source, config, job.bag_id(), cancel).await?;
    let chunk_size = config.chunk_size;

    tokio::task::spawn_blocking(move || compute(job, &layout, chunk_size))
        .await
        .map_err(|e| DispatchError::WorkerFailure(e.to_string()))?
}

/// Chunk, hash and (for proofs) select the challenged leaf
pub fn compute(job: Job, layout: &BagLayout, chunk_size: usize) -> Result<JobOutput, DispatchError> {
    let reader = ChunkReader::open(layout, chunk_size)?;

    match job {
        Job::RootHash { .. } => {
            let tree = MerkleTree::build(reader.map(|c| c.map_err(DispatchError::from)))?;
            Ok(JobOutput::Root(tree.root()))
        }
        Job::Proof { random, .. } => {
            let leaf_count = usize::try_from(reader.chunk_count()).map_err(|_| {
                MerkleError::IndexOutOfRange {
                    index: usize::MAX,
                    leaf_count: usize::MAX,
                }
            })?;
            let index = challenge_index(random, reader.total_size(), leaf_count)?;
            let (tree, bundle) =
                MerkleTree::proof(reader.map(|c| c.map_err(DispatchError::from)), index)?;
            Ok(JobOutput::Proof {
                root: tree.root(),
                bundle,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::BagFile;
    use tempfile::TempDir;

    fn layout_with(data: &[u8]) -> (TempDir, BagLayout) {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f"), data).unwrap();
        let layout = BagLayout::new(
            temp.path(),
            vec![BagFile { index: 0, name: "f".into(), size: data.len() as u64 }],
        );
        (temp, layout)
    }

    #[test]
    fn test_compute_root() {
        let (_temp, layout) = layout_with(b"0123456789");
        let out = compute(Job::RootHash { bag_id: "b".into() }, &layout, 4).unwrap();
        let expected = MerkleTree::from_data(b"0123456789", 4).unwrap().root();
        assert_eq!(out, JobOutput::Root(expected));
    }

    #[test]
    fn test_compute_proof_uses_challenge_index() {
        let (_temp, layout) = layout_with(b"0123456789");
        let out = compute(Job::Proof { bag_id: "b".into(), random: 9 }, &layout, 4).unwrap();
        match out {
            JobOutput::Proof { root, bundle } => {
                assert_eq!(bundle.leaf_index, 2);
                assert_eq!(bundle.chunk, b"89".to_vec());
                assert!(bundle.verify(&root));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_compute_empty_bag() {
        let (_temp, layout) = layout_with(b"");
        assert!(matches!(
            compute(Job::RootHash { bag_id: "b".into() }, &layout, 4),
            Err(DispatchError::Merkle(MerkleError::EmptyInput))
        ));
        assert!(matches!(
            compute(Job::Proof { bag_id: "b".into(), random: 1 }, &layout, 4),
            Err(DispatchError::Merkle(MerkleError::EmptyInput))
        ));
    }

    #[test]
    fn test_compute_missing_file() {
        let temp = TempDir::new().unwrap();
        let layout = BagLayout::new(
            temp.path(),
            vec![BagFile { index: 0, name: "gone".into(), size: 3 }],
        );
        assert!(matches!(
            compute(Job::RootHash { bag_id: "b".into() }, &layout, 4),
            Err(DispatchError::Chunk(ChunkError::Io { .. }))
        ));
    }

    #[test]
    fn test_job_accessors() {
        let job = Job::Proof { bag_id: "abc".into(), random: 1 };
        assert_eq!(job.bag_id(), "abc");
        assert_eq!(job.kind(), "proof");
        assert_eq!(Job::RootHash { bag_id: "x".into() }.kind(), "root");
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.intervals.header, Duration::from_millis(1000));
        assert_eq!(config.intervals.download, Duration::from_millis(2000));
        assert!(config.wait_for_download);
        assert!(config.wait_timeout.is_none());
    }
}
