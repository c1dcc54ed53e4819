//! Waiting for the storage node to assemble a bag on disk
//!
//! The node gives no push notification, so readiness is polled: once a
//! second for the bag header, every two seconds for the full content.
//! Waits are unbounded unless a cancellation token is supplied.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunker::BagLayout;
use crate::dispatch::DispatchError;
use crate::source::{AddBagRequest, BagDetails, BagSource};

/// Default poll interval while waiting for the bag header
pub const HEADER_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default poll interval while waiting for the full download
pub const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Poll intervals for readiness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub header: Duration,
    pub download: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            header: HEADER_POLL_INTERVAL,
            download: DOWNLOAD_POLL_INTERVAL,
        }
    }
}

async fn pause(interval: Duration, cancel: Option<&CancellationToken>) -> Result<(), DispatchError> {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(DispatchError::Cancelled),
            _ = tokio::time::sleep(interval) => Ok(()),
        },
        None => {
            tokio::time::sleep(interval).await;
            Ok(())
        }
    }
}

async fn poll_until<S, F>(
    source: &S,
    bag_id: &str,
    interval: Duration,
    cancel: Option<&CancellationToken>,
    what: &str,
    ready: F,
) -> Result<BagDetails, DispatchError>
where
    S: BagSource + ?Sized,
    F: Fn(&BagDetails) -> bool,
{
    loop {
        if cancel.is_some_and(|t| t.is_cancelled()) {
            return Err(DispatchError::Cancelled);
        }
        let details = source.bag_details(bag_id).await?;
        if ready(&details) {
            return Ok(details);
        }
        debug!(
            "Bag {} {} pending ({}/{} bytes)",
            bag_id, what, details.downloaded, details.size
        );
        pause(interval, cancel).await?;
    }
}

/// Block until the node has loaded the bag header
pub async fn wait_for_header<S: BagSource + ?Sized>(
    source: &S,
    bag_id: &str,
    interval: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<BagDetails, DispatchError> {
    poll_until(source, bag_id, interval, cancel, "header", |d| d.header_loaded).await
}

/// Block until every byte of the bag is on disk
pub async fn wait_for_download<S: BagSource + ?Sized>(
    source: &S,
    bag_id: &str,
    interval: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<BagDetails, DispatchError> {
    poll_until(source, bag_id, interval, cancel, "download", BagDetails::is_downloaded).await
}

/// Ask the node to fetch a bag: header first, then every file
///
/// Both requests ask the node to store the bag under `path`. With
/// `wait_completed` the call returns only once the whole bag is on disk;
/// otherwise it returns right after requesting the files.
pub async fn download_bag<S: BagSource + ?Sized>(
    source: &S,
    bag_id: &str,
    path: &str,
    wait_completed: bool,
    intervals: PollIntervals,
    cancel: Option<&CancellationToken>,
) -> Result<BagDetails, DispatchError> {
    source.add_bag(&AddBagRequest::new(bag_id).with_path(path)).await?;

    let header = wait_for_header(source, bag_id, intervals.header, cancel).await?;
    debug!("Bag {} header loaded, requesting {} files", bag_id, header.files.len());
    source
        .add_bag(
            &AddBagRequest::new(bag_id)
                .with_path(path)
                .with_files(header.file_indices()),
        )
        .await?;

    if wait_completed {
        wait_for_download(source, bag_id, intervals.download, cancel).await
    } else {
        Ok(header)
    }
}

/// Request every file of a bag whose header is already known
///
/// Returns false (and requests nothing) if the header is still missing.
pub async fn request_full_download<S: BagSource + ?Sized>(
    source: &S,
    bag_id: &str,
    path: &str,
) -> Result<bool, DispatchError> {
    let details = source.bag_details(bag_id).await?;
    if !details.header_loaded {
        return Ok(false);
    }
    source
        .add_bag(
            &AddBagRequest::new(bag_id)
                .with_path(path)
                .with_files(details.file_indices()),
        )
        .await?;
    Ok(true)
}

/// Single check: is the bag fully downloaded
pub async fn download_succeeded<S: BagSource + ?Sized>(source: &S, bag_id: &str) -> Result<bool, DispatchError> {
    Ok(source.bag_details(bag_id).await?.is_downloaded())
}

/// Single check: is the bag header loaded
pub async fn header_succeeded<S: BagSource + ?Sized>(source: &S, bag_id: &str) -> Result<bool, DispatchError> {
    Ok(source.bag_details(bag_id).await?.header_loaded)
}

/// Layout of a bag that must already be assembled
///
/// Does not wait: a bag still downloading fails with `NotReady`.
pub async fn assembled_layout<S: BagSource + ?Sized>(
    source: &S,
    bag_id: &str,
) -> Result<BagLayout, DispatchError> {
    let details = source.bag_details(bag_id).await?;
    if !details.is_downloaded() {
        return Err(DispatchError::NotReady {
            bag_id: bag_id.to_string(),
            downloaded: details.downloaded,
            size: details.size,
        });
    }
    Ok(details.layout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::BagFile;
    use crate::source::MemoryBagSource;

    const FAST: Duration = Duration::from_millis(5);
    const DEST: &str = "/srv/bags";

    fn pending_bag(source: &MemoryBagSource, bag_id: &str) {
        source.insert(BagDetails {
            bag_id: bag_id.to_string(),
            size: 100,
            downloaded: 0,
            files: vec![
                BagFile { index: 0, name: "a".into(), size: 60 },
                BagFile { index: 1, name: "b".into(), size: 40 },
            ],
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_wait_for_download_returns_when_ready() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");

        let waiter = {
            let source = source.clone();
            tokio::spawn(async move { wait_for_download(&source, "bag", FAST, None).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        source.complete("bag");

        let details = waiter.await.unwrap().unwrap();
        assert!(details.is_downloaded());
        assert!(source.detail_calls() >= 2);
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");
        let token = CancellationToken::new();

        let waiter = {
            let source = source.clone();
            let token = token.clone();
            tokio::spawn(async move { wait_for_download(&source, "bag", FAST, Some(&token)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(DispatchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_download_bag_requests_header_then_files() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");
        source.update("bag", |d| d.header_loaded = true);

        let intervals = PollIntervals { header: FAST, download: FAST };
        let details = download_bag(&source, "bag", DEST, false, intervals, None).await.unwrap();
        assert!(!details.is_downloaded());

        let requests = source.add_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].files.is_empty());
        assert!(!requests[0].download_all);
        assert_eq!(requests[1].files, vec![0, 1]);
        assert!(requests[1].download_all);
        assert!(requests.iter().all(|r| r.path == DEST));
    }

    #[tokio::test]
    async fn test_download_bag_waits_for_completion() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");

        let task = {
            let source = source.clone();
            let intervals = PollIntervals { header: FAST, download: FAST };
            tokio::spawn(async move { download_bag(&source, "bag", DEST, true, intervals, None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        source.update("bag", |d| d.header_loaded = true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        source.complete("bag");

        assert!(task.await.unwrap().unwrap().is_downloaded());
    }

    #[tokio::test]
    async fn test_request_full_download_needs_header() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");
        assert!(!request_full_download(&source, "bag", DEST).await.unwrap());
        assert!(source.add_requests().is_empty());

        source.update("bag", |d| d.header_loaded = true);
        assert!(request_full_download(&source, "bag", DEST).await.unwrap());
        let requests = source.add_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, DEST);
    }

    #[tokio::test]
    async fn test_bag_without_header_is_not_assembled() {
        // A bag the node has just been told about: nothing known yet
        let source = MemoryBagSource::new();
        source.insert(BagDetails { bag_id: "fresh".into(), ..Default::default() });

        assert!(!download_succeeded(&source, "fresh").await.unwrap());
        assert!(matches!(
            assembled_layout(&source, "fresh").await,
            Err(DispatchError::NotReady { downloaded: 0, size: 0, .. })
        ));

        let waiter = {
            let source = source.clone();
            tokio::spawn(async move { wait_for_download(&source, "fresh", FAST, None).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        source.update("fresh", |d| {
            d.header_loaded = true;
            d.size = 100;
            d.files = vec![BagFile { index: 0, name: "a".into(), size: 100 }];
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        source.complete("fresh");
        assert_eq!(waiter.await.unwrap().unwrap().size, 100);
    }

    #[tokio::test]
    async fn test_single_shot_checks() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");
        assert!(!download_succeeded(&source, "bag").await.unwrap());
        assert!(!header_succeeded(&source, "bag").await.unwrap());

        source.complete("bag");
        assert!(download_succeeded(&source, "bag").await.unwrap());
        assert!(header_succeeded(&source, "bag").await.unwrap());
    }

    #[tokio::test]
    async fn test_assembled_layout_not_ready() {
        let source = MemoryBagSource::new();
        pending_bag(&source, "bag");
        match assembled_layout(&source, "bag").await {
            Err(DispatchError::NotReady { downloaded, size, .. }) => {
                assert_eq!(downloaded, 0);
                assert_eq!(size, 100);
            }
            other => panic!("expected NotReady, got {:?}", other),
        }

        source.complete("bag");
        let layout = assembled_layout(&source, "bag").await.unwrap();
        assert_eq!(layout.total_size(), 100);
    }

    #[tokio::test]
    async fn test_unknown_bag_is_source_error() {
        let source = MemoryBagSource::new();
        assert!(matches!(
            wait_for_download(&source, "nope", FAST, None).await,
            Err(DispatchError::Source(_))
        ));
    }
}
