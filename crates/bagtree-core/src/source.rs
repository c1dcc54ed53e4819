//! Boundary to the storage node that creates and assembles bags
//!
//! The node is an external service; this crate only needs three calls from
//! it. `bagtree-client` implements them over HTTP, `MemoryBagSource` keeps
//! everything in memory for tests and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::chunker::{BagFile, BagLayout};

/// Default directory the node downloads bags into
pub const DEFAULT_DOWNLOAD_PATH: &str = "/root/downloads";

/// Peer entry reported by the node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BagPeer {
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub upload_speed: u64,
    #[serde(default)]
    pub download_speed: u64,
}

/// Bag status as reported by the node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BagDetails {
    pub bag_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub downloaded: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_speed: u64,
    #[serde(default)]
    pub upload_speed: u64,
    #[serde(default)]
    pub files_count: u64,
    #[serde(default)]
    pub dir_name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub header_loaded: bool,
    #[serde(default)]
    pub info_loaded: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub seeding: bool,
    #[serde(default)]
    pub piece_size: u64,
    #[serde(default)]
    pub bag_size: u64,
    #[serde(default)]
    pub merkle_hash: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub files: Vec<BagFile>,
    #[serde(default)]
    pub peers: Vec<BagPeer>,
}

impl BagDetails {
    /// Header known and every byte of the bag on disk
    ///
    /// A bag the node has only just been told about reports zero size and
    /// zero bytes; without the header that is not an empty bag.
    pub fn is_downloaded(&self) -> bool {
        self.header_loaded && self.downloaded == self.size
    }

    /// Directory holding the assembled files
    pub fn content_dir(&self) -> PathBuf {
        PathBuf::from(&self.path).join(&self.dir_name)
    }

    /// Chunking layout of the assembled bag
    pub fn layout(&self) -> BagLayout {
        BagLayout::new(self.content_dir(), self.files.clone())
    }

    /// Indices of every file in the bag
    pub fn file_indices(&self) -> Vec<u32> {
        self.files.iter().map(|f| f.index).collect()
    }
}

/// Request to start (or widen) a bag download on the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddBagRequest {
    pub bag_id: String,
    pub path: String,
    pub files: Vec<u32>,
    /// Spelled the way the node's API expects it
    #[serde(rename = "donwload_all")]
    pub download_all: bool,
}

impl AddBagRequest {
    /// Header-only request, the node fetches the bag header first
    pub fn new(bag_id: impl Into<String>) -> Self {
        Self {
            bag_id: bag_id.into(),
            path: DEFAULT_DOWNLOAD_PATH.to_string(),
            files: vec![],
            download_all: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Ask for every listed file
    pub fn with_files(mut self, files: Vec<u32>) -> Self {
        self.files = files;
        self.download_all = true;
        self
    }
}

/// Source error type
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Bag not found: {0}")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Source error: {0}")]
    Other(String),
}

/// Storage node operations the engine depends on
#[async_trait]
pub trait BagSource: Send + Sync {
    /// Register a local path as a new bag, returning its id
    async fn create_bag(&self, path: &str, description: Option<&str>) -> Result<String, SourceError>;

    /// Current status of a bag
    async fn bag_details(&self, bag_id: &str) -> Result<BagDetails, SourceError>;

    /// Start or extend a download
    async fn add_bag(&self, request: &AddBagRequest) -> Result<(), SourceError>;
}

#[derive(Debug, Default)]
struct MemorySourceInner {
    bags: HashMap<String, BagDetails>,
    added: Vec<AddBagRequest>,
    next_id: u64,
}

/// In-memory bag source
/// Useful for testing and for chunking bags already on local disk
#[derive(Debug, Clone, Default)]
pub struct MemoryBagSource {
    inner: Arc<RwLock<MemorySourceInner>>,
    detail_calls: Arc<AtomicUsize>,
}

impl MemoryBagSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a bag
    pub fn insert(&self, details: BagDetails) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.bags.insert(details.bag_id.clone(), details);
    }

    /// Insert a fully assembled bag for the given layout
    pub fn insert_assembled(&self, bag_id: &str, layout: &BagLayout) {
        let size = layout.total_size();
        let root = layout.root.to_string_lossy().into_owned();
        self.insert(BagDetails {
            bag_id: bag_id.to_string(),
            downloaded: size,
            size,
            files_count: layout.files.len() as u64,
            completed: true,
            header_loaded: true,
            info_loaded: true,
            path: root,
            files: layout.files.clone(),
            ..Default::default()
        });
    }

    /// Mutate a stored bag in place; returns false if unknown
    pub fn update<F: FnOnce(&mut BagDetails)>(&self, bag_id: &str, f: F) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.bags.get_mut(bag_id) {
            Some(details) => {
                f(details);
                true
            }
            None => false,
        }
    }

    /// Mark every byte of a bag as downloaded
    pub fn complete(&self, bag_id: &str) -> bool {
        self.update(bag_id, |d| {
            d.header_loaded = true;
            d.downloaded = d.size;
            d.completed = true;
        })
    }

    /// Add requests received so far
    pub fn add_requests(&self) -> Vec<AddBagRequest> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .added
            .clone()
    }

    /// Number of status queries served
    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BagSource for MemoryBagSource {
    async fn create_bag(&self, path: &str, description: Option<&str>) -> Result<String, SourceError> {
        let path_buf = PathBuf::from(path);
        let layout = if path_buf.is_dir() {
            BagLayout::from_dir(&path_buf)
        } else {
            BagLayout::single_file(&path_buf)
        }
        .map_err(|e| SourceError::Other(e.to_string()))?;

        let bag_id = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.next_id += 1;
            format!("{:064x}", inner.next_id)
        };
        self.insert_assembled(&bag_id, &layout);
        self.update(&bag_id, |d| {
            d.description = description.unwrap_or_default().to_string();
        });
        Ok(bag_id)
    }

    async fn bag_details(&self, bag_id: &str) -> Result<BagDetails, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .bags
            .get(bag_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(bag_id.to_string()))
    }

    async fn add_bag(&self, request: &AddBagRequest) -> Result<(), SourceError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.added.push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_details_deserialize_node_payload() {
        let json = r#"{
            "bag_id": "ab",
            "description": "photo.jpg",
            "downloaded": 10,
            "size": 10,
            "dir_name": "bag",
            "header_loaded": true,
            "path": "/data",
            "files": [{"index": 0, "name": "photo.jpg", "size": 10}],
            "peers": [{"addr": "1.2.3.4:5", "id": "p", "upload_speed": 1, "download_speed": 2}]
        }"#;
        let details: BagDetails = serde_json::from_str(json).unwrap();
        assert!(details.is_downloaded());
        assert_eq!(details.content_dir(), PathBuf::from("/data/bag"));
        assert_eq!(details.layout().total_size(), 10);
        assert_eq!(details.peers.len(), 1);
    }

    #[test]
    fn test_add_request_wire_name() {
        let req = AddBagRequest::new("ab").with_files(vec![0, 1]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["donwload_all"], serde_json::json!(true));
        assert_eq!(json["path"], serde_json::json!(DEFAULT_DOWNLOAD_PATH));
        assert_eq!(json["files"], serde_json::json!([0, 1]));
    }

    #[tokio::test]
    async fn test_memory_source_create_and_query() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let source = MemoryBagSource::new();
        let bag_id = source
            .create_bag(file.to_str().unwrap(), Some("greeting"))
            .await
            .unwrap();
        assert_eq!(bag_id.len(), 64);

        let details = source.bag_details(&bag_id).await.unwrap();
        assert!(details.is_downloaded());
        assert_eq!(details.size, 5);
        assert_eq!(details.description, "greeting");
        assert_eq!(source.detail_calls(), 1);
    }

    #[test]
    fn test_fresh_bag_is_not_downloaded() {
        let fresh = BagDetails { bag_id: "fresh".into(), ..Default::default() };
        assert_eq!(fresh.downloaded, fresh.size);
        assert!(!fresh.is_downloaded());

        let empty = BagDetails { header_loaded: true, ..fresh };
        assert!(empty.is_downloaded());
    }

    #[tokio::test]
    async fn test_memory_source_unknown_bag() {
        let source = MemoryBagSource::new();
        assert!(matches!(
            source.bag_details("missing").await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_source_records_add() {
        let source = MemoryBagSource::new();
        source.add_bag(&AddBagRequest::new("x")).await.unwrap();
        assert_eq!(source.add_requests(), vec![AddBagRequest::new("x")]);
    }
}
