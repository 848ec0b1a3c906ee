//! Content hashing for bundle requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::errors::SyncResult;
use crate::host::Host;

/// Hash/content collaborator used while building bundles.
pub trait ContentHashes<H: Host>: Send + Sync {
    fn hash(&self, file: &H::File) -> SyncResult<String>;

    fn content(&self, file: &H::File) -> SyncResult<String>;

    /// Drop whatever is memoized for `file`.
    fn forget_file(&self, file: &H::File);

    fn forget_project(&self, project: &H::Project);
}

/// SHA-256 hex digest of `content`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct HashedContent {
    hash: String,
    content: String,
}

/// Default [`ContentHashes`]: reads content through the host and memoizes
/// `(hash, content)` per file until told to forget it.
pub struct HashCache<H: Host> {
    host: Arc<H>,
    entries: Mutex<HashMap<H::File, Arc<HashedContent>>>,
}

impl<H: Host> HashCache<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn entry(&self, file: &H::File) -> SyncResult<Arc<HashedContent>> {
        if let Some(entry) = self.entries.lock().get(file) {
            return Ok(Arc::clone(entry));
        }
        // Read outside the lock; a racing reader at worst hashes twice.
        let content = self.host.file_content(file)?;
        let entry = Arc::new(HashedContent {
            hash: content_hash(&content),
            content,
        });
        self.entries.lock().insert(file.clone(), Arc::clone(&entry));
        Ok(entry)
    }
}

impl<H: Host> ContentHashes<H> for HashCache<H> {
    fn hash(&self, file: &H::File) -> SyncResult<String> {
        Ok(self.entry(file)?.hash.clone())
    }

    fn content(&self, file: &H::File) -> SyncResult<String> {
        Ok(self.entry(file)?.content.clone())
    }

    fn forget_file(&self, file: &H::File) {
        self.entries.lock().remove(file);
    }

    fn forget_project(&self, project: &H::Project) {
        let host = &self.host;
        self.entries
            .lock()
            .retain(|file, _| host.project_of(file) != *project);
    }
}
