//! Attachment download and local storage
//!
//! Slack attachments are pulled down into a designated downloads directory
//! before dispatch. Candidate file names are disambiguated against both the
//! disk and a pending-download set, so two concurrent downloads can never
//! collide on the same local path. A failed download degrades to a
//! descriptor marked `failed`; it never aborts the message being mirrored.

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Max attempts at finding an unoccupied name for one download.
const NAME_ITERATOR_LIMIT: u32 = 200;

/// Outcome of fetching one Slack file to local storage.
#[derive(Debug, Clone)]
pub struct Download {
    /// The (possibly disambiguated) name the file is stored under
    pub stored_as: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub failed: bool,
}

/// Manager for the downloads directory.
pub struct FileStore {
    downloads_dir: PathBuf,
    token: String,
    client: reqwest::Client,
    /// Public base URL of the file server, when re-hosting is enabled
    public_base: Option<String>,
    /// Never delete stored files, even after inline delivery
    keep_files: bool,
    /// Paths claimed by in-flight downloads
    pending: Mutex<HashSet<PathBuf>>,
}

impl FileStore {
    pub fn new(
        downloads_dir: PathBuf,
        token: String,
        public_base: Option<String>,
        keep_files: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(&downloads_dir).with_context(|| {
            format!("Failed to create downloads directory {:?}", downloads_dir)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client for downloads")?;
        Ok(Self {
            downloads_dir,
            token,
            client,
            public_base,
            keep_files,
            pending: Mutex::new(HashSet::new()),
        })
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Download one Slack file. The descriptor always comes back; a failure
    /// is reflected in its `failed` flag rather than an error.
    pub async fn download(&self, file_name: &str, url: &str) -> Download {
        let stored_as = match self.reserve_name(file_name) {
            Ok(name) => name,
            Err(e) => {
                warn!("Could not reserve a local name for {}: {:#}", file_name, e);
                return Download {
                    stored_as: file_name.to_string(),
                    path: self.downloads_dir.join(file_name),
                    size_bytes: 0,
                    failed: true,
                };
            }
        };
        let path = self.downloads_dir.join(&stored_as);

        let result = self.fetch_to(&path, url).await;
        self.release(&path);

        match result {
            Ok(size_bytes) => {
                info!("Saved {} ({} bytes) from Slack", stored_as, size_bytes);
                Download {
                    stored_as,
                    path,
                    size_bytes,
                    failed: false,
                }
            }
            Err(e) => {
                warn!("Failed to download {}: {:#}", file_name, e);
                // Leave nothing half-written behind
                let _ = std::fs::remove_file(&path);
                Download {
                    stored_as,
                    path,
                    size_bytes: 0,
                    failed: true,
                }
            }
        }
    }

    async fn fetch_to(&self, path: &Path, url: &str) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Download request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP {} from {}", response.status(), url));
        }

        let bytes = response.bytes().await.context("Download body failed")?;
        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("Could not write download to {:?}", path))?;
        Ok(bytes.len() as u64)
    }

    /// Find an unoccupied local name for a file: `image.png`, then
    /// `image (1).png` and so on. The winning path is claimed in the
    /// pending set until the download settles.
    pub fn reserve_name(&self, file_name: &str) -> Result<String> {
        // Slashes would escape the downloads directory
        let file_name = file_name.replace('/', " - ");
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
            None => (file_name.clone(), None),
        };

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| anyhow!("pending-download set poisoned"))?;

        for copy_count in 0..NAME_ITERATOR_LIMIT {
            let candidate = match (&extension, copy_count) {
                (None, 0) => stem.clone(),
                (None, n) => format!("{} ({})", stem, n),
                (Some(ext), 0) => format!("{}.{}", stem, ext),
                (Some(ext), n) => format!("{} ({}).{}", stem, n, ext),
            };
            let path = self.downloads_dir.join(&candidate);
            if !pending.contains(&path) && !path.exists() {
                pending.insert(path);
                debug!("Reserved download name {}", candidate);
                return Ok(candidate);
            }
        }

        Err(anyhow!(
            "Could not find a free name for {} after {} attempts",
            file_name,
            NAME_ITERATOR_LIMIT
        ))
    }

    fn release(&self, path: &Path) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(path);
        }
    }

    /// Public-facing URL for a stored file, if re-hosting is enabled.
    pub fn public_url(&self, stored_as: &str) -> Option<String> {
        self.public_base.as_ref().map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                urlencoding::encode(stored_as)
            )
        })
    }

    /// Delete a stored file, unless configured to keep everything.
    pub async fn delete(&self, stored_as: &str) -> Result<()> {
        if self.keep_files {
            debug!("File deletion disabled; keeping {}", stored_as);
            return Ok(());
        }
        let path = self.downloads_dir.join(stored_as);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Could not delete {:?}", path))
    }
}
