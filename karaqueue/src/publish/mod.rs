//! Publisher: places finished media into the served directory.
//!
//! Layout per item:
//!
//! ```text
//! <serving_dir>/<item_id>/video.mp4
//! <serving_dir>/<item_id>/thumb.jpg   (optional)
//! <serving_dir>/<item_id>/index.html
//! ```
//!
//! Each file is written under a hidden staging name and renamed into place,
//! and `index.html` is written last. Once `publish` returns, the external file
//! server only ever sees complete files.

mod html;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{ItemId, PublishedMedia};
use crate::transform::TransformOutput;
use crate::utils::fs::{copy_atomic, ensure_dir_all, remove_dir_if_exists, write_atomic};
use crate::{Error, Result};

pub use html::{EmbedCard, escape_attr, render as render_html};

pub const MEDIA_FILE: &str = "video.mp4";
pub const THUMBNAIL_FILE: &str = "thumb.jpg";
pub const HTML_FILE: &str = "index.html";

const CACHE_BUSTER_LEN: usize = 8;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub serving_dir: PathBuf,
    /// Public URL the serving directory is reachable under.
    pub public_base_url: Url,
}

/// Random letters appended to served URLs so the embedding client's crawler
/// never reuses a cached card.
fn cache_buster() -> String {
    rand::random::<[u8; CACHE_BUSTER_LEN]>()
        .iter()
        .map(|b| LETTERS[*b as usize % LETTERS.len()] as char)
        .collect()
}

pub struct Publisher {
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self { config }
    }

    pub fn serving_dir(&self) -> &Path {
        &self.config.serving_dir
    }

    pub fn item_dir(&self, id: ItemId) -> PathBuf {
        self.config.serving_dir.join(id.to_string())
    }

    fn base_url(&self) -> &str {
        self.config.public_base_url.as_str().trim_end_matches('/')
    }

    fn file_url(&self, id: ItemId, file: &str) -> String {
        format!("{}/{}/{}", self.base_url(), id, file)
    }

    /// URL handed to users: the item's wrapper page plus a cache buster.
    pub fn served_url(&self, id: ItemId) -> String {
        format!("{}/{}/?{}", self.base_url(), id, cache_buster())
    }

    /// Publish a transform output for `id`. On failure nothing is left behind.
    pub async fn publish(
        &self,
        id: ItemId,
        title: &str,
        output: &TransformOutput,
    ) -> Result<PublishedMedia> {
        let dir = self.item_dir(id);
        // A directory left over from an earlier process run would be served
        // under the same id.
        remove_dir_if_exists(&dir).await.map_err(into_publish)?;
        ensure_dir_all(&dir).await.map_err(into_publish)?;

        match self.write_files(id, title, output, &dir).await {
            Ok(published) => {
                info!(
                    item_id = %id,
                    dir = %dir.display(),
                    served_url = %published.served_url,
                    "Item published"
                );
                Ok(published)
            }
            Err(e) => {
                if let Err(cleanup) = remove_dir_if_exists(&dir).await {
                    warn!(item_id = %id, "Failed to clean up partial publish: {}", cleanup);
                }
                Err(into_publish(e))
            }
        }
    }

    async fn write_files(
        &self,
        id: ItemId,
        title: &str,
        output: &TransformOutput,
        dir: &Path,
    ) -> Result<PublishedMedia> {
        let media_path = dir.join(MEDIA_FILE);
        let bytes = copy_atomic(&output.media_path, &media_path).await?;
        debug!(item_id = %id, bytes, "Media file written");

        let mut image_url = None;
        if let Some(thumb) = &output.thumbnail_path {
            match copy_atomic(thumb, &dir.join(THUMBNAIL_FILE)).await {
                Ok(_) => image_url = Some(self.file_url(id, THUMBNAIL_FILE)),
                Err(e) => warn!(item_id = %id, "Skipping thumbnail: {}", e),
            }
        }

        let video_url = self.file_url(id, MEDIA_FILE);
        let html = html::render(&EmbedCard {
            title,
            video_url: &video_url,
            image_url: image_url.as_deref(),
            width: output.probe.width,
            height: output.probe.height,
            duration_secs: output.probe.duration_secs,
        });
        let html_path = dir.join(HTML_FILE);
        write_atomic(&html_path, html).await?;

        Ok(PublishedMedia {
            dir: dir.to_path_buf(),
            media_path,
            html_path,
            served_url: self.served_url(id),
            duration_secs: output.probe.duration_secs,
        })
    }

    /// Delete an evicted item's files. Failures are logged, never escalated.
    pub async fn cleanup(&self, id: ItemId) {
        let dir = self.item_dir(id);
        match remove_dir_if_exists(&dir).await {
            Ok(true) => debug!(item_id = %id, "Published files removed"),
            Ok(false) => {}
            Err(e) => warn!(item_id = %id, "Failed to remove published files: {}", e),
        }
    }

    /// Remove item directories left behind by a previous run. Only
    /// directories named like item ids are touched.
    pub async fn purge_stale(&self) -> Result<usize> {
        let dir = &self.config.serving_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io_path("reading directory", dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_path("reading directory", dir, e))?
        {
            let is_item_dir = entry.file_name().to_str().is_some_and(|name| {
                !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
            });
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if is_item_dir && is_dir && remove_dir_if_exists(&entry.path()).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, dir = %dir.display(), "Removed stale published items");
        }
        Ok(removed)
    }
}

fn into_publish(err: Error) -> Error {
    match err {
        Error::Publish(_) => err,
        other => Error::Publish(other.to_string()),
    }
}
