//! Rebuilds a playable video from a post's DASH streams.
//!
//! The manifest names separate video and audio files. When both exist they are
//! downloaded side by side and handed to the [`Muxer`]; silent clips are taken as
//! they are. Every file written along the way lives in a [`TransientFiles`] scope
//! that is released before `assemble` returns, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};
use crate::fetch::FetchClient;
use crate::manifest::{self, MANIFEST_FILE, StreamAssets, join_location};
use crate::media::{MediaAsset, MediaKind};
use crate::mux::Muxer;
use crate::transient::{TransientFiles, sanitize_file_name};

#[derive(Clone)]
pub struct MediaAssembler {
    client: FetchClient,
    muxer: Arc<dyn Muxer>,
    work_dir: PathBuf,
}

impl MediaAssembler {
    pub fn new(client: FetchClient, muxer: Arc<dyn Muxer>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            muxer,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Create the work directory. Failure only costs the video being assembled.
    pub async fn ensure_work_dir(&self, base_url: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            ScrapeError::stream_download(
                base_url,
                format!("cannot create work directory {}: {e}", self.work_dir.display()),
            )
        })
    }

    /// Fetch `<base>/DASHPlaylist.mpd` and resolve its stream locations.
    pub async fn resolve_streams(&self, base_url: &str) -> Result<StreamAssets> {
        let manifest_url = join_location(base_url, MANIFEST_FILE);
        let xml = self
            .client
            .fetch_text(&manifest_url)
            .await
            .map_err(|e| ScrapeError::manifest_unavailable(&manifest_url, e))?;
        let manifest = manifest::parse_manifest(&xml)?;
        let assets = manifest::resolve(&manifest)?;
        debug!(%manifest_url, video = %assets.video, audio = %assets.audio, "Resolved DASH streams");
        Ok(assets)
    }

    /// Produce the video asset for a post, or `None` for a video-only clip that
    /// is not flagged as silent.
    pub async fn assemble(
        &self,
        base_url: &str,
        is_silent_clip: bool,
    ) -> Result<Option<MediaAsset>> {
        let assets = self.resolve_streams(base_url).await?;
        if !assets.has_video() {
            return Err(ScrapeError::manifest_malformed(
                "manifest lists no video/mp4 stream",
            ));
        }

        if assets.has_audio() {
            self.ensure_work_dir(base_url).await?;
            self.assemble_with_audio(base_url, &assets).await.map(Some)
        } else if is_silent_clip {
            self.ensure_work_dir(base_url).await?;
            self.assemble_silent(base_url, &assets).await.map(Some)
        } else {
            debug!(base_url, "Video has no audio stream and is not a silent clip; skipping");
            Ok(None)
        }
    }

    async fn assemble_with_audio(&self, base_url: &str, assets: &StreamAssets) -> Result<MediaAsset> {
        let mut files = TransientFiles::new(&self.work_dir);
        let video_path = files.reserve(&format!("video_{}", sanitize_file_name(&assets.video)));
        let audio_path = files.reserve(&format!("audio_{}", sanitize_file_name(&assets.audio)));
        let combined_path = files.reserve("combined.mp4");

        let video_url = join_location(base_url, &assets.video);
        let audio_url = join_location(base_url, &assets.audio);

        let result: Result<MediaAsset> = async {
            let (video, audio) = tokio::join!(
                self.download(&video_url, &video_path),
                self.download(&audio_url, &audio_path),
            );
            video?;
            audio?;

            self.muxer
                .mux(&video_path, &audio_path, &combined_path)
                .await
                .map_err(|e| match e {
                    ScrapeError::MuxFailed { .. } => e,
                    other => ScrapeError::mux_failed(other.to_string()),
                })?;

            let bytes = read_output(&combined_path).await?;
            info!(base_url, bytes = bytes.len(), "Assembled video with audio");
            Ok(MediaAsset::new(MediaKind::Video, bytes))
        }
        .await;

        files.release().await;
        result
    }

    async fn assemble_silent(&self, base_url: &str, assets: &StreamAssets) -> Result<MediaAsset> {
        let mut files = TransientFiles::new(&self.work_dir);
        let video_path = files.reserve(&format!("video_{}", sanitize_file_name(&assets.video)));
        let video_url = join_location(base_url, &assets.video);

        let result: Result<MediaAsset> = async {
            self.download(&video_url, &video_path).await?;
            let bytes = read_output(&video_path).await?;
            info!(base_url, bytes = bytes.len(), "Fetched silent clip");
            Ok(MediaAsset::new(MediaKind::Video, bytes))
        }
        .await;

        files.release().await;
        result
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        self.client
            .download_to(url, dest)
            .await
            .map_err(|e| ScrapeError::stream_download(url, e))
    }
}

async fn read_output(path: &Path) -> Result<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| ScrapeError::mux_failed(format!("cannot read {}: {e}", path.display())))
}
