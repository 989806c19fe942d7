//! Public entry point: fetch a post and everything it links to.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::assembly::MediaAssembler;
use crate::config::ScraperConfig;
use crate::egress::EgressController;
use crate::error::{Result, ScrapeError};
use crate::fetch::FetchClient;
use crate::media::MediaAsset;
use crate::mux::{FfmpegMuxer, Muxer};
use crate::post::{Post, RawPost, extract_raw_post};
use crate::proxy::build_proxy;
use crate::transport::{ReqwestTransport, Transport};

#[derive(Clone)]
pub struct Scraper {
    client: FetchClient,
    assembler: MediaAssembler,
}

impl Scraper {
    /// Build a scraper backed by reqwest and ffmpeg.
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.clone()));
        let muxer: Arc<dyn Muxer> = Arc::new(FfmpegMuxer::new(config.mux.clone()));
        let egress = EgressController::new(config.proxy_cooldown);
        Self::with_components(config, transport, muxer, egress)
    }

    /// Build a scraper over caller-supplied transport, muxer and egress controller.
    pub fn with_components(
        config: ScraperConfig,
        transport: Arc<dyn Transport>,
        muxer: Arc<dyn Muxer>,
        egress: EgressController,
    ) -> Result<Self> {
        validate(&config)?;

        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            ScrapeError::configuration(format!(
                "cannot create work directory {}: {e}",
                config.work_dir.display()
            ))
        })?;

        let client = FetchClient::new(
            transport,
            egress,
            config.max_attempts,
            config.proxy.is_some(),
            config.force_proxy,
        );
        let assembler = MediaAssembler::new(client.clone(), muxer, config.work_dir.clone());

        debug!(
            work_dir = %config.work_dir.display(),
            proxy = ?config.proxy.as_ref().map(|p| p.endpoint()),
            force_proxy = config.force_proxy,
            "Scraper initialized"
        );
        Ok(Self { client, assembler })
    }

    pub fn egress(&self) -> &EgressController {
        self.client.egress()
    }

    /// Fetch one post, its images and its hosted video.
    ///
    /// Media items that fail are logged and left out; the post itself only fails
    /// when its listing cannot be retrieved or the post is gone.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_post(&self, url: &str) -> Result<Post> {
        let listing_url = listing_url(url)?;
        let listing = self.client.fetch_json(&listing_url).await?;
        let raw = extract_raw_post(&listing, url)?;

        let mut media = self.fetch_images(&raw).await;

        let mut video_consumed_url = false;
        if let Some((base_url, is_silent_clip)) = raw.hosted_video() {
            match self.assembler.assemble(base_url, is_silent_clip).await {
                Ok(Some(asset)) => {
                    media.push(asset);
                    video_consumed_url = true;
                }
                Ok(None) => debug!(base_url, "Video-only clip without audio skipped"),
                Err(e) => {
                    warn!(base_url, error = %e, "Dropping video");
                    video_consumed_url = true;
                }
            }
        }

        let post = raw.into_post(media, video_consumed_url);
        info!(
            media = post.media.len(),
            external = post.external_url.is_some(),
            "Fetched post"
        );
        Ok(post)
    }

    /// Fetch several posts with at most `concurrency` in flight. Results keep input order.
    pub async fn fetch_posts<I, S>(&self, urls: I, concurrency: usize) -> Vec<(String, Result<Post>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        futures::stream::iter(urls.into_iter().map(Into::into))
            .map(|url: String| async move {
                let result = self.fetch_post(&url).await;
                (url, result)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn fetch_images(&self, raw: &RawPost) -> Vec<MediaAsset> {
        let mut media = Vec::new();
        for image in raw.image_refs() {
            match self.client.fetch_bytes(&image.url).await {
                Ok(bytes) => media.push(MediaAsset::new(image.kind, bytes)),
                Err(e) => {
                    warn!(url = %image.url, kind = %image.kind, error = %e, "Dropping media item")
                }
            }
        }
        media
    }
}

fn validate(config: &ScraperConfig) -> Result<()> {
    if config.cookie.trim().is_empty() {
        return Err(ScrapeError::configuration("an account cookie is required"));
    }
    if config.force_proxy && config.proxy.is_none() {
        return Err(ScrapeError::configuration(
            "force_proxy is set but no proxy is configured",
        ));
    }
    if let Some(proxy) = &config.proxy {
        build_proxy(proxy)?;
    }
    if config.user_agents.is_empty() {
        return Err(ScrapeError::configuration("at least one user agent is required"));
    }
    Ok(())
}

/// `https://host/r/x/comments/id/title/?q` becomes `https://host/r/x/comments/id/title.json?q`.
pub fn listing_url(post_url: &str) -> Result<String> {
    let mut url = Url::parse(post_url.trim())
        .map_err(|e| ScrapeError::invalid_url(post_url, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScrapeError::invalid_url(post_url, "expected an http(s) URL"));
    }
    if url.host_str().is_none() {
        return Err(ScrapeError::invalid_url(post_url, "missing host"));
    }

    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        return Err(ScrapeError::invalid_url(post_url, "missing post path"));
    }
    if !path.ends_with(".json") {
        url.set_path(&format!("{path}.json"));
    }
    url.set_fragment(None);
    Ok(url.to_string())
}
