//! Post records and the mapping from the listing JSON returned by `<post-url>.json`.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ScrapeError};
use crate::media::{MediaAsset, MediaKind};

static FILE_EXTENSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[a-zA-Z0-9]+$").unwrap());

const EXTERNAL_PREVIEW_PREFIX: &str = "https://external-preview";
const REMOVED_MARKERS: &[&str] = &["[removed]", "[deleted]"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(skip)]
    pub media: Vec<MediaAsset>,
    pub external_url: Option<String>,
    pub up_votes: u64,
    pub down_votes: u64,
    pub comments: u64,
    pub is_over_18: bool,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPost {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub subreddit_name_prefixed: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub ups: Option<i64>,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub num_comments: Option<u64>,
    #[serde(default)]
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub over_18: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub removed_by_category: Option<String>,
    #[serde(default)]
    pub preview: Option<Preview>,
    #[serde(default)]
    pub media_metadata: Option<HashMap<String, MediaMetadata>>,
    #[serde(default)]
    pub gallery_data: Option<GalleryData>,
    #[serde(default)]
    pub secure_media: Option<SecureMedia>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Preview {
    #[serde(default)]
    pub images: Vec<PreviewImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewImage {
    pub source: ImageSource,
    #[serde(default)]
    pub variants: Option<ImageVariants>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageSource {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageVariants {
    #[serde(default)]
    pub gif: Option<ImageVariant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageVariant {
    pub source: ImageSource,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaMetadata {
    /// `Image` or `AnimatedImage`.
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub s: Option<MetadataSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataSource {
    #[serde(default)]
    pub u: Option<String>,
    #[serde(default)]
    pub gif: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryData {
    #[serde(default)]
    pub items: Vec<GalleryItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryItem {
    pub media_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecureMedia {
    #[serde(default)]
    pub reddit_video: Option<RedditVideo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedditVideo {
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default)]
    pub is_gif: Option<bool>,
}

/// A still or animated image to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    pub kind: MediaKind,
}

/// Query strings in listing JSON come HTML-escaped; `amp;` has to go before fetching.
pub fn clean_url(url: &str) -> String {
    url.replace("amp;", "")
}

/// Pull the post object out of `[listing, comments]`, failing with `NotFound` or `Deleted`.
pub fn extract_raw_post(listing: &Value, url: &str) -> Result<RawPost> {
    let data = listing
        .get(0)
        .and_then(|l| l.get("data"))
        .and_then(|d| d.get("children"))
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("data"))
        .ok_or_else(|| ScrapeError::NotFound {
            url: url.to_string(),
        })?;

    let raw: RawPost = serde_json::from_value(data.clone())?;
    if raw.is_removed() {
        return Err(ScrapeError::Deleted {
            url: url.to_string(),
        });
    }
    Ok(raw)
}

impl RawPost {
    pub fn is_removed(&self) -> bool {
        if self.removed_by_category.is_some() {
            return true;
        }
        let untitled = self.title.as_deref().is_none_or(|t| t.trim().is_empty());
        let marked = [self.selftext.as_deref(), self.author.as_deref()]
            .into_iter()
            .flatten()
            .any(|s| REMOVED_MARKERS.contains(&s.trim()));
        untitled && marked
    }

    pub fn down_votes(&self) -> u64 {
        let ups = self.ups.unwrap_or(0);
        if ups <= 0 {
            return 0;
        }
        let ratio = self.upvote_ratio.unwrap_or(1.0);
        ((1.0 - ratio) * ups as f64).ceil().max(0.0) as u64
    }

    /// Images from `preview` followed by `media_metadata`, in fetch order.
    pub fn image_refs(&self) -> Vec<ImageRef> {
        let mut refs = Vec::new();

        if let Some(preview) = &self.preview {
            for image in &preview.images {
                let mut url = image.source.url.clone();
                let mut kind = MediaKind::Image;

                if url.contains(".gif")
                    && url.contains("?format=png")
                    && let Some(gif) = image.variants.as_ref().and_then(|v| v.gif.as_ref())
                    && !gif.source.url.is_empty()
                {
                    url = gif.source.url.clone();
                    kind = MediaKind::Gif;
                }

                if url.is_empty() || url.starts_with(EXTERNAL_PREVIEW_PREFIX) {
                    continue;
                }
                refs.push(ImageRef {
                    url: clean_url(&url),
                    kind,
                });
            }
        }

        if let Some(metadata) = &self.media_metadata {
            for id in self.metadata_order(metadata) {
                let Some(media) = metadata.get(id) else {
                    continue;
                };
                let kind = if media.e.as_deref() == Some("Image") {
                    MediaKind::Image
                } else {
                    MediaKind::Gif
                };
                let Some(url) = media
                    .s
                    .as_ref()
                    .and_then(|s| s.u.as_deref().or(s.gif.as_deref()))
                else {
                    continue;
                };
                refs.push(ImageRef {
                    url: clean_url(url),
                    kind,
                });
            }
        }

        refs
    }

    /// Gallery order when the post has one, otherwise sorted ids for stable output.
    fn metadata_order<'a>(&'a self, metadata: &'a HashMap<String, MediaMetadata>) -> Vec<&'a str> {
        if let Some(gallery) = &self.gallery_data
            && !gallery.items.is_empty()
        {
            return gallery.items.iter().map(|i| i.media_id.as_str()).collect();
        }
        let mut ids: Vec<&str> = metadata.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Base media URL and silent-clip flag, when the post hosts a DASH video.
    pub fn hosted_video(&self) -> Option<(&str, bool)> {
        let video = self.secure_media.as_ref()?.reddit_video.as_ref()?;
        video.fallback_url.as_ref()?;
        let base = self.url.as_deref()?;
        Some((base, video.is_gif.unwrap_or(false)))
    }

    /// `url` when it points off-site: no file extension, not a gallery, not the subreddit.
    pub fn external_url(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        if FILE_EXTENSION_REGEX.is_match(url) || url.contains("/gallery") {
            return None;
        }
        if let Some(subreddit) = self.subreddit.as_deref()
            && url.contains(subreddit)
        {
            return None;
        }
        Some(url.to_string())
    }

    /// Build the post record. `video_consumed_url` hides `url` from the external link
    /// once it has been used as a video base.
    pub fn into_post(self, media: Vec<MediaAsset>, video_consumed_url: bool) -> Post {
        let external_url = if video_consumed_url {
            None
        } else {
            self.external_url()
        };
        let down_votes = self.down_votes();
        let posted_at = self
            .created_utc
            .and_then(|ts| DateTime::from_timestamp(ts as i64, 0));

        Post {
            author: self.author.filter(|a| !a.is_empty()),
            subreddit: self.subreddit_name_prefixed,
            title: self.title.map(|t| t.trim().to_string()),
            description: self
                .selftext
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            media,
            external_url,
            up_votes: self.ups.unwrap_or(0).max(0) as u64,
            down_votes,
            comments: self.num_comments.unwrap_or(0),
            is_over_18: self.over_18.unwrap_or(false),
            posted_at,
        }
    }
}
