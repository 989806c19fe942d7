//! Resilient retrieval of Reddit posts and their hosted media.
//!
//! The [`Scraper`] fetches a post's listing JSON through a [`FetchClient`] that
//! rotates a disposable identity on every attempt and falls back to a routed
//! egress path while rate limited. Hosted videos are rebuilt from their DASH
//! streams by the [`MediaAssembler`].

pub mod assembly;
pub mod config;
pub mod egress;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod manifest;
pub mod media;
pub mod mux;
pub mod post;
pub mod proxy;
pub mod scraper;
pub mod transient;
pub mod transport;

pub use assembly::MediaAssembler;
pub use config::ScraperConfig;
pub use egress::{Clock, EgressController, EgressMode, ManualClock, SystemClock};
pub use error::{Result, ScrapeError};
pub use fetch::{FetchClient, RetryDecision};
pub use media::{MediaAsset, MediaKind};
pub use mux::{AudioCodec, FfmpegMuxer, MuxConfig, Muxer, VideoCodec};
pub use post::Post;
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use scraper::Scraper;
pub use transport::{AttemptFailure, FailureKind, ReqwestTransport, Transport};
