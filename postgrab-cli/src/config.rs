use std::path::{Path, PathBuf};
use std::time::Duration;

use postgrab::{AudioCodec, MuxConfig, ProxyConfig, ProxyType, ScraperConfig, VideoCodec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cookie: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub proxy: Option<ProxySettings>,
    pub mux: MuxSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub url: String,
    #[serde(rename = "type")]
    pub proxy_type: Option<ProxyType>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Route every request through the proxy.
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxSettings {
    pub ffmpeg: Option<PathBuf>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cookie: None,
            work_dir: None,
            concurrency: 4,
            timeout_secs: 60,
            proxy: None,
            mux: MuxSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("postgrab").join("config.toml"))
    }

    /// Load `path`, or the default location. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// TOML rendering with credentials hidden.
    pub fn show(&self) -> Result<String> {
        let mut redacted = self.clone();
        if redacted.cookie.is_some() {
            redacted.cookie = Some(REDACTED.to_string());
        }
        if let Some(proxy) = redacted.proxy.as_mut()
            && proxy.password.is_some()
        {
            proxy.password = Some(REDACTED.to_string());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }

    /// Merge command-line overrides into the scraper configuration.
    pub fn to_scraper_config(&self, args: &Args) -> Result<ScraperConfig> {
        let cookie = args
            .cookie
            .clone()
            .or_else(|| self.cookie.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(
                    "no account cookie: pass --cookie, set POSTGRAB_COOKIE or add `cookie` to the config file"
                        .to_string(),
                )
            })?;

        let work_dir = args
            .work_dir
            .clone()
            .or_else(|| self.work_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("postgrab"));

        let mut config = ScraperConfig::new(cookie)
            .with_work_dir(work_dir)
            .with_timeout(Duration::from_secs(args.timeout.unwrap_or(self.timeout_secs)))
            .with_mux(self.mux_config(args));

        if let Some(proxy) = self.proxy_config(args)? {
            config = config.with_proxy(proxy);
        }
        let force = args.force_proxy || self.proxy.as_ref().is_some_and(|p| p.force);
        Ok(config.with_force_proxy(force))
    }

    fn proxy_config(&self, args: &Args) -> Result<Option<ProxyConfig>> {
        let file = self.proxy.as_ref();
        let Some(address) = args
            .proxy
            .clone()
            .or_else(|| file.map(|p| p.url.clone()))
            .filter(|a| !a.trim().is_empty())
        else {
            return Ok(None);
        };

        let default_type = args
            .proxy_type
            .map(ProxyType::from)
            .or_else(|| file.and_then(|p| p.proxy_type))
            .unwrap_or_default();
        let mut proxy = ProxyConfig::parse(address.trim(), default_type)?;

        let username = args
            .proxy_username
            .clone()
            .or_else(|| file.and_then(|p| p.username.clone()));
        let password = args
            .proxy_password
            .clone()
            .or_else(|| file.and_then(|p| p.password.clone()));
        match (username, password) {
            (Some(username), Some(password)) => proxy = proxy.with_auth(username, password),
            (None, None) => {}
            _ => {
                return Err(AppError::Config(
                    "proxy username and password must be given together".to_string(),
                ));
            }
        }
        Ok(Some(proxy))
    }

    fn mux_config(&self, args: &Args) -> MuxConfig {
        let mut mux = MuxConfig::default();
        if let Some(ffmpeg) = args.ffmpeg.clone().or_else(|| self.mux.ffmpeg.clone()) {
            mux.ffmpeg_path = ffmpeg;
        }
        if let Some(codec) = &self.mux.video_codec {
            mux.video_codec = parse_video_codec(codec);
        }
        if let Some(codec) = &self.mux.audio_codec {
            mux.audio_codec = parse_audio_codec(codec);
        }
        mux
    }
}

fn parse_video_codec(name: &str) -> VideoCodec {
    match name.trim().to_ascii_lowercase().as_str() {
        "copy" => VideoCodec::Copy,
        "h264" | "libx264" => VideoCodec::H264,
        other => VideoCodec::Custom(other.to_string()),
    }
}

fn parse_audio_codec(name: &str) -> AudioCodec {
    match name.trim().to_ascii_lowercase().as_str() {
        "copy" => AudioCodec::Copy,
        "aac" => AudioCodec::Aac,
        other => AudioCodec::Custom(other.to_string()),
    }
}
