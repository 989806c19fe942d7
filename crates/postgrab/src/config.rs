use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::mux::MuxConfig;
use crate::proxy::ProxyConfig;

/// Attempts the retrying JSON fetch makes before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How long the routed egress path stays active after the last rate-limit signal.
pub const DEFAULT_PROXY_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Browser fingerprints rotated across identities.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:130.0) Gecko/20100101 Firefox/130.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0",
];

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Account cookie string (`name=value; name2=value2`) seeded into every identity.
    pub cookie: String,

    /// Directory that holds transient downloads while a video is assembled.
    pub work_dir: PathBuf,

    /// Routed egress path, if any.
    pub proxy: Option<ProxyConfig>,

    /// Route every attempt through the proxy, regardless of rate limiting.
    pub force_proxy: bool,

    pub max_attempts: u32,

    pub proxy_cooldown: Duration,

    /// Overall timeout for a single request. Zero disables it.
    pub timeout: Duration,

    pub connect_timeout: Duration,

    pub user_agents: Vec<String>,

    /// Headers sent with every request, on top of the identity's user agent and cookies.
    pub headers: HeaderMap,

    pub mux: MuxConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            cookie: String::new(),
            work_dir: PathBuf::from("./"),
            proxy: None,
            force_proxy: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            proxy_cooldown: DEFAULT_PROXY_COOLDOWN,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            headers: ScraperConfig::default_headers(),
            mux: MuxConfig::default(),
        }
    }
}

impl ScraperConfig {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            ..Default::default()
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_force_proxy(mut self, force: bool) -> Self {
        self.force_proxy = force;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mux(mut self, mux: MuxConfig) -> Self {
        self.mux = mux;
        self
    }

    /// Navigation-like headers; `Accept-Encoding` is left to reqwest.
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-GB,en;q=0.5"),
        );
        headers.insert(
            reqwest::header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retry_contract() {
        let config = ScraperConfig::new("session=abc");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.proxy_cooldown, Duration::from_secs(300));
        assert!(!config.user_agents.is_empty());
        assert!(config.headers.contains_key(reqwest::header::ACCEPT));
        assert!(!config.headers.contains_key(reqwest::header::ACCEPT_ENCODING));
    }
}
