use reqwest::Proxy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

/// Scheme spoken by the routed egress path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyType {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5h",
        }
    }
}

impl std::str::FromStr for ProxyType {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" | "socks5h" | "socks" => Ok(ProxyType::Socks5),
            other => Err(ScrapeError::configuration(format!(
                "unknown proxy type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// The routed egress path used while rate limited (or always, when forced).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn new(proxy_type: ProxyType, host: impl Into<String>, port: u16) -> Self {
        Self {
            proxy_type,
            host: host.into(),
            port,
            auth: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Parse `scheme://host:port`, or a bare `host:port` using `default_type`.
    pub fn parse(input: &str, default_type: ProxyType) -> Result<Self> {
        let (proxy_type, rest) = match input.split_once("://") {
            Some((scheme, rest)) => (scheme.parse()?, rest),
            None => (default_type, input),
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ScrapeError::invalid_url(input, "proxy address must be host:port"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| ScrapeError::invalid_url(input, format!("invalid proxy port: {e}")))?;
        if host.is_empty() {
            return Err(ScrapeError::invalid_url(input, "proxy host is empty"));
        }
        Ok(Self::new(proxy_type, host, port))
    }

    /// Proxy endpoint without credentials, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.proxy_type.scheme(), self.host, self.port)
    }
}

/// Build the reqwest proxy for the routed egress path.
pub fn build_proxy(config: &ProxyConfig) -> Result<Proxy> {
    let endpoint = config.endpoint();
    let mut proxy = Proxy::all(&endpoint).map_err(|e| {
        ScrapeError::configuration(format!("invalid proxy `{endpoint}`: {e}"))
    })?;

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_port() {
        let config = ProxyConfig::parse("socks5://10.0.0.2:1080", ProxyType::Http).unwrap();
        assert_eq!(config.proxy_type, ProxyType::Socks5);
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 1080);
        assert_eq!(config.endpoint(), "socks5h://10.0.0.2:1080");
    }

    #[test]
    fn bare_address_uses_default_type() {
        let config = ProxyConfig::parse("proxy.local:12321", ProxyType::Https).unwrap();
        assert_eq!(config.proxy_type, ProxyType::Https);
        assert_eq!(config.endpoint(), "https://proxy.local:12321");
    }

    #[test]
    fn rejects_missing_port() {
        assert!(ProxyConfig::parse("proxy.local", ProxyType::Http).is_err());
        assert!(ProxyConfig::parse("http://proxy.local:notaport", ProxyType::Http).is_err());
        assert!(ProxyConfig::parse("ftp://proxy.local:21", ProxyType::Http).is_err());
    }

    #[test]
    fn builds_proxy_with_auth() {
        let config = ProxyConfig::new(ProxyType::Http, "127.0.0.1", 8080).with_auth("user", "pass");
        assert!(build_proxy(&config).is_ok());
    }
}
