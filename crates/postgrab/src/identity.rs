//! Single-use client identities.
//!
//! Every physical request gets a fresh cookie jar seeded only with the account
//! cookie and a randomly picked user agent. Whatever the server sets during that
//! request (including across redirects) dies with the identity, so nothing the
//! upstream learns about one request is replayed on the next.

use std::sync::Arc;

use rand::RngExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderMap;
use tracing::debug;
use url::Url;

/// Split a `name=value; name2=value2` string into pairs, skipping malformed parts.
pub fn parse_cookie_pairs(cookie_string: &str) -> Vec<(&str, &str)> {
    cookie_string
        .split(&[';', '\n'][..])
        .map(str::trim)
        .filter_map(|part| part.split_once('='))
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .collect()
}

#[derive(Debug)]
pub struct Identity {
    jar: Arc<Jar>,
    user_agent: String,
    seeded: usize,
}

impl Identity {
    /// Create an identity for one request to `url`.
    pub fn fresh(account_cookie: &str, user_agents: &[String], url: &Url) -> Self {
        let jar = Jar::default();
        let pairs = parse_cookie_pairs(account_cookie);
        for (name, value) in &pairs {
            jar.add_cookie_str(&format!("{name}={value}; Path=/"), url);
        }

        let user_agent = match user_agents.len() {
            0 => crate::config::DEFAULT_USER_AGENTS[0].to_string(),
            1 => user_agents[0].clone(),
            n => user_agents[rand::rng().random_range(0..n)].clone(),
        };

        Self {
            jar: Arc::new(jar),
            user_agent,
            seeded: pairs.len(),
        }
    }

    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Cookie header this identity would currently send to `url`.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_owned))
    }

    /// Drop the identity after a response, noting how much session state was thrown away.
    pub fn discard(self, response_headers: Option<&HeaderMap>) {
        let rejected = response_headers
            .map(|headers| headers.get_all(reqwest::header::SET_COOKIE).iter().count())
            .unwrap_or(0);
        if rejected > 0 {
            debug!(
                rejected,
                seeded = self.seeded,
                "Discarding identity along with server-set cookies"
            );
        }
    }
}
