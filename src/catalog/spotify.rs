/// Spotify Web API catalog implementation.
use super::spotify_types::{EpisodesResponse, TokenResponse, into_page};
use super::{CatalogClient, CatalogError, EpisodePage};
use crate::config::CatalogCredentials;
use std::cell::RefCell;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// An access token together with the instant it stops being usable.
#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Owned cache for the client-credentials access token.
///
/// A token is obtained lazily on first use and reused until it is within
/// [`EXPIRY_MARGIN`] of its expiry.
#[derive(Debug, Default)]
pub struct TokenCache {
    token: RefCell<Option<AccessToken>>,
}

impl TokenCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token if it is still valid at `now`.
    fn valid_token(&self, now: Instant) -> Option<String> {
        self.token
            .borrow()
            .as_ref()
            .filter(|token| now + EXPIRY_MARGIN < token.expires_at)
            .map(|token| token.value.clone())
    }

    /// Stores a freshly issued token.
    fn store(&self, value: String, expires_in: Duration, now: Instant) {
        *self.token.borrow_mut() = Some(AccessToken {
            value,
            expires_at: now + expires_in,
        });
    }

    /// Drops the cached token, forcing a new exchange on next use.
    pub fn clear(&self) {
        self.token.borrow_mut().take();
    }
}

/// Catalog client for the Spotify Web API.
///
/// Uses the client-credentials flow and lists show episodes through
/// `GET /shows/{id}/episodes`.
pub struct SpotifyClient {
    client: reqwest::blocking::Client,
    credentials: CatalogCredentials,
    tokens: TokenCache,
    api_url: String,
    auth_url: String,
    market: String,
}

impl SpotifyClient {
    /// Creates a new Spotify client instance.
    pub fn new(credentials: CatalogCredentials, tokens: TokenCache, market: &str) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            credentials,
            tokens,
            api_url: "https://api.spotify.com/v1".to_string(),
            auth_url: "https://accounts.spotify.com/api/token".to_string(),
            market: market.to_string(),
        }
    }

    /// Returns a valid access token, exchanging credentials if needed.
    pub fn access_token(&self) -> Result<String, CatalogError> {
        if let Some(token) = self.tokens.valid_token(Instant::now()) {
            return Ok(token);
        }

        debug!("requesting new catalog access token");

        let response = self
            .client
            .post(&self.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .map_err(|e| CatalogError::AuthenticationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CatalogError::AuthenticationFailed(format!(
                "HTTP {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let token: TokenResponse = response
            .json()
            .map_err(|e| CatalogError::AuthenticationFailed(e.to_string()))?;

        self.tokens.store(
            token.access_token.clone(),
            Duration::from_secs(token.expires_in),
            Instant::now(),
        );

        Ok(token.access_token)
    }
}

impl CatalogClient for SpotifyClient {
    fn fetch_episodes(&self, show_id: &str, limit: usize) -> Result<EpisodePage, CatalogError> {
        let token = self.access_token()?;

        let url = format!("{}/shows/{}/episodes", self.api_url, show_id);
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("limit", limit.as_str()), ("market", self.market.as_str())])
            .send()
            .map_err(|e| CatalogError::RequestError(e.to_string()))?;

        if response.status() == 404 {
            return Err(CatalogError::ShowNotFound(show_id.to_string()));
        }

        if response.status() == 401 {
            // Revoked or clock-skewed token; the next call starts fresh.
            self.tokens.clear();
        }

        if !response.status().is_success() {
            return Err(CatalogError::RequestError(format!(
                "HTTP {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body: EpisodesResponse = response
            .json()
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;

        let items = body.items.ok_or_else(|| {
            CatalogError::InvalidData(format!("No items in episode listing for show {show_id}"))
        })?;

        Ok(into_page(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cache_reuses_valid_token() {
        let cache = TokenCache::new();
        let now = Instant::now();
        assert_eq!(cache.valid_token(now), None);

        cache.store("abc".to_string(), Duration::from_secs(3600), now);
        assert_eq!(cache.valid_token(now).as_deref(), Some("abc"));
    }

    #[test]
    fn test_token_cache_refreshes_before_expiry() {
        let cache = TokenCache::new();
        let now = Instant::now();

        cache.store("abc".to_string(), Duration::from_secs(3600), now);
        assert!(cache.valid_token(now + Duration::from_secs(3300)).is_none());
        assert!(cache.valid_token(now + Duration::from_secs(3200)).is_some());
    }

    #[test]
    fn test_token_cache_clear() {
        let cache = TokenCache::new();
        cache.store("abc".to_string(), Duration::from_secs(3600), Instant::now());
        cache.clear();
        assert!(cache.valid_token(Instant::now()).is_none());
    }
}
