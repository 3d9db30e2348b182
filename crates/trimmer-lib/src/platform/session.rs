//! API session and credential refresh
//!
//! Tokens are obtained from the platform's UAA with the client credentials
//! grant. A [`SessionRefresher`] re-authenticates on a fixed interval and
//! swaps the token inside a shared [`SessionHandle`]; callers read the
//! handle on every request, so in-flight calls keep the token they started
//! with and later calls pick up the new one.

use crate::config::ApiSettings;
use crate::error::{PlatformError, PlatformResult};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// How often the session is re-established
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(90 * 60);

/// Lead time before token expiry at which the session is renewed
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Delay before retrying a failed refresh
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

const MIN_REFRESH_DELAY: Duration = Duration::from_millis(100);

/// Delay until the next refresh: the interval, or earlier if the token
/// expires first
pub fn refresh_delay(interval: Duration, expires_in: Option<Duration>) -> Duration {
    let Some(ttl) = expires_in else {
        return interval;
    };
    let lead = if ttl > EXPIRY_MARGIN * 2 {
        ttl - EXPIRY_MARGIN
    } else {
        ttl / 2
    };
    lead.min(interval).max(MIN_REFRESH_DELAY)
}

/// Token issued by the UAA
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_in: Option<Duration>,
}

/// Shared, swappable bearer token
#[derive(Debug, Clone)]
pub struct SessionHandle {
    token: Arc<RwLock<String>>,
}

impl SessionHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.into())),
        }
    }

    /// Current access token
    pub async fn token(&self) -> String {
        self.token.read().await.clone()
    }

    /// Install a freshly issued token
    pub async fn replace(&self, token: String) {
        let mut current = self.token.write().await;
        *current = token;
    }
}

#[derive(Debug, Deserialize)]
struct RootInfo {
    links: RootLinks,
}

#[derive(Debug, Deserialize)]
struct RootLinks {
    #[serde(default)]
    login: Option<Href>,
    #[serde(default)]
    uaa: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Obtains access tokens from the platform's UAA
pub struct Authenticator {
    http: Client,
    api_address: Url,
    client_id: String,
    client_secret: String,
}

impl Authenticator {
    pub fn new(http: Client, settings: &ApiSettings) -> PlatformResult<Self> {
        Ok(Self {
            http,
            api_address: Url::parse(&settings.api_address)?,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        })
    }

    /// Discover the token endpoint and request a new token
    pub async fn login(&self) -> PlatformResult<AccessToken> {
        let token_url = self.token_endpoint().await?;
        debug!(url = %token_url, "Requesting access token");

        let response = self
            .http
            .post(token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Auth(format!(
                "token request returned {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&body)?;
        Ok(AccessToken {
            value: token.access_token,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }

    async fn token_endpoint(&self) -> PlatformResult<Url> {
        let response = self.http.get(self.api_address.clone()).send().await?;
        if !response.status().is_success() {
            return Err(PlatformError::Api {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let info: RootInfo = serde_json::from_str(&response.text().await?)?;
        let login = info.links.login.or(info.links.uaa).ok_or_else(|| {
            PlatformError::Auth("API root advertises no login endpoint".to_string())
        })?;

        let base = Url::parse(login.href.trim_end_matches('/'))?;
        let mut url = base.clone();
        url.set_path(&format!("{}/oauth/token", base.path().trim_end_matches('/')));
        Ok(url)
    }
}

/// Background task renewing the session before it lapses
pub struct SessionRefresher {
    authenticator: Authenticator,
    session: SessionHandle,
    interval: Duration,
    expires_in: Option<Duration>,
}

impl SessionRefresher {
    pub fn new(authenticator: Authenticator, session: SessionHandle, interval: Duration) -> Self {
        Self {
            authenticator,
            session,
            interval,
            expires_in: None,
        }
    }

    /// Lifetime of the token currently held by the session
    pub fn with_expiry(mut self, expires_in: Option<Duration>) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Renew the token once, keeping the previous one on failure
    pub async fn refresh(&self) -> PlatformResult<Option<Duration>> {
        match self.authenticator.login().await {
            Ok(token) => {
                self.session.replace(token.value).await;
                info!(
                    expires_in_secs = token.expires_in.map(|d| d.as_secs()),
                    "Platform session refreshed"
                );
                Ok(token.expires_in)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh platform session, keeping previous token");
                Err(e)
            }
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut delay = refresh_delay(self.interval, self.expires_in);
        info!(
            interval_secs = self.interval.as_secs(),
            first_refresh_secs = delay.as_secs(),
            "Starting session refresher"
        );

        loop {
            tokio::select! {
                _ = sleep(delay) => {
                    delay = match self.refresh().await {
                        Ok(expires_in) => refresh_delay(self.interval, expires_in),
                        Err(_) => RETRY_DELAY.min(self.interval),
                    };
                    debug!(next_refresh_ms = delay.as_millis() as u64, "Session refresh scheduled");
                }
                _ = shutdown.recv() => {
                    debug!("Stopping session refresher");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn settings(api: &str) -> ApiSettings {
        ApiSettings {
            api_address: api.to_string(),
            client_id: "trimmer".to_string(),
            client_secret: "secret".to_string(),
            skip_ssl_validation: false,
        }
    }

    async fn mock_login(
        server: &mut mockito::Server,
        token: &str,
    ) -> (mockito::Mock, mockito::Mock) {
        mock_login_expiring(server, token, None).await
    }

    async fn mock_login_expiring(
        server: &mut mockito::Server,
        token: &str,
        expires_in: Option<u64>,
    ) -> (mockito::Mock, mockito::Mock) {
        let root = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"links":{{"login":{{"href":"{}/login"}}}}}}"#,
                server.url()
            ))
            .create_async()
            .await;
        let body = match expires_in {
            Some(secs) => format!(
                r#"{{"access_token":"{}","token_type":"bearer","expires_in":{}}}"#,
                token, secs
            ),
            None => format!(r#"{{"access_token":"{}","token_type":"bearer"}}"#, token),
        };
        let token = server
            .mock("POST", "/login/oauth/token")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_body(Matcher::UrlEncoded(
                "grant_type".to_string(),
                "client_credentials".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect_at_least(1)
            .create_async()
            .await;
        (root, token)
    }

    /// Wait until the handle holds `expected`, failing after a few seconds
    async fn wait_for_token(handle: &SessionHandle, expected: &str) {
        let polled = tokio::time::timeout(Duration::from_secs(5), async {
            while handle.token().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(polled.is_ok(), "session never received token {}", expected);
    }

    #[tokio::test]
    async fn test_session_handle_replace() {
        let handle = SessionHandle::new("first");
        let clone = handle.clone();
        handle.replace("second".to_string()).await;
        assert_eq!(clone.token().await, "second");
    }

    #[tokio::test]
    async fn test_login_uses_client_credentials() {
        let mut server = mockito::Server::new_async().await;
        let (root, token_mock) = mock_login(&mut server, "abc").await;

        let auth = Authenticator::new(Client::new(), &settings(&server.url())).unwrap();
        let token = auth.login().await.unwrap();
        assert_eq!(token.value, "abc");
        assert_eq!(token.expires_in, None);

        root.assert_async().await;
        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _root = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(format!(
                r#"{{"links":{{"uaa":{{"href":"{}/uaa"}}}}}}"#,
                server.url()
            ))
            .create_async()
            .await;
        let _token = server
            .mock("POST", "/uaa/oauth/token")
            .with_status(401)
            .with_body("bad credentials")
            .create_async()
            .await;

        let auth = Authenticator::new(Client::new(), &settings(&server.url())).unwrap();
        let err = auth.login().await.unwrap_err();
        assert!(matches!(err, PlatformError::Auth(_)));
    }

    #[tokio::test]
    async fn test_refresh_keeps_token_on_failure() {
        let mut server = mockito::Server::new_async().await;
        let _root = server
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;

        let auth = Authenticator::new(Client::new(), &settings(&server.url())).unwrap();
        let handle = SessionHandle::new("old");
        let refresher = SessionRefresher::new(auth, handle.clone(), REFRESH_INTERVAL);

        assert!(refresher.refresh().await.is_err());
        assert_eq!(handle.token().await, "old");
    }

    #[tokio::test]
    async fn test_refresher_swaps_token_and_stops() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_login(&mut server, "fresh").await;

        let auth = Authenticator::new(Client::new(), &settings(&server.url())).unwrap();
        let handle = SessionHandle::new("old");
        let refresher = SessionRefresher::new(auth, handle.clone(), Duration::from_millis(20));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(refresher.run(shutdown_rx));

        wait_for_token(&handle, "fresh").await;

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_reports_expiry() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_login_expiring(&mut server, "abc", Some(599)).await;

        let auth = Authenticator::new(Client::new(), &settings(&server.url())).unwrap();
        let token = auth.login().await.unwrap();
        assert_eq!(token.expires_in, Some(Duration::from_secs(599)));
    }

    #[test]
    fn test_refresh_delay_follows_expiry() {
        let interval = REFRESH_INTERVAL;
        assert_eq!(refresh_delay(interval, None), interval);
        // 12h token: the interval comes first
        assert_eq!(
            refresh_delay(interval, Some(Duration::from_secs(12 * 3600))),
            interval
        );
        // 10 min token: renewed a margin before expiry
        assert_eq!(
            refresh_delay(interval, Some(Duration::from_secs(600))),
            Duration::from_secs(600) - EXPIRY_MARGIN
        );
        // shorter than two margins: halfway through its life
        assert_eq!(
            refresh_delay(interval, Some(Duration::from_secs(60))),
            Duration::from_secs(30)
        );
        assert_eq!(
            refresh_delay(interval, Some(Duration::ZERO)),
            MIN_REFRESH_DELAY
        );
    }

    #[tokio::test]
    async fn test_short_lived_token_refreshed_before_interval() {
        let mut server = mockito::Server::new_async().await;
        let (_root, token_mock) = mock_login_expiring(&mut server, "renewed", Some(1)).await;

        let auth = Authenticator::new(Client::new(), &settings(&server.url())).unwrap();
        let handle = SessionHandle::new("initial");
        let refresher = SessionRefresher::new(auth, handle.clone(), REFRESH_INTERVAL)
            .with_expiry(Some(Duration::from_secs(1)));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(refresher.run(shutdown_rx));

        wait_for_token(&handle, "renewed").await;
        token_mock.assert_async().await;

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
