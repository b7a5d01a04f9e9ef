//! DSM login sessions.
//!
//! A [`SessionManager`] owns at most one session. The first operation logs in lazily, later
//! operations reuse the session until it is invalidated, after which the next operation logs in
//! again. All transitions happen under one async mutex, so concurrent callers wait for a login in
//! flight instead of starting their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::RequestBuilder;
use reqwest::header::{COOKIE, HeaderValue};
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::error::{ApiFamily, Envelope};
use crate::backend::reqwest_error;
use crate::config::ConfigSecret;
use crate::error::{StorageError, StorageResult};

const INFO_API: &str = "SYNO.API.Info";
const AUTH_API: &str = "SYNO.API.Auth";
const AUTH_VERSION: u32 = 3;

/// Lifecycle of a DSM session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been established yet, or it was logged out.
    LoggedOut,
    /// A login request is in flight.
    LoggingIn,
    /// A session is available for requests.
    Active,
    /// The session was invalidated and the next request logs in again.
    Expired,
}

/// Location and supported versions of one DSM web API.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApiInfo {
    pub path: String,
    pub min_version: u32,
    pub max_version: u32,
}

/// A resolved API endpoint: CGI path below `/webapi/` and the version to request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct ApiTarget {
    pub name: &'static str,
    pub path: String,
    pub version: u32,
}

/// An authenticated DSM session.
pub(super) struct Session {
    sid: String,
    synotoken: String,
    apis: HashMap<String, ApiInfo>,
}

impl Session {
    /// Resolves `name` against the APIs discovered at login.
    ///
    /// The preferred version is clamped into the range the NAS supports.
    pub fn api(&self, name: &'static str, preferred: u32) -> StorageResult<ApiTarget> {
        let info = self.apis.get(name).ok_or_else(|| StorageError::NotSupported {
            backend: "synology",
            operation: name.to_owned(),
        })?;

        Ok(ApiTarget {
            name,
            path: info.path.clone(),
            version: preferred.clamp(info.min_version, info.max_version.max(info.min_version)),
        })
    }

    /// Attaches the session credentials to a request.
    pub fn sign(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .query(&[("_sid", self.sid.as_str()), ("SynoToken", self.synotoken.as_str())])
            .header("X-SYNO-TOKEN", self.synotoken.as_str());

        match HeaderValue::from_str(&format!("stay_login=1; id={}", self.sid)) {
            Ok(cookie) => builder.header(COOKIE, cookie),
            Err(_) => builder,
        }
    }

    /// Query parameters that authenticate a standalone URL.
    pub fn query_params(&self) -> [(&'static str, &str); 2] {
        [("_sid", self.sid.as_str()), ("SynoToken", self.synotoken.as_str())]
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &"[redacted]")
            .field("apis", &self.apis.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Slot {
    session: Option<Arc<Session>>,
    expired: bool,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
    #[serde(default)]
    synotoken: String,
}

/// Login, renewal and request signing for one DSM account.
pub(super) struct SessionManager {
    client: reqwest::Client,
    endpoint: String,
    account: String,
    password: SecretBox<ConfigSecret>,
    otp_code: Option<SecretBox<ConfigSecret>>,
    application: String,
    slot: Mutex<Slot>,
}

impl SessionManager {
    pub fn new(
        client: reqwest::Client,
        endpoint: String,
        account: String,
        password: SecretBox<ConfigSecret>,
        otp_code: Option<SecretBox<ConfigSecret>>,
        application: String,
    ) -> Self {
        Self {
            client,
            endpoint,
            account,
            password,
            otp_code,
            application,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Absolute URL of a CGI below `/webapi/`.
    pub fn cgi_url(&self, path: &str) -> String {
        format!("{}/webapi/{path}", self.endpoint)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Reports the current state. A login in flight holds the lock and reads as `LoggingIn`.
    pub fn state(&self) -> SessionState {
        match self.slot.try_lock() {
            Err(_) => SessionState::LoggingIn,
            Ok(slot) => match (&slot.session, slot.expired) {
                (_, true) => SessionState::Expired,
                (Some(_), false) => SessionState::Active,
                (None, false) => SessionState::LoggedOut,
            },
        }
    }

    /// Returns the active session, logging in first when there is none or it was invalidated.
    pub async fn ensure_active(&self) -> StorageResult<Arc<Session>> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = &slot.session
            && !slot.expired
        {
            return Ok(Arc::clone(session));
        }

        // Whatever the outcome, the previous session is gone.
        slot.session = None;
        slot.expired = false;

        let session = Arc::new(self.login().await?);
        slot.session = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Forces the next [`ensure_active`](Self::ensure_active) to log in again.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.session.is_some() {
            slot.expired = true;
        }
    }

    /// Ends the session on the NAS and returns to `LoggedOut`.
    pub async fn logout(&self) -> StorageResult<()> {
        let mut slot = self.slot.lock().await;
        slot.expired = false;
        let Some(session) = slot.session.take() else {
            return Ok(());
        };

        let auth = session.api(AUTH_API, AUTH_VERSION)?;
        let version = auth.version.to_string();
        let response = self
            .client
            .get(self.cgi_url(&auth.path))
            .query(&[
                ("api", AUTH_API),
                ("version", version.as_str()),
                ("method", "logout"),
                ("session", self.application.as_str()),
                ("_sid", session.sid.as_str()),
            ])
            .send()
            .await
            .map_err(|e| reqwest_error("dsm logout", e))?;

        let envelope: Envelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| reqwest_error("decoding dsm logout response", e))?;
        envelope.into_result(ApiFamily::Auth, "logout", None)?;

        tracing::info!(account = %self.account, "Logged out of DSM");
        Ok(())
    }

    async fn discover_apis(&self) -> StorageResult<HashMap<String, ApiInfo>> {
        let response = self
            .client
            .get(self.cgi_url("query.cgi"))
            .query(&[
                ("api", INFO_API),
                ("version", "1"),
                ("method", "query"),
                ("query", "all"),
            ])
            .send()
            .await
            .map_err(|e| reqwest_error("dsm api discovery", e))?;

        let envelope: Envelope<HashMap<String, ApiInfo>> = response
            .json()
            .await
            .map_err(|e| reqwest_error("decoding dsm api list", e))?;
        let all = envelope
            .into_result(ApiFamily::Auth, "api discovery", None)?
            .unwrap_or_default();

        let scope = self.application.to_lowercase();
        Ok(all
            .into_iter()
            .filter(|(name, _)| name == AUTH_API || name.to_lowercase().contains(&scope))
            .collect())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(account = %self.account))]
    async fn login(&self) -> StorageResult<Session> {
        let apis = self.discover_apis().await?;
        let (auth_path, auth_version) = match apis.get(AUTH_API) {
            Some(info) => (
                info.path.clone(),
                AUTH_VERSION.clamp(info.min_version, info.max_version.max(info.min_version)),
            ),
            None => ("auth.cgi".to_owned(), AUTH_VERSION),
        };

        let version = auth_version.to_string();
        let mut query = vec![
            ("api", AUTH_API),
            ("version", version.as_str()),
            ("method", "login"),
            ("account", self.account.as_str()),
            ("passwd", self.password.expose_secret().as_str()),
            ("session", self.application.as_str()),
            ("format", "cookie"),
            ("enable_syno_token", "yes"),
        ];
        if let Some(otp) = &self.otp_code {
            query.push(("otp_code", otp.expose_secret().as_str()));
        }

        let response = self
            .client
            .get(self.cgi_url(&auth_path))
            .query(&query)
            .send()
            .await
            .map_err(|e| reqwest_error("dsm login", e))?;

        let envelope: Envelope<LoginData> = response
            .json()
            .await
            .map_err(|e| reqwest_error("decoding dsm login response", e))?;
        let data = envelope
            .into_result(ApiFamily::Auth, "login", None)?
            .ok_or_else(|| StorageError::transfer_msg("dsm login returned no session"))?;

        tracing::info!(apis = apis.len(), "Logged in to DSM");
        Ok(Session {
            sid: data.sid,
            synotoken: data.synotoken,
            apis,
        })
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.endpoint)
            .field("account", &self.account)
            .field("application", &self.application)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
