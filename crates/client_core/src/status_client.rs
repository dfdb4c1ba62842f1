use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::SubsystemState,
    error::{ApiFailure, ErrorBody},
    protocol::{
        LoginRequest, LoginResponse, StatusResponse, TriggerProtocolRequest,
        TriggerProtocolResponse,
    },
};
use tracing::{debug, warn};
use url::Url;

/// Label sent when the operator leaves the sensor source blank.
pub const DEFAULT_SENSOR_SOURCE: &str = "Unknown_Sensor";

const LOGIN_FAILED: &str = "Login failed";
const OPERATION_FAILED: &str = "Operation failed";
const RESET_FAILED: &str = "Reset failed";

/// Trims the operator's input, falling back to [`DEFAULT_SENSOR_SOURCE`].
pub fn resolve_sensor_source(raw: &str) -> &str {
    match raw.trim() {
        "" => DEFAULT_SENSOR_SOURCE,
        trimmed => trimmed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolReceipt {
    pub acting_user: String,
    pub alarm_message: Option<String>,
    pub sprinkler_message: Option<String>,
}

/// One status reply. Either subsystem may be absent from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub alarm: Option<SubsystemState>,
    pub sprinkler: Option<SubsystemState>,
}

/// Remote calls the session controller depends on.
///
/// Every call resolves to a tagged outcome; transport failures never escape
/// as panics or untyped errors.
#[async_trait]
pub trait StatusApi: Send + Sync {
    /// `AuthFailed` or `Network` on failure.
    async fn login(&self, username: &str, password: &str) -> Result<LoginGrant, ApiFailure>;
    /// `Unauthorized`, `Failed` or `Network` on failure.
    async fn trigger_protocol(
        &self,
        source: &str,
        token: &str,
    ) -> Result<ProtocolReceipt, ApiFailure>;
    /// `Failed` or `Network` on failure. The reset endpoint takes no token.
    async fn reset_system(&self) -> Result<(), ApiFailure>;
    /// `Network` on failure.
    async fn fetch_status(&self) -> Result<StatusReport, ApiFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub trigger_protocol: String,
    pub reset: String,
    pub status: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "login".into(),
            trigger_protocol: "trigger-protocol".into(),
            reset: "reset".into(),
            status: "status".into(),
        }
    }
}

pub struct StatusClient {
    http: Client,
    base_url: Url,
    endpoints: Endpoints,
}

impl StatusClient {
    pub fn new(
        base_url: &str,
        endpoints: Endpoints,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            endpoints,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiFailure> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiFailure::network(format!("invalid endpoint '{path}': {err}")))
    }
}

/// Parses the base URL and makes sure it ends with `/`, so that joining an
/// endpoint appends to it instead of replacing its last segment.
fn normalize_base_url(raw: &str) -> anyhow::Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|err| anyhow::anyhow!("invalid api base url '{raw}': {err}"))
}

fn transport_failure(err: reqwest::Error) -> ApiFailure {
    warn!(error = %err, "request to fire-protocol service failed");
    ApiFailure::network(err.to_string())
}

async fn decode_success<T: DeserializeOwned>(response: Response) -> Result<T, ApiFailure> {
    response
        .json::<T>()
        .await
        .map_err(|err| ApiFailure::network(format!("unreadable response body: {err}")))
}

async fn error_message(response: Response, fallback: &str) -> String {
    match response.json::<ErrorBody>().await {
        Ok(body) => body.message_or(fallback),
        Err(err) => {
            debug!(error = %err, "error response carried no readable message");
            fallback.to_string()
        }
    }
}

#[async_trait]
impl StatusApi for StatusClient {
    async fn login(&self, username: &str, password: &str) -> Result<LoginGrant, ApiFailure> {
        let response = self
            .http
            .post(self.endpoint(&self.endpoints.login)?)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(ApiFailure::auth_failed(
                error_message(response, LOGIN_FAILED).await,
            ));
        }

        let body: LoginResponse = decode_success(response).await?;
        Ok(LoginGrant {
            token: body.access_token,
            username: body.username,
        })
    }

    async fn trigger_protocol(
        &self,
        source: &str,
        token: &str,
    ) -> Result<ProtocolReceipt, ApiFailure> {
        let source = resolve_sensor_source(source);
        let response = self
            .http
            .post(self.endpoint(&self.endpoints.trigger_protocol)?)
            .bearer_auth(token)
            .json(&TriggerProtocolRequest {
                source: source.to_string(),
            })
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiFailure::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiFailure::failed(
                error_message(response, OPERATION_FAILED).await,
            ));
        }

        let body: TriggerProtocolResponse = decode_success(response).await?;
        let flow = body.flow.unwrap_or_default();
        Ok(ProtocolReceipt {
            acting_user: body.acting_user,
            alarm_message: flow.alarm.map(|step| step.message),
            sprinkler_message: flow.sprinkler_feedback.map(|step| step.message),
        })
    }

    async fn reset_system(&self) -> Result<(), ApiFailure> {
        let response = self
            .http
            .post(self.endpoint(&self.endpoints.reset)?)
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(ApiFailure::failed(
                error_message(response, RESET_FAILED).await,
            ));
        }
        Ok(())
    }

    async fn fetch_status(&self) -> Result<StatusReport, ApiFailure> {
        let response = self
            .http
            .get(self.endpoint(&self.endpoints.status)?)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiFailure::network(format!(
                "status endpoint answered {status}"
            )));
        }

        let body: StatusResponse = decode_success(response).await?;
        Ok(StatusReport {
            alarm: body.alarm_system.map(|report| report.state),
            sprinkler: body.sprinkler_system.map(|report| report.state),
        })
    }
}

#[cfg(test)]
#[path = "tests/status_client_tests.rs"]
mod tests;
