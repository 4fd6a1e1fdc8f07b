//! Typed client for the `/api/v1` HTTP API
//!
//! Transport failures (connection refused, timeouts, unreadable bodies) come
//! back as `NETWORK_ERROR` and are never retried. Error envelopes from the
//! server come back as [`Error::Remote`] carrying the server's code.

use crate::analytics::{DashboardStats, StationActivity};
use crate::audit::{AuditAction, AuditLogEntry, EntityType};
use crate::entities::{
    GasStation, IssuedUser, LoginRequest, LoginResponse, NewPump, NewStation, NewUser, Pump,
    PumpStatus, PumpUpdate, StationStatus, StationUpdate, User,
};
use crate::envelope::{ApiResponse, Deleted, LoggedOut};
use crate::error::{Error, Result};
use crate::pagination::PageMeta;
use crate::reconciliation::Verdict;
use crate::verification::{VerificationRequest, VerificationSession};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A page of results as the server returned it
#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pagination: Option<PageMeta>,
}

/// Query of the verification history endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Query of `GET /admin/audit-logs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<AuditAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct StationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<StationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct PumpParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<PumpStatus>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    /// e.g. `http://localhost:4000/api/v1`
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Network(format!("cannot build HTTP client: {}", e)))?;

        Ok(ApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%method, %url, "api request");

        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<ApiResponse<T>> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        match serde_json::from_slice::<ApiResponse<T>>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(Error::Remote {
                code: "UNKNOWN_ERROR".to_string(),
                message: format!("server answered {}", status),
            }),
            Err(e) => Err(Error::Network(format!(
                "unreadable response body ({}): {}",
                status, e
            ))),
        }
    }

    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        self.send(builder).await?.into_result()
    }

    async fn call_paged<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Paged<T>> {
        let envelope = self.send::<Vec<T>>(builder).await?;
        let pagination = envelope.pagination;
        let items = envelope.into_result()?;
        Ok(Paged { items, pagination })
    }

    // ===== HEALTH + SESSION =====

    /// `true` when `/health` answers 2xx
    pub async fn health(&self) -> Result<bool> {
        let root = self.base_url.trim_end_matches("/api/v1");
        let response = self
            .http
            .get(format!("{}/health", root))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    pub async fn me(&self) -> Result<User> {
        self.call(self.request(Method::GET, "/auth/me")).await
    }

    /// Exchange credentials for a session token; pass it to [`ApiClient::with_token`]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.call(self.request(Method::POST, "/auth/login").json(&request))
            .await
    }

    /// Revoke the token this client sends
    pub async fn logout(&self) -> Result<()> {
        let _: LoggedOut = self
            .call(self.request(Method::POST, "/auth/logout"))
            .await?;
        Ok(())
    }

    // ===== STATIONS =====

    pub async fn list_stations(
        &self,
        status: Option<StationStatus>,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Paged<GasStation>> {
        let params = StationParams {
            status,
            page,
            limit,
        };
        self.call_paged(self.request(Method::GET, "/stations").query(&params))
            .await
    }

    pub async fn get_station(&self, id: i64) -> Result<GasStation> {
        self.call(self.request(Method::GET, &format!("/stations/{}", id)))
            .await
    }

    pub async fn create_station(&self, new: &NewStation) -> Result<GasStation> {
        self.call(self.request(Method::POST, "/stations").json(new))
            .await
    }

    pub async fn update_station(&self, id: i64, update: &StationUpdate) -> Result<GasStation> {
        self.call(
            self.request(Method::PUT, &format!("/stations/{}", id))
                .json(update),
        )
        .await
    }

    pub async fn delete_station(&self, id: i64) -> Result<()> {
        let _: Deleted = self
            .call(self.request(Method::DELETE, &format!("/stations/{}", id)))
            .await?;
        Ok(())
    }

    // ===== PUMPS =====

    pub async fn list_station_pumps(&self, station_id: i64) -> Result<Vec<Pump>> {
        self.call(self.request(Method::GET, &format!("/stations/{}/pumps", station_id)))
            .await
    }

    pub async fn list_pumps(&self, status: Option<PumpStatus>) -> Result<Vec<Pump>> {
        self.call(
            self.request(Method::GET, "/pumps")
                .query(&PumpParams { status }),
        )
        .await
    }

    pub async fn get_pump(&self, id: i64) -> Result<Pump> {
        self.call(self.request(Method::GET, &format!("/pumps/{}", id)))
            .await
    }

    pub async fn create_pump(&self, station_id: i64, new: &NewPump) -> Result<Pump> {
        self.call(
            self.request(Method::POST, &format!("/stations/{}/pumps", station_id))
                .json(new),
        )
        .await
    }

    pub async fn update_pump(&self, id: i64, update: &PumpUpdate) -> Result<Pump> {
        self.call(
            self.request(Method::PUT, &format!("/pumps/{}", id))
                .json(update),
        )
        .await
    }

    pub async fn delete_pump(&self, id: i64) -> Result<()> {
        let _: Deleted = self
            .call(self.request(Method::DELETE, &format!("/pumps/{}", id)))
            .await?;
        Ok(())
    }

    // ===== VERIFICATION =====

    pub async fn verify(
        &self,
        pump_id: i64,
        request: &VerificationRequest,
    ) -> Result<VerificationSession> {
        self.call(
            self.request(Method::POST, &format!("/pumps/{}/verify", pump_id))
                .json(request),
        )
        .await
    }

    pub async fn pump_history(
        &self,
        pump_id: i64,
        params: &HistoryParams,
    ) -> Result<Paged<VerificationSession>> {
        self.call_paged(
            self.request(Method::GET, &format!("/pumps/{}/verifications", pump_id))
                .query(params),
        )
        .await
    }

    // ===== ADMIN =====

    pub async fn all_verifications(
        &self,
        params: &HistoryParams,
    ) -> Result<Paged<VerificationSession>> {
        self.call_paged(
            self.request(Method::GET, "/admin/verifications/all")
                .query(params),
        )
        .await
    }

    pub async fn audit_logs(&self, params: &AuditParams) -> Result<Paged<AuditLogEntry>> {
        self.call_paged(self.request(Method::GET, "/admin/audit-logs").query(params))
            .await
    }

    pub async fn analytics(&self) -> Result<DashboardStats> {
        self.call(self.request(Method::GET, "/admin/analytics"))
            .await
    }

    pub async fn station_activity(&self, station_id: i64) -> Result<StationActivity> {
        self.call(self.request(
            Method::GET,
            &format!("/admin/stations/{}/logs", station_id),
        ))
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.call(self.request(Method::GET, "/admin/users")).await
    }

    pub async fn create_user(&self, new: &NewUser) -> Result<IssuedUser> {
        self.call(self.request(Method::POST, "/admin/users").json(new))
            .await
    }
}
