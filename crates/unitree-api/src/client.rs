// Async HTTP client for the UniTree backend.
//
// Base path: /api/
// Auth: `Authorization: Bearer <token>`

use chrono::NaiveDate;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::Error;
use crate::transport::TransportConfig;
use crate::types::{SessionUpload, TransactionUpload, UploadAck, WifiPointsTotal};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// ── Error response shape ─────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the session and points endpoints.
///
/// Cheap to clone; the inner `reqwest::Client` is reference counted.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Build from a bearer token and transport config.
    ///
    /// Injects `Authorization` as a sensitive default header on every request.
    pub fn from_token(
        base_url: &str,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| Error::Authentication {
                message: format!("invalid token header value: {e}"),
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = transport.build_client_with_headers(headers)?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Ensure the base URL ends with `/api/` so relative joins land there.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();

        if path.ends_with("/api") {
            url.set_path(&format!("{path}/"));
        } else {
            url.set_path(&format!("{path}/api/"));
        }
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Upload a session record. Replays are acknowledged as duplicates.
    pub async fn upload_session(&self, session: &SessionUpload) -> Result<UploadAck, Error> {
        self.post_idempotent("wifi-sessions", session.id, session)
            .await
    }

    /// Upload a ledger transaction, keyed by its source session when present.
    pub async fn upload_transaction(&self, tx: &TransactionUpload) -> Result<UploadAck, Error> {
        let key = tx.source_session_id.unwrap_or(tx.id);
        self.post_idempotent("points/transactions", key, tx).await
    }

    /// WiFi-sourced points already credited to `user_id` on `date`, with
    /// days delimited at `utc_offset_minutes` east of UTC.
    pub async fn wifi_points_total(
        &self,
        user_id: &str,
        date: NaiveDate,
        utc_offset_minutes: i32,
    ) -> Result<WifiPointsTotal, Error> {
        let mut url = self.url(&format!("points/users/{user_id}/wifi-total"))?;
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string())
            .append_pair("utcOffsetMinutes", &utc_offset_minutes.to_string());
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        self.handle_response(resp).await
    }

    // ── HTTP plumbing ────────────────────────────────────────────────

    async fn post_idempotent<B: Serialize + Sync>(
        &self,
        path: &str,
        key: Uuid,
        body: &B,
    ) -> Result<UploadAck, Error> {
        let url = self.url(path)?;
        debug!(idempotency_key = %key, "POST {url}");

        let resp = self
            .http
            .post(url)
            .header(IDEMPOTENCY_HEADER, key.to_string())
            .json(body)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            debug!(idempotency_key = %key, "backend already holds record");
            return Ok(UploadAck {
                id: key,
                duplicate: true,
            });
        }
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(self.parse_error(status, resp).await)
        }
    }

    async fn parse_error(&self, status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Error::InvalidToken;
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Error::RateLimited { retry_after_secs };
        }

        let raw = resp.text().await.unwrap_or_default();

        if let Ok(err) = serde_json::from_str::<ErrorResponse>(&raw) {
            Error::Api {
                status: status.as_u16(),
                message: err.message.unwrap_or_else(|| status.to_string()),
                code: err.code,
            }
        } else {
            Error::Api {
                status: status.as_u16(),
                message: if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                },
                code: None,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_api_suffix() {
        let client = ApiClient::from_reqwest("https://unitree.example", reqwest::Client::new())
            .unwrap();
        assert_eq!(client.base_url().as_str(), "https://unitree.example/api/");
    }

    #[test]
    fn base_url_keeps_existing_api_suffix() {
        let client =
            ApiClient::from_reqwest("https://unitree.example/v2/api/", reqwest::Client::new())
                .unwrap();
        assert_eq!(client.base_url().as_str(), "https://unitree.example/v2/api/");
    }

    #[test]
    fn rejects_garbage_url() {
        let result = ApiClient::from_reqwest("not a url", reqwest::Client::new());
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
