// Data API HTTP client
//
// Wraps `reqwest::Client` with URL construction and status handling for
// the ticket/project endpoints. Mutation responses are only inspected for
// their status: the change stream is the source of truth for what landed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{ErrorBody, ProjectRecord, TicketRecord};
use crate::transport::TransportConfig;

/// Raw HTTP client for the markdown-ticket data API.
#[derive(Clone)]
pub struct DataClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DataClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the API root, e.g. `http://localhost:3001/api`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Convenience constructor from a string URL (tests, ad-hoc tools).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self::with_client(http, Url::parse(base_url)?))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /projects`
    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, Error> {
        let url = self.url(&["projects"])?;
        self.get(url).await
    }

    /// `GET /entities/{scope}` — full snapshot with per-ticket `lastModified`.
    pub async fn list_tickets(&self, scope: &str) -> Result<Vec<TicketRecord>, Error> {
        let url = self.url(&["entities", scope])?;
        self.get(url).await
    }

    /// `POST /entities/{scope}/{key}`
    pub async fn create_ticket(
        &self,
        scope: &str,
        key: &str,
        body: &impl Serialize,
    ) -> Result<(), Error> {
        let url = self.url(&["entities", scope, key])?;
        debug!("POST {}", url);
        let resp = self.http.post(url).json(body).send().await?;
        check_status(resp).await.map(drop)
    }

    /// `PATCH /entities/{scope}/{key}`
    pub async fn update_ticket(
        &self,
        scope: &str,
        key: &str,
        patch: &impl Serialize,
    ) -> Result<(), Error> {
        let url = self.url(&["entities", scope, key])?;
        debug!("PATCH {}", url);
        let resp = self.http.patch(url).json(patch).send().await?;
        check_status(resp).await.map(drop)
    }

    /// `DELETE /entities/{scope}/{key}`
    pub async fn delete_ticket(&self, scope: &str, key: &str) -> Result<(), Error> {
        let url = self.url(&["entities", scope, key])?;
        debug!("DELETE {}", url);
        let resp = self.http.delete(url).send().await?;
        check_status(resp).await.map(drop)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

/// Map any non-2xx status to [`Error::Api`], pulling the message from the
/// `{ "error": ... }` body when the server sent one.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_owned()
            } else {
                body
            }
        });

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}
