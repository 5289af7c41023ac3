// ── Backend seams ──
//
// The engine talks to the server only through these two traits. The HTTP
// implementations wrap `mdtsync_api`; tests plug in in-memory fakes.

use async_trait::async_trait;

use mdtsync_api::{DataClient, MessageStream, SseClient};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::{Project, Ticket, TicketPatch};

/// Request/response access to the data API.
#[async_trait]
pub trait DataApi: Send + Sync + 'static {
    async fn list_projects(&self) -> Result<Vec<Project>, CoreError>;

    /// Full snapshot of one scope, with per-ticket `last_modified`.
    async fn list_tickets(&self, scope: &str) -> Result<Vec<Ticket>, CoreError>;

    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), CoreError>;

    async fn update_ticket(
        &self,
        scope: &str,
        key: &str,
        patch: &TicketPatch,
    ) -> Result<(), CoreError>;

    async fn delete_ticket(&self, scope: &str, key: &str) -> Result<(), CoreError>;
}

/// Opens one connection to the change stream.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Where the stream lives, for logs and `sse:connected` payloads.
    fn endpoint(&self) -> String;

    /// Perform the handshake. `Ok` means connected.
    async fn connect(&self) -> Result<MessageStream, CoreError>;
}

// ── HTTP implementations ─────────────────────────────────────────────

#[async_trait]
impl DataApi for DataClient {
    async fn list_projects(&self) -> Result<Vec<Project>, CoreError> {
        let records = DataClient::list_projects(self).await?;
        Ok(records.into_iter().map(Project::from).collect())
    }

    async fn list_tickets(&self, scope: &str) -> Result<Vec<Ticket>, CoreError> {
        let records = DataClient::list_tickets(self, scope).await?;
        Ok(records
            .into_iter()
            .map(|r| Ticket::from_record(scope, r))
            .collect())
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), CoreError> {
        DataClient::create_ticket(self, &ticket.scope, &ticket.key, &ticket.to_record()).await?;
        Ok(())
    }

    async fn update_ticket(
        &self,
        scope: &str,
        key: &str,
        patch: &TicketPatch,
    ) -> Result<(), CoreError> {
        DataClient::update_ticket(self, scope, key, patch).await?;
        Ok(())
    }

    async fn delete_ticket(&self, scope: &str, key: &str) -> Result<(), CoreError> {
        DataClient::delete_ticket(self, scope, key).await?;
        Ok(())
    }
}

#[async_trait]
impl StreamConnector for SseClient {
    fn endpoint(&self) -> String {
        self.url().to_string()
    }

    async fn connect(&self) -> Result<MessageStream, CoreError> {
        Ok(SseClient::connect(self).await?)
    }
}

/// Build the HTTP backends described by `config`.
pub fn http_backends(config: &SyncConfig) -> Result<(DataClient, SseClient), CoreError> {
    let transport = config.transport();
    let data = DataClient::new(config.api_url(), &transport)?;
    let stream = SseClient::new(config.stream_url(), &transport)?;
    Ok((data, stream))
}
