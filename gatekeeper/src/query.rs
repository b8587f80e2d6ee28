use std::{future::Future, time::Duration};

use api::response::{ActiveSession, SessionState};
use uuid::Uuid;

use crate::error::StoreError;
use crate::service::{credentials::CredentialStore, registry::SessionRegistry};

/// Read side for the dashboard and operator tooling. Every call reads the
/// store directly so a finished publish or a reaped session shows up at once.
#[derive(Clone, Debug)]
pub struct SessionQuery {
    credentials: CredentialStore,
    registry: SessionRegistry,
    timeout: Duration,
}

impl SessionQuery {
    pub fn new(credentials: CredentialStore, registry: SessionRegistry, timeout: Duration) -> Self {
        Self {
            credentials,
            registry,
            timeout,
        }
    }

    /// `None` for an unknown account
    pub async fn get_session_state(
        &self,
        account_id: Uuid,
    ) -> Result<Option<SessionState>, StoreError> {
        self.bounded(self.read_session_state(account_id)).await
    }

    /// Open sessions, most recent start first
    pub async fn list_active_sessions(&self) -> Result<Vec<ActiveSession>, StoreError> {
        self.bounded(self.read_active_sessions()).await
    }

    async fn read_session_state(
        &self,
        account_id: Uuid,
    ) -> Result<Option<SessionState>, StoreError> {
        let Some(account) = self.credentials.find_by_id(account_id).await? else {
            return Ok(None);
        };

        let session = match self.registry.find_open(&account.stream_key).await? {
            Some(open) => Some(open),
            None => self.registry.find_latest(&account.stream_key).await?,
        };

        Ok(Some(SessionState {
            stream_key: account.stream_key,
            is_live: session.as_ref().is_some_and(|s| s.is_open()),
            active_session: session.map(Into::into),
        }))
    }

    async fn read_active_sessions(&self) -> Result<Vec<ActiveSession>, StoreError> {
        let rows = self.registry.list_open().await?;
        Ok(rows
            .into_iter()
            .map(|(session, account)| ActiveSession {
                session: session.into(),
                email: account.map(|a| a.email),
            })
            .collect())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)))
    }
}
