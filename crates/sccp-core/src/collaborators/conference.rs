//! External mixing bridge. Joins may block for a long time and are only
//! ever awaited on the background worker pool.

use async_trait::async_trait;

use crate::types::{CallId, ConferenceId};

#[async_trait]
pub trait ConferenceMixer: Send + Sync {
    async fn create_conference(&self, owner: CallId) -> anyhow::Result<ConferenceId>;

    async fn add_participant(&self, conference: &ConferenceId, call_id: CallId) -> anyhow::Result<()>;

    async fn remove_participant(&self, conference: &ConferenceId, call_id: CallId) -> anyhow::Result<()>;

    async fn end_conference(&self, conference: &ConferenceId) -> anyhow::Result<()>;
}
