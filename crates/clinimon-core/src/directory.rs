//! Read-only client lookup used when rendering a session.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::session::ClientInfo;
use crate::storage::Database;

/// Source of client display data. The monitor never writes through it.
pub trait ClientDirectory: Send + Sync {
    fn client(&self, client_id: &str) -> Option<ClientInfo>;

    /// Display name, falling back to the raw id for unknown clients.
    fn display_name(&self, client_id: &str) -> String {
        self.client(client_id)
            .map(|c| c.name)
            .unwrap_or_else(|| client_id.to_string())
    }
}

/// Fixed directory, usually built from the `[[clients]]` config entries.
#[derive(Debug, Clone, Default)]
pub struct StaticClientDirectory {
    clients: HashMap<String, ClientInfo>,
}

impl StaticClientDirectory {
    pub fn new(clients: impl IntoIterator<Item = ClientInfo>) -> Self {
        Self {
            clients: clients.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// Add the sessions finished on this device to each client's
    /// configured total.
    ///
    /// # Errors
    /// Returns an error if the local `sessions` table cannot be queried.
    pub fn with_local_totals(mut self, db: &Database) -> Result<Self, StoreError> {
        for client in self.clients.values_mut() {
            let local = u32::try_from(db.finished_count(&client.id)?).unwrap_or(u32::MAX);
            client.total_sessions = client.total_sessions.saturating_add(local);
        }
        Ok(self)
    }
}

impl ClientDirectory for StaticClientDirectory {
    fn client(&self, client_id: &str) -> Option<ClientInfo> {
        self.clients.get(client_id).cloned()
    }
}
