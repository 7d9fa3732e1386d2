//! Session id to client handle map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rowstream_client::{Client, ClientConfig, ClientError};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("client {id:?} already exists")]
    AlreadyExists { id: String },
    #[error("client {id:?} is closed")]
    Closed { id: String },
    #[error("client {id:?} does not exist")]
    NotFound { id: String },
    #[error("client {id:?} could not be created: {source}")]
    Create {
        id: String,
        #[source]
        source: ClientError,
    },
}

enum Entry {
    /// Filled by whichever caller constructs the client first.
    Live(Arc<OnceCell<Client>>),
    /// Closed and not yet removed.
    Closed,
}

/// Owns one [`Client`] per session id.
///
/// The map lock is only held to look up or replace an entry; client
/// construction and every RPC run outside it.
pub struct SessionManager {
    default_config: ClientConfig,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("default_config", &self.default_config)
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(default_config: ClientConfig) -> Self {
        Self {
            default_config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_config(&self) -> &ClientConfig {
        &self.default_config
    }

    /// The client for `id`, connecting it with the default config if the id
    /// has not been seen. Concurrent callers for a new id share one client.
    pub async fn resolve(&self, id: &str) -> Result<Client, SessionError> {
        let cell = {
            let mut sessions = self.sessions.lock();
            let entry = sessions
                .entry(id.to_string())
                .or_insert_with(|| Entry::Live(Arc::new(OnceCell::new())));
            match entry {
                Entry::Live(cell) => cell.clone(),
                Entry::Closed => return Err(SessionError::Closed { id: id.to_string() }),
            }
        };

        let client = cell
            .get_or_try_init(|| async {
                tracing::debug!(client_id = id, "creating client on first use");
                Client::connect(self.default_config.clone()).await
            })
            .await
            .map_err(|source| {
                self.forget_failed(id, &cell);
                SessionError::Create {
                    id: id.to_string(),
                    source,
                }
            })?;
        Ok(client.clone())
    }

    /// Connect a client for `id` with `config`.
    pub async fn create(&self, id: &str, config: ClientConfig) -> Result<(), SessionError> {
        let cell = Arc::new(OnceCell::new());
        {
            let mut sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(Entry::Live(_)) => {
                    return Err(SessionError::AlreadyExists { id: id.to_string() });
                }
                Some(Entry::Closed) => return Err(SessionError::Closed { id: id.to_string() }),
                None => {
                    sessions.insert(id.to_string(), Entry::Live(cell.clone()));
                }
            }
        }

        let created = cell
            .get_or_try_init(|| Client::connect(config))
            .await
            .map(|_| ());
        match created {
            Ok(()) => {
                tracing::debug!(client_id = id, "client created");
                Ok(())
            }
            Err(source) => {
                self.forget_failed(id, &cell);
                Err(SessionError::Create {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }

    /// Reject new work for `id` and drop the manager's handle. Calls that
    /// already resolved the client keep it until they finish.
    pub fn close(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            None => Err(SessionError::NotFound { id: id.to_string() }),
            Some(entry) => {
                if matches!(entry, Entry::Live(_)) {
                    *entry = Entry::Closed;
                    tracing::debug!(client_id = id, "client closed");
                }
                Ok(())
            }
        }
    }

    /// Forget `id` entirely, so it can be created again. Returns whether it
    /// was known.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            tracing::debug!(client_id = id, "client removed");
        }
        removed
    }

    pub fn is_closed(&self, id: &str) -> bool {
        matches!(self.sessions.lock().get(id), Some(Entry::Closed))
    }

    /// Known ids, closed ones included.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop an entry whose construction failed, unless it was replaced.
    fn forget_failed(&self, id: &str, cell: &Arc<OnceCell<Client>>) {
        let mut sessions = self.sessions.lock();
        if let Some(Entry::Live(current)) = sessions.get(id) {
            if Arc::ptr_eq(current, cell) && !current.initialized() {
                sessions.remove(id);
            }
        }
    }
}
