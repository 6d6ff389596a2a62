//! Configuration for a sync database.

/// Configuration for one [`crate::SyncDatabase`] instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Database name; namespaces blob-store keys so several databases can
    /// share one store.
    pub db_name: String,
    /// Room identifier joined on connect.
    pub room_id: String,
    /// Transport URL handed to the injected transport.
    pub server_url: String,
}

impl SyncConfig {
    /// Creates a configuration for the given database name.
    ///
    /// The room defaults to the database name, the common single-room
    /// case.
    pub fn new(db_name: impl Into<String>) -> Self {
        let db_name = db_name.into();
        Self {
            room_id: db_name.clone(),
            db_name,
            server_url: String::new(),
        }
    }

    /// Sets the room identifier.
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    /// Sets the transport URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }
}
