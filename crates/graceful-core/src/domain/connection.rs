//! Connection identity.

use std::fmt;

use uuid::Uuid;

/// Unique identifier for one accepted connection, derived from UUID v4.
///
/// Assigned when the connection is registered with the tracker and used to
/// deregister exactly that entry when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Log lines only need enough of the id to correlate accept/close.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}
