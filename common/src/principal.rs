use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Quota and ownership key for a request: a verified user id when the caller
/// is authenticated, otherwise the client address. Raw addresses never leave
/// this module; they are hashed before being used as storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Principal {
    User(String),
    Ip(String),
}

impl Principal {
    pub fn from_user_id(user_id: impl Into<String>) -> Self {
        Self::User(user_id.into())
    }

    pub fn from_ip(addr: IpAddr) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(addr.to_string().as_bytes());
        let digest = hasher.finalize();
        // 16 hex bytes is plenty for a stable per-address key
        let mut key = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            use std::fmt::Write;
            let _ = write!(key, "{byte:02x}");
        }
        Self::Ip(key)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Ip(_) => "ip",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Ip(id) => id,
        }
    }

    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}
