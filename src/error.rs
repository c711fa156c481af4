//! Error types for presenced

/// Result type alias for presenced operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for presenced
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Directory (shared key-value store) errors
    #[error("Directory error: {0}")]
    Directory(String),
    /// Event bus errors
    #[error("Bus error: {0}")]
    Bus(String),
    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Kafka client errors
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Token validation errors
    #[error("Auth error: {0}")]
    Auth(String),
    /// The user's vnode is not assigned to this node
    #[error("User does not belong to this node (vnode {vnode})")]
    NotOwned { vnode: u32 },
    /// Every vnode already has an owner
    #[error("No vnodes available for assignment")]
    RingFull,
    /// Unregister target owns nothing
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    /// No owner for the user's vnode
    #[error("No instance owns vnode {0}")]
    OwnerNotFound(u32),
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Auth(e.to_string())
    }
}
