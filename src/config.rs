//! Component factory for environment-based configuration
//!
//! Factory methods to create the shared directory and the event bus from
//! environment variables, enabling easy switching between development and
//! production backends.

use crate::bus::{EventBus, KafkaBus, MemoryBus};
use crate::directory::{Directory, MemoryDirectory, RedisDirectory};
use crate::Result;
use std::sync::Arc;
use tracing::info;

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the shared directory from environment
    ///
    /// Environment variables:
    /// - DIRECTORY_BACKEND: "memory" (default) or "redis"
    /// - REDIS_URL: Redis connection URL (required for redis)
    pub async fn create_directory() -> Result<Arc<dyn Directory>> {
        let backend = std::env::var("DIRECTORY_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("Using in-memory directory (development mode)");
                Ok(Arc::new(MemoryDirectory::new()))
            }
            "redis" => {
                let url = std::env::var("REDIS_URL").map_err(|_| {
                    crate::Error::Config(
                        "REDIS_URL required when DIRECTORY_BACKEND=redis".to_string(),
                    )
                })?;
                info!("Using Redis directory");
                Ok(Arc::new(RedisDirectory::connect(&url).await?))
            }
            _ => Err(crate::Error::Config(format!(
                "Unknown DIRECTORY_BACKEND: {}. Use 'memory' or 'redis'",
                backend
            ))),
        }
    }

    /// Create the presence event bus from environment
    ///
    /// Environment variables:
    /// - BUS_BACKEND: "memory" (default) or "kafka"
    /// - KAFKA_BROKERS: broker list (required for kafka)
    pub async fn create_bus() -> Result<Arc<dyn EventBus>> {
        let backend = std::env::var("BUS_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("Using in-process event bus (development mode)");
                Ok(Arc::new(MemoryBus::default()))
            }
            "kafka" => {
                let brokers = std::env::var("KAFKA_BROKERS").map_err(|_| {
                    crate::Error::Config(
                        "KAFKA_BROKERS required when BUS_BACKEND=kafka".to_string(),
                    )
                })?;
                info!(brokers = %brokers, "Using Kafka event bus");
                Ok(Arc::new(KafkaBus::new(&brokers)?))
            }
            _ => Err(crate::Error::Config(format!(
                "Unknown BUS_BACKEND: {}. Use 'memory' or 'kafka'",
                backend
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

    /// Exclusive, self-restoring view of the factory's environment keys.
    ///
    /// Construction locks out other tests, clears every key the factory
    /// reads, and applies the overrides; dropping the guard puts the
    /// original values back before releasing the lock.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<OsString>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        const KEYS: [&'static str; 4] = [
            "DIRECTORY_BACKEND",
            "REDIS_URL",
            "BUS_BACKEND",
            "KAFKA_BROKERS",
        ];

        fn with(overrides: &[(&str, &str)]) -> Self {
            let lock = ENV_MUTEX
                .get_or_init(Mutex::default)
                .lock()
                .expect("env mutex poisoned");

            let saved = Self::KEYS
                .iter()
                .map(|key| {
                    let previous = std::env::var_os(key);
                    // SAFETY: the held mutex serializes env mutation in tests.
                    unsafe { std::env::remove_var(key) };
                    (*key, previous)
                })
                .collect();

            for (key, value) in overrides {
                // SAFETY: the held mutex serializes env mutation in tests.
                unsafe { std::env::set_var(key, value) };
            }

            Self { saved, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            // The lock field outlives this body, so restoration happens
            // while the environment is still exclusively ours.
            for (key, value) in self.saved.drain(..) {
                match value {
                    // SAFETY: the held mutex serializes env mutation in tests.
                    Some(previous) => unsafe { std::env::set_var(key, previous) },
                    None => unsafe { std::env::remove_var(key) },
                }
            }
        }
    }

    #[tokio::test]
    async fn create_directory_defaults_to_memory() {
        let _env = EnvGuard::with(&[]);
        let result = ComponentFactory::create_directory().await;
        assert!(result.is_ok(), "default memory backend should work");
    }

    #[tokio::test]
    async fn create_directory_rejects_unknown_backend() {
        let _env = EnvGuard::with(&[("DIRECTORY_BACKEND", "etcd")]);
        let err = match ComponentFactory::create_directory().await {
            Ok(_) => panic!("unknown backend should fail"),
            Err(err) => err,
        };
        assert!(
            err.to_string().contains("Unknown DIRECTORY_BACKEND"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn create_directory_redis_requires_url() {
        let _env = EnvGuard::with(&[("DIRECTORY_BACKEND", "redis")]);
        let err = match ComponentFactory::create_directory().await {
            Ok(_) => panic!("redis backend without url should fail"),
            Err(err) => err,
        };
        assert!(
            err.to_string().contains("REDIS_URL required"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn create_bus_defaults_to_memory() {
        let _env = EnvGuard::with(&[]);
        let result = ComponentFactory::create_bus().await;
        assert!(result.is_ok(), "default memory bus should work");
    }

    #[tokio::test]
    async fn create_bus_kafka_requires_brokers() {
        let _env = EnvGuard::with(&[("BUS_BACKEND", "kafka")]);
        let err = match ComponentFactory::create_bus().await {
            Ok(_) => panic!("kafka backend without brokers should fail"),
            Err(err) => err,
        };
        assert!(
            err.to_string().contains("KAFKA_BROKERS required"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn create_bus_rejects_unknown_backend() {
        let _env = EnvGuard::with(&[("BUS_BACKEND", "rabbitmq")]);
        let err = match ComponentFactory::create_bus().await {
            Ok(_) => panic!("unknown bus backend should fail"),
            Err(err) => err,
        };
        assert!(
            err.to_string().contains("Unknown BUS_BACKEND"),
            "unexpected error: {err}"
        );
    }
}
