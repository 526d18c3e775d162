//! Shared helpers for the Redis-backed stores.
//!
//! Gives every Redis store the same JSON encoding and the same mapping from
//! `RedisError` to [`RepositoryError`].

use crate::models::RepositoryError;
use redis::RedisError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

pub trait RedisRepository {
    fn serialize_entity<T, F>(
        &self,
        entity: &T,
        id_extractor: F,
        entity_type: &str,
    ) -> Result<String, RepositoryError>
    where
        T: Serialize,
        F: Fn(&T) -> &str,
    {
        serde_json::to_string(entity).map_err(|e| {
            let id = id_extractor(entity);
            error!(entity_type = %entity_type, id = %id, error = %e, "serialization failed");
            RepositoryError::InvalidData(format!("Failed to serialize {entity_type} {id}: {e}"))
        })
    }

    fn deserialize_entity<T>(
        &self,
        json: &str,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<T, RepositoryError>
    where
        T: for<'de> Deserialize<'de>,
    {
        serde_json::from_str(json).map_err(|e| {
            error!(entity_type = %entity_type, entity_id = %entity_id, error = %e, "deserialization failed");
            RepositoryError::InvalidData(format!(
                "Failed to deserialize {} {}: {} (JSON length: {})",
                entity_type,
                entity_id,
                e,
                json.len()
            ))
        })
    }

    /// Convert Redis errors to appropriate RepositoryError types
    fn map_redis_error(&self, error: RedisError, context: &str) -> RepositoryError {
        warn!(context = %context, error = %error, "redis operation failed");

        match error.kind() {
            redis::ErrorKind::TypeError => RepositoryError::InvalidData(format!(
                "Redis data type error in operation '{context}': {error}"
            )),
            redis::ErrorKind::AuthenticationFailed => {
                RepositoryError::ConnectionError("Redis authentication failed".to_string())
            }
            redis::ErrorKind::ReadOnly => RepositoryError::ConnectionError(format!(
                "Redis is read-only in operation '{context}': {error}"
            )),
            redis::ErrorKind::BusyLoadingError => RepositoryError::ConnectionError(format!(
                "Redis is busy in operation '{context}': {error}"
            )),
            redis::ErrorKind::IoError => RepositoryError::ConnectionError(format!(
                "Redis connection failed in operation '{context}': {error}"
            )),
            _ => RepositoryError::Unknown(format!("Redis operation '{context}' failed: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestEntity {
        id: String,
        value: i32,
    }

    struct TestRedisRepository;

    impl RedisRepository for TestRedisRepository {}

    #[test]
    fn test_serialize_entity_success() {
        let entity = TestEntity {
            id: "test-id".to_string(),
            value: 42,
        };
        let json = TestRedisRepository
            .serialize_entity(&entity, |e| &e.id, "TestEntity")
            .unwrap();
        assert!(json.contains("test-id"));
        assert!(json.contains("42"));
    }

    #[test]
    fn test_deserialize_entity_invalid_json() {
        let result: Result<TestEntity, RepositoryError> =
            TestRedisRepository.deserialize_entity(r#"{"id":"x","value":}"#, "x", "TestEntity");

        match result {
            Err(RepositoryError::InvalidData(msg)) => {
                assert!(msg.contains("Failed to deserialize TestEntity x"));
                assert!(msg.contains("JSON length:"));
            }
            other => panic!("Expected InvalidData error, got {other:?}"),
        }
    }

    #[test]
    fn test_map_redis_error_kinds() {
        let repo = TestRedisRepository;

        let type_error = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(
            repo.map_redis_error(type_error, "hget"),
            RepositoryError::InvalidData(_)
        ));

        let io_error = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let mapped = repo.map_redis_error(io_error, "hget");
        assert!(matches!(mapped, RepositoryError::ConnectionError(_)));
        assert!(mapped.is_transient());

        let other = RedisError::from((redis::ErrorKind::ResponseError, "boom"));
        assert!(matches!(
            repo.map_redis_error(other, "hget"),
            RepositoryError::Unknown(_)
        ));
    }
}
