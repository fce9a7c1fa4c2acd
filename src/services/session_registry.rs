//! Active-session registry keyed by (tenant, user). Sessions are advisory
//! device/location records; credentials stay valid without them, but logout
//! and tenant switch must clear every record for the pair.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::SessionRecord;

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> Result<(), anyhow::Error>;

    async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<SessionRecord>, anyhow::Error>;

    /// Delete every session for the pair. Returns the count removed.
    async fn delete_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn sessions_key(tenant_id: Uuid, user_id: Uuid) -> String {
    format!("sessions:{}:{}", tenant_id, user_id)
}

#[derive(Clone)]
pub struct RedisSessionRegistry {
    manager: ConnectionManager,
    session_ttl_seconds: i64,
}

impl RedisSessionRegistry {
    pub async fn new(
        config: &crate::config::RedisConfig,
        session_ttl_seconds: i64,
    ) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis session registry");
        let client = Client::open(config.url.clone())?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;
        Ok(Self {
            manager,
            session_ttl_seconds,
        })
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn create(&self, record: &SessionRecord) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = sessions_key(record.tenant_id, record.user_id);
        let payload = serde_json::to_string(record)?;

        redis::pipe()
            .atomic()
            .hset(&key, record.session_id.to_string(), payload)
            .expire(&key, self.session_ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create session: {}", e))
    }

    async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<SessionRecord>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let entries: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(sessions_key(tenant_id, user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list sessions: {}", e))?;

        let mut records = Vec::with_capacity(entries.len());
        for payload in entries.values() {
            records.push(serde_json::from_str(payload)?);
        }
        Ok(records)
    }

    async fn delete_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = sessions_key(tenant_id, user_id);
        let count: i64 = redis::cmd("HLEN")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to count sessions: {}", e))?;
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete sessions: {}", e))?;
        Ok(count as u64)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Session registry health check failed: {}", e))
    }
}

#[derive(Default)]
pub struct MemorySessionRegistry {
    sessions: Mutex<HashMap<(Uuid, Uuid), Vec<SessionRecord>>>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn create(&self, record: &SessionRecord) -> Result<(), anyhow::Error> {
        self.sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Session mutex poisoned: {}", e))?
            .entry((record.tenant_id, record.user_id))
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<SessionRecord>, anyhow::Error> {
        Ok(self
            .sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Session mutex poisoned: {}", e))?
            .get(&(tenant_id, user_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, anyhow::Error> {
        Ok(self
            .sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Session mutex poisoned: {}", e))?
            .remove(&(tenant_id, user_id))
            .map(|v| v.len() as u64)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceMetadata, SessionProvider};

    #[tokio::test]
    async fn test_delete_all_clears_only_the_pair() {
        let registry = MemorySessionRegistry::new();
        let user = Uuid::new_v4();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let metadata = DeviceMetadata::default();

        registry
            .create(&SessionRecord::new(user, tenant_a, SessionProvider::Email, &metadata))
            .await
            .unwrap();
        registry
            .create(&SessionRecord::new(user, tenant_a, SessionProvider::Email, &metadata))
            .await
            .unwrap();
        registry
            .create(&SessionRecord::new(user, tenant_b, SessionProvider::Email, &metadata))
            .await
            .unwrap();

        assert_eq!(registry.delete_all_for_user(tenant_a, user).await.unwrap(), 2);
        assert!(registry.list_for_user(tenant_a, user).await.unwrap().is_empty());
        assert_eq!(registry.list_for_user(tenant_b, user).await.unwrap().len(), 1);
    }
}
