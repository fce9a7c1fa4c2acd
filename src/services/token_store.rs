//! Refresh-token store and access-token blacklist.
//!
//! The store is the single source of truth for rotation: check-and-rotate is
//! one atomic operation (a Lua script in the Redis implementation, a locked
//! section in the in-memory one) so two concurrent rotations of the same
//! token id can never both succeed. Rotated records are kept as tombstones
//! until their natural expiry, which lets a replayed id be attributed to its
//! (tenant, user) family.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::RefreshTokenRecord;

/// Result of an atomic check-and-rotate.
#[derive(Debug, Clone)]
pub enum RotateOutcome {
    /// The presented id was live; it is now tombstoned and the replacement is
    /// active. Carries the new active record.
    Rotated(RefreshTokenRecord),
    /// The presented id was already rotated: a reuse event. Carries the
    /// tombstoned record so the whole family can be revoked.
    Reused(RefreshTokenRecord),
    /// The presented id is unknown or expired.
    Unknown,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a freshly minted refresh token record.
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), anyhow::Error>;

    /// Atomically rotate `presented_id` into `replacement_id`. The new record
    /// inherits the (user, tenant) binding of the old one inside the store.
    async fn rotate(
        &self,
        presented_id: &str,
        replacement_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RotateOutcome, anyhow::Error>;

    /// Look up an active (non-rotated, unexpired) record.
    async fn lookup(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, anyhow::Error>;

    /// Revoke a single token id. Returns whether anything was removed.
    async fn revoke(&self, token_id: &str) -> Result<bool, anyhow::Error>;

    /// Revoke every live token for a (tenant, user) family. Returns the count.
    async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, anyhow::Error>;

    /// Blacklist a token hash until `expiry_seconds` from now.
    async fn blacklist(&self, token_hash: &str, expiry_seconds: i64) -> Result<(), anyhow::Error>;

    async fn is_blacklisted(&self, token_hash: &str) -> Result<bool, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn refresh_key(token_id: &str) -> String {
    format!("refresh:{}", token_id)
}

fn family_key(tenant_id: Uuid, user_id: Uuid) -> String {
    format!("refresh_family:{}:{}", tenant_id, user_id)
}

fn blacklist_key(token_hash: &str) -> String {
    format!("blacklist:{}", token_hash)
}

// KEYS[1] = presented refresh key, KEYS[2] = replacement refresh key.
// ARGV[1] = now (unix), ARGV[2] = new expiry (unix). Tombstoning the old
// record and creating the replacement happen in one script execution, so
// concurrent rotations of the same id cannot both succeed.
const ROTATE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then
    return {'unknown'}
end
local uid = redis.call('HGET', KEYS[1], 'user_id')
local tid = redis.call('HGET', KEYS[1], 'tenant_id')
local created = redis.call('HGET', KEYS[1], 'created_at')
local expires = redis.call('HGET', KEYS[1], 'expires_at')
if state ~= 'active' then
    return {'reused', uid, tid, created, expires}
end
if tonumber(expires) <= tonumber(ARGV[1]) then
    return {'unknown'}
end
redis.call('HSET', KEYS[1], 'state', 'rotated')
redis.call('HSET', KEYS[2],
    'user_id', uid,
    'tenant_id', tid,
    'state', 'active',
    'created_at', ARGV[1],
    'expires_at', ARGV[2])
redis.call('EXPIREAT', KEYS[2], tonumber(ARGV[2]))
return {'rotated', uid, tid, ARGV[1], ARGV[2]}
"#;

/// Redis-backed token store.
#[derive(Clone)]
pub struct RedisTokenStore {
    manager: ConnectionManager,
    rotate_script: Script,
}

impl RedisTokenStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis token store");
        let client = Client::open(config.url.clone())?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        Ok(Self {
            manager,
            rotate_script: Script::new(ROTATE_SCRIPT),
        })
    }
}

fn record_from_fields(
    token_id: &str,
    user_id: &str,
    tenant_id: &str,
    created_at: i64,
    expires_at: i64,
) -> Result<RefreshTokenRecord, anyhow::Error> {
    Ok(RefreshTokenRecord {
        token_id: token_id.to_string(),
        user_id: user_id.parse()?,
        tenant_id: tenant_id.parse()?,
        created_at: Utc
            .timestamp_opt(created_at, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Bad created_at timestamp"))?,
        expires_at: Utc
            .timestamp_opt(expires_at, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Bad expires_at timestamp"))?,
    })
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = refresh_key(&record.token_id);
        let family = family_key(record.tenant_id, record.user_id);

        redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("user_id", record.user_id.to_string()),
                    ("tenant_id", record.tenant_id.to_string()),
                    ("state", "active".to_string()),
                    ("created_at", record.created_at.timestamp().to_string()),
                    ("expires_at", record.expires_at.timestamp().to_string()),
                ],
            )
            .cmd("EXPIREAT")
            .arg(&key)
            .arg(record.expires_at.timestamp())
            .sadd(&family, &record.token_id)
            .cmd("EXPIREAT")
            .arg(&family)
            .arg(record.expires_at.timestamp())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to insert refresh token: {}", e))
    }

    async fn rotate(
        &self,
        presented_id: &str,
        replacement_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RotateOutcome, anyhow::Error> {
        let mut conn = self.manager.clone();
        let now = Utc::now().timestamp();

        let raw: Vec<String> = self
            .rotate_script
            .key(refresh_key(presented_id))
            .key(refresh_key(replacement_id))
            .arg(now)
            .arg(expires_at.timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to rotate refresh token: {}", e))?;

        match raw.first().map(String::as_str) {
            Some("rotated") => {
                let record = record_from_fields(
                    replacement_id,
                    &raw[1],
                    &raw[2],
                    raw[3].parse()?,
                    raw[4].parse()?,
                )?;
                // The family key is only known after reading the old record,
                // so the replacement is indexed right after the script.
                let family = family_key(record.tenant_id, record.user_id);
                redis::pipe()
                    .atomic()
                    .sadd(&family, replacement_id)
                    .cmd("EXPIREAT")
                    .arg(&family)
                    .arg(record.expires_at.timestamp())
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to index rotated token: {}", e))?;
                Ok(RotateOutcome::Rotated(record))
            }
            Some("reused") => {
                let record = record_from_fields(
                    presented_id,
                    &raw[1],
                    &raw[2],
                    raw[3].parse()?,
                    raw[4].parse()?,
                )?;
                Ok(RotateOutcome::Reused(record))
            }
            _ => Ok(RotateOutcome::Unknown),
        }
    }

    async fn lookup(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(refresh_key(token_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to look up refresh token: {}", e))?;

        if fields.get("state").map(String::as_str) != Some("active") {
            return Ok(None);
        }

        let record = record_from_fields(
            token_id,
            fields
                .get("user_id")
                .ok_or_else(|| anyhow::anyhow!("Corrupt token record"))?,
            fields
                .get("tenant_id")
                .ok_or_else(|| anyhow::anyhow!("Corrupt token record"))?,
            fields
                .get("created_at")
                .ok_or_else(|| anyhow::anyhow!("Corrupt token record"))?
                .parse()?,
            fields
                .get("expires_at")
                .ok_or_else(|| anyhow::anyhow!("Corrupt token record"))?
                .parse()?,
        )?;

        if record.is_expired() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn revoke(&self, token_id: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(refresh_key(token_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke refresh token: {}", e))?;
        Ok(removed > 0)
    }

    async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let family = family_key(tenant_id, user_id);

        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&family)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list token family: {}", e))?;

        let mut revoked = 0u64;
        if !members.is_empty() {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for id in &members {
                pipe.del(refresh_key(id));
            }
            pipe.del(&family);
            let counts: Vec<i64> = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to revoke token family: {}", e))?;
            revoked = counts
                .iter()
                .take(members.len())
                .filter(|&&c| c > 0)
                .count() as u64;
        }

        Ok(revoked)
    }

    async fn blacklist(&self, token_hash: &str, expiry_seconds: i64) -> Result<(), anyhow::Error> {
        if expiry_seconds <= 0 {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(blacklist_key(token_hash))
            .arg("revoked")
            .arg("EX")
            .arg(expiry_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to blacklist token: {}", e))
    }

    async fn is_blacklisted(&self, token_hash: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(blacklist_key(token_hash))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check blacklist: {}", e))?;
        Ok(exists)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Token store health check failed: {}", e))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StoredState {
    Active,
    Rotated,
}

/// In-memory token store with the same semantics as the Redis one. Backs the
/// tests and local development without infrastructure.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: Mutex<HashMap<String, (RefreshTokenRecord, StoredState)>>,
    blacklist: Mutex<HashSet<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), anyhow::Error> {
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Token store mutex poisoned: {}", e))?
            .insert(record.token_id.clone(), (record.clone(), StoredState::Active));
        Ok(())
    }

    async fn rotate(
        &self,
        presented_id: &str,
        replacement_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RotateOutcome, anyhow::Error> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Token store mutex poisoned: {}", e))?;

        let (old, state) = match records.get(presented_id) {
            Some((record, state)) => (record.clone(), state.clone()),
            None => return Ok(RotateOutcome::Unknown),
        };

        if state == StoredState::Rotated {
            return Ok(RotateOutcome::Reused(old));
        }
        if old.is_expired() {
            return Ok(RotateOutcome::Unknown);
        }

        records.insert(presented_id.to_string(), (old.clone(), StoredState::Rotated));

        let replacement = RefreshTokenRecord {
            token_id: replacement_id.to_string(),
            user_id: old.user_id,
            tenant_id: old.tenant_id,
            created_at: Utc::now(),
            expires_at,
        };
        records.insert(
            replacement_id.to_string(),
            (replacement.clone(), StoredState::Active),
        );

        Ok(RotateOutcome::Rotated(replacement))
    }

    async fn lookup(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, anyhow::Error> {
        let records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Token store mutex poisoned: {}", e))?;
        Ok(records.get(token_id).and_then(|(record, state)| {
            if *state == StoredState::Active && !record.is_expired() {
                Some(record.clone())
            } else {
                None
            }
        }))
    }

    async fn revoke(&self, token_id: &str) -> Result<bool, anyhow::Error> {
        Ok(self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Token store mutex poisoned: {}", e))?
            .remove(token_id)
            .is_some())
    }

    async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, anyhow::Error> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Token store mutex poisoned: {}", e))?;
        let before = records.len();
        records.retain(|_, (record, _)| {
            !(record.tenant_id == tenant_id && record.user_id == user_id)
        });
        Ok((before - records.len()) as u64)
    }

    async fn blacklist(&self, token_hash: &str, _expiry_seconds: i64) -> Result<(), anyhow::Error> {
        self.blacklist
            .lock()
            .map_err(|e| anyhow::anyhow!("Blacklist mutex poisoned: {}", e))?
            .insert(token_hash.to_string());
        Ok(())
    }

    async fn is_blacklisted(&self, token_hash: &str) -> Result<bool, anyhow::Error> {
        Ok(self
            .blacklist
            .lock()
            .map_err(|e| anyhow::anyhow!("Blacklist mutex poisoned: {}", e))?
            .contains(token_hash))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
