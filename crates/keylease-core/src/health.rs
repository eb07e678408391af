// Lock health and forced recovery

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use keylease_common::{Context, LockError, LockResult};

use crate::handle::LockHandle;
use crate::metrics;

/// Snapshot of the remote lease, taken in a single round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHealth {
    pub exists: bool,
    #[serde(rename = "ttlRemainingMs", serialize_with = "serialize_millis")]
    pub ttl_remaining: Duration,
    pub is_owner: bool,
    pub observed_at: DateTime<Utc>,
}

fn serialize_millis<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(d.as_millis() as u64)
}

impl LockHandle {
    /// Existence, remaining lease and ownership of the key
    pub async fn health_check(&self, ctx: &Context) -> LockResult<LockHealth> {
        let health = ctx
            .run(self.store().health(self.key(), self.token()))
            .await?
            .map_err(|e| LockError::store("check lock health", e))?;

        Ok(LockHealth {
            exists: health.exists,
            ttl_remaining: Duration::from_millis(health.ttl_ms.max(0) as u64),
            is_owner: health.is_owner,
            observed_at: Utc::now(),
        })
    }

    /// Delete the key whoever owns it
    ///
    /// Administrative recovery only; local state is left untouched.
    pub async fn force_unlock(&self, ctx: &Context) -> LockResult<()> {
        ctx.run(self.store().delete(self.key()))
            .await?
            .map_err(|e| LockError::store("force unlock", e))?;
        metrics::record_force_unlock();
        warn!(key = %self.key(), "Lock force-unlocked");
        Ok(())
    }

    /// Remove the key if this handle owns it and reset local state
    ///
    /// An absent key is already clean. A key owned by someone else yields
    /// [`LockError::LockNotHeld`] and is left in place, including one that
    /// changed hands after the health check.
    pub async fn cleanup(&self, ctx: &Context) -> LockResult<()> {
        let health = self.health_check(ctx).await?;
        if !health.exists {
            return Ok(());
        }
        if !health.is_owner {
            return Err(LockError::LockNotHeld);
        }

        // Ownership is re-checked atomically by the delete itself
        let deleted = ctx
            .run(self.store().compare_and_delete(self.key(), self.token()))
            .await?
            .map_err(|e| LockError::store("clean up lock", e))?;
        if !deleted {
            warn!(key = %self.key(), "Lock changed hands during cleanup");
            return Err(LockError::LockNotHeld);
        }
        let previous = self.state.reset();
        info!(key = %self.key(), previous = %previous, "Lock cleaned up");
        Ok(())
    }
}
