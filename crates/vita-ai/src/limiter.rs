//! Per-model concurrency governor.
//!
//! The upstream provider enforces a hard in-flight request ceiling per model,
//! lowest on the free flash tier. Each model gets a lazily-created counting
//! semaphore; when a flash permit cannot be had quickly the call is promoted
//! to the paid model of the same family, which carries a higher ceiling.
//! Permits are owned values, so release happens on drop on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::error::AiError;

/// Provider in-flight ceilings by model name (lowercased).
const MODEL_LIMITS: &[(&str, usize)] = &[
    // vision family
    ("glm-4.6v", 10),
    ("glm-4.6v-flash", 1),
    ("glm-4.6v-flashx", 3),
    // text family
    ("glm-4.7", 3),
    ("glm-4.7-flash", 1),
    ("glm-4.7-flashx", 3),
    // other common models
    ("glm-4.5", 10),
    ("glm-4-flash", 200),
    ("glm-4-air", 100),
    ("embedding-3", 50),
];

const DEFAULT_LIMIT: usize = 3;

/// Busy flash models promote to the paid tier of the same family.
const UPGRADE_MAP: &[(&str, &str)] = &[
    ("glm-4.6v-flash", "glm-4.6v"), // 1 → 10
    ("glm-4.7-flash", "glm-4.7"),   // 1 → 3
];

/// Short probe on the requested model before considering an upgrade.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// Patient wait on the upgrade target, then again on the original.
pub const FULL_TIMEOUT: Duration = Duration::from_secs(90);

/// A held permit plus the concrete model it was issued for.
#[derive(Debug)]
pub struct AcquiredModel {
    pub model: String,
    _permit: OwnedSemaphorePermit,
}

pub struct ModelLimiter {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    upgrades: HashMap<String, String>,
    probe_timeout: Duration,
    full_timeout: Duration,
}

impl Default for ModelLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLimiter {
    pub fn new() -> Self {
        let upgrades = UPGRADE_MAP
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self {
            semaphores: Mutex::new(HashMap::new()),
            upgrades,
            probe_timeout: PROBE_TIMEOUT,
            full_timeout: FULL_TIMEOUT,
        }
    }

    /// Extend the upgrade map with configured model names (the roster may
    /// rename the families).
    pub fn add_upgrade(&mut self, from: &str, to: &str) {
        if from != to {
            self.upgrades
                .insert(from.to_ascii_lowercase(), to.to_string());
        }
    }

    #[cfg(test)]
    pub(crate) fn with_timeouts(mut self, probe: Duration, full: Duration) -> Self {
        self.probe_timeout = probe;
        self.full_timeout = full;
        self
    }

    /// The mutex guards only the map lookup/insert, never any await.
    fn semaphore(&self, model: &str) -> Arc<Semaphore> {
        let mut map = self.semaphores.lock().unwrap();
        map.entry(model.to_string())
            .or_insert_with(|| {
                let limit = MODEL_LIMITS
                    .iter()
                    .find(|(name, _)| *name == model.to_ascii_lowercase())
                    .map(|(_, n)| *n)
                    .unwrap_or(DEFAULT_LIMIT);
                debug!(model, limit, "created model semaphore");
                Arc::new(Semaphore::new(limit))
            })
            .clone()
    }

    async fn acquire(
        &self,
        model: &str,
        timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, AiError> {
        let sem = self.semaphore(model);
        match tokio::time::timeout(timeout, sem.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // The semaphore is never closed.
            Ok(Err(_)) | Err(_) => {
                warn!(model, timeout_s = timeout.as_secs_f64(), "permit wait timed out");
                Err(AiError::ConcurrencyExhausted {
                    model: model.to_string(),
                })
            }
        }
    }

    /// Acquire a permit for `model`, upgrading to the paid family member when
    /// the requested model stays busy past the probe window. Returns the
    /// concrete model actually permitted — callers must dispatch to it and
    /// account against it.
    pub async fn acquire_with_upgrade(&self, model: &str) -> Result<AcquiredModel, AiError> {
        if let Ok(permit) = self.acquire(model, self.probe_timeout).await {
            return Ok(AcquiredModel {
                model: model.to_string(),
                _permit: permit,
            });
        }

        if let Some(upgrade) = self.upgrades.get(&model.to_ascii_lowercase()) {
            info!(from = model, to = %upgrade, "model busy, promoting");
            if let Ok(permit) = self.acquire(upgrade, self.full_timeout).await {
                return Ok(AcquiredModel {
                    model: upgrade.clone(),
                    _permit: permit,
                });
            }
        }

        // Upgrade unavailable too: wait out the original model.
        let permit = self.acquire(model, self.full_timeout).await?;
        Ok(AcquiredModel {
            model: model.to_string(),
            _permit: permit,
        })
    }

    /// Current free permit count (diagnostics and tests).
    pub fn available(&self, model: &str) -> usize {
        self.semaphore(model).available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_limiter() -> ModelLimiter {
        ModelLimiter::new().with_timeouts(Duration::from_millis(20), Duration::from_millis(60))
    }

    #[tokio::test]
    async fn acquire_uses_static_limits() {
        let limiter = fast_limiter();
        assert_eq!(limiter.available("glm-4.6v-flash"), 1);
        assert_eq!(limiter.available("glm-4.7"), 3);
        assert_eq!(limiter.available("embedding-3"), 50);
        assert_eq!(limiter.available("unlisted-model"), 3);
    }

    #[tokio::test]
    async fn saturated_flash_promotes_to_premium() {
        let limiter = fast_limiter();
        let first = limiter.acquire_with_upgrade("glm-4.7-flash").await.unwrap();
        assert_eq!(first.model, "glm-4.7-flash");

        // Flash has a single permit; the next caller should land on glm-4.7.
        let second = limiter.acquire_with_upgrade("glm-4.7-flash").await.unwrap();
        assert_eq!(second.model, "glm-4.7");
        assert_eq!(limiter.available("glm-4.7"), 2);
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let limiter = fast_limiter();
        {
            let _held = limiter.acquire_with_upgrade("glm-4.7-flash").await.unwrap();
            assert_eq!(limiter.available("glm-4.7-flash"), 0);
        }
        assert_eq!(limiter.available("glm-4.7-flash"), 1);
        let again = limiter.acquire_with_upgrade("glm-4.7-flash").await.unwrap();
        assert_eq!(again.model, "glm-4.7-flash");
    }

    #[tokio::test]
    async fn exhaustion_surfaces_typed_error() {
        let limiter = fast_limiter();
        // Occupy flash and all three premium permits.
        let _a = limiter.acquire_with_upgrade("glm-4.7-flash").await.unwrap();
        let _b = limiter.acquire_with_upgrade("glm-4.7").await.unwrap();
        let _c = limiter.acquire_with_upgrade("glm-4.7").await.unwrap();
        let _d = limiter.acquire_with_upgrade("glm-4.7").await.unwrap();

        let err = limiter
            .acquire_with_upgrade("glm-4.7-flash")
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::ConcurrencyExhausted { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn custom_upgrade_mapping() {
        let mut limiter = fast_limiter();
        limiter.add_upgrade("my-flash", "my-premium");
        let _hold = limiter.acquire_with_upgrade("my-flash").await.unwrap();
        let _h2 = limiter.acquire_with_upgrade("my-flash").await.unwrap();
        let _h3 = limiter.acquire_with_upgrade("my-flash").await.unwrap();
        // Three default permits burned on my-flash; next lands on my-premium.
        let promoted = limiter.acquire_with_upgrade("my-flash").await.unwrap();
        assert_eq!(promoted.model, "my-premium");
    }
}
