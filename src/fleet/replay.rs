//! Replay of captured results.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::cache::ResultCache;
use super::{FanOutResult, FleetExecutor};

/// Executor that serves every command from the result cache.
///
/// It has no transport, so it cannot reach the network.
#[derive(Debug, Clone)]
pub struct ReplayExecutor {
    cache: ResultCache,
    scope: String,
}

impl ReplayExecutor {
    #[must_use]
    pub fn new(cache: ResultCache, scope: impl Into<String>) -> Self {
        Self {
            cache,
            scope: scope.into(),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

#[async_trait]
impl FleetExecutor for ReplayExecutor {
    async fn execute(&self, command: &str) -> FanOutResult {
        let mut result = FanOutResult::new(command);

        match self.cache.get(&self.scope, command) {
            Some(outputs) => {
                debug!("Replaying {} host outputs for: {}", outputs.len(), command);
                result.outputs = outputs.clone();
            }
            None => {
                warn!(
                    "No cached result in scope {:?} for: {}",
                    self.scope, command
                );
            }
        }

        result
    }

    fn failed_hosts(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::HostOutputs;

    #[tokio::test]
    async fn test_hit_returns_outputs_verbatim() {
        let mut cache = ResultCache::in_memory();
        let outputs: HostOutputs = [("10.0.0.1".to_string(), "  raw  text ".to_string())]
            .into_iter()
            .collect();
        cache.put("prod", "uname -v", outputs.clone());

        let executor = ReplayExecutor::new(cache, "prod");
        let result = executor.execute("uname -v").await;

        assert_eq!(result.outputs, outputs);
        assert!(result.failed.is_empty());
    }

    #[tokio::test]
    async fn test_miss_is_empty_not_error() {
        let executor = ReplayExecutor::new(ResultCache::in_memory(), "prod");
        let result = executor.execute("uname -v").await;

        assert!(result.outputs.is_empty());
        assert!(result.failed.is_empty());
        assert!(executor.failed_hosts().is_empty());
    }

    #[tokio::test]
    async fn test_other_scope_is_a_miss() {
        let mut cache = ResultCache::in_memory();
        cache.put("staging", "uname -v", HostOutputs::new());
        let executor = ReplayExecutor::new(cache, "production");

        assert!(executor.execute("uname -v").await.outputs.is_empty());
    }
}
