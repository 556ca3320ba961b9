//! Circuit breaker guarding stale-auction cleanup.
//!
//! Auctions absent from a refresh are eventually marked ended. When a source
//! suddenly returns far fewer listings than it has active auctions, the
//! absence is more likely a broken scrape than real endings, so cleanup for
//! that source is skipped.

use crate::models::IngestionConfig;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum allowed drop percentage (0-100). Default: 50%
    pub max_drop_percent: u8,
    /// Below this many active auctions the check is skipped.
    pub min_baseline: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for CircuitBreakerConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            max_drop_percent: config.max_drop_percent,
            min_baseline: config.min_baseline,
        }
    }
}

/// Result of circuit breaker check.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerResult {
    /// Safe to end absent auctions
    Safe { fetched: usize, active: u64 },
    /// Too few active auctions to judge
    ColdStart { fetched: usize },
    /// Listing count collapsed; leave absent auctions alone
    Triggered {
        fetched: usize,
        active: u64,
        drop_percent: f64,
    },
    /// Source returned nothing while auctions are active
    EmptyResult { active: u64 },
}

impl CircuitBreakerResult {
    pub fn permits_cleanup(&self) -> bool {
        matches!(
            self,
            CircuitBreakerResult::Safe { .. } | CircuitBreakerResult::ColdStart { .. }
        )
    }
}

/// Circuit breaker for preventing mass status changes from a bad fetch.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// Compare a source's fetched listing count with its active auctions.
    pub fn check(&self, fetched: usize, active: u64) -> CircuitBreakerResult {
        if fetched == 0 {
            if active == 0 {
                return CircuitBreakerResult::ColdStart { fetched };
            }
            return CircuitBreakerResult::EmptyResult { active };
        }

        if active < self.config.min_baseline as u64 {
            return CircuitBreakerResult::ColdStart { fetched };
        }

        if (fetched as u64) < active {
            let drop = active - fetched as u64;
            let drop_percent = (drop as f64 / active as f64) * 100.0;

            if drop_percent > self.config.max_drop_percent as f64 {
                return CircuitBreakerResult::Triggered {
                    fetched,
                    active,
                    drop_percent,
                };
            }
        }

        CircuitBreakerResult::Safe { fetched, active }
    }

    /// Check and log the verdict for `source`. Returns whether cleanup may run.
    pub fn allow_cleanup(&self, source: &str, fetched: usize, active: u64) -> bool {
        let result = self.check(fetched, active);
        match &result {
            CircuitBreakerResult::Safe { fetched, active } => {
                log::debug!(
                    "Circuit breaker [{}]: SAFE ({} listings, {} active)",
                    source,
                    fetched,
                    active
                );
            }
            CircuitBreakerResult::ColdStart { fetched } => {
                log::debug!(
                    "Circuit breaker [{}]: COLD START ({} listings, below baseline)",
                    source,
                    fetched
                );
            }
            CircuitBreakerResult::Triggered {
                fetched,
                active,
                drop_percent,
            } => {
                log::warn!(
                    "Circuit breaker [{}]: TRIGGERED! {} active → {} listings ({:.1}% drop > {}% threshold); skipping stale cleanup",
                    source,
                    active,
                    fetched,
                    drop_percent,
                    self.config.max_drop_percent
                );
            }
            CircuitBreakerResult::EmptyResult { active } => {
                log::warn!(
                    "Circuit breaker [{}]: EMPTY RESULT with {} active; skipping stale cleanup",
                    source,
                    active
                );
            }
        }
        result.permits_cleanup()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
