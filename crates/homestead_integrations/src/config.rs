//! Configuration for the orchestrator and integration schedules.

use std::time::Duration;

/// Configuration for [`IntegrationOrchestrator`](crate::IntegrationOrchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Time allowed for one adapter fetch plus transform.
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Configuration for [`IntegrationScheduler`](crate::IntegrationScheduler).
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Interval for integrations without a `syncIntervalSecs` setting.
    pub default_interval: Duration,
    /// How often due integrations are looked for.
    pub tick: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(15 * 60),
            tick: Duration::from_secs(5),
        }
    }
}

impl ScheduleConfig {
    /// Sets the default interval.
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Sets the tick period.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }
}
