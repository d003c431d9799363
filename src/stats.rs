//! Telemetry collaborator.
//!
//! Statistics collection lives outside the state layer; the server only
//! tells it when entities disappear and when to stop.

/// Hooks the server calls on the statistics subsystem.
pub trait StatsCollector: Send + Sync {
    /// Drops cached statistics for a removed container.
    fn remove_stats_for_container(&self, id: &str);

    /// Drops cached statistics for a removed sandbox.
    fn remove_stats_for_sandbox(&self, id: &str);

    /// Stops collection.
    fn shutdown(&self);
}

/// Collector that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsCollector for NoopStats {
    fn remove_stats_for_container(&self, _id: &str) {}

    fn remove_stats_for_sandbox(&self, _id: &str) {}

    fn shutdown(&self) {}
}
