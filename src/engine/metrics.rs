//! Metric names emitted by the engine.

pub const METRIC_CACHE_HIT: &str = "waystation_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "waystation_cache_miss_total";
pub const METRIC_NETWORK_FAILURE: &str = "waystation_network_failure_total";
pub const METRIC_CACHE_WRITE_FAILED: &str = "waystation_cache_write_failed_total";
pub const METRIC_FALLBACK_SERVED: &str = "waystation_fallback_served_total";
pub const METRIC_BYPASS: &str = "waystation_bypass_total";
pub const METRIC_NAMESPACE_PRUNED: &str = "waystation_namespace_pruned_total";
pub const METRIC_INSTALL_MS: &str = "waystation_install_ms";
