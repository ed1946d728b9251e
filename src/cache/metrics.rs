//! Metric names emitted by the cache.

/// Admission decisions, labelled by `outcome`.
pub const METRIC_ADMISSION_TOTAL: &str = "staticfile_cache_admission_total";
/// Hook invocations that errored or panicked, labelled by `point` and `hook`.
pub const METRIC_HOOK_FAILURE_TOTAL: &str = "staticfile_cache_hook_failure_total";
/// Entries removed by tag invalidation.
pub const METRIC_FLUSH_TOTAL: &str = "staticfile_cache_flush_total";
/// Entries dropped by the in-memory store because it was full.
pub const METRIC_EVICT_TOTAL: &str = "staticfile_cache_evict_total";
