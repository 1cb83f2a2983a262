// Telemetry for the FEC pipeline.
//
// All counters and gauges live in the default prometheus registry. Callers
// that want to publish them scrape `metrics_text()`; the library itself
// never opens a listener.

use lazy_static::lazy_static;
use log::warn;
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref PARITY_SHARDS_EMITTED: IntCounter = register_int_counter!(
        "fec_parity_shards_total",
        "Parity shards emitted on group completion"
    )
    .unwrap();
    pub static ref SHARDS_RECOVERED: IntCounter = register_int_counter!(
        "fec_shards_recovered_total",
        "Data shards reconstructed from parity"
    )
    .unwrap();
    pub static ref GROUPS_COMPLETED: IntCounter = register_int_counter!(
        "fec_groups_completed_total",
        "Groups that reached the decodable threshold"
    )
    .unwrap();
    pub static ref GROUPS_EVICTED: IntCounter = register_int_counter!(
        "fec_groups_evicted_total",
        "Incomplete groups evicted from the decoder cache"
    )
    .unwrap();
    pub static ref DUPLICATE_SHARDS: IntCounter = register_int_counter!(
        "fec_duplicate_shards_total",
        "Arrivals discarded because the slot already held that shard"
    )
    .unwrap();
    pub static ref MALFORMED_SHARDS: IntCounter = register_int_counter!(
        "fec_malformed_shards_total",
        "Arrivals rejected at ingest: truncated, unknown kind, or oversize"
    )
    .unwrap();
    pub static ref ACTIVE_GROUPS: IntGauge = register_int_gauge!(
        "fec_active_groups",
        "Group slots currently cached by the decoder"
    )
    .unwrap();
    pub static ref MEM_POOL_IN_USE: IntGauge = register_int_gauge!(
        "mem_pool_blocks_in_use",
        "Blocks handed out by the memory pool"
    )
    .unwrap();
    pub static ref MEM_POOL_FREE: IntGauge = register_int_gauge!(
        "mem_pool_blocks_free",
        "Blocks resting in the memory pool free list"
    )
    .unwrap();
    pub static ref MEM_POOL_EXHAUSTED: IntCounter = register_int_counter!(
        "mem_pool_exhausted_total",
        "Allocations served outside the free list because it was empty"
    )
    .unwrap();
    pub static ref SIMD_ACTIVE: IntGauge = register_int_gauge!(
        "simd_active_level",
        "Selected kernel tier: 0 scalar, 1 ssse3/neon, 2 avx2"
    )
    .unwrap();
}

/// Render every registered metric in the prometheus text exposition format.
pub fn metrics_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("metrics encode failed: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
