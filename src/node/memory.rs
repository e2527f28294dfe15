use sysinfo::System;

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Total physical memory of this host, in whole GiB (rounded down).
pub fn total_memory_gib() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory() / BYTES_PER_GIB
}

pub fn meets_minimum(total_gib: u64, min_gib: u64) -> bool {
    total_gib >= min_gib
}

/// Probe the host and compare against `min_gib`.
pub fn has_sufficient_memory(min_gib: u64) -> bool {
    let total = total_memory_gib();
    let sufficient = meets_minimum(total, min_gib);
    tracing::info!(total_gib = total, min_gib, sufficient, "memory probe");
    sufficient
}
