//! Cell formatting for the `osd ps` table.
//!
//! Memory comes from the task's cgroup `memory.usage_in_bytes` and is shown
//! in binary units. A workload with no running task reports no metrics, so
//! its usage is zero and the cell shows `-`.

const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];

/// Renders the MEMORY cell for a workload's usage in bytes.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn memory_cell(bytes: u64) -> String {
    if bytes == 0 {
        return "-".to_owned();
    }
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_without_metrics_shows_dash() {
        assert_eq!(memory_cell(0), "-");
    }

    #[test]
    fn small_usage_stays_in_bytes() {
        assert_eq!(memory_cell(512), "512 B");
    }

    #[test]
    fn etcd_sized_usage_in_mib() {
        assert_eq!(memory_cell(134_217_728), "128.0 MiB");
        assert_eq!(memory_cell(2048), "2.0 KiB");
    }

    #[test]
    fn large_usage_caps_at_gib() {
        assert_eq!(memory_cell(2_147_483_648), "2.0 GiB");
        assert_eq!(memory_cell(4 * 1024 * 1024 * 1024 * 1024), "4096.0 GiB");
    }
}
