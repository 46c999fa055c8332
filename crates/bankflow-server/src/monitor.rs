//! Process-level system monitoring via sysinfo.

use bankflow::core::sanitize::human_size;
use serde_json::{json, Value};
use sysinfo::{Disks, Networks, System};

/// Point-in-time snapshot: CPU, memory, disk, swap, network, uptime.
/// Values that cannot be sampled on this host are simply absent; the
/// `error` field is set when the whole sample fails.
pub fn system_snapshot() -> Value {
    let mut system = System::new_all();
    // Two refreshes with a short gap give a usable CPU percentage.
    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();
    system.refresh_memory();

    let cpu_percent = if system.cpus().is_empty() {
        0.0
    } else {
        system.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>()
            / system.cpus().len() as f64
    };

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_free) = disks
        .list()
        .iter()
        .fold((0u64, 0u64), |(total, free), disk| {
            (total + disk.total_space(), free + disk.available_space())
        });
    let disk_used = disk_total.saturating_sub(disk_free);

    let networks = Networks::new_with_refreshed_list();
    let (rx, tx) = networks
        .list()
        .values()
        .fold((0u64, 0u64), |(rx, tx), data| {
            (rx + data.total_received(), tx + data.total_transmitted())
        });

    let uptime_secs = System::uptime();

    json!({
        "cpu": {
            "percent": cpu_percent,
            "count": system.cpus().len(),
        },
        "memory": {
            "total": system.total_memory(),
            "used": system.used_memory(),
            "available": system.available_memory(),
            "percent": if system.total_memory() > 0 {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            } else { 0.0 },
            "total_human": human_size(system.total_memory()),
            "used_human": human_size(system.used_memory()),
        },
        "disk": {
            "total": disk_total,
            "used": disk_used,
            "free": disk_free,
            "percent": if disk_total > 0 {
                disk_used as f64 / disk_total as f64 * 100.0
            } else { 0.0 },
            "total_human": human_size(disk_total),
            "used_human": human_size(disk_used),
        },
        "swap": {
            "total": system.total_swap(),
            "used": system.used_swap(),
        },
        "network": {
            "bytes_recv": rx,
            "bytes_sent": tx,
        },
        "system": {
            "platform": System::name(),
            "kernel": System::kernel_version(),
            "uptime_hours": uptime_secs as f64 / 3600.0,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_shape() {
        let snap = system_snapshot();
        assert!(snap["cpu"]["count"].as_u64().unwrap() >= 1);
        assert!(snap["memory"]["total"].as_u64().unwrap() > 0);
        let mem_pct = snap["memory"]["percent"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&mem_pct));
        assert!(snap["timestamp"].is_string());
    }
}
