//! Host diagnostics for the `/diagnostics` endpoint.
//!
//! Best-effort by contract: a metric the platform will not report becomes
//! null, never an error, so the endpoint stays usable on stripped-down
//! hosts.

use serde::Serialize;
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};

#[derive(Debug, Clone, Serialize)]
pub struct DiskSnapshot {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostDiagnostics {
    pub cpu_percent: Option<f32>,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub uptime_seconds: u64,
    pub disks: Vec<DiskSnapshot>,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Snapshot the host. Takes `&mut System` so CPU usage is measured against
/// the previous refresh; the first call after startup reports null CPU.
pub fn snapshot(sys: &mut System) -> HostDiagnostics {
    let first_sample = sys.cpus().is_empty();
    sys.refresh_cpu();
    sys.refresh_memory();
    sys.refresh_disks_list();
    sys.refresh_disks();
    sys.refresh_networks_list();
    sys.refresh_networks();

    let cpu_percent = if first_sample {
        None
    } else {
        Some(sys.global_cpu_info().cpu_usage())
    };

    let disks = sys
        .disks()
        .iter()
        .map(|d| DiskSnapshot {
            mount_point: d.mount_point().to_string_lossy().into_owned(),
            total_bytes: d.total_space(),
            available_bytes: d.available_space(),
        })
        .collect();

    let (network_rx_bytes, network_tx_bytes) = sys
        .networks()
        .iter()
        .fold((0u64, 0u64), |(rx, tx), (_name, data)| {
            (rx + data.total_received(), tx + data.total_transmitted())
        });

    HostDiagnostics {
        cpu_percent,
        memory_total_bytes: sys.total_memory(),
        memory_used_bytes: sys.used_memory(),
        uptime_seconds: sys.uptime(),
        disks,
        network_rx_bytes,
        network_tx_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_never_fails_and_serializes() {
        let mut sys = System::new();
        let first = snapshot(&mut sys);
        assert!(first.cpu_percent.is_none());

        let second = snapshot(&mut sys);
        assert!(second.memory_total_bytes >= second.memory_used_bytes || second.memory_total_bytes == 0);
        let json = serde_json::to_value(&second).unwrap();
        assert!(json.get("cpu_percent").is_some());
        assert!(json.get("disks").is_some());
    }
}
