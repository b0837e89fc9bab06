//! Host telemetry collection.
//!
//! Gathers the device description reported once after login and the metric
//! values pushed on every cycle. All values come from `sysinfo`; anything
//! the platform cannot provide degrades to an empty string or is skipped.

use msp_session::{DeviceInfo, PushItem};
use sysinfo::System;

/// Snapshot source for one agent process.
pub struct Telemetry {
    system: System,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }

    /// Static device description for the one-time report after login.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            vendor: System::distribution_id(),
            model: System::host_name().unwrap_or_default(),
            os_name: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            serial_number: System::kernel_version().unwrap_or_default(),
            user_name: None,
        }
    }

    /// Current metric values for `device_id`, refreshed on every call.
    pub fn collect(&mut self, device_id: &str) -> Vec<PushItem> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut items = vec![
            PushItem::new(device_id, "sys.uptime", System::uptime().to_string()),
            PushItem::new(
                device_id,
                "mem.total",
                self.system.total_memory().to_string(),
            ),
            PushItem::new(device_id, "mem.used", self.system.used_memory().to_string()),
        ];

        let load = System::load_average();
        // Windows reports all-zero load averages; skip them there.
        if load.one > 0.0 || load.five > 0.0 || load.fifteen > 0.0 {
            items.push(PushItem::new(
                device_id,
                "cpu.load1",
                format!("{:.2}", load.one),
            ));
            items.push(PushItem::new(
                device_id,
                "cpu.load5",
                format!("{:.2}", load.five),
            ));
        }

        if !self.system.cpus().is_empty() {
            items.push(PushItem::new(
                device_id,
                "cpu.usage",
                format!("{:.1}", self.system.global_cpu_usage()),
            ));
        }

        items
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
