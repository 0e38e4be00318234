//! System uptime, used to anchor frame-relative event times.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time since the system booted.
#[cfg(windows)]
pub fn system_uptime() -> Duration {
    let millis = unsafe { windows::Win32::System::SystemInformation::GetTickCount64() };
    Duration::from_millis(millis)
}

/// Time since the system booted.
#[cfg(target_os = "linux")]
pub fn system_uptime() -> Duration {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .next()
                .and_then(|secs| secs.parse::<f64>().ok())
        })
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or_default()
}

/// Time since the system booted; unknown on this platform.
#[cfg(not(any(windows, target_os = "linux")))]
pub fn system_uptime() -> Duration {
    Duration::ZERO
}

/// Wall-clock time at which the system booted, relative to `now`.
pub fn boot_time(now: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::from_std(system_uptime())
        .ok()
        .and_then(|uptime| now.checked_sub_signed(uptime))
        .unwrap_or(now)
}
