//! Host metrics read from `/proc`, `/sys` and a few system commands.
//!
//! Parsers are plain functions over the file contents so they can be tested
//! with fixtures. Anything that cannot be read renders as "n/a".

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

pub const NA: &str = "n/a";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line.split_whitespace().skip(1).filter_map(|v| v.parse().ok()).collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes { idle, total: values.iter().sum() })
}

pub fn cpu_usage(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle);
    100.0 * (total - idle.min(total)) as f64 / total as f64
}

/// Model name and logical core count from `/proc/cpuinfo`.
pub fn parse_cpuinfo(cpuinfo: &str) -> (Option<String>, usize) {
    let model = cpuinfo
        .lines()
        .find(|l| l.starts_with("model name") || l.starts_with("Model"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string());
    let cores = cpuinfo.lines().filter(|l| l.starts_with("processor")).count();
    (model, cores)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

pub fn parse_meminfo(meminfo: &str) -> Option<MemInfo> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
    };
    Some(MemInfo {
        total_kb: field("MemTotal:")?,
        available_kb: field("MemAvailable:")?,
        swap_total_kb: field("SwapTotal:").unwrap_or(0),
        swap_free_kb: field("SwapFree:").unwrap_or(0),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskInfo {
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
}

/// Second line of `df -k /`.
pub fn parse_df(output: &str) -> Option<DiskInfo> {
    let line = output.lines().nth(1)?;
    let cols: Vec<&str> = line.split_whitespace().collect();
    Some(DiskInfo {
        total_kb: cols.get(1)?.parse().ok()?,
        used_kb: cols.get(2)?.parse().ok()?,
        available_kb: cols.get(3)?.parse().ok()?,
    })
}

/// Received and transmitted bytes over all interfaces except loopback.
pub fn parse_net_dev(net_dev: &str) -> (u64, u64) {
    net_dev
        .lines()
        .skip(2)
        .filter_map(|l| l.split_once(':'))
        .filter(|(iface, _)| iface.trim() != "lo")
        .fold((0, 0), |(rx, tx), (_, rest)| {
            let cols: Vec<u64> = rest.split_whitespace().filter_map(|v| v.parse().ok()).collect();
            (rx + cols.first().copied().unwrap_or(0), tx + cols.get(8).copied().unwrap_or(0))
        })
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{value:.1} {}", UNITS[unit]) }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 { 0.0 } else { 100.0 * part as f64 / whole as f64 }
}

async fn read(path: &str) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Some(s),
        Err(e) => {
            debug!("Cannot read {path}: {e}");
            None
        }
    }
}

pub async fn cpu_report() -> String {
    let (model, cores) = read("/proc/cpuinfo").await.map(|s| parse_cpuinfo(&s)).unwrap_or((None, 0));
    let before = read("/proc/stat").await.and_then(|s| parse_cpu_times(&s));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = read("/proc/stat").await.and_then(|s| parse_cpu_times(&s));
    let usage = match (before, after) {
        (Some(a), Some(b)) => format!("{:.1}%", cpu_usage(a, b)),
        _ => NA.to_string(),
    };
    let load = read("/proc/loadavg")
        .await
        .map(|s| s.split_whitespace().take(3).collect::<Vec<_>>().join(" "))
        .unwrap_or_else(|| NA.to_string());
    format!(
        "🖥 <b>CPU</b>\nModel: {}\nCores: {}\nUsage: {usage}\nLoad: {load}",
        model.unwrap_or_else(|| NA.to_string()),
        if cores > 0 { cores.to_string() } else { NA.to_string() }
    )
}

pub async fn memory_report() -> String {
    match read("/proc/meminfo").await.and_then(|s| parse_meminfo(&s)) {
        Some(m) => {
            let used = m.total_kb.saturating_sub(m.available_kb);
            let swap_used = m.swap_total_kb.saturating_sub(m.swap_free_kb);
            format!(
                "🧠 <b>Memory</b>\nRAM: {} / {} ({:.1}%)\nSwap: {} / {}",
                format_bytes(used * 1024),
                format_bytes(m.total_kb * 1024),
                percent(used, m.total_kb),
                format_bytes(swap_used * 1024),
                format_bytes(m.swap_total_kb * 1024)
            )
        }
        None => format!("🧠 <b>Memory</b>\n{NA}"),
    }
}

pub async fn disk_report() -> String {
    let output = tokio::process::Command::new("df").args(["-k", "/"]).output().await;
    let disk = match output {
        Ok(out) if out.status.success() => parse_df(&String::from_utf8_lossy(&out.stdout)),
        Ok(_) => None,
        Err(e) => {
            warn!("df failed: {e}");
            None
        }
    };
    match disk {
        Some(d) => format!(
            "💽 <b>Disk /</b>\nUsed: {} / {} ({:.1}%)\nFree: {}",
            format_bytes(d.used_kb * 1024),
            format_bytes(d.total_kb * 1024),
            percent(d.used_kb, d.total_kb),
            format_bytes(d.available_kb * 1024)
        ),
        None => format!("💽 <b>Disk /</b>\n{NA}"),
    }
}

/// Docker, WSL or a plain host.
pub async fn environment() -> &'static str {
    if Path::new("/.dockerenv").exists()
        || read("/proc/1/cgroup").await.is_some_and(|s| s.contains("docker"))
    {
        "Docker"
    } else if read("/proc/version").await.is_some_and(|s| s.to_lowercase().contains("microsoft")) {
        "WSL"
    } else {
        "Native OS"
    }
}

pub async fn system_report() -> String {
    let os = read("/etc/os-release")
        .await
        .and_then(|s| {
            s.lines()
                .find_map(|l| l.strip_prefix("PRETTY_NAME="))
                .map(|v| v.trim_matches('"').to_string())
        })
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    let kernel = read("/proc/sys/kernel/osrelease").await.map(|s| s.trim().to_string());
    let hostname = read("/proc/sys/kernel/hostname").await.map(|s| s.trim().to_string());
    let uptime = read("/proc/uptime")
        .await
        .and_then(|s| s.split('.').next().and_then(|v| v.parse::<u64>().ok()))
        .map(|secs| crate::kernel::context::format_uptime(Duration::from_secs(secs)));
    format!(
        "⚙️ <b>System</b>\nOS: {os}\nKernel: {}\nHost: {}\nArch: {}\nEnvironment: {}\nUptime: {}",
        kernel.as_deref().unwrap_or(NA),
        hostname.as_deref().unwrap_or(NA),
        std::env::consts::ARCH,
        environment().await,
        uptime.as_deref().unwrap_or(NA)
    )
}

pub async fn external_ip(http: &reqwest::Client, url: &str) -> Option<String> {
    let resp = http.get(url).timeout(Duration::from_secs(5)).send().await;
    match resp {
        Ok(r) if r.status().is_success() => r.text().await.ok().map(|t| t.trim().to_string()),
        Ok(r) => {
            warn!("IP lookup returned {}", r.status());
            None
        }
        Err(e) => {
            warn!("IP lookup failed: {e}");
            None
        }
    }
}

pub async fn network_report(http: &reqwest::Client, ip_url: &str) -> String {
    let traffic = read("/proc/net/dev").await.map(|s| parse_net_dev(&s));
    let ip = external_ip(http, ip_url).await;
    let (rx, tx) = match traffic {
        Some((rx, tx)) => (format_bytes(rx), format_bytes(tx)),
        None => (NA.to_string(), NA.to_string()),
    };
    format!(
        "🌐 <b>Network</b>\nExternal IP: {}\nReceived: {rx}\nSent: {tx}",
        ip.as_deref().unwrap_or(NA)
    )
}

pub async fn temperature_report() -> String {
    let mut lines = Vec::new();
    if let Ok(mut dir) = tokio::fs::read_dir("/sys/class/thermal").await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if !entry.file_name().to_string_lossy().starts_with("thermal_zone") {
                continue;
            }
            let temp = tokio::fs::read_to_string(path.join("temp"))
                .await
                .ok()
                .and_then(|t| t.trim().parse::<f64>().ok());
            let kind = tokio::fs::read_to_string(path.join("type"))
                .await
                .map(|t| t.trim().to_string())
                .unwrap_or_else(|_| entry.file_name().to_string_lossy().into_owned());
            if let Some(millis) = temp {
                lines.push(format!("{kind}: {:.1}°C", millis / 1000.0));
            }
        }
    }
    lines.sort();
    if lines.is_empty() {
        format!("🌡 <b>Temperature</b>\n{NA}")
    } else {
        format!("🌡 <b>Temperature</b>\n{}", lines.join("\n"))
    }
}

/// Last `n` lines of a file.
pub async fn tail(path: &Path, n: usize) -> Option<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Some(lines[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_usage() {
        let a = parse_cpu_times("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4").unwrap();
        assert_eq!(a, CpuTimes { idle: 800, total: 1000 });
        let b = parse_cpu_times("cpu  200 0 200 800 100 0 0 0 0 0").unwrap();
        assert!((cpu_usage(a, b) - 66.666).abs() < 0.01);
        assert_eq!(cpu_usage(a, a), 0.0);
        assert!(parse_cpu_times("intr 1 2 3").is_none());
    }

    #[test]
    fn test_parse_cpuinfo() {
        let info = "processor\t: 0\nmodel name\t: AMD Ryzen 7\n\nprocessor\t: 1\nmodel name\t: AMD Ryzen 7\n";
        assert_eq!(parse_cpuinfo(info), (Some("AMD Ryzen 7".to_string()), 2));
    }

    #[test]
    fn test_parse_meminfo() {
        let m = parse_meminfo("MemTotal:  8000 kB\nMemFree: 100 kB\nMemAvailable:  2000 kB\nSwapTotal: 0 kB\n").unwrap();
        assert_eq!(m.total_kb, 8000);
        assert_eq!(m.available_kb, 2000);
        assert_eq!(m.swap_free_kb, 0);
        assert!(parse_meminfo("garbage").is_none());
    }

    #[test]
    fn test_parse_df() {
        let out = "Filesystem 1K-blocks Used Available Use% Mounted on\n/dev/sda1 1000 400 600 40% /\n";
        assert_eq!(parse_df(out), Some(DiskInfo { total_kb: 1000, used_kb: 400, available_kb: 600 }));
        assert!(parse_df("header only").is_none());
    }

    #[test]
    fn test_parse_net_dev() {
        let dev = "Inter-|   Receive |  Transmit\n face |bytes packets|bytes\n    lo: 500 5 0 0 0 0 0 0 500 5 0 0 0 0 0 0\n  eth0: 1000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0\n";
        assert_eq!(parse_net_dev(dev), (1000, 2000));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[tokio::test]
    async fn test_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();
        assert_eq!(tail(&path, 2).await.unwrap(), vec!["c", "d"]);
        assert!(tail(&dir.path().join("none"), 2).await.is_none());
    }

    #[tokio::test]
    async fn test_external_ip() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/").with_body("203.0.113.7\n").create_async().await;
        let http = reqwest::Client::new();
        assert_eq!(external_ip(&http, &server.url()).await.as_deref(), Some("203.0.113.7"));
    }
}
