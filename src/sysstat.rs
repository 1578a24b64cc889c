//! 主机 CPU 与内存占用的采样，数据来自 /proc

use std::fs;

/// 一次采样的结果，都是 0 到 100 的百分比
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

pub trait ResourceProbe {
    /// 读取失败时返回 None
    fn sample(&mut self) -> Option<ResourceSample>;
}

/// /proc/stat 中 cpu 行的累计时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// 两次读数之间的 CPU 占用率
    pub fn usage_since(&self, prev: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(prev.total);
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy.saturating_sub(prev.busy);
        (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// 解析 /proc/stat 的第一行 `cpu user nice system idle iowait irq softirq steal ...`
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if values.len() < 4 {
        return None;
    }
    // guest 与 guest_nice 已经计入 user 与 nice
    let total = values.iter().take(8).sum::<u64>();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes { busy: total.saturating_sub(idle), total })
}

/// 解析 /proc/meminfo，返回已用内存的百分比
pub fn parse_memory_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

/// 读取 /proc 的采样器
///
/// 构造时先读一次 CPU 时间，之后每次采样计算与上一次之间的占用率。
pub struct ProcProbe {
    last_cpu: Option<CpuTimes>,
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcProbe {
    pub fn new() -> Self {
        Self { last_cpu: read_cpu_times() }
    }
}

fn read_cpu_times() -> Option<CpuTimes> {
    parse_cpu_times(&fs::read_to_string("/proc/stat").ok()?)
}

impl ResourceProbe for ProcProbe {
    fn sample(&mut self) -> Option<ResourceSample> {
        let now = read_cpu_times()?;
        let memory_percent = parse_memory_percent(&fs::read_to_string("/proc/meminfo").ok()?)?;
        let cpu_percent = match self.last_cpu.replace(now) {
            Some(prev) => now.usage_since(&prev),
            None => 0.0,
        };
        Some(ResourceSample { cpu_percent, memory_percent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  4705 150 1120 16250 520 0 45 0 0 0
cpu0 1393 40 282 4102 113 0 21 0 0 0
intr 1462898 0 0
";

    const MEMINFO: &str = "MemTotal:       16000000 kB
MemFree:         2000000 kB
MemAvailable:   12000000 kB
Buffers:          300000 kB
";

    #[test]
    fn test_parse_cpu_times() {
        let times = parse_cpu_times(STAT).unwrap();
        assert_eq!(times.total, 4705 + 150 + 1120 + 16250 + 520 + 45);
        assert_eq!(times.busy, 4705 + 150 + 1120 + 45);
    }

    #[test]
    fn test_cpu_usage() {
        let prev = CpuTimes { busy: 100, total: 1000 };
        let now = CpuTimes { busy: 150, total: 1200 };
        assert_eq!(now.usage_since(&prev), 25.0);
        assert_eq!(prev.usage_since(&prev), 0.0);
    }

    #[test]
    fn test_parse_memory_percent() {
        assert_eq!(parse_memory_percent(MEMINFO), Some(25.0));
        assert_eq!(parse_memory_percent("MemTotal: 100 kB\n"), None);
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_cpu_times("intr 1 2 3\n"), None);
        assert_eq!(parse_cpu_times("cpu a b c d\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_probe() {
        let mut probe = ProcProbe::new();
        let sample = probe.sample().unwrap();
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
        assert!((0.0..=100.0).contains(&sample.memory_percent));
    }
}
