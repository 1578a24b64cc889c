//! 查询负载的统计收集
//!
//! 每次负载运行使用一个独立的 [`MetricsCollector`]，在 `start()` 与 `stop()` 之间记录每次查询的延迟，
//! 并按固定间隔采样主机的 CPU 与内存占用，最后汇总为一行结果追加到 CSV 表中。

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Instant;

use csv::WriterBuilder;
use log::debug;
use tempfile::NamedTempFile;

use crate::dataset::{Dimension, LogicalSize};
use crate::error::{BenchError, Result};
use crate::sysstat::{ProcProbe, ResourceProbe, ResourceSample};
use crate::utils::{MIN_ELAPSED, round_to};

/// 结果表的列名，前三列为运行的标识
pub const HEADER: [&str; 9] = [
    "Database",
    "Dimension",
    "Dataset_Size",
    "Avg Latency (s)",
    "P95 Latency (s)",
    "Std Dev (s)",
    "Throughput (QPS)",
    "Avg CPU (%)",
    "Avg MEM (%)",
];

/// 一次负载运行的统计结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub avg_latency: f64,
    /// 线性插值法计算的 95 分位延迟
    pub p95_latency: f64,
    /// 总体标准差
    pub stddev_latency: f64,
    pub throughput_qps: f64,
    pub avg_cpu: f64,
    pub avg_mem: f64,
}

impl RunSummary {
    /// 按持久化精度取整后的各列
    pub fn columns(&self) -> [String; 6] {
        [
            round_to(self.avg_latency, 5).to_string(),
            round_to(self.p95_latency, 5).to_string(),
            round_to(self.stddev_latency, 5).to_string(),
            round_to(self.throughput_qps, 2).to_string(),
            round_to(self.avg_cpu, 1).to_string(),
            round_to(self.avg_mem, 1).to_string(),
        ]
    }
}

pub struct MetricsCollector {
    latencies: Vec<f64>,
    cpu: Vec<f64>,
    memory: Vec<f64>,
    started: Option<Instant>,
    stopped: Option<Instant>,
    probe: Box<dyn ResourceProbe + Send>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// 使用 /proc 采样主机资源
    pub fn new() -> Self {
        Self::with_probe(Box::new(ProcProbe::new()))
    }

    pub fn with_probe(probe: Box<dyn ResourceProbe + Send>) -> Self {
        Self {
            latencies: vec![],
            cpu: vec![],
            memory: vec![],
            started: None,
            stopped: None,
            probe,
        }
    }

    /// 清空所有样本并开始计时
    pub fn start(&mut self) {
        self.latencies.clear();
        self.cpu.clear();
        self.memory.clear();
        self.stopped = None;
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        self.stopped = Some(Instant::now());
    }

    pub fn record_latency(&mut self, seconds: f64) {
        self.latencies.push(seconds);
    }

    /// 采样一次主机 CPU 与内存占用，读取失败时不记录
    pub fn sample_resources(&mut self) {
        if let Some(ResourceSample { cpu_percent, memory_percent }) = self.probe.sample() {
            self.cpu.push(cpu_percent);
            self.memory.push(memory_percent);
        }
    }

    pub fn latencies(&self) -> &[f64] {
        &self.latencies
    }

    /// 计时窗口的长度（秒），不小于 0.01
    fn elapsed(&self) -> f64 {
        let elapsed = match (self.started, self.stopped) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        };
        elapsed.max(MIN_ELAPSED)
    }

    /// 汇总统计，没有任何延迟样本时返回 None
    pub fn summarize(&self) -> Option<RunSummary> {
        let latency = LatencyStats::from_samples(&self.latencies)?;
        Some(RunSummary {
            avg_latency: latency.mean,
            p95_latency: latency.p95,
            stddev_latency: latency.stddev,
            throughput_qps: self.latencies.len() as f64 / self.elapsed(),
            avg_cpu: mean(&self.cpu).unwrap_or(0.0),
            avg_mem: mean(&self.memory).unwrap_or(0.0),
        })
    }

    /// 向结果表追加一行，返回是否写入
    ///
    /// 文件不存在时连同表头一起原子地创建；之后每次追加都是一次完整行的写入。
    pub fn append(
        &self,
        path: impl AsRef<Path>,
        backend: &str,
        dimension: Dimension,
        size: LogicalSize,
    ) -> Result<bool> {
        let Some(summary) = self.summarize() else {
            debug!("没有延迟样本，跳过写入");
            return Ok(false);
        };

        let mut fields = vec![backend.to_string(), dimension.to_string(), size.to_string()];
        fields.extend(summary.columns());
        append_row(path.as_ref(), &csv_records([HEADER])?, &csv_records([&fields])?)?;
        Ok(true)
    }
}

/// 延迟分布
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean: f64,
    pub p95: f64,
    pub stddev: f64,
}

impl LatencyStats {
    /// 不会改变样本的顺序
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mean = mean(samples)?;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self { mean, p95: percentile(&sorted, 95.0), stddev: variance.sqrt() })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// 线性插值法计算分位数，`sorted` 必须升序且非空
///
/// 位置为 `p / 100 * (n - 1)`，落在两个样本之间时按距离插值。
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// 把若干条记录编码为 CSV 文本
fn csv_records<I, R>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(vec![]);
    for record in records {
        writer.write_record(record)?;
    }
    writer.into_inner().map_err(|e| BenchError::Io(e.into_error()))
}

/// 追加一行到 CSV 文件，文件不存在时先写表头
fn append_row(path: &Path, header: &[u8], row: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    if !path.exists() {
        // 表头和第一行写进临时文件，只有目标不存在时才会被放到位
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(header)?;
        tmp.write_all(row)?;
        match tmp.persist_noclobber(path) {
            Ok(_) => return Ok(()),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.error.into()),
        }
    }

    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(row)?;
    Ok(())
}
