//! 带计时的查询负载
//!
//! 每个负载从已导入的前缀中随机抽取若干行作为查询向量，按顺序逐条查询，
//! 统计写入该负载自己的结果表。

use std::fmt;
use std::path::Path;
use std::time::Instant;

use clap::ValueEnum;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::QueryOptions;
use crate::dataset::{LogicalSize, VectorDataset};
use crate::error::{BenchError, Result};
use crate::metrics::{MetricsCollector, RunSummary};
use crate::store::{CollectionSchema, Filter, Metric, SearchRequest, VectorStore};
use crate::utils::round_to;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    /// 按城市精确过滤
    City,
    /// 按质量分数范围过滤
    Range,
    /// 同时按城市与质量分数过滤
    Combined,
    /// 不带过滤条件
    Similarity,
    /// 不带过滤条件，结果单独成表，与 similarity 对照
    PureIp,
}

impl Workload {
    pub const ALL: [Workload; 5] = [Self::City, Self::Range, Self::Combined, Self::Similarity, Self::PureIp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::City => "city",
            Self::Range => "range",
            Self::Combined => "combined",
            Self::Similarity => "similarity",
            Self::PureIp => "pure-ip",
        }
    }

    /// 结果表的文件名
    pub fn file_name(self) -> &'static str {
        match self {
            Self::City => "query1_city_filter.csv",
            Self::Range => "query2_range_filter.csv",
            Self::Combined => "query3_combined_filter.csv",
            Self::Similarity => "query4_pure_similarity.csv",
            Self::PureIp => "query5_pure_ip.csv",
        }
    }

    /// 随机生成一个过滤条件
    pub fn filter<R: Rng>(self, rng: &mut R) -> Option<Filter> {
        let city = |rng: &mut R| Filter::CityEq(rng.random_range(1..=1000));
        let range = |rng: &mut R| Filter::QualityAbove(round_to(rng.random_range(0.4..=0.8), 2) as f32);
        match self {
            Self::City => Some(city(rng)),
            Self::Range => Some(range(rng)),
            Self::Combined => {
                let c = city(rng);
                Some(Filter::And(Box::new(c), Box::new(range(rng))))
            }
            Self::Similarity | Self::PureIp => None,
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条查询
#[derive(Debug, Clone)]
pub struct Query {
    /// 查询向量来自数据集的哪一行
    pub row: usize,
    pub vector: Vec<f32>,
    pub filter: Option<Filter>,
}

impl Query {
    fn request(&self, top_k: usize, metric: Metric) -> SearchRequest<'_> {
        SearchRequest { vector: &self.vector, filter: self.filter.clone(), top_k, metric }
    }
}

/// 从数据集的前 `size.count()` 行中抽取 `n` 条查询
pub fn plan_queries<R: Rng>(
    workload: Workload,
    dataset: &VectorDataset,
    size: LogicalSize,
    n: usize,
    rng: &mut R,
) -> Result<Vec<Query>> {
    let rows = size.count().min(dataset.total_count());
    if rows == 0 {
        return Err(BenchError::DatasetShape("数据集为空，无法生成查询".into()));
    }
    (0..n)
        .map(|_| {
            let row = rng.random_range(0..rows);
            Ok(Query { row, vector: dataset.row(row)?, filter: workload.filter(rng) })
        })
        .collect()
}

pub struct WorkloadRunner {
    opts: QueryOptions,
}

impl WorkloadRunner {
    pub fn new(opts: &QueryOptions) -> Self {
        Self { opts: opts.clone() }
    }

    fn rng(&self) -> StdRng {
        match self.opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// 运行一个负载，并把统计追加到 `table`
    pub async fn run<S: VectorStore>(
        &self,
        store: &S,
        dataset: &VectorDataset,
        size: LogicalSize,
        workload: Workload,
        table: &Path,
    ) -> Result<Option<RunSummary>> {
        self.run_with(store, dataset, size, workload, table, MetricsCollector::new()).await
    }

    pub async fn run_with<S: VectorStore>(
        &self,
        store: &S,
        dataset: &VectorDataset,
        size: LogicalSize,
        workload: Workload,
        table: &Path,
        mut collector: MetricsCollector,
    ) -> Result<Option<RunSummary>> {
        let dimension = dataset.dimension();
        let collection = store.collection_name(dimension);
        let queries = plan_queries(workload, dataset, size, self.opts.queries, &mut self.rng())?;

        info!("运行负载 {} | {} | {}d | {}", workload, store.backend(), dimension, size);
        store.load(&collection).await?;

        let metric = CollectionSchema::benchmark(dimension).index.metric;
        let measured = self.measure(store, &collection, &queries, metric, &mut collector).await;
        if let Err(e) = store.release(&collection).await {
            warn!("释放集合 {} 失败: {}", collection, e);
        }
        measured?;

        let summary = collector.summarize();
        if collector.append(table, store.backend().as_str(), dimension, size)? {
            debug!("结果已写入 {}", table.display());
        }
        if let Some(s) = &summary {
            info!(
                "{}: 平均 {:.5}s，P95 {:.5}s，{:.2} QPS",
                workload, s.avg_latency, s.p95_latency, s.throughput_qps
            );
        }
        Ok(summary)
    }

    async fn measure<S: VectorStore>(
        &self,
        store: &S,
        collection: &str,
        queries: &[Query],
        metric: Metric,
        collector: &mut MetricsCollector,
    ) -> Result<()> {
        let Some(first) = queries.first() else {
            return Ok(());
        };
        for _ in 0..self.opts.warmup {
            store.search(collection, &first.request(1, metric)).await?;
        }

        collector.start();
        for (i, query) in queries.iter().enumerate() {
            let request = query.request(self.opts.top_k, metric);
            let start = Instant::now();
            store.search(collection, &request).await?;
            collector.record_latency(start.elapsed().as_secs_f64());
            if self.opts.sample_every > 0 && i % self.opts.sample_every == 0 {
                collector.sample_resources();
            }
        }
        collector.stop();
        Ok(())
    }
}
