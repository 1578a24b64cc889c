use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{BackendOptions, Opts, QueryOptions};
use crate::dataset::{Dimension, LogicalSize, VectorDataset};
use crate::store::{BackendKind, MilvusStore, VectorStore, WeaviateStore};
use crate::workload::{Workload, WorkloadRunner};

#[derive(Parser, Debug, Clone)]
pub struct QueryCommand {
    /// 目标后端
    #[arg(long, value_enum)]
    pub db: BackendKind,
    /// 向量维度
    #[arg(long, value_enum)]
    pub dim: Dimension,
    /// 已导入的规模，查询向量从这个前缀中抽取
    #[arg(long, value_enum)]
    pub size: LogicalSize,
    /// 只运行某个负载，默认全部
    #[arg(long, value_enum)]
    pub workload: Option<Workload>,
    #[command(flatten)]
    pub backend: BackendOptions,
    #[command(flatten)]
    pub query: QueryOptions,
}

impl QueryCommand {
    async fn run_all<S: VectorStore>(&self, store: &S, opts: &Opts) -> Result<()> {
        let dataset = VectorDataset::open(&opts.data_dir, self.dim)?;
        let runner = WorkloadRunner::new(&self.query);
        let workloads = self.workload.map_or(Workload::ALL.to_vec(), |w| vec![w]);

        for workload in workloads {
            let table = opts.results_dir.table(workload);
            match runner.run(store, &dataset, self.size, workload, &table).await? {
                Some(s) => println!(
                    "{}: 平均 {:.5}s，P95 {:.5}s，标准差 {:.5}s，{:.2} QPS，CPU {:.1}%，内存 {:.1}%",
                    workload, s.avg_latency, s.p95_latency, s.stddev_latency, s.throughput_qps, s.avg_cpu, s.avg_mem
                ),
                None => println!("{}: 没有数据", workload),
            }
        }
        Ok(())
    }
}

impl SubCommandExtend for QueryCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        match self.db {
            BackendKind::Milvus => self.run_all(&MilvusStore::new(&self.backend)?, opts).await,
            BackendKind::Weaviate => self.run_all(&WeaviateStore::new(&self.backend)?, opts).await,
        }
    }
}
