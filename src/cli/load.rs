use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{BackendOptions, LoadOptions, Opts};
use crate::dataset::{Dimension, LogicalSize, VectorDataset};
use crate::loader::{BulkLoader, LoadStatus};
use crate::store::{BackendKind, MilvusStore, WeaviateStore};

#[derive(Parser, Debug, Clone)]
pub struct LoadCommand {
    /// 目标后端
    #[arg(long, value_enum)]
    pub db: BackendKind,
    /// 向量维度
    #[arg(long, value_enum)]
    pub dim: Dimension,
    /// 导入的规模
    #[arg(long, value_enum)]
    pub size: LogicalSize,
    #[command(flatten)]
    pub backend: BackendOptions,
    #[command(flatten)]
    pub load: LoadOptions,
}

impl SubCommandExtend for LoadCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let dataset = VectorDataset::open(&opts.data_dir, self.dim)?;
        let loader = BulkLoader::new(&self.load);
        let result = match self.db {
            BackendKind::Milvus => loader.load(&MilvusStore::new(&self.backend)?, &dataset, self.size).await?,
            BackendKind::Weaviate => loader.load(&WeaviateStore::new(&self.backend)?, &dataset, self.size).await?,
        };

        println!(
            "{} | {}d | {}: {} 个向量，耗时 {:.2}s，{:.2} vectors/s",
            self.db, self.dim, self.size, result.count_loaded, result.elapsed, result.throughput
        );
        if let LoadStatus::Lossy { dropped } = result.status() {
            println!("丢弃 {} 个对象", dropped);
        }
        Ok(())
    }
}
