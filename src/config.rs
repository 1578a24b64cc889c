use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::*;
use crate::dataset::Dimension;
use crate::store::BackendKind;
use crate::workload::Workload;

#[derive(Parser, Debug, Clone)]
#[command(name = "vecbench", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据集所在目录，每个维度一个 exp_<n>_<dim>d 子目录
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: DataDir,
    /// 统计结果输出目录，每个查询负载一个 CSV 文件
    #[arg(long, global = true, default_value = "results/stats")]
    pub results_dir: ResultsDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 遍历 后端 × 维度 × 规模 矩阵，依次导入数据并运行所有查询负载
    Run(RunCommand),
    /// 向单个后端导入一个维度、一个规模的数据
    Load(LoadCommand),
    /// 对已导入的集合运行查询负载
    Query(QueryCommand),
    /// 检查后端是否在线，并列出集合及其向量数量
    Health(HealthCommand),
    /// 删除所有后端中的所有集合
    Wipe(WipeCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct BackendOptions {
    /// Milvus REST 地址
    #[arg(long, value_name = "URL", default_value = "http://localhost:19530")]
    pub milvus_url: String,
    /// Weaviate REST 地址
    #[arg(long, value_name = "URL", default_value = "http://localhost:8080")]
    pub weaviate_url: String,
    /// 建立连接的超时时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub connect_timeout: u64,
    /// 单个请求的超时时间（秒），导入大批量数据时需要足够长
    #[arg(long, value_name = "SECS", default_value_t = 900)]
    pub request_timeout: u64,
    /// Weaviate 每次批量请求发送的对象数量
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub weaviate_batch_size: usize,
    /// Weaviate 单个对象写入失败后的最大重发次数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub weaviate_retries: usize,
}

impl BackendOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct LoadOptions {
    /// 每次插入的向量数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 5000)]
    pub batch_size: usize,
    /// 每插入多少个批次释放一次已读取的 mmap 页面
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub relief_every: usize,
    /// 删除旧集合的最大尝试次数
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub drop_attempts: usize,
    /// 删除旧集合失败后的等待时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub drop_retry_delay: u64,
    /// 删除旧集合成功后，等待后端完成清理的时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub drop_settle: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { batch_size: 5000, relief_every: 10, drop_attempts: 5, drop_retry_delay: 10, drop_settle: 5 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct QueryOptions {
    /// 每个负载计时的查询数量
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub queries: usize,
    /// 正式计时前的预热查询数量
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub warmup: usize,
    /// 每次查询返回的结果数量
    #[arg(long, value_name = "K", default_value_t = 10)]
    pub top_k: usize,
    /// 每多少次查询采样一次 CPU 与内存占用
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub sample_every: usize,
    /// 查询向量的随机种子，不填则每次随机
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { queries: 100, warmup: 5, top_k: 10, sample_every: 10, seed: None }
    }
}

/// 需要测试的后端
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelect {
    All,
    Milvus,
    Weaviate,
}

impl BackendSelect {
    pub fn backends(self) -> Vec<BackendKind> {
        match self {
            Self::All => BackendKind::ALL.to_vec(),
            Self::Milvus => vec![BackendKind::Milvus],
            Self::Weaviate => vec![BackendKind::Weaviate],
        }
    }
}

/// 需要测试的维度，0 表示全部
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSelect {
    #[value(name = "0")]
    All,
    #[value(name = "128")]
    D128,
    #[value(name = "512")]
    D512,
    #[value(name = "1024")]
    D1024,
}

impl DimensionSelect {
    pub fn dimensions(self) -> Vec<Dimension> {
        match self {
            Self::All => Dimension::ALL.to_vec(),
            Self::D128 => vec![Dimension::D128],
            Self::D512 => vec![Dimension::D512],
            Self::D1024 => vec![Dimension::D1024],
        }
    }
}

/// 环境控制方式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvControl {
    /// 通过 docker 停止其他后端、重启当前后端
    Docker,
    /// 不做任何操作，假设后端已经就绪
    None,
}

#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回某个维度的数据目录
    pub fn experiment(&self, dim: Dimension) -> PathBuf {
        self.path.join(dim.experiment_name())
    }

    /// 返回向量文件的路径
    pub fn vectors(&self, dim: Dimension) -> PathBuf {
        self.experiment(dim).join("vectors.npy")
    }

    /// 返回元数据文件的路径
    pub fn payloads(&self, dim: Dimension) -> PathBuf {
        self.experiment(dim).join("payloads.jsonl")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(Debug, Clone)]
pub struct ResultsDir {
    path: PathBuf,
}

impl ResultsDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回某个负载的结果表路径
    pub fn table(&self, workload: Workload) -> PathBuf {
        self.path.join(workload.file_name())
    }
}

impl FromStr for ResultsDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
