use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{BackendOptions, BackendSelect, DimensionSelect, EnvControl, LoadOptions, Opts, QueryOptions};
use crate::environment::Environment;
use crate::orchestrator::{ExperimentOrchestrator, LiveStages, Matrix};
use crate::workload::Workload;

#[derive(Parser, Debug, Clone)]
pub struct RunCommand {
    /// 需要测试的后端
    #[arg(long, value_enum, default_value = "all")]
    pub db: BackendSelect,
    /// 需要测试的维度，0 表示全部
    #[arg(long, value_enum, default_value = "0")]
    pub dim: DimensionSelect,
    /// 需要运行的查询负载，默认全部
    #[arg(long, value_enum, value_delimiter = ',')]
    pub workload: Vec<Workload>,
    /// 切换后端前如何重置环境
    #[arg(long, value_enum, default_value = "docker")]
    pub env_control: EnvControl,
    /// 重启后端后等待其稳定的时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 45)]
    pub settle: u64,
    #[command(flatten)]
    pub backend: BackendOptions,
    #[command(flatten)]
    pub load: LoadOptions,
    #[command(flatten)]
    pub query: QueryOptions,
}

impl SubCommandExtend for RunCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let workloads = if self.workload.is_empty() { Workload::ALL.to_vec() } else { self.workload.clone() };
        let matrix = Matrix { backends: self.db.backends(), dimensions: self.dim.dimensions(), workloads };
        info!("后端: {:?}，维度: {:?}", matrix.backends, matrix.dimensions);

        let environment = Environment::new(self.env_control, Duration::from_secs(self.settle));
        let stages = LiveStages::new(
            &self.backend,
            &self.load,
            &self.query,
            environment,
            opts.data_dir.clone(),
            opts.results_dir.clone(),
        )?;

        let report = ExperimentOrchestrator::new(stages, matrix).run().await;
        println!("{}", report);
        info!("结果保存在 {}", opts.results_dir.path().display());
        Ok(())
    }
}
