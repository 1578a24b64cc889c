//! 遍历 后端 × 维度 × 规模 矩阵

use std::fmt;
use std::future::Future;

use log::{error, info};

use crate::config::{BackendOptions, DataDir, LoadOptions, QueryOptions, ResultsDir};
use crate::dataset::{Dimension, LogicalSize, VectorDataset};
use crate::environment::Environment;
use crate::error::Result;
use crate::loader::{BulkLoader, LoadResult, LoadStatus};
use crate::metrics::RunSummary;
use crate::store::{BackendKind, MilvusStore, WeaviateStore};
use crate::workload::{Workload, WorkloadRunner};

/// 矩阵中每个阶段的执行者
pub trait Stages: Send + Sync {
    /// 切换到某个后端前调用一次
    fn activate(&self, backend: BackendKind) -> impl Future<Output = ()> + Send;

    fn load(
        &self,
        backend: BackendKind,
        dimension: Dimension,
        size: LogicalSize,
    ) -> impl Future<Output = Result<LoadResult>> + Send;

    fn query(
        &self,
        backend: BackendKind,
        dimension: Dimension,
        size: LogicalSize,
        workload: Workload,
    ) -> impl Future<Output = Result<Option<RunSummary>>> + Send;
}

/// 需要遍历的矩阵，规模总是按从小到大的顺序全部运行
#[derive(Debug, Clone)]
pub struct Matrix {
    pub backends: Vec<BackendKind>,
    pub dimensions: Vec<Dimension>,
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(LoadResult),
    /// 导入失败，跳过该格的所有负载
    Skipped(String),
}

#[derive(Debug, Clone)]
pub enum WorkloadOutcome {
    Recorded(RunSummary),
    /// 没有延迟样本，未写入结果
    Empty,
    Failed(String),
}

/// 矩阵中一格的结果
#[derive(Debug, Clone)]
pub struct CellReport {
    pub backend: BackendKind,
    pub dimension: Dimension,
    pub size: LogicalSize,
    pub load: LoadOutcome,
    pub workloads: Vec<(Workload, WorkloadOutcome)>,
}

#[derive(Debug, Clone, Default)]
pub struct MatrixReport {
    pub cells: Vec<CellReport>,
}

impl MatrixReport {
    pub fn skipped(&self) -> usize {
        self.cells.iter().filter(|c| matches!(c.load, LoadOutcome::Skipped(_))).count()
    }
}

impl fmt::Display for CellReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {:>5}d {:<6} ", self.backend.as_str(), self.dimension.get(), self.size.as_str())?;
        match &self.load {
            LoadOutcome::Skipped(reason) => return write!(f, "跳过: {}", reason),
            LoadOutcome::Loaded(r) => {
                write!(f, "导入 {} ({:.2} vectors/s)", r.count_loaded, r.throughput)?;
                if let LoadStatus::Lossy { dropped } = r.status() {
                    write!(f, " 丢弃 {}", dropped)?;
                }
            }
        }
        for (workload, outcome) in &self.workloads {
            match outcome {
                WorkloadOutcome::Recorded(s) => {
                    write!(f, " | {} {:.5}s p95 {:.5}s", workload, s.avg_latency, s.p95_latency)?
                }
                WorkloadOutcome::Empty => write!(f, " | {} 无数据", workload)?,
                WorkloadOutcome::Failed(e) => write!(f, " | {} 失败: {}", workload, e)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cell in &self.cells {
            writeln!(f, "{}", cell)?;
        }
        write!(f, "共 {} 格，跳过 {} 格", self.cells.len(), self.skipped())
    }
}

pub struct ExperimentOrchestrator<T> {
    stages: T,
    matrix: Matrix,
}

impl<T: Stages> ExperimentOrchestrator<T> {
    pub fn new(stages: T, matrix: Matrix) -> Self {
        Self { stages, matrix }
    }

    /// 依次运行矩阵中的每一格，单格的失败不会中止整个矩阵
    pub async fn run(&self) -> MatrixReport {
        let mut report = MatrixReport::default();
        for &backend in &self.matrix.backends {
            for &dimension in &self.matrix.dimensions {
                self.stages.activate(backend).await;
                for size in LogicalSize::ALL {
                    report.cells.push(self.run_cell(backend, dimension, size).await);
                }
            }
        }
        report
    }

    async fn run_cell(&self, backend: BackendKind, dimension: Dimension, size: LogicalSize) -> CellReport {
        info!(">>> {} | {}d | {}", backend, dimension, size);
        let result = match self.stages.load(backend, dimension, size).await {
            Ok(result) => result,
            Err(e) => {
                error!("导入失败，跳过 {} | {}d | {} 的查询: {}", backend, dimension, size, e);
                let load = LoadOutcome::Skipped(e.to_string());
                return CellReport { backend, dimension, size, load, workloads: vec![] };
            }
        };

        let mut cell = CellReport { backend, dimension, size, load: LoadOutcome::Loaded(result), workloads: vec![] };
        for &workload in &self.matrix.workloads {
            let outcome = match self.stages.query(backend, dimension, size, workload).await {
                Ok(Some(summary)) => WorkloadOutcome::Recorded(summary),
                Ok(None) => WorkloadOutcome::Empty,
                Err(e) => {
                    error!("负载 {} 失败: {}", workload, e);
                    WorkloadOutcome::Failed(e.to_string())
                }
            };
            cell.workloads.push((workload, outcome));
        }
        cell
    }
}

/// 连接真实后端的阶段执行者
pub struct LiveStages {
    milvus: MilvusStore,
    weaviate: WeaviateStore,
    loader: BulkLoader,
    runner: WorkloadRunner,
    environment: Environment,
    data_dir: DataDir,
    results_dir: ResultsDir,
}

impl LiveStages {
    pub fn new(
        backend: &BackendOptions,
        load: &LoadOptions,
        query: &QueryOptions,
        environment: Environment,
        data_dir: DataDir,
        results_dir: ResultsDir,
    ) -> Result<Self> {
        Ok(Self {
            milvus: MilvusStore::new(backend)?,
            weaviate: WeaviateStore::new(backend)?,
            loader: BulkLoader::new(load),
            runner: WorkloadRunner::new(query),
            environment,
            data_dir,
            results_dir,
        })
    }
}

impl Stages for LiveStages {
    async fn activate(&self, backend: BackendKind) {
        self.environment.activate(backend).await
    }

    async fn load(&self, backend: BackendKind, dimension: Dimension, size: LogicalSize) -> Result<LoadResult> {
        let dataset = VectorDataset::open(&self.data_dir, dimension)?;
        match backend {
            BackendKind::Milvus => self.loader.load(&self.milvus, &dataset, size).await,
            BackendKind::Weaviate => self.loader.load(&self.weaviate, &dataset, size).await,
        }
    }

    async fn query(
        &self,
        backend: BackendKind,
        dimension: Dimension,
        size: LogicalSize,
        workload: Workload,
    ) -> Result<Option<RunSummary>> {
        let dataset = VectorDataset::open(&self.data_dir, dimension)?;
        let table = self.results_dir.table(workload);
        match backend {
            BackendKind::Milvus => self.runner.run(&self.milvus, &dataset, size, workload, &table).await,
            BackendKind::Weaviate => self.runner.run(&self.weaviate, &dataset, size, workload, &table).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::BenchError;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Activate(BackendKind),
        Load(BackendKind, Dimension, LogicalSize),
        Query(BackendKind, Dimension, LogicalSize, Workload),
    }

    /// 在指定格导入失败的阶段执行者
    #[derive(Default)]
    struct ScriptedStages {
        events: Mutex<Vec<Event>>,
        fail_load: Vec<(BackendKind, Dimension, LogicalSize)>,
        fail_query: Option<Workload>,
    }

    impl ScriptedStages {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    fn summary() -> RunSummary {
        RunSummary {
            avg_latency: 0.01,
            p95_latency: 0.02,
            stddev_latency: 0.001,
            throughput_qps: 100.0,
            avg_cpu: 10.0,
            avg_mem: 20.0,
        }
    }

    impl Stages for ScriptedStages {
        async fn activate(&self, backend: BackendKind) {
            self.events.lock().unwrap().push(Event::Activate(backend));
        }

        async fn load(&self, backend: BackendKind, dimension: Dimension, size: LogicalSize) -> Result<LoadResult> {
            self.events.lock().unwrap().push(Event::Load(backend, dimension, size));
            if self.fail_load.contains(&(backend, dimension, size)) {
                return Err(BenchError::Backend { backend: "scripted", message: "load failed".into() });
            }
            Ok(LoadResult { requested: 10, count_loaded: 10, dropped: 0, elapsed: 1.0, throughput: 10.0 })
        }

        async fn query(
            &self,
            backend: BackendKind,
            dimension: Dimension,
            size: LogicalSize,
            workload: Workload,
        ) -> Result<Option<RunSummary>> {
            self.events.lock().unwrap().push(Event::Query(backend, dimension, size, workload));
            if self.fail_query == Some(workload) {
                return Err(BenchError::Backend { backend: "scripted", message: "query failed".into() });
            }
            Ok(Some(summary()))
        }
    }

    fn matrix(workloads: Vec<Workload>) -> Matrix {
        Matrix { backends: vec![BackendKind::Milvus], dimensions: vec![Dimension::D128], workloads }
    }

    #[tokio::test]
    async fn test_skip_on_load_failure() {
        let stages = ScriptedStages {
            fail_load: vec![(BackendKind::Milvus, Dimension::D128, LogicalSize::Small)],
            ..Default::default()
        };
        let orchestrator = ExperimentOrchestrator::new(stages, matrix(vec![Workload::City]));
        let report = orchestrator.run().await;

        use BackendKind::Milvus;
        use Dimension::D128;
        assert_eq!(
            orchestrator.stages.events(),
            vec![
                Event::Activate(Milvus),
                Event::Load(Milvus, D128, LogicalSize::Small),
                Event::Load(Milvus, D128, LogicalSize::Medium),
                Event::Query(Milvus, D128, LogicalSize::Medium, Workload::City),
                Event::Load(Milvus, D128, LogicalSize::Big),
                Event::Query(Milvus, D128, LogicalSize::Big, Workload::City),
            ]
        );
        assert_eq!(report.cells.len(), 3);
        assert_eq!(report.skipped(), 1);
        assert!(report.cells[0].workloads.is_empty());
        assert!(report.to_string().contains("跳过: scripted 返回错误: load failed"));
    }

    #[tokio::test]
    async fn test_failed_workload_does_not_stop_others() {
        let stages = ScriptedStages { fail_query: Some(Workload::Range), ..Default::default() };
        let orchestrator = ExperimentOrchestrator::new(stages, matrix(Workload::ALL.to_vec()));
        let report = orchestrator.run().await;

        for cell in &report.cells {
            let names = cell.workloads.iter().map(|(w, _)| *w).collect::<Vec<_>>();
            assert_eq!(names, Workload::ALL.to_vec());
            assert!(matches!(cell.workloads[1].1, WorkloadOutcome::Failed(_)));
            assert!(matches!(cell.workloads[3].1, WorkloadOutcome::Recorded(_)));
            assert_eq!(cell.workloads[4].0, Workload::PureIp);
            assert!(matches!(cell.workloads[4].1, WorkloadOutcome::Recorded(_)));
        }
    }

    #[tokio::test]
    async fn test_activate_per_backend_and_dimension() {
        let stages = ScriptedStages::default();
        let matrix = Matrix {
            backends: BackendKind::ALL.to_vec(),
            dimensions: vec![Dimension::D128, Dimension::D512],
            workloads: vec![],
        };
        let orchestrator = ExperimentOrchestrator::new(stages, matrix);
        let report = orchestrator.run().await;

        let activations = orchestrator
            .stages
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Activate(_)))
            .collect::<Vec<_>>();
        assert_eq!(
            activations,
            vec![
                Event::Activate(BackendKind::Milvus),
                Event::Activate(BackendKind::Milvus),
                Event::Activate(BackendKind::Weaviate),
                Event::Activate(BackendKind::Weaviate),
            ]
        );
        assert_eq!(report.cells.len(), 12);
    }
}
