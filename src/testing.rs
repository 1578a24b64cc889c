//! 单元测试共用的数据集生成与内存后端

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use ndarray::Array2;
use ndarray_npy::write_npy;
use serde_json::json;

use crate::config::DataDir;
use crate::dataset::{Batch, Dimension};
use crate::error::{BenchError, Result};
use crate::store::{BackendKind, CollectionSchema, Filter, IndexParams, InsertOutcome, SearchRequest, VectorStore};

/// 在 `dir` 下生成一个 `rows` 行的数据集，向量的值由行号决定
pub fn write_dataset(dir: &Path, dimension: Dimension, rows: usize) -> DataDir {
    let data_dir: DataDir = dir.to_str().unwrap().parse().unwrap();
    fs::create_dir_all(data_dir.experiment(dimension)).unwrap();

    let dim = dimension.get();
    let vectors = Array2::from_shape_fn((rows, dim), |(i, j)| (i * dim + j) as f32 / 1000.0);
    write_npy(data_dir.vectors(dimension), &vectors).unwrap();

    let mut writer = BufWriter::new(File::create(data_dir.payloads(dimension)).unwrap());
    for i in 0..rows {
        let record = json!({
            "id": i,
            "city_id": (i % 1000) + 1,
            "quality_score": ((i * 37) % 100) as f64 / 100.0,
        });
        writeln!(writer, "{}", record).unwrap();
    }
    writer.flush().unwrap();

    data_dir
}

/// 对后端的一次调用
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ping,
    Exists,
    Drop,
    CreateSchema(usize),
    CreateIndex,
    Insert { start: usize, len: usize },
    Flush,
    Load,
    Release,
    Search { filter: Option<Filter>, top_k: usize },
    List,
    Count,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    batches: Vec<Batch>,
    existing: bool,
    drop_failures: usize,
    fail_insert_at: Option<usize>,
    unreachable_at: Option<usize>,
    drop_per_batch: usize,
    fail_search: bool,
    offline: bool,
}

/// 记录所有调用的内存后端
#[derive(Default)]
pub struct RecordingStore {
    state: Mutex<State>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 集合已经存在
    pub fn with_existing(self) -> Self {
        self.state.lock().unwrap().existing = true;
        self
    }

    /// 前 `n` 次删除集合失败
    pub fn fail_drop(self, n: usize) -> Self {
        self.state.lock().unwrap().drop_failures = n;
        self
    }

    /// 插入从第 `start` 行开始的批次时失败
    pub fn fail_insert_at(self, start: usize) -> Self {
        self.state.lock().unwrap().fail_insert_at = Some(start);
        self
    }

    /// 插入从第 `start` 行开始的批次时后端不可达
    pub fn unreachable_at(self, start: usize) -> Self {
        self.state.lock().unwrap().unreachable_at = Some(start);
        self
    }

    /// 每个批次丢弃 `n` 个对象
    pub fn drop_per_batch(self, n: usize) -> Self {
        self.state.lock().unwrap().drop_per_batch = n;
        self
    }

    pub fn fail_search(self) -> Self {
        self.state.lock().unwrap().fail_search = true;
        self
    }

    /// 所有调用都返回不可达
    pub fn offline(self) -> Self {
        self.state.lock().unwrap().offline = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.state.lock().unwrap().batches.clone()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.offline {
            return Err(BenchError::BackendUnreachable { backend: "recording", message: "offline".into() });
        }
        Ok(())
    }
}

impl VectorStore for RecordingStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Milvus
    }

    fn collection_name(&self, dimension: Dimension) -> String {
        format!("recording_{}d", dimension)
    }

    async fn ping(&self) -> Result<()> {
        self.record(Call::Ping)
    }

    async fn exists(&self, _collection: &str) -> Result<bool> {
        self.record(Call::Exists)?;
        Ok(self.state.lock().unwrap().existing)
    }

    async fn drop_collection(&self, _collection: &str) -> Result<()> {
        self.record(Call::Drop)?;
        let mut state = self.state.lock().unwrap();
        if state.drop_failures > 0 {
            state.drop_failures -= 1;
            return Err(BenchError::Backend { backend: "recording", message: "collection busy".into() });
        }
        state.existing = false;
        Ok(())
    }

    async fn create_schema(&self, _collection: &str, schema: &CollectionSchema) -> Result<()> {
        self.record(Call::CreateSchema(schema.dimension))?;
        self.state.lock().unwrap().existing = true;
        Ok(())
    }

    async fn create_index(&self, _collection: &str, _params: &IndexParams) -> Result<()> {
        self.record(Call::CreateIndex)
    }

    async fn insert(&self, _collection: &str, batch: &Batch) -> Result<InsertOutcome> {
        self.record(Call::Insert { start: batch.start, len: batch.len() })?;
        let mut state = self.state.lock().unwrap();
        if state.fail_insert_at == Some(batch.start) {
            return Err(BenchError::TransientInsertFailure {
                backend: "recording",
                first_id: batch.first_id(),
                rows: batch.len(),
                message: "connection reset".into(),
            });
        }
        if state.unreachable_at == Some(batch.start) {
            return Err(BenchError::BackendUnreachable { backend: "recording", message: "connection refused".into() });
        }
        let dropped = state.drop_per_batch.min(batch.len());
        state.batches.push(batch.clone());
        Ok(InsertOutcome { inserted: batch.len() - dropped, dropped })
    }

    async fn flush(&self, _collection: &str) -> Result<()> {
        self.record(Call::Flush)
    }

    async fn load(&self, _collection: &str) -> Result<()> {
        self.record(Call::Load)
    }

    async fn release(&self, _collection: &str) -> Result<()> {
        self.record(Call::Release)
    }

    async fn search(&self, _collection: &str, request: &SearchRequest<'_>) -> Result<Vec<i64>> {
        self.record(Call::Search { filter: request.filter.clone(), top_k: request.top_k })?;
        if self.state.lock().unwrap().fail_search {
            return Err(BenchError::Backend { backend: "recording", message: "search failed".into() });
        }
        Ok((0..request.top_k as i64).collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.record(Call::List)?;
        let state = self.state.lock().unwrap();
        Ok(if state.existing { vec!["recording_128d".to_string()] } else { vec![] })
    }

    async fn count(&self, _collection: &str) -> Result<u64> {
        self.record(Call::Count)?;
        let state = self.state.lock().unwrap();
        Ok(state.batches.iter().map(|b| b.len() as u64).sum())
    }
}
