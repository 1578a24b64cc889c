mod milvus;
mod weaviate;

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use clap::ValueEnum;
pub use milvus::*;
use reqwest::Client;
pub use weaviate::*;

use crate::config::BackendOptions;
use crate::dataset::{Batch, Dimension};
use crate::error::{BenchError, Result};

/// 被测试的向量数据库
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Milvus,
    Weaviate,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [Self::Milvus, Self::Weaviate];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Milvus => "milvus",
            Self::Weaviate => "weaviate",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int32,
    Float,
}

/// 标量元数据字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarField {
    pub name: &'static str,
    pub kind: ScalarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
}

/// 向量索引配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParams {
    /// 被索引的向量字段
    pub field: &'static str,
    pub metric: Metric,
    /// HNSW 每个节点的最大连接数
    pub m: usize,
    /// HNSW 构建时的候选列表大小
    pub ef_construction: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self { field: VECTOR_FIELD, metric: Metric::L2, m: 16, ef_construction: 256 }
    }
}

pub const ID_FIELD: &str = "id";
pub const VECTOR_FIELD: &str = "vector";
pub const CITY_FIELD: &str = "city_id";
pub const QUALITY_FIELD: &str = "quality_score";

/// 集合结构：int64 主键、向量字段与标量字段
///
/// 索引配置也放在这里，不支持单独建索引的后端会在建表时直接使用它。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub dimension: usize,
    pub fields: Vec<ScalarField>,
    pub index: IndexParams,
}

impl CollectionSchema {
    /// 基准测试使用的集合结构
    pub fn benchmark(dimension: Dimension) -> Self {
        Self {
            dimension: dimension.get(),
            fields: vec![
                ScalarField { name: CITY_FIELD, kind: ScalarKind::Int32 },
                ScalarField { name: QUALITY_FIELD, kind: ScalarKind::Float },
            ],
            index: IndexParams::default(),
        }
    }
}

/// 标量过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// city_id == 值
    CityEq(i32),
    /// quality_score > 值
    QualityAbove(f32),
    And(Box<Filter>, Box<Filter>),
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub vector: &'a [f32],
    pub filter: Option<Filter>,
    pub top_k: usize,
    /// 与建索引时一致的距离度量
    pub metric: Metric,
}

/// 一次批量插入的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// 成功写入的数量
    pub inserted: usize,
    /// 重试耗尽后被丢弃的数量
    pub dropped: usize,
}

/// 向量数据库的能力接口，每个后端实现一次
///
/// 所有调用都会阻塞到后端返回为止，调用方按顺序逐个等待。
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// 某个维度对应的集合名
    fn collection_name(&self, dimension: Dimension) -> String;

    /// 检查后端是否在线
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    fn exists(&self, collection: &str) -> impl Future<Output = Result<bool>> + Send;

    fn drop_collection(&self, collection: &str) -> impl Future<Output = Result<()>> + Send;

    /// 如果集合存在则删除，返回是否删除了集合
    fn reset(&self, collection: &str) -> impl Future<Output = Result<bool>> + Send {
        async move {
            if self.exists(collection).await? {
                self.drop_collection(collection).await?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    fn create_schema(
        &self,
        collection: &str,
        schema: &CollectionSchema,
    ) -> impl Future<Output = Result<()>> + Send;

    /// 建立向量索引，不需要单独建索引的后端可以什么都不做
    fn create_index(
        &self,
        collection: &str,
        params: &IndexParams,
    ) -> impl Future<Output = Result<()>> + Send;

    fn insert(
        &self,
        collection: &str,
        batch: &Batch,
    ) -> impl Future<Output = Result<InsertOutcome>> + Send;

    fn flush(&self, collection: &str) -> impl Future<Output = Result<()>> + Send;

    /// 将集合加载到内存以供查询，没有这一步的后端可以什么都不做
    fn load(&self, collection: &str) -> impl Future<Output = Result<()>> + Send;

    /// 查询结束后释放集合
    fn release(&self, collection: &str) -> impl Future<Output = Result<()>> + Send;

    /// 返回按相似度排序的向量 ID
    fn search(
        &self,
        collection: &str,
        request: &SearchRequest<'_>,
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;

    fn list_collections(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// 集合中的向量数量
    fn count(&self, collection: &str) -> impl Future<Output = Result<u64>> + Send;
}

/// 按行返回批次中的向量
pub(crate) fn batch_rows(batch: &Batch) -> impl Iterator<Item = Cow<'_, [f32]>> {
    batch.vectors.rows().into_iter().map(|row| match row.to_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(row.to_vec()),
    })
}

fn build_client(backend: &'static str, opts: &BackendOptions) -> Result<Client> {
    Client::builder()
        .connect_timeout(opts.connect_timeout())
        .timeout(opts.request_timeout())
        .build()
        .map_err(|e| BenchError::from_http(backend, e))
}
