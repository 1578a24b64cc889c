use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::config::LoadOptions;
use crate::dataset::{LogicalSize, VectorDataset};
use crate::error::Result;
use crate::retry::{RetryPolicy, Retried};
use crate::store::{CollectionSchema, VectorStore};
use crate::utils::{MIN_ELAPSED, pb_style};

/// 导入是否有数据丢失
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// 所有向量都已写入
    Complete,
    /// 部分对象在重试耗尽后被丢弃
    Lossy { dropped: usize },
}

/// 一次导入的结果
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    /// 请求导入的数量
    pub requested: usize,
    /// 实际写入的数量，不含被丢弃的对象
    pub count_loaded: usize,
    /// 被丢弃的对象数量
    pub dropped: usize,
    /// 耗时（秒），至少为 0.01
    pub elapsed: f64,
    /// 每秒写入的向量数，只按实际写入的数量计算
    pub throughput: f64,
}

impl LoadResult {
    fn new(requested: usize, count_loaded: usize, dropped: usize, elapsed: Duration) -> Self {
        let elapsed = elapsed.as_secs_f64().max(MIN_ELAPSED);
        Self { requested, count_loaded, dropped, elapsed, throughput: count_loaded as f64 / elapsed }
    }

    pub fn status(&self) -> LoadStatus {
        match self.dropped {
            0 => LoadStatus::Complete,
            dropped => LoadStatus::Lossy { dropped },
        }
    }
}

/// 批量导入器
pub struct BulkLoader {
    batch_size: usize,
    relief_every: usize,
    drop_retry: RetryPolicy,
    drop_settle: Duration,
}

impl BulkLoader {
    pub fn new(opts: &LoadOptions) -> Self {
        Self {
            batch_size: opts.batch_size,
            relief_every: opts.relief_every,
            drop_retry: RetryPolicy::new(opts.drop_attempts, Duration::from_secs(opts.drop_retry_delay)),
            drop_settle: Duration::from_secs(opts.drop_settle),
        }
    }

    /// 清空旧集合，建表后按行号顺序导入数据集的前 `size.count()` 个向量
    ///
    /// 删除旧集合失败不会中止导入；插入失败时是否中止由后端适配器决定。
    pub async fn load<S: VectorStore>(
        &self,
        store: &S,
        dataset: &VectorDataset,
        size: LogicalSize,
    ) -> Result<LoadResult> {
        info!("开始导入 {} | {}d | {}", store.backend(), dataset.dimension(), size);
        self.load_limit(store, dataset, size.count()).await
    }

    /// 导入数据集的前 `limit` 个向量
    pub async fn load_limit<S: VectorStore>(
        &self,
        store: &S,
        dataset: &VectorDataset,
        limit: usize,
    ) -> Result<LoadResult> {
        let dimension = dataset.dimension();
        let batches = dataset.batches(limit, self.batch_size)?;
        let collection = store.collection_name(dimension);

        info!("目标: {} 个向量，每批 {} 个", limit, self.batch_size);

        self.reset(store, &collection).await;

        let schema = CollectionSchema::benchmark(dimension);
        info!("创建集合: {}", collection);
        store.create_schema(&collection, &schema).await?;
        store.create_index(&collection, &schema.index).await?;

        let pb = ProgressBar::new(limit as u64).with_style(pb_style());
        let start = Instant::now();
        let (mut loaded, mut dropped) = (0, 0);

        for (n, batch) in batches.enumerate() {
            let batch = batch?;
            let outcome = store.insert(&collection, &batch).await?;
            loaded += outcome.inserted;
            dropped += outcome.dropped;
            pb.inc(batch.len() as u64);

            if self.relief_every > 0 && (n + 1) % self.relief_every == 0 {
                if let Err(e) = dataset.release(0..batch.end()) {
                    debug!("释放 mmap 页面失败: {}", e);
                }
            }
        }
        pb.finish_and_clear();

        info!("写入完成，刷新到磁盘……");
        store.flush(&collection).await?;
        store.load(&collection).await?;

        let result = LoadResult::new(limit, loaded, dropped, start.elapsed());
        if let LoadStatus::Lossy { dropped } = result.status() {
            warn!("{} 个对象写入失败被丢弃", dropped);
        }
        info!(
            "导入完成: {} 个向量，耗时 {:.2}s，吞吐 {:.2} vectors/s",
            result.count_loaded, result.elapsed, result.throughput
        );
        Ok(result)
    }

    /// 删除旧集合，失败时按策略重试，重试耗尽后继续导入
    async fn reset<S: VectorStore>(&self, store: &S, collection: &str) {
        let result = self
            .drop_retry
            .run(|_| async move {
                let dropped = store.reset(collection).await?;
                if dropped {
                    info!("已删除旧集合: {}", collection);
                    tokio::time::sleep(self.drop_settle).await;
                }
                Ok::<_, crate::error::BenchError>(dropped)
            })
            .await;

        if let Retried::Exhausted { error, attempts } = result {
            warn!("{} 次尝试后仍无法删除旧集合 {}，继续导入: {}", attempts, collection, error);
        }
    }
}
