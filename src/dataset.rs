use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::ops::Range;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use memmap2::Mmap;
use ndarray::{Array2, ArrayView2, s};
use ndarray_npy::ViewNpyExt;
use serde::Deserialize;

use crate::config::DataDir;
use crate::error::{BenchError, Result};

/// 实验使用的向量维度
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    #[value(name = "128")]
    D128,
    #[value(name = "512")]
    D512,
    #[value(name = "1024")]
    D1024,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Self::D128, Self::D512, Self::D1024];

    pub fn get(self) -> usize {
        match self {
            Self::D128 => 128,
            Self::D512 => 512,
            Self::D1024 => 1024,
        }
    }

    /// 数据目录名，如 `exp_1_128d`
    pub fn experiment_name(self) -> String {
        let n = match self {
            Self::D128 => 1,
            Self::D512 => 2,
            Self::D1024 => 3,
        };
        format!("exp_{}_{}d", n, self.get())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// 数据集规模，取主数据集的前缀
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalSize {
    Small,
    Medium,
    Big,
}

impl LogicalSize {
    /// 按从小到大排列
    pub const ALL: [LogicalSize; 3] = [Self::Small, Self::Medium, Self::Big];

    pub fn count(self) -> usize {
        match self {
            Self::Small => 100_000,
            Self::Medium => 500_000,
            Self::Big => 2_500_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Big => "big",
        }
    }
}

impl fmt::Display for LogicalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// payloads.jsonl 中的一行
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Record {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub city_id: i32,
    #[serde(default)]
    pub quality_score: f32,
}

/// 一次插入的数据，按列存储
#[derive(Debug, Clone)]
pub struct Batch {
    /// 第一行在数据集中的行号
    pub start: usize,
    /// 向量 ID，等于其在数据集中的行号
    pub ids: Vec<i64>,
    /// 向量，大小为 (n, dim)
    pub vectors: Array2<f32>,
    pub city_ids: Vec<i32>,
    pub quality_scores: Vec<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 最后一行之后的行号
    pub fn end(&self) -> usize {
        self.start + self.len()
    }

    pub fn first_id(&self) -> i64 {
        self.ids.first().copied().unwrap_or(self.start as i64)
    }
}

/// 只读的向量数据集
///
/// 向量文件通过 mmap 访问，任何时候都不会被完整读入内存；元数据按行流式读取。
pub struct VectorDataset {
    dimension: Dimension,
    mmap: Mmap,
    /// npy 文件头的长度
    header_len: usize,
    total: usize,
    payloads: PathBuf,
}

impl VectorDataset {
    /// 打开某个维度的主数据集
    pub fn open(data_dir: &DataDir, dimension: Dimension) -> Result<Self> {
        Self::open_files(data_dir.vectors(dimension), data_dir.payloads(dimension), dimension)
    }

    pub fn open_files(
        vectors: impl AsRef<Path>,
        payloads: impl AsRef<Path>,
        dimension: Dimension,
    ) -> Result<Self> {
        let (vectors, payloads) = (vectors.as_ref(), payloads.as_ref());
        for path in [vectors, payloads] {
            if !path.is_file() {
                return Err(BenchError::DataUnavailable { path: path.to_path_buf() });
            }
        }

        let file = File::open(vectors)?;
        // SAFETY: 数据集生成后只读，运行期间不会被修改
        let mmap = unsafe { Mmap::map(&file)? };
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Sequential)?;

        let view = ArrayView2::<f32>::view_npy(&mmap[..])?;
        if view.ncols() != dimension.get() {
            return Err(BenchError::DatasetShape(format!(
                "{} 的维度为 {}，期望 {}",
                vectors.display(),
                view.ncols(),
                dimension.get()
            )));
        }
        let total = view.nrows();
        let header_len = mmap.len() - total * dimension.get() * size_of::<f32>();

        Ok(Self { dimension, mmap, header_len, total, payloads: payloads.to_path_buf() })
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// 数据集中的向量总数
    pub fn total_count(&self) -> usize {
        self.total
    }

    /// 整个向量数组的只读视图
    pub fn view(&self) -> Result<ArrayView2<'_, f32>> {
        Ok(ArrayView2::<f32>::view_npy(&self.mmap[..])?)
    }

    /// 复制出第 `index` 个向量
    pub fn row(&self, index: usize) -> Result<Vec<f32>> {
        if index >= self.total {
            return Err(BenchError::DatasetShape(format!("行号 {} 超出范围 {}", index, self.total)));
        }
        Ok(self.view()?.row(index).to_vec())
    }

    /// 按行号顺序读取前 `limit` 行，每 `batch_size` 行为一个批次
    pub fn batches(&self, limit: usize, batch_size: usize) -> Result<BatchReader<'_>> {
        if limit > self.total {
            return Err(BenchError::DatasetShape(format!(
                "请求 {} 个向量，但数据集只有 {} 个",
                limit, self.total
            )));
        }
        if batch_size == 0 {
            return Err(BenchError::DatasetShape("batch size 不能为 0".to_string()));
        }
        let records = BufReader::new(File::open(&self.payloads)?).lines();
        Ok(BatchReader { view: self.view()?, records, next: 0, limit, batch_size })
    }

    /// 提示内核释放 `rows` 范围内已经读取过的页面
    ///
    /// 映射是只读且以文件为后端的，被释放的页面在下次访问时会重新从文件读取。
    pub fn release(&self, rows: Range<usize>) -> std::io::Result<()> {
        let row_bytes = self.dimension.get() * size_of::<f32>();
        let offset = self.header_len + rows.start * row_bytes;
        let len = rows.len() * row_bytes;
        if len == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        // SAFETY: 只读文件映射，DONTNEED 之后的访问会重新读取文件内容
        unsafe {
            self.mmap.unchecked_advise_range(memmap2::UncheckedAdvice::DontNeed, offset, len)?;
        }
        #[cfg(not(unix))]
        let _ = offset;
        Ok(())
    }
}

/// 批次迭代器，向量与元数据按相同行号对齐
pub struct BatchReader<'a> {
    view: ArrayView2<'a, f32>,
    records: Lines<BufReader<File>>,
    next: usize,
    limit: usize,
    batch_size: usize,
}

impl BatchReader<'_> {
    fn read_batch(&mut self) -> Result<Batch> {
        let start = self.next;
        let end = (start + self.batch_size).min(self.limit);

        let mut city_ids = Vec::with_capacity(end - start);
        let mut quality_scores = Vec::with_capacity(end - start);
        for row in start..end {
            let line = match self.records.next() {
                Some(line) => line?,
                None => {
                    return Err(BenchError::DatasetShape(format!(
                        "元数据只有 {} 行，需要 {} 行",
                        row, self.limit
                    )));
                }
            };
            let record: Record = serde_json::from_str(&line)?;
            city_ids.push(record.city_id);
            quality_scores.push(record.quality_score);
        }

        let vectors = self.view.slice(s![start..end, ..]).to_owned();
        let ids = (start..end).map(|i| i as i64).collect();
        self.next = end;

        Ok(Batch { start, ids, vectors, city_ids, quality_scores })
    }
}

impl Iterator for BatchReader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.limit {
            return None;
        }
        let batch = self.read_batch();
        if batch.is_err() {
            // 出错后不再继续读取
            self.next = self.limit;
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use tempfile::TempDir;

    use super::*;
    use crate::testing::write_dataset;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[rstest]
    fn test_batches_split(temp_dir: TempDir) {
        let data_dir = write_dataset(temp_dir.path(), Dimension::D128, 12_000);
        let dataset = VectorDataset::open(&data_dir, Dimension::D128).unwrap();
        assert_eq!(dataset.total_count(), 12_000);

        let sizes = dataset
            .batches(12_000, 5000)
            .unwrap()
            .map(|batch| batch.unwrap().len())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![5000, 5000, 2000]);
    }

    #[rstest]
    fn test_batches_keep_row_identity(temp_dir: TempDir) {
        let data_dir = write_dataset(temp_dir.path(), Dimension::D128, 1000);
        let dataset = VectorDataset::open(&data_dir, Dimension::D128).unwrap();
        let view = dataset.view().unwrap();

        let lines = std::fs::read_to_string(data_dir.payloads(Dimension::D128)).unwrap();
        let records = lines
            .lines()
            .map(|l| serde_json::from_str::<Record>(l).unwrap())
            .collect::<Vec<_>>();

        for batch in dataset.batches(700, 300).unwrap() {
            let batch = batch.unwrap();
            for (k, id) in batch.ids.iter().enumerate() {
                let row = batch.start + k;
                assert_eq!(*id, row as i64);
                assert_eq!(batch.city_ids[k], records[row].city_id);
                assert_eq!(batch.quality_scores[k], records[row].quality_score);
                assert_eq!(batch.vectors.row(k), view.row(row));
            }
        }
    }

    #[rstest]
    fn test_missing_files(temp_dir: TempDir) {
        let data_dir: DataDir = temp_dir.path().to_str().unwrap().parse().unwrap();
        let err = VectorDataset::open(&data_dir, Dimension::D512).err().unwrap();
        assert!(matches!(err, BenchError::DataUnavailable { .. }));
    }

    #[rstest]
    fn test_limit_exceeds_total(temp_dir: TempDir) {
        let data_dir = write_dataset(temp_dir.path(), Dimension::D128, 100);
        let dataset = VectorDataset::open(&data_dir, Dimension::D128).unwrap();
        assert!(matches!(dataset.batches(101, 10), Err(BenchError::DatasetShape(_))));
    }

    #[rstest]
    fn test_short_payloads(temp_dir: TempDir) {
        let data_dir = write_dataset(temp_dir.path(), Dimension::D128, 100);
        let payloads = data_dir.payloads(Dimension::D128);
        let content = std::fs::read_to_string(&payloads).unwrap();
        let truncated = content.lines().take(50).collect::<Vec<_>>().join("\n");
        std::fs::write(&payloads, truncated).unwrap();

        let dataset = VectorDataset::open(&data_dir, Dimension::D128).unwrap();
        let results = dataset.batches(100, 40).unwrap().collect::<Vec<_>>();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(BenchError::DatasetShape(_))));
    }

    #[rstest]
    fn test_release_consumed_rows(temp_dir: TempDir) {
        let data_dir = write_dataset(temp_dir.path(), Dimension::D128, 2000);
        let dataset = VectorDataset::open(&data_dir, Dimension::D128).unwrap();
        let before = dataset.row(10).unwrap();
        dataset.release(0..1500).unwrap();
        assert_eq!(dataset.row(10).unwrap(), before);
    }
}
