use std::path::PathBuf;

use thiserror::Error;

/// 基准测试过程中的错误
#[derive(Debug, Error)]
pub enum BenchError {
    /// 数据集文件不存在
    #[error("数据文件不存在: {}", path.display())]
    DataUnavailable { path: PathBuf },

    /// 数据集形状或内容不符合预期
    #[error("数据集格式错误: {0}")]
    DatasetShape(String),

    /// 无法连接到后端，或管理请求超时
    #[error("无法连接到 {backend}: {message}")]
    BackendUnreachable { backend: &'static str, message: String },

    /// 后端返回了错误
    #[error("{backend} 返回错误: {message}")]
    Backend { backend: &'static str, message: String },

    /// 批量插入失败，且下层已经放弃重试
    #[error("{backend} 插入失败 (起始 id {first_id}, {rows} 行): {message}")]
    TransientInsertFailure { backend: &'static str, first_id: i64, rows: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Npy(#[from] ndarray_npy::ViewNpyError),
}

impl BenchError {
    /// 将 reqwest 的错误归类，连接失败和超时视为后端不可达
    pub fn from_http(backend: &'static str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::BackendUnreachable { backend, message: err.to_string() }
        } else {
            Self::Backend { backend, message: err.to_string() }
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
