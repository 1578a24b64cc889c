//! 后端的健康检查与清空

use log::info;

use crate::error::Result;
use crate::store::VectorStore;

/// 集合名及其向量数量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub count: u64,
}

/// 检查后端是否在线，并统计每个集合的向量数量
pub async fn inventory<S: VectorStore>(store: &S) -> Result<Vec<CollectionInfo>> {
    store.ping().await?;
    let mut infos = vec![];
    for name in store.list_collections().await? {
        let count = store.count(&name).await?;
        infos.push(CollectionInfo { name, count });
    }
    Ok(infos)
}

/// 删除后端中的所有集合，返回删除的数量
pub async fn wipe<S: VectorStore>(store: &S) -> Result<usize> {
    let collections = store.list_collections().await?;
    for name in &collections {
        store.drop_collection(name).await?;
        info!("已删除 {} 中的集合 {}", store.backend(), name);
    }
    Ok(collections.len())
}
