use anyhow::{Result, bail};
use clap::Parser;
use log::error;

use crate::admin::inventory;
use crate::cli::SubCommandExtend;
use crate::config::{BackendOptions, Opts};
use crate::store::{BackendKind, MilvusStore, VectorStore, WeaviateStore};

#[derive(Parser, Debug, Clone)]
pub struct HealthCommand {
    #[command(flatten)]
    pub backend: BackendOptions,
}

async fn report<S: VectorStore>(store: &S) -> bool {
    println!("--- {} ---", store.backend());
    match inventory(store).await {
        Ok(infos) => {
            println!("在线，{} 个集合", infos.len());
            for info in infos {
                println!("  - {}: {} vectors", info.name, info.count);
            }
            true
        }
        Err(e) => {
            error!("{} 检查失败: {}", store.backend(), e);
            false
        }
    }
}

impl SubCommandExtend for HealthCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let mut offline = vec![];
        if !report(&WeaviateStore::new(&self.backend)?).await {
            offline.push(BackendKind::Weaviate);
        }
        if !report(&MilvusStore::new(&self.backend)?).await {
            offline.push(BackendKind::Milvus);
        }
        if !offline.is_empty() {
            bail!("后端不可用: {:?}", offline);
        }
        Ok(())
    }
}
