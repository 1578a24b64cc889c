use anyhow::Result;
use clap::Parser;
use log::info;

use crate::admin::wipe;
use crate::cli::SubCommandExtend;
use crate::config::{BackendOptions, Opts};
use crate::store::{MilvusStore, WeaviateStore};

#[derive(Parser, Debug, Clone)]
pub struct WipeCommand {
    #[command(flatten)]
    pub backend: BackendOptions,
}

impl SubCommandExtend for WipeCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        info!("清空 Weaviate……");
        let n = wipe(&WeaviateStore::new(&self.backend)?).await?;
        info!("清空 Milvus……");
        let m = wipe(&MilvusStore::new(&self.backend)?).await?;
        println!("已删除 {} 个集合，所有后端已清空", n + m);
        Ok(())
    }
}
