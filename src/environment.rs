//! 切换后端前的环境重置

use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;

use crate::config::EnvControl;
use crate::store::BackendKind;

/// 每个后端对应的 docker 容器
pub fn containers(backend: BackendKind) -> &'static [&'static str] {
    match backend {
        BackendKind::Milvus => &["milvus_db", "milvus-etcd", "milvus-minio"],
        BackendKind::Weaviate => &["weaviate_db"],
    }
}

/// 激活 `backend` 需要执行的 docker 命令：先停止其他后端，再重启自己
pub fn docker_commands(backend: BackendKind) -> Vec<Vec<&'static str>> {
    let mut commands = vec![];
    for other in BackendKind::ALL.into_iter().filter(|b| *b != backend) {
        let mut cmd = vec!["stop"];
        cmd.extend_from_slice(containers(other));
        commands.push(cmd);
    }
    let mut restart = vec!["restart"];
    restart.extend_from_slice(containers(backend));
    commands.push(restart);
    commands
}

pub struct Environment {
    control: EnvControl,
    settle: Duration,
}

impl Environment {
    pub fn new(control: EnvControl, settle: Duration) -> Self {
        Self { control, settle }
    }

    /// 让 `backend` 独占主机资源，失败只记录警告
    pub async fn activate(&self, backend: BackendKind) {
        if self.control == EnvControl::None {
            debug!("跳过环境重置");
            return;
        }

        info!("重置环境: 只保留 {} 运行", backend);
        for args in docker_commands(backend) {
            match Command::new("docker").args(&args).output().await {
                Ok(output) if output.status.success() => debug!("docker {} 成功", args.join(" ")),
                Ok(output) => warn!(
                    "docker {} 失败: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("无法执行 docker: {}", e),
            }
        }

        info!("等待 {} 稳定 {:?}……", backend, self.settle);
        tokio::time::sleep(self.settle).await;
    }
}
