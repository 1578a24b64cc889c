use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::warn;

/// 固定次数、固定间隔的重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 总尝试次数，包括第一次
    pub attempts: usize,
    /// 两次尝试之间的等待时间
    pub delay: Duration,
}

/// 重试的最终结果
#[derive(Debug)]
pub enum Retried<T, E> {
    Succeeded { value: T, attempts: usize },
    /// 所有尝试都失败，保留最后一次的错误
    Exhausted { error: E, attempts: usize },
}

impl<T, E> Retried<T, E> {
    pub fn attempts(&self) -> usize {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Succeeded { value, .. } => Ok(value),
            Self::Exhausted { error, .. } => Err(error),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// 执行 `op` 直到成功或次数耗尽，`op` 的参数是从 1 开始的尝试序号
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Retried<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Retried::Succeeded { value, attempts: attempt },
                Err(error) if attempt >= attempts => {
                    return Retried::Exhausted { error, attempts: attempt };
                }
                Err(error) => {
                    warn!(
                        "第 {}/{} 次尝试失败: {}，{:.0?} 后重试",
                        attempt, attempts, error, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
