//! 选择器放置策略：决定监听套接字与新接入会话由哪个处理器服务。
//!
//! # 教案式说明
//! - **意图 (Why)**：处理器只负责 IO，放置决策集中在这里，从“全部放在一个线程”到
//!   “N 个线程轮询分摊”都不需要改动反应器代码。
//! - **契约 (What)**：策略只做路由，不持有套接字，也不做任何 IO；
//!   返回的处理器必须来自 [`SelectorStrategy::processors`]。

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
};

use spark_nio_core::CoreError;

use crate::{config::ReactorConfig, processor::SelectorProcessor};

/// 放置策略。
pub trait SelectorStrategy: Send + Sync + 'static {
    /// 为新的监听地址挑选处理器。
    fn processor_for_bind(&self, address: SocketAddr) -> SelectorProcessor;

    /// 为 `source` 刚接受的连接挑选处理器；可以就是 `source`。
    fn processor_for_accepted(&self, source: &SelectorProcessor, remote: SocketAddr)
    -> SelectorProcessor;

    /// 策略管理的全部处理器。
    fn processors(&self) -> Vec<SelectorProcessor>;
}

/// 单处理器：所有监听与会话共用一条驱动线程。
#[derive(Debug)]
pub struct OneThreadSelectorStrategy {
    processor: SelectorProcessor,
}

impl OneThreadSelectorStrategy {
    pub fn new(config: &ReactorConfig) -> Self {
        Self {
            processor: SelectorProcessor::new(format!("{}-0", config.processor_name), config.clone()),
        }
    }

    pub fn processor(&self) -> &SelectorProcessor {
        &self.processor
    }
}

impl SelectorStrategy for OneThreadSelectorStrategy {
    fn processor_for_bind(&self, _: SocketAddr) -> SelectorProcessor {
        self.processor.clone()
    }

    fn processor_for_accepted(&self, _: &SelectorProcessor, _: SocketAddr) -> SelectorProcessor {
        self.processor.clone()
    }

    fn processors(&self) -> Vec<SelectorProcessor> {
        vec![self.processor.clone()]
    }
}

/// 轮询：监听地址与接入会话各自独立地在 N 个处理器之间轮转。
#[derive(Debug)]
pub struct RoundRobinSelectorStrategy {
    processors: Vec<SelectorProcessor>,
    next_bind: AtomicUsize,
    next_accept: AtomicUsize,
}

impl RoundRobinSelectorStrategy {
    pub fn new(config: &ReactorConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let processors = (0..config.processor_count)
            .map(|index| {
                SelectorProcessor::new(format!("{}-{index}", config.processor_name), config.clone())
            })
            .collect();
        Ok(Self {
            processors,
            next_bind: AtomicUsize::new(0),
            next_accept: AtomicUsize::new(0),
        })
    }

    fn pick(&self, counter: &AtomicUsize) -> SelectorProcessor {
        let index = counter.fetch_add(1, Ordering::Relaxed) % self.processors.len();
        self.processors[index].clone()
    }
}

impl SelectorStrategy for RoundRobinSelectorStrategy {
    fn processor_for_bind(&self, _: SocketAddr) -> SelectorProcessor {
        self.pick(&self.next_bind)
    }

    fn processor_for_accepted(&self, _: &SelectorProcessor, _: SocketAddr) -> SelectorProcessor {
        self.pick(&self.next_accept)
    }

    fn processors(&self) -> Vec<SelectorProcessor> {
        self.processors.clone()
    }
}
