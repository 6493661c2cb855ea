//! 接入器与反应器配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：示例程序与部署环境通过一份 TOML 文件描述监听参数、驱动线程数量与
//!   会话默认值，不需要重新编译。
//! - **契约 (What)**：
//!   - 所有字段都有默认值，配置文件只需写出要覆盖的部分；未知字段视为错误；
//!   - 时长以毫秒整数书写（`*_ms`）；
//!   - 解析或校验失败统一返回 [`CoreError::Config`]。

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use spark_nio_core::{CoreError, SessionConfig, config::millis};

/// 选择器处理器的运行参数。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReactorConfig {
    /// 处理器（驱动线程）数量；为 1 时使用单线程策略，否则轮询分配。
    pub processor_count: usize,
    /// 线程名前缀，实际名称为 `{prefix}-{index}`。
    pub processor_name: String,
    /// 连续多少次 `poll` 失败后认定多路复用器不可用。
    pub max_poll_failures: u32,
    /// 每轮 `poll` 最多取回的事件数。
    pub events_capacity: usize,
    /// 绑定/解绑等待驱动线程确认的上限。
    #[serde(rename = "ack_timeout_ms", with = "millis")]
    pub ack_timeout: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            processor_count: 1,
            processor_name: "spark-nio-selector".to_owned(),
            max_poll_failures: 8,
            events_capacity: 256,
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl ReactorConfig {
    pub fn with_processor_count(mut self, count: usize) -> Self {
        self.processor_count = count;
        self
    }

    pub fn with_processor_name(mut self, name: impl Into<String>) -> Self {
        self.processor_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.processor_count == 0 {
            return Err(CoreError::config("processor_count must be at least 1"));
        }
        if self.max_poll_failures == 0 {
            return Err(CoreError::config("max_poll_failures must be at least 1"));
        }
        if self.events_capacity == 0 {
            return Err(CoreError::config("events_capacity must be at least 1"));
        }
        if self.processor_name.is_empty() {
            return Err(CoreError::config("processor_name must not be empty"));
        }
        Ok(())
    }
}

/// TCP 接入器配置。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AcceptorConfig {
    /// `listen(2)` 的等待队列长度。
    pub backlog: i32,
    /// 绑定前设置 `SO_REUSEADDR`。
    pub reuse_address: bool,
    /// 最后一个地址解绑时是否关闭全部受管会话。
    pub disconnect_on_unbind: bool,
    pub reactor: ReactorConfig,
    pub session: SessionConfig,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            backlog: 50,
            reuse_address: true,
            disconnect_on_unbind: true,
            reactor: ReactorConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl AcceptorConfig {
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_reactor(mut self, reactor: ReactorConfig) -> Self {
        self.reactor = reactor;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_disconnect_on_unbind(mut self, disconnect: bool) -> Self {
        self.disconnect_on_unbind = disconnect;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.backlog <= 0 {
            return Err(CoreError::config("backlog must be positive"));
        }
        self.reactor.validate()?;
        self.session.validate()
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(text)
            .map_err(|err| CoreError::config(format!("invalid acceptor config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// 读取 TOML 文件并解析。
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            CoreError::config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}
