//! 会话级配置。
//!
//! 所有时长以毫秒整数出现在配置文件中，`0` 表示关闭对应的空闲检测。
//! 服务持有一份模板，每个新会话在创建时复制一份，之后可单独修改。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::CoreError, session::IdleStatus};

/// 会话配置。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `min_read_buffer_size <= read_buffer_size <= max_read_buffer_size`，且最小值大于 0；
///   - 读缓冲在运行期按实际读取量自适应：读满则翻倍、不足一半则减半，始终落在上下界内；
///   - 三种空闲时长彼此独立，任一为零即关闭该类检测。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub read_buffer_size: usize,
    pub min_read_buffer_size: usize,
    pub max_read_buffer_size: usize,
    #[serde(rename = "reader_idle_ms", with = "millis")]
    pub reader_idle_time: Duration,
    #[serde(rename = "writer_idle_ms", with = "millis")]
    pub writer_idle_time: Duration,
    #[serde(rename = "both_idle_ms", with = "millis")]
    pub both_idle_time: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 2048,
            min_read_buffer_size: 64,
            max_read_buffer_size: 65536,
            reader_idle_time: Duration::ZERO,
            writer_idle_time: Duration::ZERO,
            both_idle_time: Duration::ZERO,
        }
    }
}

impl SessionConfig {
    pub fn idle_time(&self, status: IdleStatus) -> Duration {
        match status {
            IdleStatus::ReaderIdle => self.reader_idle_time,
            IdleStatus::WriterIdle => self.writer_idle_time,
            IdleStatus::BothIdle => self.both_idle_time,
        }
    }

    pub fn set_idle_time(&mut self, status: IdleStatus, idle_time: Duration) -> &mut Self {
        match status {
            IdleStatus::ReaderIdle => self.reader_idle_time = idle_time,
            IdleStatus::WriterIdle => self.writer_idle_time = idle_time,
            IdleStatus::BothIdle => self.both_idle_time = idle_time,
        }
        self
    }

    pub fn with_idle_time(mut self, status: IdleStatus, idle_time: Duration) -> Self {
        self.set_idle_time(status, idle_time);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.min_read_buffer_size == 0 {
            return Err(CoreError::config("min_read_buffer_size must be positive"));
        }
        if self.min_read_buffer_size > self.read_buffer_size
            || self.read_buffer_size > self.max_read_buffer_size
        {
            return Err(CoreError::config(format!(
                "read buffer sizes must satisfy min <= initial <= max, got {} <= {} <= {}",
                self.min_read_buffer_size, self.read_buffer_size, self.max_read_buffer_size
            )));
        }
        Ok(())
    }

    /// 按一次读取的字节数调整下一次读缓冲大小。
    pub fn adapt_read_buffer(&self, current: usize, read: usize) -> usize {
        if read >= current {
            current.saturating_mul(2).min(self.max_read_buffer_size)
        } else if read.saturating_mul(2) < current {
            (current / 2).max(self.min_read_buffer_size)
        } else {
            current
        }
    }
}

/// 以毫秒整数（反）序列化 `Duration`。
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
