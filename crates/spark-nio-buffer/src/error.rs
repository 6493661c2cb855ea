//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为 [`IoBuffer`](crate::IoBuffer) 的所有读写、视图与编解码操作提供统一的错误语义；
//! - 每个变体都映射到稳定的机器可读错误码，便于上层（过滤链、日志）按码分类处理。
//!
//! ## 设计要求（What）
//! - 读越界与写越界严格区分：前者为 [`BufferError::Underflow`]，后者为
//!   [`BufferError::CapacityExceeded`]；
//! - 解码失败时缓冲的 `position`/`limit` 已恢复到调用前状态，调用方可换用其他字符集重试。

use thiserror::Error;

/// 缓冲操作错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合容量、游标、只读视图与字符集编解码四类失败，使调用方可以精确区分
///   “需要扩容/换策略”与“数据本身损坏”。
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`；[`BufferError::code`] 返回的字符串
///   在版本间保持稳定。
/// - **设计权衡 (Trade-offs)**：上下文以 `usize`/`String` 直接携带，牺牲少量分配换取排障可读性。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BufferError {
    /// 写入越过 `limit`，且未开启自动扩容（或位集序号超出所选整数宽度）。
    #[error("buffer capacity exceeded: need {required} bytes, limit is {limit}")]
    CapacityExceeded { required: usize, limit: usize },

    /// 相对读取时剩余字节不足。
    #[error("buffer underflow: need {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    /// 绝对索引访问超出 `[0, limit)`。
    #[error("index {index} (+{len}) out of bounds for limit {limit}")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        limit: usize,
    },

    /// 在只读视图上尝试修改。
    #[error("buffer is read-only")]
    ReadOnly,

    /// 字符集解码失败；调用前的 `position`/`limit` 已恢复。
    #[error("failed to decode {charset} string: {reason}")]
    DecodeFailure { charset: String, reason: String },

    /// 字符集无法编码给定文本。
    #[error("failed to encode {charset} string: {reason}")]
    EncodeFailure { charset: String, reason: String },

    /// 状态不允许该操作，例如派生视图或其父缓冲尝试开启自动扩缩。
    #[error("illegal buffer state: {0}")]
    IllegalState(&'static str),

    /// 参数不满足约束，例如奇数长度的 UTF-16 字段。
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 缓冲中的数据本身不合法，例如长度前缀超过上限或未知的枚举序号。
    #[error("invalid buffer data: {0}")]
    InvalidData(String),
}

impl BufferError {
    /// 返回稳定的错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "spark.nio.buffer.capacity_exceeded",
            Self::Underflow { .. } => "spark.nio.buffer.underflow",
            Self::IndexOutOfBounds { .. } => "spark.nio.buffer.index_out_of_bounds",
            Self::ReadOnly => "spark.nio.buffer.read_only",
            Self::DecodeFailure { .. } => "spark.nio.buffer.decode_failed",
            Self::EncodeFailure { .. } => "spark.nio.buffer.encode_failed",
            Self::IllegalState(_) => "spark.nio.buffer.illegal_state",
            Self::InvalidArgument(_) => "spark.nio.buffer.invalid_argument",
            Self::InvalidData(_) => "spark.nio.buffer.invalid_data",
        }
    }
}

/// 缓冲模块统一的结果别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;
