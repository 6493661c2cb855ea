//! `spark-nio-buffer` 提供反应器读写路径上流转的字节缓冲 [`IoBuffer`]。
//!
//! # 模块定位（Why）
//! - 过滤链中的编解码器需要一个带游标语义、可自动扩缩、可按字符集读写字符串的缓冲，
//!   本 crate 是 `spark-nio-core` 消息模型中 `Message::Buffer` 的载体。
//!
//! # 设计概要（How）
//! - `buffer`：存储、游标、扩容/收缩与派生视图；
//! - `primitive`：定宽整数与 24 位整数的相对/绝对读写；
//! - `charset` + `string`：字符集契约与三种字符串布局；
//! - `flags`：标志集合与位向量互转；
//! - `hex_dump`：排障用的十六进制输出。
//!
//! # 契约（What）
//! - 所有失败以 [`BufferError`] 返回，错误码见 [`BufferError::code`]；
//! - 派生视图与其父缓冲都不能再调整容量。

mod buffer;
mod charset;
mod error;
mod flags;
mod hex_dump;
mod primitive;
mod string;

pub use buffer::{ByteOrder, IoBuffer};
pub use charset::{Ascii, Charset, Latin1, Utf8, Utf16Be, Utf16Le};
pub use error::{BufferError, Result};
pub use flags::{BitFlag, BitWidth};
pub use string::DEFAULT_PREFIX_LENGTH;
