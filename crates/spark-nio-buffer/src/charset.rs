//! 字符集编解码器。
//!
//! [`Charset`] 是缓冲字符串读写的唯一依赖：编码、解码，以及终止符（NUL）宽度。
//! 内建 UTF-8、US-ASCII、ISO-8859-1 与无 BOM 的 UTF-16；开启 `encoding` 特性后，
//! 任意 `encoding_rs::Encoding` 也可直接作为字符集使用。

use crate::error::{BufferError, Result};

/// 字符集编解码契约。
///
/// # 教案式说明
/// - **意图 (Why)**：把“文本 ↔ 字节”的转换从缓冲游标逻辑中剥离，调用方可自由选择编码，
///   解码失败时缓冲负责恢复游标，以便换用其他字符集重试。
/// - **契约 (What)**：
///   - `encode` 对无法表示的字符返回 [`BufferError::EncodeFailure`]；
///   - `decode` 对非法字节序列返回 [`BufferError::DecodeFailure`]，不得替换为占位符；
///   - `null_width` 返回字符串终止符所占字节数，UTF-16 系列为 2，其余为 1。
pub trait Charset: Send + Sync {
    fn name(&self) -> &str;

    fn encode(&self, text: &str) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<String>;

    fn null_width(&self) -> usize {
        1
    }
}

fn decode_failure(charset: &str, reason: impl Into<String>) -> BufferError {
    BufferError::DecodeFailure {
        charset: charset.to_owned(),
        reason: reason.into(),
    }
}

fn encode_failure(charset: &str, reason: impl Into<String>) -> BufferError {
    BufferError::EncodeFailure {
        charset: charset.to_owned(),
        reason: reason.into(),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8;

impl Charset for Utf8 {
    fn name(&self) -> &str {
        "UTF-8"
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|err| decode_failure(self.name(), err.to_string()))
    }
}

/// 7 位 US-ASCII。
#[derive(Clone, Copy, Debug, Default)]
pub struct Ascii;

impl Charset for Ascii {
    fn name(&self) -> &str {
        "US-ASCII"
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        if !text.is_ascii() {
            return Err(encode_failure(self.name(), "non-ascii character"));
        }
        Ok(text.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        if let Some(offset) = bytes.iter().position(|byte| !byte.is_ascii()) {
            return Err(decode_failure(
                self.name(),
                format!("byte 0x{:02X} at offset {offset}", bytes[offset]),
            ));
        }
        Ok(bytes.iter().copied().map(char::from).collect())
    }
}

/// ISO-8859-1：每个字节直接映射到 U+0000..=U+00FF。
#[derive(Clone, Copy, Debug, Default)]
pub struct Latin1;

impl Charset for Latin1 {
    fn name(&self) -> &str {
        "ISO-8859-1"
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        text.chars()
            .map(|ch| {
                u8::try_from(u32::from(ch))
                    .map_err(|_| encode_failure(self.name(), format!("unmappable character {ch:?}")))
            })
            .collect()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        Ok(bytes.iter().copied().map(char::from).collect())
    }
}

/// 大端 UTF-16，不写入也不识别 BOM。
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf16Be;

/// 小端 UTF-16，不写入也不识别 BOM。
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf16Le;

fn encode_utf16(text: &str, to_bytes: fn(u16) -> [u8; 2]) -> Vec<u8> {
    text.encode_utf16().flat_map(to_bytes).collect()
}

fn decode_utf16(name: &str, bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(decode_failure(name, "odd number of bytes"));
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| from_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|err| decode_failure(name, err.to_string()))
}

impl Charset for Utf16Be {
    fn name(&self) -> &str {
        "UTF-16BE"
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        Ok(encode_utf16(text, u16::to_be_bytes))
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        decode_utf16(self.name(), bytes, u16::from_be_bytes)
    }

    fn null_width(&self) -> usize {
        2
    }
}

impl Charset for Utf16Le {
    fn name(&self) -> &str {
        "UTF-16LE"
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        Ok(encode_utf16(text, u16::to_le_bytes))
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        decode_utf16(self.name(), bytes, u16::from_le_bytes)
    }

    fn null_width(&self) -> usize {
        2
    }
}

/// `encoding_rs` 适配：以 `&encoding_rs::SHIFT_JIS` 这样的静态编码表引用作为字符集。
///
/// UTF-16 系列走本模块的实现，因为 `encoding_rs` 只把它们当作解码目标。
#[cfg(feature = "encoding")]
impl Charset for &'static encoding_rs::Encoding {
    fn name(&self) -> &str {
        (*self).name()
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let encoding: &'static encoding_rs::Encoding = *self;
        if encoding == encoding_rs::UTF_16BE {
            return Utf16Be.encode(text);
        }
        if encoding == encoding_rs::UTF_16LE {
            return Utf16Le.encode(text);
        }
        let (bytes, _, unmappable) = encoding.encode(text);
        if unmappable {
            return Err(encode_failure(encoding.name(), "unmappable character"));
        }
        Ok(bytes.into_owned())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        let encoding: &'static encoding_rs::Encoding = *self;
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .ok_or_else(|| decode_failure(encoding.name(), "malformed input"))
    }

    fn null_width(&self) -> usize {
        let encoding: &'static encoding_rs::Encoding = *self;
        if encoding == encoding_rs::UTF_16BE || encoding == encoding_rs::UTF_16LE {
            2
        } else {
            1
        }
    }
}
