//! 字符串读写：NUL 终止串、定长字段串与长度前缀串。
//!
//! # 教案式说明
//! - **意图 (Why)**：协议层常见三种字符串布局，统一在缓冲上实现，避免每个编解码过滤器重复处理
//!   终止符、对齐与填充。
//! - **逻辑 (How)**：先在字节层面确定字段边界（NUL、字段长度或前缀值），再把该区间交给
//!   [`Charset`] 解码；游标只在解码成功后才提交。
//! - **契约 (What)**：任一读取在解码失败时保持 `position`/`limit` 与调用前一致；UTF-16 系列以
//!   两字节对齐的双 NUL 作为终止符。

use crate::{
    buffer::{ByteOrder, IoBuffer},
    charset::Charset,
    error::{BufferError, Result},
};

/// 长度前缀默认占用的字节数。
pub const DEFAULT_PREFIX_LENGTH: usize = 2;

impl IoBuffer {
    /// 读取以 NUL 终止的字符串；缺少终止符时读到 `limit`。
    ///
    /// - 单字节字符集：游标越过终止符；
    /// - UTF-16：只识别偶数偏移上的双 NUL，未找到时截取不超过剩余字节的最大偶数长度。
    pub fn get_string<C: Charset + ?Sized>(&mut self, charset: &C) -> Result<String> {
        if !self.has_remaining() {
            return Ok(String::new());
        }
        let start = self.position();
        let limit = self.limit();
        let (end, next_position) = if charset.null_width() == 2 {
            match self.find_wide_nul(start, limit) {
                Some(end) => (end, end + 2),
                None => {
                    let end = start + ((limit - start) & !1);
                    (end, end)
                }
            }
        } else {
            match self.index_of(0) {
                Some(end) => (end, end + 1),
                None => (limit, limit),
            }
        };

        let decoded = if end == start {
            String::new()
        } else {
            self.read_storage(|data| charset.decode(&data[start..end]))?
        };
        self.set_position(next_position)?;
        Ok(decoded)
    }

    /// 从长度为 `field_size` 的定长字段读取字符串，字段内遇到 NUL 即截止；
    /// 成功后游标总是越过整个字段。
    pub fn get_string_sized<C: Charset + ?Sized>(
        &mut self,
        field_size: usize,
        charset: &C,
    ) -> Result<String> {
        if field_size == 0 || !self.has_remaining() {
            return Ok(String::new());
        }
        let wide = charset.null_width() == 2;
        if wide && field_size % 2 != 0 {
            return Err(BufferError::InvalidArgument(format!(
                "field size {field_size} is not even for a UTF-16 string"
            )));
        }
        let start = self.position();
        let remaining = self.remaining();
        if field_size > remaining {
            return Err(BufferError::Underflow {
                needed: field_size,
                remaining,
            });
        }
        let end = start + field_size;
        let content_end = if wide {
            self.find_wide_nul(start, end).unwrap_or(end)
        } else {
            self.read_storage(|data| {
                data[start..end]
                    .iter()
                    .position(|byte| *byte == 0)
                    .map_or(end, |found| start + found)
            })
        };

        let decoded = if content_end == start {
            String::new()
        } else {
            self.read_storage(|data| charset.decode(&data[start..content_end]))?
        };
        self.set_position(end)?;
        Ok(decoded)
    }

    /// 写入编码后的字符串，不追加终止符。
    pub fn put_string<C: Charset + ?Sized>(&mut self, text: &str, charset: &C) -> Result<&mut Self> {
        self.ensure_writable()?;
        if text.is_empty() {
            return Ok(self);
        }
        let encoded = charset.encode(text)?;
        self.put_slice(&encoded)
    }

    /// 把字符串写入长度为 `field_size` 的定长字段。
    ///
    /// 超出字段的字符被整字截断；内容短于字段时紧随其后写入终止符，字段剩余字节保持原样。
    /// 成功后 `position = 起点 + field_size`。
    pub fn put_string_sized<C: Charset + ?Sized>(
        &mut self,
        text: &str,
        field_size: usize,
        charset: &C,
    ) -> Result<&mut Self> {
        self.ensure_writable()?;
        if field_size == 0 {
            return Ok(self);
        }
        let null_width = charset.null_width();
        if null_width == 2 && field_size % 2 != 0 {
            return Err(BufferError::InvalidArgument(format!(
                "field size {field_size} is not even for a UTF-16 string"
            )));
        }

        let mut encoded = Vec::with_capacity(field_size);
        let mut scratch = [0u8; 4];
        for ch in text.chars() {
            let piece = charset.encode(ch.encode_utf8(&mut scratch))?;
            if encoded.len() + piece.len() > field_size {
                break;
            }
            encoded.extend_from_slice(&piece);
        }
        if encoded.len() < field_size {
            let terminator = null_width.min(field_size - encoded.len());
            encoded.resize(encoded.len() + terminator, 0);
        }

        let start = self.reserve(field_size)?;
        self.write_bytes(start, &encoded);
        Ok(self)
    }

    /// 读取 2 字节长度前缀的字符串。
    pub fn get_prefixed_string<C: Charset + ?Sized>(&mut self, charset: &C) -> Result<String> {
        self.get_prefixed_string_with(DEFAULT_PREFIX_LENGTH, charset)
    }

    /// 读取 `prefix_length`（1、2 或 4）字节长度前缀的字符串；内容不以 NUL 截断。
    pub fn get_prefixed_string_with<C: Charset + ?Sized>(
        &mut self,
        prefix_length: usize,
        charset: &C,
    ) -> Result<String> {
        let start = self.position();
        let remaining = self.remaining();
        let data_length = match self.peek_prefix(prefix_length)? {
            Some(length) if remaining - prefix_length >= length => length,
            Some(length) => {
                return Err(BufferError::Underflow {
                    needed: prefix_length + length,
                    remaining,
                });
            }
            None => {
                return Err(BufferError::Underflow {
                    needed: prefix_length,
                    remaining,
                });
            }
        };
        if data_length == 0 {
            self.set_position(start + prefix_length)?;
            return Ok(String::new());
        }
        if charset.null_width() == 2 && data_length % 2 != 0 {
            return Err(BufferError::InvalidData(format!(
                "prefixed length {data_length} is not even for a UTF-16 string"
            )));
        }
        let data_start = start + prefix_length;
        let data_end = data_start + data_length;
        let decoded = self.read_storage(|data| charset.decode(&data[data_start..data_end]))?;
        self.set_position(data_end)?;
        Ok(decoded)
    }

    /// 以 2 字节长度前缀、无填充写入字符串。
    pub fn put_prefixed_string<C: Charset + ?Sized>(
        &mut self,
        text: &str,
        charset: &C,
    ) -> Result<&mut Self> {
        self.put_prefixed_string_with(text, DEFAULT_PREFIX_LENGTH, 0, 0, charset)
    }

    /// 写入长度前缀字符串。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - `prefix_length ∈ {1, 2, 4}`，前缀按当前字节序编码；
    ///   - `padding ∈ {0, 1, 2, 4}`：内容长度向上对齐到 `padding` 的倍数，空位填 `pad_value`，
    ///     前缀值包含填充字节；
    ///   - 内容超过前缀可表示的最大值返回 [`BufferError::InvalidArgument`]；
    ///   - 未开启自动扩容且写不下时返回 [`BufferError::CapacityExceeded`]，此时缓冲未被修改。
    pub fn put_prefixed_string_with<C: Charset + ?Sized>(
        &mut self,
        text: &str,
        prefix_length: usize,
        padding: usize,
        pad_value: u8,
        charset: &C,
    ) -> Result<&mut Self> {
        self.ensure_writable()?;
        let max_length = match prefix_length {
            1 => usize::from(u8::MAX),
            2 => usize::from(u16::MAX),
            4 => i32::MAX as usize,
            other => return Err(invalid_prefix_length(other)),
        };
        let pad_mask = match padding {
            0 | 1 => 0,
            2 => 1,
            4 => 3,
            other => {
                return Err(BufferError::InvalidArgument(format!(
                    "padding must be 0, 1, 2 or 4, got {other}"
                )));
            }
        };

        let encoded = charset.encode(text)?;
        let padded_length = (encoded.len() + pad_mask) & !pad_mask;
        if padded_length > max_length {
            return Err(BufferError::InvalidArgument(format!(
                "string of {padded_length} bytes does not fit a {prefix_length}-byte prefix"
            )));
        }

        let mut field = self.encode_prefix(prefix_length, padded_length);
        field.extend_from_slice(&encoded);
        field.resize(prefix_length + padded_length, pad_value);
        self.put_slice(&field)
    }

    /// 判断以 `prefix_length` 字节长度前缀开头的数据是否已完整到达。
    ///
    /// 前缀值超过 `max_data_length` 时返回 [`BufferError::InvalidData`]，用于在解码前拒绝异常帧。
    pub fn prefixed_data_available(
        &self,
        prefix_length: usize,
        max_data_length: usize,
    ) -> Result<bool> {
        let Some(data_length) = self.peek_prefix(prefix_length)? else {
            return Ok(false);
        };
        if data_length > max_data_length {
            return Err(BufferError::InvalidData(format!(
                "data length {data_length} exceeds {max_data_length}"
            )));
        }
        Ok(self.remaining() - prefix_length >= data_length)
    }

    fn peek_prefix(&self, prefix_length: usize) -> Result<Option<usize>> {
        if !matches!(prefix_length, 1 | 2 | 4) {
            return Err(invalid_prefix_length(prefix_length));
        }
        if self.remaining() < prefix_length {
            return Ok(None);
        }
        let at = self.position();
        let length = match prefix_length {
            1 => usize::from(self.get_u8_at(at)?),
            2 => usize::from(self.get_u16_at(at)?),
            _ => {
                let raw = self.get_i32_at(at)?;
                usize::try_from(raw)
                    .map_err(|_| BufferError::InvalidData(format!("negative data length {raw}")))?
            }
        };
        Ok(Some(length))
    }

    fn encode_prefix(&self, prefix_length: usize, value: usize) -> Vec<u8> {
        let big = self.order() == ByteOrder::BigEndian;
        match prefix_length {
            1 => vec![value as u8],
            2 => {
                let value = value as u16;
                (if big { value.to_be_bytes() } else { value.to_le_bytes() }).to_vec()
            }
            _ => {
                let value = value as u32;
                (if big { value.to_be_bytes() } else { value.to_le_bytes() }).to_vec()
            }
        }
    }

    /// 在 `[start, end)` 内查找偶数相对偏移上的双 NUL。
    fn find_wide_nul(&self, start: usize, end: usize) -> Option<usize> {
        self.read_storage(|data| {
            let mut index = start;
            while index + 1 < end {
                if data[index] == 0 && data[index + 1] == 0 {
                    return Some(index);
                }
                index += 2;
            }
            None
        })
    }
}

fn invalid_prefix_length(prefix_length: usize) -> BufferError {
    BufferError::InvalidArgument(format!(
        "prefix length must be 1, 2 or 4, got {prefix_length}"
    ))
}
