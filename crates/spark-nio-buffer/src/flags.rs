//! 有限有序标志集合 ↔ 定宽整数位向量。
//!
//! 第 `n` 个标志（序号 `n`，从 0 开始）对应整数的第 `n` 位；宽度不足以容纳某个序号时
//! 返回 [`BufferError::CapacityExceeded`]。单个枚举值则按序号写入相应宽度的无符号整数。

use std::collections::BTreeSet;

use crate::{
    buffer::IoBuffer,
    error::{BufferError, Result},
};

/// 可映射为位序号的标志类型，通常由无数据枚举实现。
pub trait BitFlag: Copy + Ord {
    /// 标志在声明顺序中的序号。
    fn ordinal(self) -> u32;

    /// 由序号还原标志；未知序号返回 `None`。
    fn from_ordinal(ordinal: u32) -> Option<Self>;
}

/// 位向量或枚举序号使用的整数宽度。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BitWidth {
    U8,
    U16,
    U32,
    U64,
}

impl BitWidth {
    pub fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::U64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }
}

impl IoBuffer {
    /// 把标志集合编码为 `width` 宽度的位向量并相对写入。
    pub fn put_flag_set<F, I>(&mut self, flags: I, width: BitWidth) -> Result<&mut Self>
    where
        F: BitFlag,
        I: IntoIterator<Item = F>,
    {
        let mut vector = 0u64;
        for flag in flags {
            let ordinal = flag.ordinal();
            if ordinal >= width.bits() {
                return Err(BufferError::CapacityExceeded {
                    required: ordinal as usize + 1,
                    limit: width.bits() as usize,
                });
            }
            vector |= 1u64 << ordinal;
        }
        self.put_width(vector, width)
    }

    /// 相对读取 `width` 宽度的位向量并解码为标志集合；没有对应标志的位被忽略。
    pub fn get_flag_set<F: BitFlag>(&mut self, width: BitWidth) -> Result<BTreeSet<F>> {
        let vector = self.get_width(width)?;
        Ok((0..width.bits())
            .filter(|bit| vector & (1u64 << bit) != 0)
            .filter_map(F::from_ordinal)
            .collect())
    }

    /// 以 `width` 宽度的无符号整数写入标志序号。
    pub fn put_enum<F: BitFlag>(&mut self, value: F, width: BitWidth) -> Result<&mut Self> {
        let ordinal = u64::from(value.ordinal());
        let max = u64::MAX >> (64 - width.bits());
        if ordinal > max {
            return Err(BufferError::InvalidArgument(format!(
                "ordinal {ordinal} does not fit {} bits",
                width.bits()
            )));
        }
        self.put_width(ordinal, width)
    }

    /// 读取 `width` 宽度的序号并还原为标志；未知序号返回 [`BufferError::InvalidData`]。
    pub fn get_enum<F: BitFlag>(&mut self, width: BitWidth) -> Result<F> {
        let start = self.position();
        let raw = self.get_width(width)?;
        match u32::try_from(raw).ok().and_then(F::from_ordinal) {
            Some(flag) => Ok(flag),
            None => {
                self.set_position(start)?;
                Err(BufferError::InvalidData(format!("unknown ordinal {raw}")))
            }
        }
    }

    fn put_width(&mut self, value: u64, width: BitWidth) -> Result<&mut Self> {
        match width {
            BitWidth::U8 => self.put_u8(value as u8),
            BitWidth::U16 => self.put_u16(value as u16),
            BitWidth::U32 => self.put_u32(value as u32),
            BitWidth::U64 => self.put_u64(value),
        }
    }

    fn get_width(&mut self, width: BitWidth) -> Result<u64> {
        Ok(match width {
            BitWidth::U8 => u64::from(self.get_u8()?),
            BitWidth::U16 => u64::from(self.get_u16()?),
            BitWidth::U32 => u64::from(self.get_u32()?),
            BitWidth::U64 => self.get_u64()?,
        })
    }
}
