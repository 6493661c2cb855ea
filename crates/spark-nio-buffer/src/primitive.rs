//! 定宽数值的相对/绝对读写。
//!
//! 每种类型生成四个方法：`get_*`（相对读）、`get_*_at`（绝对读）、`put_*`（相对写）、
//! `put_*_at`（绝对写），均遵循缓冲当前的 [`ByteOrder`]。无符号宽化读取直接使用
//! `get_u8`/`get_u16`/`get_u32`。

use crate::{
    buffer::{ByteOrder, IoBuffer},
    error::Result,
};

macro_rules! primitive_accessors {
    ($(($ty:ty, $get:ident, $get_at:ident, $put:ident, $put_at:ident)),* $(,)?) => {
        impl IoBuffer {
            $(
                #[doc = concat!("相对读取一个 `", stringify!($ty), "` 并推进游标。")]
                pub fn $get(&mut self) -> Result<$ty> {
                    let start = self.advance(size_of::<$ty>())?;
                    let bytes = self.read_array::<{ size_of::<$ty>() }>(start);
                    Ok(match self.order() {
                        ByteOrder::BigEndian => <$ty>::from_be_bytes(bytes),
                        ByteOrder::LittleEndian => <$ty>::from_le_bytes(bytes),
                    })
                }

                #[doc = concat!("在绝对下标读取一个 `", stringify!($ty), "`，不移动游标。")]
                pub fn $get_at(&self, index: usize) -> Result<$ty> {
                    self.check_index(index, size_of::<$ty>())?;
                    let bytes = self.read_array::<{ size_of::<$ty>() }>(index);
                    Ok(match self.order() {
                        ByteOrder::BigEndian => <$ty>::from_be_bytes(bytes),
                        ByteOrder::LittleEndian => <$ty>::from_le_bytes(bytes),
                    })
                }

                #[doc = concat!("相对写入一个 `", stringify!($ty), "`，必要时自动扩容。")]
                pub fn $put(&mut self, value: $ty) -> Result<&mut Self> {
                    let bytes = match self.order() {
                        ByteOrder::BigEndian => value.to_be_bytes(),
                        ByteOrder::LittleEndian => value.to_le_bytes(),
                    };
                    let start = self.reserve(bytes.len())?;
                    self.write_bytes(start, &bytes);
                    Ok(self)
                }

                #[doc = concat!("在绝对下标写入一个 `", stringify!($ty), "`，不移动游标。")]
                pub fn $put_at(&mut self, index: usize, value: $ty) -> Result<&mut Self> {
                    let bytes = match self.order() {
                        ByteOrder::BigEndian => value.to_be_bytes(),
                        ByteOrder::LittleEndian => value.to_le_bytes(),
                    };
                    self.reserve_at(index, bytes.len())?;
                    self.write_bytes(index, &bytes);
                    Ok(self)
                }
            )*
        }
    };
}

primitive_accessors! {
    (u8, get_u8, get_u8_at, put_u8, put_u8_at),
    (i8, get_i8, get_i8_at, put_i8, put_i8_at),
    (u16, get_u16, get_u16_at, put_u16, put_u16_at),
    (i16, get_i16, get_i16_at, put_i16, put_i16_at),
    (u32, get_u32, get_u32_at, put_u32, put_u32_at),
    (i32, get_i32, get_i32_at, put_i32, put_i32_at),
    (u64, get_u64, get_u64_at, put_u64, put_u64_at),
    (i64, get_i64, get_i64_at, put_i64, put_i64_at),
    (f32, get_f32, get_f32_at, put_f32, put_f32_at),
    (f64, get_f64, get_f64_at, put_f64, put_f64_at),
}

/// 24 位（medium）整数。
///
/// 有符号读取以第 23 位为符号位做符号扩展；写入只取低 24 位。
impl IoBuffer {
    pub fn get_medium_int(&mut self) -> Result<i32> {
        let start = self.advance(3)?;
        Ok(sign_extend(self.medium_raw(start)))
    }

    pub fn get_medium_int_at(&self, index: usize) -> Result<i32> {
        self.check_index(index, 3)?;
        Ok(sign_extend(self.medium_raw(index)))
    }

    pub fn get_unsigned_medium_int(&mut self) -> Result<u32> {
        let start = self.advance(3)?;
        Ok(self.medium_raw(start))
    }

    pub fn get_unsigned_medium_int_at(&self, index: usize) -> Result<u32> {
        self.check_index(index, 3)?;
        Ok(self.medium_raw(index))
    }

    pub fn put_medium_int(&mut self, value: i32) -> Result<&mut Self> {
        let bytes = self.medium_bytes(value);
        let start = self.reserve(3)?;
        self.write_bytes(start, &bytes);
        Ok(self)
    }

    pub fn put_medium_int_at(&mut self, index: usize, value: i32) -> Result<&mut Self> {
        let bytes = self.medium_bytes(value);
        self.reserve_at(index, 3)?;
        self.write_bytes(index, &bytes);
        Ok(self)
    }

    fn medium_raw(&self, index: usize) -> u32 {
        let [a, b, c] = self.read_array::<3>(index).map(u32::from);
        match self.order() {
            ByteOrder::BigEndian => (a << 16) | (b << 8) | c,
            ByteOrder::LittleEndian => (c << 16) | (b << 8) | a,
        }
    }

    fn medium_bytes(&self, value: i32) -> [u8; 3] {
        let [_, high, mid, low] = value.to_be_bytes();
        match self.order() {
            ByteOrder::BigEndian => [high, mid, low],
            ByteOrder::LittleEndian => [low, mid, high],
        }
    }
}

fn sign_extend(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}
