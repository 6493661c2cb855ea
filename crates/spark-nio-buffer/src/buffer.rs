use std::{fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{BufferError, Result};

const DERIVED_RECAPACITY: &str = "derived buffers and their parent can't be expanded or shrunk";

/// 多字节数值的编码字节序，默认大端（网络序）。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// 共享底层存储：派生视图与父缓冲持有同一个 `Arc`。
type Storage = Arc<Mutex<Vec<u8>>>;

/// `IoBuffer` 是反应器读写路径上流转的字节容器。
///
/// # 教案式说明
/// - **意图 (Why)**：为过滤链提供带游标语义（`position ≤ limit ≤ capacity`，可选 `mark ≤ position`）
///   的可变缓冲，并在写溢出时按需扩容、在 `compact` 时按需收缩，免去协议层手工管理容量。
/// - **逻辑 (How)**：
///   - 底层为 `Arc<Mutex<Vec<u8>>>`，`offset`/`capacity` 描述本视图在共享存储中的窗口；
///   - 自动扩容把容量提升到不小于“所需末端的下一个 2 的幂”与“当前容量两倍”中的较大者；
///   - 派生视图（`duplicate`/`slice`/`as_read_only`）一旦产生，父缓冲与视图都禁止再调整容量，
///     因而视图的逻辑偏移永远不会因父缓冲扩容而失效。
/// - **契约 (What)**：
///   - 相对写入越过 `limit` 且未开启自动扩容时返回 [`BufferError::CapacityExceeded`]；
///   - 相对读取越过 `limit` 返回 [`BufferError::Underflow`]，绝对读取返回
///     [`BufferError::IndexOutOfBounds`]；
///   - 只读视图上的任何修改返回 [`BufferError::ReadOnly`]。
/// - **风险 (Trade-offs)**：每次访问都会短暂获取存储锁；该锁只在单次拷贝期间持有，
///   不会跨越用户回调以外的逻辑，适合反应器“单会话单线程”的访问模式。
pub struct IoBuffer {
    storage: Storage,
    offset: usize,
    capacity: usize,
    position: usize,
    limit: usize,
    mark: Option<usize>,
    order: ByteOrder,
    auto_expand: bool,
    auto_shrink: bool,
    read_only: bool,
    derived: bool,
    recapacity_allowed: bool,
    minimum_capacity: usize,
}

/// 返回不小于 `requested` 的最小 2 的幂。
pub(crate) fn normalize_capacity(requested: usize) -> usize {
    requested.checked_next_power_of_two().unwrap_or(usize::MAX)
}

impl IoBuffer {
    /// 分配一个零填充、容量恰为 `capacity` 的缓冲；该容量同时成为自动收缩的下限。
    pub fn allocate(capacity: usize) -> Self {
        Self::wrap(vec![0; capacity])
    }

    /// 以 `data` 作为底层存储构造缓冲，`limit = capacity = data.len()`。
    pub fn wrap(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Self {
            storage: Arc::new(Mutex::new(data)),
            offset: 0,
            capacity,
            position: 0,
            limit: capacity,
            mark: None,
            order: ByteOrder::default(),
            auto_expand: false,
            auto_shrink: false,
            read_only: false,
            derived: false,
            recapacity_allowed: true,
            minimum_capacity: capacity,
        }
    }

    /// 包装 `data`，并把可读窗口设置为 `[offset, offset + len)`。
    pub fn wrap_range(data: Vec<u8>, offset: usize, len: usize) -> Result<Self> {
        let total = data.len();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= total)
            .ok_or(BufferError::IndexOutOfBounds {
                index: offset,
                len,
                limit: total,
            })?;
        let mut buffer = Self::wrap(data);
        buffer.position = offset;
        buffer.limit = end;
        Ok(buffer)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) -> &mut Self {
        self.order = order;
        self
    }

    pub fn is_auto_expand(&self) -> bool {
        self.auto_expand
    }

    pub fn is_auto_shrink(&self) -> bool {
        self.auto_shrink
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// 是否为 `duplicate`/`slice`/`as_read_only` 产生的派生视图。
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn minimum_capacity(&self) -> usize {
        self.minimum_capacity
    }

    /// 调整自动收缩与 [`shrink`](Self::shrink) 的容量下限。
    pub fn set_minimum_capacity(&mut self, minimum_capacity: usize) -> &mut Self {
        self.minimum_capacity = minimum_capacity;
        self
    }

    /// 开关写溢出自动扩容。派生视图及其父缓冲无法开启。
    pub fn set_auto_expand(&mut self, enabled: bool) -> Result<&mut Self> {
        if !self.recapacity_allowed {
            return Err(BufferError::IllegalState(DERIVED_RECAPACITY));
        }
        self.auto_expand = enabled;
        Ok(self)
    }

    /// 开关 `compact` 时的自动收缩。派生视图及其父缓冲无法开启。
    pub fn set_auto_shrink(&mut self, enabled: bool) -> Result<&mut Self> {
        if !self.recapacity_allowed {
            return Err(BufferError::IllegalState(DERIVED_RECAPACITY));
        }
        self.auto_shrink = enabled;
        Ok(self)
    }

    pub fn set_position(&mut self, position: usize) -> Result<&mut Self> {
        if position > self.limit {
            return Err(BufferError::IndexOutOfBounds {
                index: position,
                len: 0,
                limit: self.limit,
            });
        }
        if self.mark.is_some_and(|mark| mark > position) {
            self.mark = None;
        }
        self.position = position;
        Ok(self)
    }

    pub fn set_limit(&mut self, limit: usize) -> Result<&mut Self> {
        if limit > self.capacity {
            return Err(BufferError::IndexOutOfBounds {
                index: limit,
                len: 0,
                limit: self.capacity,
            });
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.is_some_and(|mark| mark > limit) {
            self.mark = None;
        }
        Ok(self)
    }

    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    /// 回到最近一次 [`mark`](Self::mark) 的位置。
    pub fn reset(&mut self) -> Result<&mut Self> {
        let mark = self
            .mark
            .ok_or(BufferError::IllegalState("mark is not set"))?;
        self.position = mark;
        Ok(self)
    }

    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
        self
    }

    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// 前移 `len` 字节；开启自动扩容时可越过当前 `limit`。
    pub fn skip(&mut self, len: usize) -> Result<&mut Self> {
        let target = self.position.saturating_add(len);
        if self.auto_expand {
            self.expand_internal(self.position, len, true)?;
        }
        self.set_position(target)
    }

    /// 确保从 `position` 起至少还能写入 `expected_remaining` 字节，必要时扩容并抬高 `limit`。
    pub fn expand(&mut self, expected_remaining: usize) -> Result<&mut Self> {
        self.expand_at(self.position, expected_remaining)
    }

    /// 以 `index` 为起点执行 [`expand`](Self::expand)，不移动游标。
    pub fn expand_at(&mut self, index: usize, expected_remaining: usize) -> Result<&mut Self> {
        self.expand_internal(index, expected_remaining, false)?;
        Ok(self)
    }

    /// 将容量提升到 `new_capacity`，保留内容与游标；小于当前容量时不做任何事。
    pub fn set_capacity(&mut self, new_capacity: usize) -> Result<&mut Self> {
        if !self.recapacity_allowed {
            return Err(BufferError::IllegalState(DERIVED_RECAPACITY));
        }
        if new_capacity > self.capacity {
            self.resize_storage(new_capacity);
        }
        Ok(self)
    }

    /// 把容量减半直到不低于 `max(minimum_capacity, limit)`，内容与游标保持不变。
    pub fn shrink(&mut self) -> Result<&mut Self> {
        if !self.recapacity_allowed {
            return Err(BufferError::IllegalState(DERIVED_RECAPACITY));
        }
        if self.capacity == self.limit {
            return Ok(self);
        }
        let target = halve_towards(self.capacity, self.minimum_capacity.max(self.limit));
        if target < self.capacity {
            self.resize_storage(target);
        }
        Ok(self)
    }

    /// 把 `[position, limit)` 搬到起点，`position = 未读字节数`，`limit = capacity`。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：读路径在消费部分数据后腾出空间继续追加写入；
    /// - **逻辑 (How)**：开启自动收缩且未读字节不超过容量的 1/4、容量高于下限时，容量按减半迭代，
    ///   直到再减半会容纳不下 `max(minimum_capacity, 未读字节 × 2)`；
    /// - **契约 (What)**：`mark` 被清除；例：容量 32、未读 8 → 16；未读 9 → 保持 32。
    pub fn compact(&mut self) -> Result<&mut Self> {
        self.ensure_writable()?;
        let remaining = self.remaining();
        let capacity = self.capacity;
        if capacity == 0 {
            return Ok(self);
        }
        let start = self.position;
        self.write_storage(|data| data.copy_within(start..start + remaining, 0));
        self.position = remaining;
        self.mark = None;

        if self.auto_shrink && remaining <= capacity >> 2 && capacity > self.minimum_capacity {
            let target = halve_towards(capacity, self.minimum_capacity.max(remaining << 1));
            if target < capacity {
                self.resize_storage(target);
            }
        }
        self.limit = self.capacity;
        Ok(self)
    }

    /// 共享存储、独立游标的视图；父缓冲此后不可再调整容量。
    pub fn duplicate(&mut self) -> IoBuffer {
        self.derive(self.offset, self.capacity, self.position, self.limit, self.mark, self.read_only)
    }

    /// 以 `[position, limit)` 为全部内容的视图：`position = 0`，`limit = capacity = remaining`。
    pub fn slice(&mut self) -> IoBuffer {
        let remaining = self.remaining();
        self.derive(self.offset + self.position, remaining, 0, remaining, None, self.read_only)
    }

    /// 共享存储的只读视图，任何修改都返回 [`BufferError::ReadOnly`]。
    pub fn as_read_only(&mut self) -> IoBuffer {
        self.derive(self.offset, self.capacity, self.position, self.limit, self.mark, true)
    }

    fn derive(
        &mut self,
        offset: usize,
        capacity: usize,
        position: usize,
        limit: usize,
        mark: Option<usize>,
        read_only: bool,
    ) -> IoBuffer {
        self.recapacity_allowed = false;
        self.auto_expand = false;
        self.auto_shrink = false;
        IoBuffer {
            storage: Arc::clone(&self.storage),
            offset,
            capacity,
            position,
            limit,
            mark,
            order: self.order,
            auto_expand: false,
            auto_shrink: false,
            read_only,
            derived: true,
            recapacity_allowed: false,
            minimum_capacity: capacity,
        }
    }

    /// 返回 `[position, limit)` 中第一个等于 `byte` 的绝对下标。
    pub fn index_of(&self, byte: u8) -> Option<usize> {
        let (start, end) = (self.position, self.limit);
        self.read_storage(|data| {
            data[start..end]
                .iter()
                .position(|candidate| *candidate == byte)
                .map(|found| start + found)
        })
    }

    /// 清空游标并把整个容量填为 0。
    pub fn sweep(&mut self) -> Result<&mut Self> {
        self.sweep_with(0)
    }

    /// 清空游标并把整个容量填为 `value`。
    pub fn sweep_with(&mut self, value: u8) -> Result<&mut Self> {
        self.ensure_writable()?;
        self.clear();
        self.write_storage(|data| data.fill(value));
        Ok(self)
    }

    /// 相对写入 `len` 个 0。
    pub fn fill(&mut self, len: usize) -> Result<&mut Self> {
        self.fill_with(0, len)
    }

    pub fn fill_with(&mut self, value: u8, len: usize) -> Result<&mut Self> {
        let start = self.reserve(len)?;
        self.write_storage(|data| data[start..start + len].fill(value));
        Ok(self)
    }

    /// 写入 `len` 个 0 后把 `position` 恢复到写入前。
    pub fn fill_and_reset(&mut self, len: usize) -> Result<&mut Self> {
        let position = self.position;
        self.fill(len)?;
        self.position = position;
        Ok(self)
    }

    pub fn put_slice(&mut self, src: &[u8]) -> Result<&mut Self> {
        let start = self.reserve(src.len())?;
        self.write_bytes(start, src);
        Ok(self)
    }

    pub fn put_slice_at(&mut self, index: usize, src: &[u8]) -> Result<&mut Self> {
        self.reserve_at(index, src.len())?;
        self.write_bytes(index, src);
        Ok(self)
    }

    /// 复制 `src` 的全部未读字节并推进双方游标。
    pub fn put_buffer(&mut self, src: &mut IoBuffer) -> Result<&mut Self> {
        let bytes = src.to_vec();
        self.put_slice(&bytes)?;
        src.position = src.limit;
        Ok(self)
    }

    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        let start = self.advance(dst.len())?;
        self.read_storage(|data| dst.copy_from_slice(&data[start..start + dst.len()]));
        Ok(())
    }

    pub fn get_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0; len];
        self.get_slice(&mut out)?;
        Ok(out)
    }

    /// 以只读切片访问 `[position, limit)`，不移动游标。
    pub fn with_remaining<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let (start, end) = (self.position, self.limit);
        self.read_storage(|data| f(&data[start..end]))
    }

    /// 以可写切片访问 `[position, limit)`，不移动游标；反应器据此直接从套接字读入。
    pub fn with_remaining_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.ensure_writable()?;
        let (start, end) = (self.position, self.limit);
        Ok(self.write_storage(|data| f(&mut data[start..end])))
    }

    /// 复制 `[position, limit)`。
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_remaining(<[u8]>::to_vec)
    }

    /// 以 `bytes::Bytes` 冻结未读内容的一份拷贝。
    pub fn freeze(&self) -> Bytes {
        Bytes::from(self.to_vec())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(BufferError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn auto_expand_at(&mut self, index: usize, len: usize) -> Result<()> {
        if self.auto_expand {
            self.expand_internal(index, len, true)?;
        }
        Ok(())
    }

    fn expand_internal(&mut self, index: usize, len: usize, normalize: bool) -> Result<()> {
        if !self.recapacity_allowed {
            return Err(BufferError::IllegalState(DERIVED_RECAPACITY));
        }
        let end = index
            .checked_add(len)
            .ok_or(BufferError::CapacityExceeded {
                required: usize::MAX,
                limit: self.limit,
            })?;
        if end > self.capacity {
            let target = if normalize {
                normalize_capacity(end).max(self.capacity.saturating_mul(2))
            } else {
                end
            };
            self.resize_storage(target);
        }
        if end > self.limit {
            self.limit = end;
        }
        Ok(())
    }

    /// 为相对写入预留 `len` 字节并推进游标，返回写入起点。
    pub(crate) fn reserve(&mut self, len: usize) -> Result<usize> {
        self.ensure_writable()?;
        let start = self.position;
        self.auto_expand_at(start, len)?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.limit)
            .ok_or(BufferError::CapacityExceeded {
                required: start.saturating_add(len),
                limit: self.limit,
            })?;
        self.position = end;
        Ok(start)
    }

    pub(crate) fn reserve_at(&mut self, index: usize, len: usize) -> Result<()> {
        self.ensure_writable()?;
        self.auto_expand_at(index, len)?;
        if index.checked_add(len).is_none_or(|end| end > self.limit) {
            return Err(BufferError::CapacityExceeded {
                required: index.saturating_add(len),
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// 为相对读取消费 `len` 字节，返回读取起点。
    pub(crate) fn advance(&mut self, len: usize) -> Result<usize> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(BufferError::Underflow {
                needed: len,
                remaining,
            });
        }
        let start = self.position;
        self.position += len;
        Ok(start)
    }

    pub(crate) fn check_index(&self, index: usize, len: usize) -> Result<()> {
        if index.checked_add(len).is_none_or(|end| end > self.limit) {
            return Err(BufferError::IndexOutOfBounds {
                index,
                len,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub(crate) fn read_storage<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.storage.lock();
        f(&guard[self.offset..self.offset + self.capacity])
    }

    pub(crate) fn write_storage<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.storage.lock();
        f(&mut guard[self.offset..self.offset + self.capacity])
    }

    pub(crate) fn read_array<const N: usize>(&self, index: usize) -> [u8; N] {
        self.read_storage(|data| {
            let mut out = [0u8; N];
            out.copy_from_slice(&data[index..index + N]);
            out
        })
    }

    pub(crate) fn write_bytes(&self, index: usize, src: &[u8]) {
        self.write_storage(|data| data[index..index + src.len()].copy_from_slice(src));
    }

    /// 仅对未派生的缓冲调用：其 `offset` 恒为 0，且不存在共享视图。
    fn resize_storage(&mut self, new_capacity: usize) {
        let mut data = self.storage.lock();
        data.resize(new_capacity, 0);
        data.shrink_to_fit();
        drop(data);
        self.capacity = new_capacity;
        if self.limit > new_capacity {
            self.limit = new_capacity;
        }
        if self.position > self.limit {
            self.position = self.limit;
        }
        if self.mark.is_some_and(|mark| mark > self.position) {
            self.mark = None;
        }
    }
}

/// 从 `capacity` 起反复减半，直到再减半会低于 `floor`；结果不低于 `floor`。
fn halve_towards(capacity: usize, floor: usize) -> usize {
    let mut target = capacity;
    while target >> 1 >= floor {
        target >>= 1;
        if floor == 0 {
            break;
        }
    }
    target.max(floor)
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity)
            .field("order", &self.order)
            .field("auto_expand", &self.auto_expand)
            .field("auto_shrink", &self.auto_shrink)
            .field("read_only", &self.read_only)
            .field("derived", &self.derived)
            .finish()
    }
}

impl fmt::Display for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoBuffer[pos={} lim={} cap={}: {}]",
            self.position,
            self.limit,
            self.capacity,
            self.hex_dump(16)
        )
    }
}

/// 两个缓冲相等当且仅当二者的未读内容逐字节相等。
impl PartialEq for IoBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl Eq for IoBuffer {}

impl From<Vec<u8>> for IoBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::wrap(data)
    }
}

impl From<&[u8]> for IoBuffer {
    fn from(data: &[u8]) -> Self {
        Self::wrap(data.to_vec())
    }
}

impl From<Bytes> for IoBuffer {
    fn from(data: Bytes) -> Self {
        Self::wrap(data.to_vec())
    }
}
