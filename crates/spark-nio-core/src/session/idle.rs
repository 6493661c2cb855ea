use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// 空闲类别。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum IdleStatus {
    /// 超过设定时长没有读到数据。
    ReaderIdle,
    /// 超过设定时长没有写出数据。
    WriterIdle,
    /// 读写都没有发生。
    BothIdle,
}

impl IdleStatus {
    pub const ALL: [IdleStatus; 3] = [Self::ReaderIdle, Self::WriterIdle, Self::BothIdle];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReaderIdle => "read idle",
            Self::WriterIdle => "write idle",
            Self::BothIdle => "both idle",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::ReaderIdle => 0,
            Self::WriterIdle => 1,
            Self::BothIdle => 2,
        }
    }
}

impl fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每种空闲类别的计数与最近一次触发时刻（相对会话创建时刻的纳秒偏移）。
///
/// 触发判定以 `max(最近 IO, 最近触发)` 为基准，因此同一段静默里每个窗口只触发一次，
/// 与反应器被唤醒的频率无关。
#[derive(Debug, Default)]
pub(crate) struct IdleCounters {
    counts: [AtomicU64; 3],
    last_fired: [AtomicU64; 3],
}

impl IdleCounters {
    pub(crate) fn count(&self, status: IdleStatus) -> u64 {
        self.counts[status.index()].load(Ordering::Acquire)
    }

    pub(crate) fn last_fired(&self, status: IdleStatus) -> u64 {
        self.last_fired[status.index()].load(Ordering::Acquire)
    }

    pub(crate) fn fire(&self, status: IdleStatus, at: u64) {
        self.last_fired[status.index()].store(at, Ordering::Release);
        self.counts[status.index()].fetch_add(1, Ordering::AcqRel);
    }

    /// IO 发生后清零连续空闲计数。
    pub(crate) fn reset(&self, status: IdleStatus) {
        self.counts[status.index()].store(0, Ordering::Release);
    }
}
