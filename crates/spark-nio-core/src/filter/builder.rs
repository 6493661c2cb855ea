use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::{IoFilterChain, SharedFilter};
use crate::error::CoreError;

/// 服务级过滤器模板：每个新会话按此顺序装配自己的链。
///
/// 构建器只保存句柄，不计入 [`SharedFilter::attachments`]；真正的 `init`/`destroy`
/// 随会话链的挂载与摘除发生。
#[derive(Default)]
pub struct IoFilterChainBuilder {
    entries: Mutex<Vec<(Arc<str>, SharedFilter)>>,
}

impl IoFilterChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_first(&self, name: &str, filter: impl Into<SharedFilter>) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |_| Ok(0))
    }

    pub fn add_last(&self, name: &str, filter: impl Into<SharedFilter>) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |entries| Ok(entries.len()))
    }

    pub fn add_before(
        &self,
        base: &str,
        name: &str,
        filter: impl Into<SharedFilter>,
    ) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |entries| position_of(entries, base))
    }

    pub fn add_after(
        &self,
        base: &str,
        name: &str,
        filter: impl Into<SharedFilter>,
    ) -> Result<(), CoreError> {
        self.insert(name, filter.into(), |entries| {
            position_of(entries, base).map(|index| index + 1)
        })
    }

    pub fn remove(&self, name: &str) -> Result<SharedFilter, CoreError> {
        let mut entries = self.entries.lock();
        let index = position_of(&entries, name)?;
        Ok(entries.remove(index).1)
    }

    pub fn replace(
        &self,
        name: &str,
        filter: impl Into<SharedFilter>,
    ) -> Result<SharedFilter, CoreError> {
        let mut entries = self.entries.lock();
        let index = position_of(&entries, name)?;
        Ok(std::mem::replace(&mut entries[index].1, filter.into()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(entry, _)| &**entry == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// 按模板顺序把过滤器追加到 `chain`；任一失败时清空 `chain` 并返回错误。
    pub fn build_into(&self, chain: &IoFilterChain) -> Result<(), CoreError> {
        let entries = self.entries.lock().clone();
        for (name, filter) in entries {
            if let Err(err) = chain.add_last(&name, filter) {
                chain.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    fn insert<P>(&self, name: &str, filter: SharedFilter, position: P) -> Result<(), CoreError>
    where
        P: FnOnce(&[(Arc<str>, SharedFilter)]) -> Result<usize, CoreError>,
    {
        let mut entries = self.entries.lock();
        if entries.iter().any(|(entry, _)| &**entry == name) {
            return Err(CoreError::FilterNameConflict {
                name: name.to_owned(),
            });
        }
        let index = position(&entries)?;
        entries.insert(index, (Arc::from(name), filter));
        Ok(())
    }
}

impl fmt::Debug for IoFilterChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoFilterChainBuilder")
            .field("filters", &self.names())
            .finish()
    }
}

fn position_of(entries: &[(Arc<str>, SharedFilter)], name: &str) -> Result<usize, CoreError> {
    entries
        .iter()
        .position(|(entry, _)| &**entry == name)
        .ok_or_else(|| CoreError::FilterNotFound {
            name: name.to_owned(),
        })
}
