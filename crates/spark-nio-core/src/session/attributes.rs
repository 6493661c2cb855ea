//! 会话属性表。
//!
//! # 教案式说明
//! - **意图 (Why)**：过滤器与处理器需要在会话上挂载任意状态（解码器残留、认证结果等），
//!   且可能同时从反应器线程与业务线程访问。
//! - **逻辑 (How)**：底层为 `DashMap<&'static str, Box<dyn Any>>`；类型由 [`AttributeKey<T>`]
//!   在编译期携带，读取时向下转型。条件更新都在同一分片锁内完成。
//! - **契约 (What)**：
//!   - 每个键上的操作是顺序一致的；
//!   - 同名键以不同类型读取时返回 `None`，不会 panic；
//!   - `set_if_absent`/`replace`/`remove_if` 是原子的比较并交换。

use std::{any::Any, fmt, marker::PhantomData};

use dashmap::{DashMap, mapref::entry::Entry};

/// 带类型的属性键。
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

type Value = Box<dyn Any + Send + Sync>;

/// 会话持有的属性表。
#[derive(Default)]
pub struct AttributeMap {
    entries: DashMap<&'static str, Value>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        self.entries
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// 读取属性，不存在时返回 `default`，不写入。
    pub fn get_or<T>(&self, key: &AttributeKey<T>, default: T) -> T
    where
        T: Any + Clone + Send + Sync,
    {
        self.get(key).unwrap_or(default)
    }

    /// 写入并返回旧值。
    pub fn set<T>(&self, key: &AttributeKey<T>, value: T) -> Option<T>
    where
        T: Any + Send + Sync,
    {
        self.entries
            .insert(key.name, Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok().map(|boxed| *boxed))
    }

    /// 把 `true` 作为标记写入。
    pub fn set_marker(&self, key: &AttributeKey<bool>) -> Option<bool> {
        self.set(key, true)
    }

    /// 仅在键不存在时写入；已存在时返回现值且不修改。
    pub fn set_if_absent<T>(&self, key: &AttributeKey<T>, value: T) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        match self.entries.entry(key.name) {
            Entry::Occupied(entry) => entry.get().downcast_ref::<T>().cloned(),
            Entry::Vacant(entry) => {
                entry.insert(Box::new(value));
                None
            }
        }
    }

    /// 读取属性；不存在时以 `make` 的结果原子地写入并返回。
    pub fn get_or_insert_with<T, F>(&self, key: &AttributeKey<T>, make: F) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
        F: FnOnce() -> T,
    {
        let entry = self
            .entries
            .entry(key.name)
            .or_insert_with(|| Box::new(make()));
        entry.downcast_ref::<T>().cloned()
    }

    /// 现值等于 `expected` 时替换为 `value`。
    pub fn replace<T>(&self, key: &AttributeKey<T>, expected: &T, value: T) -> bool
    where
        T: Any + PartialEq + Send + Sync,
    {
        match self.entries.get_mut(key.name) {
            Some(mut current) => match current.downcast_mut::<T>() {
                Some(slot) if slot == expected => {
                    *slot = value;
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    pub fn remove<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Any + Send + Sync,
    {
        self.entries
            .remove(key.name)
            .and_then(|(_, value)| value.downcast::<T>().ok().map(|boxed| *boxed))
    }

    /// 现值等于 `expected` 时移除。
    pub fn remove_if<T>(&self, key: &AttributeKey<T>, expected: &T) -> bool
    where
        T: Any + PartialEq + Send + Sync,
    {
        self.entries
            .remove_if(key.name, |_, value| {
                value.downcast_ref::<T>().is_some_and(|current| current == expected)
            })
            .is_some()
    }

    pub fn contains<T>(&self, key: &AttributeKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.entries.iter().map(|entry| *entry.key()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeMap")
            .field("keys", &self.keys())
            .finish()
    }
}
