//! 暴露给脚本的原生资源
//!
//! - [`DoubleMap`]: 交给 Lua 的字符串到数值映射
//! - [`registry`]: 宿主侧的映射注册表，持有所有映射并分配 id

pub mod registry;

pub use registry::{MapId, MapRegistry, Ownership, SharedRegistry};

use std::collections::HashMap;

/// 字节串键到 `f64` 值的映射
///
/// 键按原始字节保存，含 NUL 的 Lua 字符串保留完整长度。迭代顺序不固定。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoubleMap {
    entries: HashMap<Vec<u8>, f64>,
}

impl DoubleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取 `key` 对应的值，从未写入时返回 `None`
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<f64> {
        self.entries.get(key.as_ref()).copied()
    }

    /// 插入或覆盖 `key`，返回旧值
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: f64) -> Option<f64> {
        self.entries.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.entries.contains_key(key.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, f64)> for DoubleMap {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut map = DoubleMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_missing_key_is_absent() {
        let map = DoubleMap::new();
        assert_eq!(map.get("test1"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_zero_is_not_absent() {
        let mut map = DoubleMap::new();
        map.insert("zero", 0.0);
        assert_eq!(map.get("zero"), Some(0.0));
        assert_eq!(map.get("other"), None);
    }

    #[test]
    fn test_embedded_nul_keys() {
        let mut map = DoubleMap::new();
        map.insert(&b"a\0b"[..], 1.0);
        map.insert("a", 2.0);

        assert_eq!(map.get(b"a\0b"), Some(1.0));
        assert_eq!(map.get("a"), Some(2.0));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_from_iter() {
        let map: DoubleMap = [("test1", 0.012), ("test2", 1.234)].into_iter().collect();
        assert_eq!(map.get("test1"), Some(0.012));
        assert_eq!(map.get("test2"), Some(1.234));
    }

    proptest! {
        #[test]
        fn prop_write_then_read(key in proptest::collection::vec(any::<u8>(), 0..32), value in any::<f64>()) {
            let mut map = DoubleMap::new();
            map.insert(key.clone(), value);
            let read = map.get(&key).unwrap();
            prop_assert!(read == value || (read.is_nan() && value.is_nan()));
        }

        #[test]
        fn prop_last_write_wins(key in "[a-z]{1,8}", first in -1e9f64..1e9, second in -1e9f64..1e9) {
            let mut map = DoubleMap::new();
            map.insert(key.as_str(), first);
            prop_assert_eq!(map.insert(key.as_str(), second), Some(first));
            prop_assert_eq!(map.get(&key), Some(second));
        }
    }
}
