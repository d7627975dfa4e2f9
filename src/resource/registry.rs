//! 宿主侧映射注册表
//!
//! 脚本从不直接引用 [`DoubleMap`]，只持有包在 userdata 句柄里的 [`MapId`]
//! (槽位索引加世代号)，每次访问都经过注册表。槽位按句柄计数：
//! [`Ownership::Owned`] 映射的最后一个句柄被终结时映射即被释放，槽位以新的
//! 世代号复用，旧 id 不会指向新映射。

use super::DoubleMap;
use crate::core::error::{BindingError, BindingResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// [`MapRegistry`] 中映射的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId {
    index: u32,
    generation: u32,
}

impl MapId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// 映射的释放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// 最后一个句柄被终结时释放
    #[default]
    Owned,
    /// 与句柄数量无关，保留到注册表本身被销毁
    Pinned,
}

#[derive(Debug)]
struct Entry {
    map: DoubleMap,
    handles: usize,
    ownership: Ownership,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// 存活映射的槽位数组，空闲槽位复用
#[derive(Debug, Default)]
pub struct MapRegistry {
    slots: Vec<Slot>,
    free_indices: Vec<u32>,
    live: usize,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存入 `map`，句柄计数为零，返回其 id
    pub fn insert(&mut self, map: DoubleMap, ownership: Ownership) -> MapId {
        let entry = Entry {
            map,
            handles: 0,
            ownership,
        };
        self.live += 1;

        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            MapId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            MapId {
                index,
                generation: 0,
            }
        }
    }

    fn entry(&self, id: MapId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: MapId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn get(&self, id: MapId) -> BindingResult<&DoubleMap> {
        self.entry(id)
            .map(|entry| &entry.map)
            .ok_or(BindingError::StaleHandle(id))
    }

    pub fn get_mut(&mut self, id: MapId) -> BindingResult<&mut DoubleMap> {
        self.entry_mut(id)
            .map(|entry| &mut entry.map)
            .ok_or(BindingError::StaleHandle(id))
    }

    pub fn contains(&self, id: MapId) -> bool {
        self.entry(id).is_some()
    }

    /// 存活映射数量
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn handle_count(&self, id: MapId) -> BindingResult<usize> {
        self.entry(id)
            .map(|entry| entry.handles)
            .ok_or(BindingError::StaleHandle(id))
    }

    pub fn ownership(&self, id: MapId) -> BindingResult<Ownership> {
        self.entry(id)
            .map(|entry| entry.ownership)
            .ok_or(BindingError::StaleHandle(id))
    }

    /// 修改存活映射的所有权策略
    ///
    /// 无句柄引用的映射改为 `Owned` 时立即释放。
    pub fn set_ownership(&mut self, id: MapId, ownership: Ownership) -> BindingResult<bool> {
        let entry = self.entry_mut(id).ok_or(BindingError::StaleHandle(id))?;
        entry.ownership = ownership;
        if entry.ownership == Ownership::Owned && entry.handles == 0 {
            self.free(id);
            return Ok(true);
        }
        Ok(false)
    }

    /// 记录一个新的指向 `id` 的句柄
    pub fn retain(&mut self, id: MapId) -> BindingResult<()> {
        let entry = self.entry_mut(id).ok_or(BindingError::StaleHandle(id))?;
        entry.handles += 1;
        Ok(())
    }

    /// 减少一个句柄引用，映射被释放时返回 `true`
    pub fn release(&mut self, id: MapId) -> BindingResult<bool> {
        let entry = self.entry_mut(id).ok_or(BindingError::StaleHandle(id))?;
        entry.handles = entry.handles.saturating_sub(1);
        if entry.handles == 0 && entry.ownership == Ownership::Owned {
            self.free(id);
            return Ok(true);
        }
        Ok(false)
    }

    fn free(&mut self, id: MapId) {
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_indices.push(id.index);
        self.live -= 1;
        tracing::debug!(target: "doublemap", "released map {}", id);
    }
}

/// [`MapRegistry`] 的单线程共享访问
///
/// 句柄由 Lua 的垃圾回收器终结，回收可能发生在绑定调用借用注册表期间。
/// 遇到注册表已被借用的释放会排队，在下一次访问时生效。
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Rc<RegistryCell>,
}

#[derive(Debug, Default)]
struct RegistryCell {
    registry: RefCell<MapRegistry>,
    deferred: RefCell<Vec<MapId>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以共享借用执行 `f`，`f` 不应回调 Lua
    pub fn with<R>(&self, f: impl FnOnce(&MapRegistry) -> R) -> R {
        self.flush_deferred();
        f(&self.inner.registry.borrow())
    }

    /// 以独占借用执行 `f`，`f` 不应回调 Lua
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut MapRegistry) -> R) -> R {
        self.flush_deferred();
        f(&mut self.inner.registry.borrow_mut())
    }

    /// 释放 `id` 上的一个句柄，注册表忙时推迟
    pub(crate) fn release(&self, id: MapId) {
        match self.inner.registry.try_borrow_mut() {
            Ok(mut registry) => {
                if let Err(err) = registry.release(id) {
                    tracing::warn!(target: "doublemap", "release failed: {}", err);
                }
            }
            Err(_) => {
                tracing::warn!(target: "doublemap", "registry busy, deferring release of {}", id);
                self.inner.deferred.borrow_mut().push(id);
            }
        }
    }

    /// 执行排队的释放。嵌套访问时注册表已被借用，队列留给最外层访问处理
    fn flush_deferred(&self) {
        if self.inner.deferred.borrow().is_empty() {
            return;
        }
        let Ok(mut registry) = self.inner.registry.try_borrow_mut() else {
            return;
        };
        let pending = std::mem::take(&mut *self.inner.deferred.borrow_mut());
        for id in pending {
            if let Err(err) = registry.release(id) {
                tracing::warn!(target: "doublemap", "deferred release failed: {}", err);
            }
        }
    }
}
