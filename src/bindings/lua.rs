//! Lua Binding Adapter using mlua
//!
//! [`MapHandle`] is the userdata a script sees. It carries a [`MapId`] and the
//! registry that id belongs to, never the map itself. mlua tags every
//! userdata with its Rust type, so the capability table below only ever runs
//! on genuine handles; anything else is rejected with the same
//! `bad argument` wording as Lua's auxiliary library.
//!
//! Capability table:
//! - `__index`: read a key, `nil` when absent
//! - `__newindex`: insert or overwrite a key
//! - `__tostring`: `<type name>: <id>`
//! - finalize: mlua runs the handle's `Drop` from `__gc`, which releases one
//!   reference in the registry

use crate::core::error::{BindingError, BindingResult};
use crate::resource::{DoubleMap, MapId, Ownership, SharedRegistry};
use mlua::{AnyUserData, Lua, MetaMethod, UserData, UserDataMethods, UserDataRef, Value};

/// Type name used when no binding has been installed on the state.
pub const DEFAULT_TYPE_NAME: &str = "doublemap";

/// Per-state display name of the handle type, kept in mlua app data.
#[derive(Debug, Clone)]
pub(crate) struct HandleType {
    name: String,
}

impl HandleType {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub(crate) fn type_name(lua: &Lua) -> String {
    lua.app_data_ref::<HandleType>()
        .map(|ty| ty.name.clone())
        .unwrap_or_else(|| DEFAULT_TYPE_NAME.to_string())
}

/// Userdata handle onto a map owned by a [`SharedRegistry`].
#[derive(Debug)]
pub struct MapHandle {
    id: MapId,
    registry: SharedRegistry,
}

impl MapHandle {
    /// Creates one more handle onto an existing map.
    pub fn attach(registry: &SharedRegistry, id: MapId) -> BindingResult<Self> {
        registry.with_mut(|r| r.retain(id))?;
        Ok(Self {
            id,
            registry: registry.clone(),
        })
    }

    /// Stores `map` in the registry and returns its first handle.
    pub fn allocate(registry: &SharedRegistry, map: DoubleMap, ownership: Ownership) -> Self {
        let id = registry.with_mut(|r| {
            let id = r.insert(map, ownership);
            // 新插入的条目一定存在
            let _ = r.retain(id);
            id
        });
        tracing::debug!(target: "doublemap", "allocated map {} ({:?})", id, ownership);
        Self {
            id,
            registry: registry.clone(),
        }
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    fn read(&self, key: &[u8]) -> BindingResult<Option<f64>> {
        self.registry.with(|r| r.get(self.id).map(|map| map.get(key)))
    }

    fn write(&self, key: Vec<u8>, value: f64) -> BindingResult<()> {
        self.registry.with_mut(|r| {
            r.get_mut(self.id).map(|map| {
                map.insert(key, value);
            })
        })
    }
}

impl Drop for MapHandle {
    fn drop(&mut self) {
        tracing::trace!(target: "doublemap", "finalizing handle to {}", self.id);
        self.registry.release(self.id);
    }
}

impl UserData for MapHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(MetaMethod::Index, |lua, (target, key): (Value, Value)| {
            read(lua, "__index", target, key).map_err(mlua::Error::from)
        });

        methods.add_meta_function(
            MetaMethod::NewIndex,
            |lua, (target, key, value): (Value, Value, Value)| {
                write(lua, "__newindex", target, key, value).map_err(mlua::Error::from)
            },
        );

        methods.add_meta_method(MetaMethod::ToString, |lua, this, ()| {
            Ok(format!("{}: {}", type_name(lua), this.id))
        });
    }
}

/// Type name as `luaL_typename` reports it: integers and floats are both
/// `number`, and every userdata flavour is `userdata`.
pub fn lua_type_name(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "number",
        Value::LightUserData(_) | Value::Error(_) => "userdata",
        other => other.type_name(),
    }
}

/// Tag check for argument `arg`, the counterpart of `luaL_checkudata`.
pub fn check_handle(
    lua: &Lua,
    value: &Value,
    arg: usize,
    func: &'static str,
) -> BindingResult<UserDataRef<MapHandle>> {
    if let Value::UserData(ud) = value {
        if ud.is::<MapHandle>() {
            return Ok(ud.borrow::<MapHandle>()?);
        }
    }
    Err(BindingError::bad_argument(
        arg,
        func,
        type_name(lua),
        lua_type_name(value),
    ))
}

/// Accepts strings and numbers, as `luaL_checklstring` does. The key keeps its
/// explicit length, so embedded NULs survive.
pub fn check_key(lua: &Lua, value: Value, arg: usize, func: &'static str) -> BindingResult<Vec<u8>> {
    let got = lua_type_name(&value);
    match lua.coerce_string(value)? {
        Some(key) => Ok(key.as_bytes().to_vec()),
        None => Err(BindingError::bad_argument(arg, func, "string", got)),
    }
}

/// Accepts numbers and numeric strings, as `luaL_checknumber` does.
pub fn check_number(lua: &Lua, value: Value, arg: usize, func: &'static str) -> BindingResult<f64> {
    let got = lua_type_name(&value);
    match lua.coerce_number(value)? {
        Some(number) => Ok(number),
        None => Err(BindingError::bad_argument(arg, func, "number", got)),
    }
}

/// read(handle, key): the stored value or `nil`.
pub fn read(lua: &Lua, func: &'static str, target: Value, key: Value) -> BindingResult<Option<f64>> {
    let handle = check_handle(lua, &target, 1, func)?;
    let key = check_key(lua, key, 2, func)?;
    let value = handle.read(&key)?;
    tracing::trace!(
        target: "doublemap",
        "read {} [{}] -> {:?}",
        handle.id(),
        String::from_utf8_lossy(&key),
        value
    );
    Ok(value)
}

/// write(handle, key, value): insert or overwrite.
pub fn write(
    lua: &Lua,
    func: &'static str,
    target: Value,
    key: Value,
    value: Value,
) -> BindingResult<()> {
    let handle = check_handle(lua, &target, 1, func)?;
    let key = check_key(lua, key, 2, func)?;
    let value = check_number(lua, value, 3, func)?;
    tracing::trace!(
        target: "doublemap",
        "write {} [{}] = {}",
        handle.id(),
        String::from_utf8_lossy(&key),
        value
    );
    handle.write(key, value)
}

/// construct(): a fresh, empty, owned map wrapped in a new handle.
pub fn construct(lua: &Lua, registry: &SharedRegistry) -> BindingResult<AnyUserData> {
    push_map(lua, registry, DoubleMap::new(), Ownership::Owned)
}

/// Stores `map` and pushes its first handle as userdata.
///
/// The registry is not borrowed while the userdata is allocated, so a
/// collection triggered by the allocation can finalize other handles.
pub fn push_map(
    lua: &Lua,
    registry: &SharedRegistry,
    map: DoubleMap,
    ownership: Ownership,
) -> BindingResult<AnyUserData> {
    let handle = MapHandle::allocate(registry, map, ownership);
    Ok(lua.create_userdata(handle)?)
}
