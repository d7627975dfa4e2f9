//! 模块注册
//!
//! Lua 加载库时调用的入口，以及供自带 Lua 状态的 Rust 宿主使用的同一安装流程

use super::compat;
use super::lua::{construct, push_map, read, write, HandleType, MapHandle};
use crate::config::{init_logging, BindingConfig, GlobalSeed};
use crate::core::error::{BindingError, BindingResult};
use crate::resource::{DoubleMap, MapId, Ownership, SharedRegistry};
use mlua::{AnyUserData, Lua, Table, Value};

/// 已安装的绑定：所有句柄背后的注册表，以及返回给 Lua 的库表
#[derive(Debug, Clone)]
pub struct DoubleMapBinding {
    registry: SharedRegistry,
    library: Table,
    type_name: String,
}

/// 把绑定安装到 `lua`：句柄类型名、库表 (`new`、`get`、`set`)，
/// 启用时还会创建预置的全局映射
pub fn install(lua: &Lua, config: &BindingConfig) -> BindingResult<DoubleMapBinding> {
    config.validate()?;
    lua.set_app_data(HandleType::new(config.type_name.clone()));

    let registry = SharedRegistry::new();

    let new = {
        let registry = registry.clone();
        lua.create_function(move |lua, ()| {
            construct(lua, &registry).map_err(mlua::Error::from)
        })?
    };
    let get = lua.create_function(|lua, (target, key): (Value, Value)| {
        read(lua, "get", target, key).map_err(mlua::Error::from)
    })?;
    let set = lua.create_function(|lua, (target, key, value): (Value, Value, Value)| {
        write(lua, "set", target, key, value).map_err(mlua::Error::from)
    })?;

    let library = compat::new_lib(
        lua,
        &config.library_name,
        &[("new", new), ("get", get), ("set", set)],
    )?;

    let binding = DoubleMapBinding {
        registry,
        library,
        type_name: config.type_name.clone(),
    };

    if config.seed_globals {
        for seed in &config.globals {
            binding.seed_global(lua, seed)?;
        }
    }

    tracing::info!(
        target: "doublemap",
        "Installed '{}' binding ({} globals)",
        config.library_name,
        if config.seed_globals { config.globals.len() } else { 0 }
    );
    Ok(binding)
}

/// 加载配置，按需初始化日志，安装绑定并返回库表
pub fn register_module(lua: &Lua) -> mlua::Result<Table> {
    let config = BindingConfig::load_or_default();
    if config.logging.log_to_console {
        init_logging(&config.logging);
    }
    let binding = install(lua, &config)?;
    Ok(binding.library)
}

/// `luaopen_doublemap`，即 `require("doublemap")` 查找的符号
#[cfg(feature = "module")]
#[mlua::lua_module]
fn doublemap(lua: &Lua) -> mlua::Result<Table> {
    register_module(lua)
}

impl DoubleMapBinding {
    pub fn library(&self) -> &Table {
        &self.library
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// 存入 `map` 并返回它的第一个句柄
    pub fn create_map(
        &self,
        lua: &Lua,
        map: DoubleMap,
        ownership: Ownership,
    ) -> BindingResult<AnyUserData> {
        push_map(lua, &self.registry, map, ownership)
    }

    /// 为存活的映射再创建一个句柄，两者共享同一份数据
    pub fn push_handle(&self, lua: &Lua, id: MapId) -> BindingResult<AnyUserData> {
        let handle = MapHandle::attach(&self.registry, id)?;
        Ok(lua.create_userdata(handle)?)
    }

    /// 按 `seed` 创建映射并绑定到对应的全局变量
    pub fn seed_global(&self, lua: &Lua, seed: &GlobalSeed) -> BindingResult<MapId> {
        let map: DoubleMap = seed
            .entries
            .iter()
            .map(|(key, value)| (key.as_str(), *value))
            .collect();
        let ownership = if seed.pinned {
            Ownership::Pinned
        } else {
            Ownership::Owned
        };

        let ud = self.create_map(lua, map, ownership)?;
        let id = self.id_of(&ud)?;
        lua.globals().set(seed.name.as_str(), ud)?;
        tracing::debug!(target: "doublemap", "seeded global '{}' as {}", seed.name, id);
        Ok(id)
    }

    /// 句柄对应的映射 id
    pub fn id_of(&self, ud: &AnyUserData) -> BindingResult<MapId> {
        if !ud.is::<MapHandle>() {
            return Err(BindingError::bad_argument(
                1,
                "id_of",
                self.type_name.clone(),
                "userdata",
            ));
        }
        Ok(ud.borrow::<MapHandle>()?.id())
    }

    /// 对 `id` 对应的映射执行 `f`
    ///
    /// 执行期间注册表处于借用状态，`f` 不应回调 Lua。若回调期间发生回收，
    /// 被终结句柄的释放会排队，在下一次访问时生效。
    pub fn with_map<R>(&self, id: MapId, f: impl FnOnce(&DoubleMap) -> R) -> BindingResult<R> {
        self.registry.with(|r| r.get(id).map(f))
    }

    /// 修改映射的所有权策略，返回该操作是否释放了映射
    pub fn set_ownership(&self, id: MapId, ownership: Ownership) -> BindingResult<bool> {
        self.registry.with_mut(|r| r.set_ownership(id, ownership))
    }

    pub fn pin(&self, id: MapId) -> BindingResult<()> {
        self.set_ownership(id, Ownership::Pinned).map(|_| ())
    }

    pub fn handle_count(&self, id: MapId) -> BindingResult<usize> {
        self.registry.with(|r| r.handle_count(id))
    }

    /// 注册表中存活的映射数量
    pub fn live_maps(&self) -> usize {
        self.registry.with(|r| r.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_env::EnvGuard;
    use crate::config::CONFIG_PATH_ENV;

    fn installed() -> (Lua, DoubleMapBinding) {
        let lua = Lua::new();
        let binding = install(&lua, &BindingConfig::default()).unwrap();
        (lua, binding)
    }

    #[test]
    fn test_seeded_globals() {
        let (lua, binding) = installed();
        assert_eq!(binding.live_maps(), 2);

        let mymap: AnyUserData = lua.globals().get("mymap").unwrap();
        let id = binding.id_of(&mymap).unwrap();
        assert_eq!(binding.with_map(id, |m| m.get("test1")).unwrap(), Some(0.012));
        assert_eq!(binding.with_map(id, |m| m.get("test2")).unwrap(), Some(1.234));

        let mymap2: AnyUserData = lua.globals().get("mymap2").unwrap();
        let id2 = binding.id_of(&mymap2).unwrap();
        assert_eq!(binding.with_map(id2, |m| m.get("test1")).unwrap(), Some(6.777));
        assert_eq!(binding.with_map(id2, |m| m.get("test2")).unwrap(), Some(5.666));
    }

    #[test]
    fn test_seeding_disabled() {
        let lua = Lua::new();
        let config = BindingConfig {
            seed_globals: false,
            ..BindingConfig::default()
        };
        let binding = install(&lua, &config).unwrap();

        assert_eq!(binding.live_maps(), 0);
        let mymap: Value = lua.globals().get("mymap").unwrap();
        assert!(mymap.is_nil());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let lua = Lua::new();
        let mut config = BindingConfig::default();
        config.globals.push(GlobalSeed::new("mymap", [("x", 1.0)]));

        let err = install(&lua, &config).unwrap_err();
        assert!(matches!(err, BindingError::Config(_)));
    }

    #[test]
    fn test_push_handle_shares_map() {
        let (lua, binding) = installed();
        let first = binding.create_map(&lua, DoubleMap::new(), Ownership::Owned).unwrap();
        let id = binding.id_of(&first).unwrap();
        let second = binding.push_handle(&lua, id).unwrap();
        assert_eq!(binding.handle_count(id).unwrap(), 2);

        lua.globals().set("a", first).unwrap();
        lua.globals().set("b", second).unwrap();
        lua.load("a.shared = 4.5").exec().unwrap();
        assert_eq!(lua.load("return b.shared").eval::<f64>().unwrap(), 4.5);
    }

    #[test]
    fn test_id_of_rejects_foreign_userdata() {
        struct Other;
        impl mlua::UserData for Other {}

        let (lua, binding) = installed();
        let other = lua.create_userdata(Other).unwrap();
        assert!(binding.id_of(&other).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn test_register_module_returns_library() {
        let _env = EnvGuard::clear(&[
            CONFIG_PATH_ENV,
            "DOUBLEMAP_SEED_GLOBALS",
            "DOUBLEMAP_LOG_LEVEL",
            "DOUBLEMAP_LOG_TO_CONSOLE",
        ]);

        let lua = Lua::new();
        let library = register_module(&lua).unwrap();
        let new: mlua::Function = library.get("new").unwrap();
        let handle: AnyUserData = new.call(()).unwrap();
        assert!(handle.is::<MapHandle>());

        let mymap: AnyUserData = lua.globals().get("mymap").unwrap();
        assert!(mymap.is::<MapHandle>());
    }

    #[test]
    fn test_collection_inside_with_map() {
        let (lua, binding) = installed();
        let mymap: AnyUserData = lua.globals().get("mymap").unwrap();
        let id = binding.id_of(&mymap).unwrap();

        let temp = binding.create_map(&lua, DoubleMap::new(), Ownership::Owned).unwrap();
        drop(temp);
        assert_eq!(binding.live_maps(), 3);

        let inner = binding
            .with_map(id, |map| {
                lua.gc_collect().unwrap();
                lua.gc_collect().unwrap();
                (map.get("test1"), binding.live_maps())
            })
            .unwrap();
        // 回收发生在借用期间，释放被推迟
        assert_eq!(inner, (Some(0.012), 3));
        assert_eq!(binding.live_maps(), 2);
    }
}
