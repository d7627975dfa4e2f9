//! 脚本运行时
//!
//! 为嵌入 Lua 的 Rust 宿主提供一个已安装绑定的状态

use crate::bindings::{install, DoubleMapBinding};
use crate::config::BindingConfig;
use crate::core::error::BindingResult;
use mlua::{FromLuaMulti, Lua, Table};

pub struct ScriptingRuntime {
    lua: Lua,
    binding: DoubleMapBinding,
}

impl ScriptingRuntime {
    /// 使用默认配置创建运行时
    pub fn new() -> BindingResult<Self> {
        Self::with_config(&BindingConfig::default())
    }

    /// 使用指定配置创建运行时
    ///
    /// 库表同时注册到 `package.loaded` 和同名全局变量，
    /// 脚本可以直接使用，也可以 `require`。
    pub fn with_config(config: &BindingConfig) -> BindingResult<Self> {
        let lua = Lua::new();
        let binding = install(&lua, config)?;

        let globals = lua.globals();
        let package: Table = globals.get("package")?;
        let loaded: Table = package.get("loaded")?;
        loaded.set(config.library_name.as_str(), binding.library().clone())?;
        globals.set(config.library_name.as_str(), binding.library().clone())?;

        Ok(Self { lua, binding })
    }

    /// 执行脚本
    pub fn run_script(&self, code: &str) -> BindingResult<()> {
        self.lua.load(code).exec()?;
        Ok(())
    }

    /// 执行表达式或脚本块并返回结果
    pub fn eval<R: FromLuaMulti>(&self, code: &str) -> BindingResult<R> {
        Ok(self.lua.load(code).eval()?)
    }

    /// 执行完整的垃圾回收，触发不可达句柄的终结
    pub fn collect_garbage(&self) -> BindingResult<()> {
        // 两轮：第一轮可能只把带终结器的对象标记为待终结
        self.lua.gc_collect()?;
        self.lua.gc_collect()?;
        Ok(())
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn binding(&self) -> &DoubleMapBinding {
        &self.binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripting_runtime() {
        let runtime = ScriptingRuntime::new().unwrap();
        runtime.run_script("local m = doublemap.new(); m.x = 1").unwrap();

        let value: f64 = runtime.eval("return mymap.test1").unwrap();
        assert_eq!(value, 0.012);
    }

    #[test]
    fn test_require() {
        let runtime = ScriptingRuntime::new().unwrap();
        let same: bool = runtime
            .eval("return require('doublemap') == doublemap")
            .unwrap();
        assert!(same);
    }

    #[test]
    fn test_script_error() {
        let runtime = ScriptingRuntime::new().unwrap();
        assert!(runtime.run_script("this is not lua").is_err());
    }
}
