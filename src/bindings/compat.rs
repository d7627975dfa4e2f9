//! Registration helpers across Lua versions.
//!
//! Lua 5.2 replaced `luaL_register` with `luaL_setfuncs`/`luaL_newlib`. The
//! older call also stored the library table in a global of the same name.
//! The version is a build-time cargo feature, so the difference is settled
//! here with `cfg` and callers always go through [`new_lib`].

use mlua::{Function, Lua, Table};

/// Registers every `(name, function)` pair into `table`.
pub fn set_funcs(table: &Table, funcs: &[(&str, Function)]) -> mlua::Result<()> {
    for (name, func) in funcs {
        table.set(*name, func.clone())?;
    }
    Ok(())
}

/// Builds the library table, `luaL_register(L, name, funcs)` style: an
/// existing global table of that name is reused and the result is bound
/// globally.
#[cfg(any(feature = "lua51", feature = "luajit"))]
pub fn new_lib(lua: &Lua, name: &str, funcs: &[(&str, Function)]) -> mlua::Result<Table> {
    let globals = lua.globals();
    let lib = match globals.get::<Option<Table>>(name)? {
        Some(existing) => existing,
        None => lua.create_table_with_capacity(0, funcs.len())?,
    };
    set_funcs(&lib, funcs)?;
    globals.set(name, lib.clone())?;
    Ok(lib)
}

/// Builds the library table, `luaL_newlib` style: nothing is bound globally.
#[cfg(not(any(feature = "lua51", feature = "luajit")))]
pub fn new_lib(lua: &Lua, _name: &str, funcs: &[(&str, Function)]) -> mlua::Result<Table> {
    let lib = lua.create_table_with_capacity(0, funcs.len())?;
    set_funcs(&lib, funcs)?;
    Ok(lib)
}
