//! # doublemap
//!
//! A native string-to-number map exposed to Lua as a userdata type.
//!
//! ## Features
//!
//! - **Opaque handles**: scripts hold a type-checked userdata carrying a
//!   registry id, never a pointer to the map
//! - **Indexed access**: `m[key]` reads (`nil` when absent), `m[key] = v` writes
//! - **Reference-counted lifetime**: a map is released when its last handle is
//!   collected, unless it is pinned
//! - **Lua versions**: 5.1 to 5.4 and LuaJIT, chosen by cargo feature
//!
//! ### Example
//!
//! ```lua
//! local doublemap = require("doublemap")
//! local m = doublemap.new()
//! m.speed = 1.5
//! print(m.speed, m.missing, mymap.test1)  --> 1.5  nil  0.012
//! ```
//!
//! ## Modules
//!
//! - [`resource`]: the map and its owner-side registry
//! - [`bindings`]: handle type, capability table and module registration
//! - [`scripting`]: a ready-made Lua state for Rust hosts
//! - [`config`]: configuration and logging
//! - [`core`]: error types and shared macros

/// Error types and shared macros
pub mod core;
/// Configuration system
pub mod config;
/// Native resources and the registry that owns them
pub mod resource;
/// Lua binding layer
pub mod bindings;
/// Embedding runtime for Rust hosts
pub mod scripting;

pub use bindings::{install, register_module, DoubleMapBinding, MapHandle};
pub use config::{BindingConfig, GlobalSeed};
pub use crate::core::error::{BindingError, BindingResult};
pub use resource::{DoubleMap, MapId, MapRegistry, Ownership, SharedRegistry};
pub use scripting::ScriptingRuntime;
