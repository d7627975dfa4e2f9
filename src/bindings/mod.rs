//! Language Binding Layer (FFI)
//!
//! Exposes [`DoubleMap`](crate::resource::DoubleMap) to Lua as an opaque,
//! type-checked handle.
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Lua state                            │
//! │   doublemap.new()      m[key]      m[key] = v      __gc      │
//! │        │                 │             │             │      │
//! │        v                 v             v             v      │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │   MapHandle userdata (type-checked capability set)  │   │
//! │  └───────────────────────┬─────────────────────────────┘   │
//! │                          │  MapId                           │
//! │                          v                                  │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │   SharedRegistry: arena of DoubleMap + handle counts │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod compat;
pub mod lua;
pub mod module;

pub use lua::{MapHandle, DEFAULT_TYPE_NAME};
pub use module::{install, register_module, DoubleMapBinding};
