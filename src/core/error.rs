//! 统一错误处理模块
//!
//! 绑定层的错误类型定义
//!
//! ## 错误分类
//!
//! - **类型不匹配** (`BadArgument`): 参数不是预期的句柄、字符串或数字，
//!   沿 Lua 的错误机制展开到最近的 `pcall`
//! - **过期句柄** (`StaleHandle`): 仅 Rust 宿主 API 可能触发
//! - 配置错误与 Lua 运行时错误的包装
//!
//! 读取不存在的键不是错误，返回 `nil`。

use crate::config::ConfigError;
use crate::resource::MapId;
use thiserror::Error;

/// 绑定层错误类型
#[derive(Error, Debug)]
pub enum BindingError {
    /// 参数类型不匹配，措辞与 Lua 辅助库一致
    #[error("bad argument #{arg} to '{func}' ({expected} expected, got {got})")]
    BadArgument {
        arg: usize,
        func: &'static str,
        expected: String,
        got: String,
    },

    #[error("Stale map handle: {0}")]
    StaleHandle(MapId),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

impl BindingError {
    pub fn bad_argument(
        arg: usize,
        func: &'static str,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        BindingError::BadArgument {
            arg,
            func,
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// 是否为类型不匹配错误
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, BindingError::BadArgument { .. })
    }
}

impl From<BindingError> for mlua::Error {
    fn from(err: BindingError) -> Self {
        match err {
            BindingError::Lua(inner) => inner,
            other => mlua::Error::external(other),
        }
    }
}

/// 绑定层结果类型别名
pub type BindingResult<T> = Result<T, BindingError>;
