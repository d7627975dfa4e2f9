/// 统一配置系统
///
/// 提供TOML/JSON配置文件和环境变量覆盖
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogLevel, LoggingConfig};

use crate::impl_default;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 指向配置文件的环境变量
pub const CONFIG_PATH_ENV: &str = "DOUBLEMAP_CONFIG";

/// 绑定主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// 句柄类型名，用于错误信息和 `__tostring`
    pub type_name: String,

    /// 库名 (Lua 5.1 下同时作为全局变量名)
    pub library_name: String,

    /// 是否创建预置的全局映射
    #[serde(default = "default_true")]
    pub seed_globals: bool,

    /// 预置的全局映射
    #[serde(default)]
    pub globals: Vec<GlobalSeed>,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

impl_default!(BindingConfig {
    type_name: "doublemap".to_string(),
    library_name: "doublemap".to_string(),
    seed_globals: true,
    globals: vec![
        GlobalSeed::new("mymap", [("test1", 0.012), ("test2", 1.234)]),
        GlobalSeed::new("mymap2", [("test1", 6.777), ("test2", 5.666)]),
    ],
    logging: LoggingConfig::default(),
});

/// 预置全局映射：全局变量名及初始键值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSeed {
    /// 全局变量名
    pub name: String,

    /// 固定后不会因句柄回收而释放
    #[serde(default)]
    pub pinned: bool,

    /// 初始键值
    #[serde(default)]
    pub entries: BTreeMap<String, f64>,
}

impl GlobalSeed {
    pub fn new<K: Into<String>>(
        name: impl Into<String>,
        entries: impl IntoIterator<Item = (K, f64)>,
    ) -> Self {
        Self {
            name: name.into(),
            pinned: false,
            entries: entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        }
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

impl BindingConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 按扩展名加载配置文件 (`.json` 为JSON，其余按TOML解析)
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DOUBLEMAP_SEED_GLOBALS") {
            self.seed_globals = val.parse().unwrap_or(self.seed_globals);
        }
        if let Ok(val) = env::var("DOUBLEMAP_LOG_LEVEL") {
            if let Ok(level) = val.parse() {
                self.logging.level = level;
            }
        }
        if let Ok(val) = env::var("DOUBLEMAP_LOG_TO_CONSOLE") {
            self.logging.log_to_console = val.parse().unwrap_or(self.logging.log_to_console);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.type_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "type_name must not be empty".to_string(),
            ));
        }
        if self.library_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "library_name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for seed in &self.globals {
            if !is_lua_identifier(&seed.name) {
                return Err(ConfigError::ValidationError(format!(
                    "global name '{}' is not a Lua identifier",
                    seed.name
                )));
            }
            if !seen.insert(seed.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "global '{}' is declared twice",
                    seed.name
                )));
            }
            if let Some((key, value)) = seed.entries.iter().find(|(_, v)| !v.is_finite()) {
                return Err(ConfigError::ValidationError(format!(
                    "global '{}' key '{}' has non-finite value {}",
                    seed.name, key, value
                )));
            }
        }
        Ok(())
    }

    /// 加载配置
    ///
    /// 按以下顺序：
    /// 1. `DOUBLEMAP_CONFIG` 指向的文件
    /// 2. 默认配置
    ///
    /// 然后应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(target: "doublemap", "Failed to load config from {:?}: {}", path, err);
                    Self::default()
                }
            },
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }
}

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

fn is_lua_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !LUA_KEYWORDS.contains(&name)
}

/// 测试用环境变量守卫
///
/// 环境变量是进程级状态，持有守卫期间其他读取配置的测试会等待。
#[cfg(test)]
pub(crate) mod test_env {
    use std::env;
    use std::ffi::OsString;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) struct EnvGuard {
        saved: Vec<(String, Option<OsString>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        /// 设置给定变量，守卫结束时恢复原值
        pub(crate) fn set(vars: &[(&str, &str)]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let saved = vars
                .iter()
                .map(|(name, value)| {
                    let old = env::var_os(name);
                    env::set_var(name, value);
                    (name.to_string(), old)
                })
                .collect();
            Self { saved, _lock: lock }
        }

        /// 清除给定变量，守卫结束时恢复原值
        pub(crate) fn clear(names: &[&str]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let saved = names
                .iter()
                .map(|name| {
                    let old = env::var_os(name);
                    env::remove_var(name);
                    (name.to_string(), old)
                })
                .collect();
            Self { saved, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, old) in self.saved.drain(..) {
                match old {
                    Some(value) => env::set_var(&name, value),
                    None => env::remove_var(&name),
                }
            }
        }
    }
}
