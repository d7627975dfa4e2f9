//! 核心宏定义

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// struct SeedEntry {
///     key: String,
///     value: f64,
/// }
///
/// doublemap::impl_default!(SeedEntry {
///     key: String::new(),
///     value: 0.0,
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
