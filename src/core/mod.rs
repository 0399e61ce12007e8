//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：配置、日志、错误处理、数学类型和致命错误上报。
//!
//! # 模块组织
//!
//! - `config`：配置管理，支持从 TOML 文件加载引擎设置
//! - `error`：统一错误类型
//! - `log`：结构化日志初始化
//! - `math`：`nalgebra` 类型别名
//! - `fatal`：致命错误的诊断输出

pub mod config;
pub mod error;
pub mod fatal;
pub mod log;
pub mod math;

pub use config::Config;
pub use error::{GraphicsError, RenderError, Result};
pub use math::{Matrix4, Vector3, Vector4};
