//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 错误分类
//!
//! - **致命错误**：任何图形 API 调用失败（设备、资源、管线、命令列表）。
//!   GPU 上下文损坏后没有恢复路径，错误一路向上传播到应用外壳后终止进程。
//! - **逻辑错误**：描述符堆越界、资源状态声明不符等编程错误。
//!   它们同样以 `Err` 返回，调用方不应把它们当作运行期可恢复的情况。
//! - **资源加载错误**：只发生在帧循环开始之前。
//!
//! 核心中任何地方都没有重试语义。

use std::path::PathBuf;
use thiserror::Error;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, RenderError>;

/// 引擎的错误类型
#[derive(Debug, Error)]
pub enum RenderError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),

    /// 资源加载错误
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// 运行时错误
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// 底层 API 调用失败，附带调用位置
    #[error("{call} failed: {message} ({file}:{line})")]
    Api {
        call: &'static str,
        message: String,
        file: &'static str,
        line: u32,
    },

    #[error("No suitable adapter: {0}")]
    AdapterNotFound(String),

    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// 描述符堆越界分配
    #[error("{heap} descriptor heap exhausted: requested {requested}, {allocated}/{capacity} in use")]
    DescriptorHeapExhausted {
        heap: &'static str,
        capacity: u32,
        requested: u32,
        allocated: u32,
    },

    /// 有界等待超时
    #[error("Fence wait for value {value} timed out after {timeout_ms} ms (completed: {completed})")]
    FenceTimeout {
        value: u64,
        completed: u64,
        timeout_ms: u64,
    },

    /// 屏障声明的 before 状态与跟踪到的状态不符
    #[error("Invalid transition on {resource}: declared {declared}, tracked {tracked}")]
    InvalidTransition {
        resource: String,
        declared: String,
        tracked: String,
    },

    /// Pass 结束时仍有资源没有恢复到进入时的状态
    #[error("Pass '{pass}' left resources in a different state: {resources:?}")]
    UnbalancedTransitions { pass: String, resources: Vec<String> },

    /// 句柄的代数已过期（资源已被销毁）
    #[error("Stale {kind} handle")]
    StaleHandle { kind: &'static str },

    #[error("Invalid command list state: {0}")]
    InvalidCommandListState(String),
}

/// 资源导入边界上的错误
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Asset file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to decode asset: {0}")]
    Decode(String),

    #[error("Invalid asset data: {0}")]
    InvalidData(String),
}

impl GraphicsError {
    /// 包装一次失败的 API 调用
    pub fn api(call: &'static str, err: impl std::fmt::Debug, file: &'static str, line: u32) -> Self {
        GraphicsError::Api {
            call,
            message: format!("{:?}", err),
            file,
            line,
        }
    }
}

/// 校验图形 API 调用结果，失败时记录调用名与源码位置
///
/// ```ignore
/// let heap = verify!(device.CreateDescriptorHeap(&desc), "CreateDescriptorHeap")?;
/// ```
#[macro_export]
macro_rules! verify {
    ($expr:expr, $call:expr) => {
        ($expr).map_err(|e| {
            $crate::core::error::RenderError::from($crate::core::error::GraphicsError::api(
                $call,
                e,
                file!(),
                line!(),
            ))
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_carries_location() {
        let result: std::result::Result<(), &str> = Err("E_OUTOFMEMORY");
        let err = verify!(result, "CreateCommittedResource").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CreateCommittedResource"));
        assert!(message.contains("E_OUTOFMEMORY"));
        assert!(message.contains("error.rs"));
    }

    #[test]
    fn test_error_conversion() {
        let err: RenderError = ConfigError::FileNotFound("config.toml".into()).into();
        assert!(matches!(err, RenderError::Config(_)));

        let err: RenderError = GraphicsError::StaleHandle { kind: "texture" }.into();
        assert_eq!(err.to_string(), "Graphics error: Stale texture handle");
    }
}
