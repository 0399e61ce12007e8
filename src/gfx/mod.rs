//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现：
//! - DirectX 12：Windows 平台的生产后端
//! - Software：CPU 参考实现，不需要 GPU
//!
//! 两者都实现了统一的 `GpuBackend` trait，渲染核心只依赖这个接口。

pub mod backend;
pub mod command;
#[cfg(target_os = "windows")]
pub mod dx12;
pub mod software;
pub mod types;

pub use backend::GpuBackend;
pub use command::Command;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Backend;
pub use software::{CompletionMode, SoftwareBackend, SoftwareProbe};
