//! Deferred Render - 基于 bindless 描述符的延迟渲染核心
//!
//! 帧流水线化的 GPU 资源管理（描述符堆、子分配、fence 帧槽位、状态跟踪）
//! 加上 GBuffer → Light → Sky → Composite 四个 Pass。
//!
//! # 模块结构
//!
//! - `core`: 配置、日志、错误处理、数学类型、致命错误上报
//! - `geometry`: 顶点格式与网格数据
//! - `gfx`: 图形后端抽象层（DirectX 12 与 CPU 软件后端）
//! - `renderer`: 渲染核心（设备、上下文、资源、Pass、渲染器）
//!
//! # 使用示例
//!
//! ```no_run
//! use deferred_render::core::Config;
//! use deferred_render::gfx::SoftwareBackend;
//! use deferred_render::gfx::types::SurfaceTarget;
//! use deferred_render::renderer::{ContextDesc, InMemoryShaderLibrary, PassOutput, Renderer, RhiContext};
//!
//! # fn main() -> deferred_render::core::Result<()> {
//! let config = Config::default();
//! let backend = SoftwareBackend::new(Default::default());
//! let context = RhiContext::new(Box::new(backend), &ContextDesc::from_config(&config, SurfaceTarget::Headless))?;
//! let shaders = InMemoryShaderLibrary::with_placeholders();
//! let renderer = Renderer::new(context, &shaders, PassOutput::Lighting)?;
//! renderer.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod geometry;
pub mod gfx;
pub mod renderer;
