//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "Deferred Render"
//! resizable = true
//!
//! [graphics]
//! backend = "dx12"        # 或 "software"
//! vsync = true
//! frame_count = 3
//! srv_heap_capacity = 4096
//! fence_timeout_ms = 5000 # 可选，省略表示无限等待
//!
//! [logging]
//! level = "info"          # trace, debug, info, warn, error
//! file_output = false
//!
//! [display]
//! output = "lighting"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 编辑器视口显示配置
    #[serde(default)]
    pub display: DisplayConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 流水线帧数（交换链后备缓冲数量）
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,

    /// 着色器可见的 CBV/SRV/UAV 堆容量（bindless 表）
    #[serde(default = "default_srv_heap_capacity")]
    pub srv_heap_capacity: u32,

    #[serde(default = "default_rtv_heap_capacity")]
    pub rtv_heap_capacity: u32,

    #[serde(default = "default_dsv_heap_capacity")]
    pub dsv_heap_capacity: u32,

    /// Fence 等待上限（毫秒），`None` 表示无限等待
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,

    /// 是否启用 API 调试层
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,

    /// 可接受的最低特性等级
    #[serde(default = "default_minimum_feature_level")]
    pub minimum_feature_level: FeatureLevel,

    /// 优先选择的特性等级
    #[serde(default = "default_preferred_feature_level")]
    pub preferred_feature_level: FeatureLevel,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// CPU 参考后端，不需要 GPU
    Software,
}

/// 硬件特性等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    #[serde(rename = "11_0")]
    Level11_0,
    #[serde(rename = "11_1")]
    Level11_1,
    #[serde(rename = "12_0")]
    Level12_0,
    #[serde(rename = "12_1")]
    Level12_1,
    #[serde(rename = "12_2")]
    Level12_2,
}

impl FeatureLevel {
    pub const ALL: [FeatureLevel; 5] = [
        FeatureLevel::Level11_0,
        FeatureLevel::Level11_1,
        FeatureLevel::Level12_0,
        FeatureLevel::Level12_1,
        FeatureLevel::Level12_2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
            FeatureLevel::Level12_2 => "12_2",
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 编辑器视口显示配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// 初始显示哪个 Pass 的输出
    #[serde(default = "default_display_output")]
    pub output: DisplayOutput,
}

/// 可选择显示的 Pass 输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayOutput {
    DepthProxy,
    BaseColor,
    TexCoords,
    Normal,
    MetalRoughness,
    Emissive,
    WorldPosition,
    Lighting,
    Sky,
}

impl DisplayOutput {
    /// 从命令行名称解析
    pub fn parse(name: &str) -> Option<Self> {
        let output = match name {
            "depth" | "depth_proxy" => DisplayOutput::DepthProxy,
            "base_color" => DisplayOutput::BaseColor,
            "texcoords" => DisplayOutput::TexCoords,
            "normal" => DisplayOutput::Normal,
            "metal_roughness" => DisplayOutput::MetalRoughness,
            "emissive" => DisplayOutput::Emissive,
            "world_position" => DisplayOutput::WorldPosition,
            "lighting" => DisplayOutput::Lighting,
            "sky" => DisplayOutput::Sky,
            _ => return None,
        };
        Some(output)
    }
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "Deferred Render".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Software
    }
}
fn default_vsync() -> bool { true }
fn default_frame_count() -> u32 { 3 }
fn default_srv_heap_capacity() -> u32 { 4096 }
fn default_rtv_heap_capacity() -> u32 { 64 }
fn default_dsv_heap_capacity() -> u32 { 8 }
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_minimum_feature_level() -> FeatureLevel { FeatureLevel::Level12_0 }
fn default_preferred_feature_level() -> FeatureLevel { FeatureLevel::Level12_1 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "deferred_render.log".to_string() }
fn default_display_output() -> DisplayOutput { DisplayOutput::Lighting }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            frame_count: default_frame_count(),
            srv_heap_capacity: default_srv_heap_capacity(),
            rtv_heap_capacity: default_rtv_heap_capacity(),
            dsv_heap_capacity: default_dsv_heap_capacity(),
            fence_timeout_ms: None,
            debug_layer: default_debug_layer(),
            minimum_feature_level: default_minimum_feature_level(),
            preferred_feature_level: default_preferred_feature_level(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            output: default_display_output(),
        }
    }
}

impl GraphicsConfig {
    /// Fence 等待上限
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--software`: 选择图形后端
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    /// - `--frames <value>`: 流水线帧数
    /// - `--no-vsync`: 关闭垂直同步
    /// - `--output <pass>`: 视口显示的 Pass 输出
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--software") {
            self.graphics.backend = GraphicsBackend::Software;
        }

        if args.iter().any(|a| a == "--no-vsync") {
            self.graphics.vsync = false;
        }

        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(width) = value_of("--width").and_then(|v| v.parse().ok()) {
            self.window.width = width;
        }

        if let Some(height) = value_of("--height").and_then(|v| v.parse().ok()) {
            self.window.height = height;
        }

        if let Some(frames) = value_of("--frames").and_then(|v| v.parse().ok()) {
            self.graphics.frame_count = frames;
        }

        if let Some(output) = value_of("--output").and_then(|v| DisplayOutput::parse(v)) {
            self.display.output = output;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window.width/height", "Window dimensions must be greater than 0"));
        }

        if !matches!(self.graphics.frame_count, 2 | 3) {
            return Err(invalid("graphics.frame_count", "Frame count must be 2 or 3"));
        }

        if self.graphics.srv_heap_capacity < 64 {
            return Err(invalid("graphics.srv_heap_capacity", "Bindless heap needs at least 64 descriptors"));
        }

        if self.graphics.rtv_heap_capacity < self.graphics.frame_count + 16 {
            return Err(invalid(
                "graphics.rtv_heap_capacity",
                "RTV heap must hold the back buffers plus all pass targets",
            ));
        }

        if self.graphics.dsv_heap_capacity == 0 {
            return Err(invalid("graphics.dsv_heap_capacity", "DSV heap must not be empty"));
        }

        if self.graphics.minimum_feature_level > self.graphics.preferred_feature_level {
            return Err(invalid(
                "graphics.minimum_feature_level",
                "Minimum feature level exceeds the preferred level",
            ));
        }

        if self.graphics.backend == GraphicsBackend::Dx12 && !cfg!(target_os = "windows") {
            return Err(invalid("graphics.backend", "DX12 backend is only available on Windows"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> super::error::RenderError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Software => "Software",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.frame_count, 3);
        assert_eq!(config.display.output, DisplayOutput::Lighting);
        assert!(config.graphics.fence_timeout().is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::Software;
        assert!(config.validate().is_ok());

        config.graphics.frame_count = 4;
        assert!(config.validate().is_err());

        config.graphics.frame_count = 2;
        config.window.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "software"
            frame_count = 2
            fence_timeout_ms = 250
            preferred_feature_level = "12_2"

            [display]
            output = "world_position"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Software);
        assert_eq!(config.graphics.frame_count, 2);
        assert_eq!(config.graphics.fence_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.graphics.preferred_feature_level, FeatureLevel::Level12_2);
        assert_eq!(config.display.output, DisplayOutput::WorldPosition);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["app", "--software", "--width", "640", "--frames", "2", "--no-vsync", "--output", "normal"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Software);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.graphics.frame_count, 2);
        assert!(!config.graphics.vsync);
        assert_eq!(config.display.output, DisplayOutput::Normal);
    }
}
