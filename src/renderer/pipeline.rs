//! 着色器与管线
//!
//! 着色器字节码由 `ShaderLibrary` 提供。HLSL 源码离线用 dxc 编译为
//! `<stem>_<entry>.cso`，`CompiledShaderDir` 按需读取并缓存；
//! `InMemoryShaderLibrary` 用于测试和没有着色器编译器的软件后端。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::error::{AssetError, GraphicsError, Result};
use crate::gfx::types::{
    CompareFunc, CullMode, DepthState, Format, GraphicsPipelineDesc, PipelineId, RootParameter, RootSignatureDesc,
    RootSignatureId, ShaderBlob, ShaderStage, StaticSampler, MAX_RENDER_TARGETS, MAX_ROOT_SIGNATURE_DWORDS,
};

use super::device::Device;

/// 着色器标识：源文件、阶段、入口函数
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub path: String,
    pub stage: ShaderStage,
    pub entry: String,
}

impl ShaderKey {
    pub fn new(path: impl Into<String>, stage: ShaderStage, entry: impl Into<String>) -> Self {
        Self { path: path.into(), stage, entry: entry.into() }
    }

    pub fn vertex(path: impl Into<String>) -> Self {
        Self::new(path, ShaderStage::Vertex, "VSMain")
    }

    pub fn pixel(path: impl Into<String>) -> Self {
        Self::new(path, ShaderStage::Pixel, "PSMain")
    }

    /// 编译产物的文件名，例如 `gbuffer_VSMain.cso`
    pub fn compiled_file_name(&self) -> String {
        let stem = Path::new(&self.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.path);
        format!("{}_{}.cso", stem, self.entry)
    }
}

/// 着色器字节码来源
pub trait ShaderLibrary: Send + Sync {
    fn load(&self, key: &ShaderKey) -> Result<ShaderBlob>;
}

/// 预编译着色器目录
pub struct CompiledShaderDir {
    root: PathBuf,
    cache: Mutex<HashMap<ShaderKey, ShaderBlob>>,
}

impl CompiledShaderDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: Mutex::new(HashMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderLibrary for CompiledShaderDir {
    fn load(&self, key: &ShaderKey) -> Result<ShaderBlob> {
        if let Some(blob) = self.cache.lock().get(key) {
            return Ok(blob.clone());
        }

        let path = self.root.join(key.compiled_file_name());
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AssetError::FileNotFound(path.clone()).into(),
            _ => crate::core::error::RenderError::Io(e),
        })?;
        if bytes.is_empty() {
            return Err(AssetError::InvalidData(format!("{} is empty", path.display())).into());
        }

        debug!(shader = %path.display(), stage = key.stage.name(), bytes = bytes.len(), "Shader loaded");
        let blob = ShaderBlob::new(bytes);
        self.cache.lock().insert(key.clone(), blob.clone());
        Ok(blob)
    }
}

/// 内存中的着色器表
#[derive(Default)]
pub struct InMemoryShaderLibrary {
    blobs: HashMap<ShaderKey, ShaderBlob>,
    /// 找不到时返回的占位字节码
    placeholder: Option<ShaderBlob>,
}

impl InMemoryShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 对任何键返回占位字节码；只对不执行着色器的软件后端有意义
    pub fn with_placeholders() -> Self {
        Self { blobs: HashMap::new(), placeholder: Some(ShaderBlob::new(&b"DXBC"[..])) }
    }

    pub fn insert(&mut self, key: ShaderKey, blob: ShaderBlob) {
        self.blobs.insert(key, blob);
    }
}

impl ShaderLibrary for InMemoryShaderLibrary {
    fn load(&self, key: &ShaderKey) -> Result<ShaderBlob> {
        self.blobs
            .get(key)
            .or(self.placeholder.as_ref())
            .cloned()
            .ok_or_else(|| AssetError::FileNotFound(PathBuf::from(key.compiled_file_name())).into())
    }
}

/// 根签名 + 管线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    pub root_signature: RootSignatureId,
    pub pipeline: PipelineId,
}

/// 图形管线构建器
///
/// 所有 Pass 都使用 bindless 根签名：资源通过根常量中的堆索引访问，
/// 只有一个线性采样器和一个夹取采样器作为静态采样器。
pub struct PipelineBuilder {
    label: String,
    parameters: Vec<RootParameter>,
    vertex: ShaderKey,
    pixel: ShaderKey,
    render_targets: Vec<Format>,
    depth: Option<DepthState>,
    cull: CullMode,
}

impl PipelineBuilder {
    pub fn new(label: impl Into<String>, shader: &str) -> Self {
        Self {
            label: label.into(),
            parameters: Vec::new(),
            vertex: ShaderKey::vertex(shader),
            pixel: ShaderKey::pixel(shader),
            render_targets: Vec::new(),
            depth: None,
            cull: CullMode::None,
        }
    }

    /// 追加 `num_values` 个根常量，寄存器按追加顺序编号
    pub fn constants(mut self, num_values: u32) -> Self {
        let register = self.parameters.len() as u32;
        self.parameters.push(RootParameter::Constants { register, space: 0, num_values });
        self
    }

    /// 追加一个根 CBV
    pub fn constant_buffer(mut self) -> Self {
        let register = self.parameters.len() as u32;
        self.parameters.push(RootParameter::Cbv { register, space: 0 });
        self
    }

    pub fn render_targets(mut self, formats: &[Format]) -> Self {
        self.render_targets = formats.to_vec();
        self
    }

    pub fn depth(mut self, write: bool, compare: CompareFunc) -> Self {
        self.depth = Some(DepthState { format: Format::D32Float, write, compare });
        self
    }

    pub fn cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }

    pub fn root_signature_desc(&self) -> RootSignatureDesc {
        RootSignatureDesc {
            label: format!("{} Root Signature", self.label),
            parameters: self.parameters.clone(),
            static_samplers: vec![
                StaticSampler {
                    register: 0,
                    filter: crate::gfx::types::SamplerFilter::Linear,
                    address: crate::gfx::types::AddressMode::Wrap,
                },
                StaticSampler {
                    register: 1,
                    filter: crate::gfx::types::SamplerFilter::Linear,
                    address: crate::gfx::types::AddressMode::Clamp,
                },
            ],
            bindless: true,
        }
    }

    pub fn build(self, device: &mut Device, shaders: &dyn ShaderLibrary) -> Result<PipelineState> {
        let root_desc = self.root_signature_desc();
        if root_desc.cost() > MAX_ROOT_SIGNATURE_DWORDS {
            return Err(GraphicsError::PipelineCreation(format!(
                "'{}' needs {} root DWORDs, the limit is {}",
                self.label,
                root_desc.cost(),
                MAX_ROOT_SIGNATURE_DWORDS
            ))
            .into());
        }
        if self.render_targets.len() > MAX_RENDER_TARGETS {
            return Err(GraphicsError::PipelineCreation(format!(
                "'{}' binds {} render targets",
                self.label,
                self.render_targets.len()
            ))
            .into());
        }

        let vertex_shader = shaders.load(&self.vertex)?;
        let pixel_shader = shaders.load(&self.pixel)?;

        let root_signature = device.backend_mut().create_root_signature(&root_desc)?;
        let pipeline = device.backend_mut().create_graphics_pipeline(&GraphicsPipelineDesc {
            label: self.label.clone(),
            root_signature,
            vertex_shader,
            pixel_shader,
            render_target_formats: self.render_targets,
            depth: self.depth,
            cull: self.cull,
        })?;

        info!(pipeline = %self.label, root_dwords = root_desc.cost(), "Pipeline created");
        Ok(PipelineState { root_signature, pipeline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::test_device;

    #[test]
    fn test_compiled_file_name() {
        let key = ShaderKey::vertex("shaders/gbuffer.hlsl");
        assert_eq!(key.compiled_file_name(), "gbuffer_VSMain.cso");
        assert_eq!(ShaderKey::pixel("light").compiled_file_name(), "light_PSMain.cso");
    }

    #[test]
    fn test_compiled_dir_reads_and_caches() {
        let dir = std::env::temp_dir().join(format!("deferred_render_shaders_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sky_PSMain.cso"), b"DXIL-bytes").unwrap();

        let library = CompiledShaderDir::new(&dir);
        let blob = library.load(&ShaderKey::pixel("sky.hlsl")).unwrap();
        assert_eq!(blob.bytes(), b"DXIL-bytes");

        // 删除文件后仍能从缓存取得
        std::fs::remove_file(dir.join("sky_PSMain.cso")).unwrap();
        assert!(library.load(&ShaderKey::pixel("sky.hlsl")).is_ok());

        let missing = library.load(&ShaderKey::vertex("sky.hlsl")).unwrap_err();
        assert!(missing.to_string().contains("sky_VSMain.cso"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_in_memory_library() {
        let mut library = InMemoryShaderLibrary::new();
        let key = ShaderKey::vertex("composite");
        assert!(library.load(&key).is_err());
        library.insert(key.clone(), ShaderBlob::new(&[1u8, 2, 3][..]));
        assert_eq!(library.load(&key).unwrap().bytes(), &[1, 2, 3]);

        let placeholder = InMemoryShaderLibrary::with_placeholders();
        assert!(placeholder.load(&key).is_ok());
    }

    #[test]
    fn test_root_signature_layout() {
        let builder = PipelineBuilder::new("Light", "light").constants(11).constant_buffer().constant_buffer();
        let desc = builder.root_signature_desc();
        assert_eq!(desc.cost(), 15);
        assert!(desc.bindless);
        assert_eq!(desc.parameters[1], RootParameter::Cbv { register: 1, space: 0 });
    }

    #[test]
    fn test_build_rejects_oversized_root_signature() {
        let mut device = test_device(2);
        let library = InMemoryShaderLibrary::with_placeholders();
        let err = PipelineBuilder::new("Huge", "huge")
            .constants(40)
            .constants(30)
            .build(&mut device, &library)
            .unwrap_err();
        assert!(err.to_string().contains("root DWORDs"));

        let ok = PipelineBuilder::new("GBuffer", "gbuffer")
            .constants(16)
            .constants(16)
            .render_targets(&[Format::Rgba8Unorm; 7])
            .depth(true, CompareFunc::Less)
            .build(&mut device, &library);
        assert!(ok.is_ok());
    }
}
