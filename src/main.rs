//! Deferred Render - 应用外壳
//!
//! 加载配置、初始化日志、选择后端，然后驱动帧循环。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 无窗口的软件后端
//! cargo run -- --software
//!
//! # 只显示法线缓冲
//! cargo run -- --output normal
//! ```
//!
//! 窗口模式下数字键 1-9 切换视口显示的 Pass 输出。
//!
//! 任何渲染错误都是致命的：经 `report_fatal` 上报后以非零退出码结束。

use anyhow::Context as _;
use tracing::info;

use deferred_render::core::fatal::report_fatal;
use deferred_render::core::math::{Matrix4, Vector3};
use deferred_render::core::{log, Config};
use deferred_render::geometry::MeshData;
use deferred_render::renderer::scene::{GpuMesh, Material, PointLight, StaticScene};
use deferred_render::renderer::{Camera, Device, LightSet, Renderer, Skybox};

/// 无窗口模式渲染的帧数
const HEADLESS_FRAMES: u64 = 120;

/// 演示场景
struct Demo {
    cube: GpuMesh,
    skybox: Skybox,
    scene: StaticScene,
    camera: Camera,
    lights: LightSet,
}

impl Demo {
    fn new(device: &mut Device, width: u32, height: u32) -> anyhow::Result<Self> {
        let cube = device.upload_mesh(&MeshData::cube("Cube", 0.5)).context("Failed to upload demo mesh")?;
        let skybox = Skybox::solid_color(device, [0.35, 0.45, 0.6, 1.0]).context("Failed to create skybox")?;

        let mut scene = StaticScene::new();
        scene.push(cube.draw_item(
            Matrix4::identity(),
            Material { base_color_factor: [0.8, 0.2, 0.2, 1.0], roughness: 0.4, ..Default::default() },
        ));
        scene.push(cube.draw_item(
            Matrix4::new_translation(&Vector3::new(1.5, 0.0, -1.0)),
            Material { base_color_factor: [0.9, 0.9, 0.9, 1.0], metallic: 1.0, roughness: 0.2, ..Default::default() },
        ));

        let mut camera = Camera::new(Vector3::new(0.0, 1.5, 4.0), Vector3::zeros(), 1.0);
        camera.set_aspect(width, height);

        let lights = LightSet {
            points: vec![PointLight {
                position: Vector3::new(-1.5, 2.0, 1.5),
                radius: 8.0,
                color: [1.0, 0.85, 0.7],
                intensity: 20.0,
            }],
            ..Default::default()
        };

        Ok(Self { cube, skybox, scene, camera, lights })
    }

    fn render(&self, renderer: &mut Renderer) -> anyhow::Result<()> {
        renderer
            .render_frame(&self.scene, &self.camera, &self.lights, &self.skybox)
            .context("Frame failed")?;
        Ok(())
    }

    fn destroy(self, device: &mut Device) -> anyhow::Result<()> {
        device.destroy_mesh(self.cube)?;
        self.skybox.destroy(device)?;
        Ok(())
    }
}

fn main() {
    if let Err(e) = run() {
        report_fatal("Deferred Render", e.as_ref());
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("Invalid configuration")?;

    let log_file = config.logging.file_output.then(|| config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "Deferred Render starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        frames = config.graphics.frame_count,
        output = ?config.display.output,
        "Graphics configuration"
    );

    match config.graphics.backend {
        #[cfg(target_os = "windows")]
        deferred_render::core::config::GraphicsBackend::Dx12 => windowed::run(&config),
        _ => run_headless(&config),
    }
}

/// 软件后端：无窗口渲染固定帧数
fn run_headless(config: &Config) -> anyhow::Result<()> {
    use deferred_render::gfx::types::SurfaceTarget;
    use deferred_render::gfx::{CompletionMode, SoftwareBackend};
    use deferred_render::renderer::{ContextDesc, InMemoryShaderLibrary, RhiContext};

    let backend = SoftwareBackend::with_completion(CompletionMode::Immediate);
    let context = RhiContext::new(Box::new(backend), &ContextDesc::from_config(config, SurfaceTarget::Headless))
        .context("Failed to create rendering context")?;
    // 软件后端不执行着色器
    let shaders = InMemoryShaderLibrary::with_placeholders();
    let mut renderer = Renderer::new(context, &shaders, config.display.output)?;

    let demo = Demo::new(renderer.device_mut(), config.window.width, config.window.height)?;
    for _ in 0..HEADLESS_FRAMES {
        demo.render(&mut renderer)?;
    }
    info!(frames = HEADLESS_FRAMES, "Headless run complete");

    renderer.context_mut().flush()?;
    demo.destroy(renderer.device_mut())?;
    renderer.shutdown()?;
    Ok(())
}

#[cfg(target_os = "windows")]
mod windowed {
    use anyhow::{bail, Context as _};
    use raw_window_handle::{HasWindowHandle, RawWindowHandle};
    use tracing::{debug, info};
    use winit::dpi::LogicalSize;
    use winit::event::{ElementState, Event, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::keyboard::{KeyCode, PhysicalKey};
    use winit::window::WindowBuilder;

    use deferred_render::core::Config;
    use deferred_render::gfx::types::SurfaceTarget;
    use deferred_render::gfx::Dx12Backend;
    use deferred_render::renderer::{CompiledShaderDir, ContextDesc, PassOutput, Renderer, RhiContext};

    use super::Demo;

    /// 预编译着色器目录（`fxc`/`dxc` 输出的 `.cso`）
    const SHADER_DIR: &str = "shaders/compiled";

    pub fn run(config: &Config) -> anyhow::Result<()> {
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(format!("{} [{}]", config.window.title, config.graphics.backend.name()))
            .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
            .with_resizable(config.window.resizable)
            .build(&event_loop)
            .context("Failed to create window")?;

        let hwnd = match window.window_handle().context("Failed to get window handle")?.as_raw() {
            RawWindowHandle::Win32(handle) => handle.hwnd.get(),
            _ => bail!("Expected Win32 window handle on Windows platform"),
        };

        let size = window.inner_size();
        let mut desc = ContextDesc::from_config(config, SurfaceTarget::Hwnd(hwnd));
        desc.width = size.width.max(1);
        desc.height = size.height.max(1);

        let backend = Dx12Backend::new(config.graphics.debug_layer)?;
        let context = RhiContext::new(Box::new(backend), &desc).context("Failed to create rendering context")?;
        let shaders = CompiledShaderDir::new(SHADER_DIR);
        let mut renderer = Renderer::new(context, &shaders, config.display.output)?;
        let mut demo = Some(Demo::new(renderer.device_mut(), desc.width, desc.height)?);
        info!("Renderer initialized, entering main loop...");

        let mut failure: Option<anyhow::Error> = None;
        event_loop.run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            let Some(scene) = demo.as_mut() else { return };

            let result = match event {
                Event::WindowEvent { event: WindowEvent::CloseRequested, .. } => {
                    info!("Close requested, shutting down...");
                    elwt.exit();
                    Ok(())
                }
                Event::WindowEvent { event: WindowEvent::Resized(size), .. } => {
                    debug!(width = size.width, height = size.height, "Window resized");
                    scene.camera.set_aspect(size.width, size.height);
                    renderer.resize(size.width, size.height).map_err(Into::into)
                }
                Event::WindowEvent { event: WindowEvent::KeyboardInput { event, .. }, .. }
                    if event.state == ElementState::Pressed =>
                {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        if let Some(output) = output_for_key(code) {
                            renderer.set_output(output);
                        }
                    }
                    Ok(())
                }
                Event::WindowEvent { event: WindowEvent::RedrawRequested, .. } => scene.render(&mut renderer),
                Event::AboutToWait => {
                    window.request_redraw();
                    Ok(())
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                failure = Some(e);
                elwt.exit();
            }
        })?;

        if let Some(e) = failure {
            return Err(e);
        }

        renderer.context_mut().flush()?;
        if let Some(scene) = demo.take() {
            scene.destroy(renderer.device_mut())?;
        }
        renderer.shutdown()?;
        Ok(())
    }

    fn output_for_key(code: KeyCode) -> Option<PassOutput> {
        let output = match code {
            KeyCode::Digit1 => PassOutput::Lighting,
            KeyCode::Digit2 => PassOutput::BaseColor,
            KeyCode::Digit3 => PassOutput::Normal,
            KeyCode::Digit4 => PassOutput::MetalRoughness,
            KeyCode::Digit5 => PassOutput::Emissive,
            KeyCode::Digit6 => PassOutput::WorldPosition,
            KeyCode::Digit7 => PassOutput::TexCoords,
            KeyCode::Digit8 => PassOutput::DepthProxy,
            KeyCode::Digit9 => PassOutput::Sky,
            _ => return None,
        };
        Some(output)
    }
}
