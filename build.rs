/// Build script for Deferred Render
///
/// # Shader Strategy:
/// - HLSL sources live in `shaders/` and are compiled offline with `dxc -T vs_6_6 / ps_6_6`
///   into `shaders/compiled/<name>_<entry>.cso`, which `CompiledShaderDir` loads at startup.
/// - The software backend never executes shaders, so the build does not depend on `dxc`.
fn main() {
    // Trigger rebuild if shader files change
    for shader in ["common.hlsli", "gbuffer.hlsl", "light.hlsl", "sky.hlsl", "composite.hlsl"] {
        println!("cargo:rerun-if-changed=shaders/{}", shader);
    }
}
