//! 致命错误上报
//!
//! GPU 上下文损坏之后没有恢复路径：记录错误、弹出原生错误对话框（Windows），
//! 由应用外壳以非零退出码结束进程。

use tracing::error;

/// 上报一个致命错误
///
/// 错误链会逐级展开写入日志；对话框只显示最外层消息及其来源。
pub fn report_fatal(title: &str, err: &(dyn std::error::Error + 'static)) {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    error!(target: "deferred_render::fatal", "{}: {}", title, message);
    eprintln!("{}: {}", title, message);

    show_dialog(title, &message);
}

#[cfg(target_os = "windows")]
fn show_dialog(title: &str, message: &str) {
    use windows::core::PCWSTR;
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

    let wide = |s: &str| s.encode_utf16().chain(Some(0)).collect::<Vec<u16>>();
    let title = wide(title);
    let message = wide(message);

    unsafe {
        MessageBoxW(None, PCWSTR(message.as_ptr()), PCWSTR(title.as_ptr()), MB_OK | MB_ICONERROR);
    }
}

#[cfg(not(target_os = "windows"))]
fn show_dialog(_title: &str, _message: &str) {}
