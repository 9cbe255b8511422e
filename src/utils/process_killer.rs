//! 按进程组结束开发服务器。
//!
//! 子进程以自己的进程组启动（见 supervisor），`npx`/`bundle exec` 之类的包装器
//! 派生出的真实服务器进程也在同一组内，因此对组发信号即可覆盖整棵进程树。

use std::io;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// 请求进程组优雅退出 (SIGTERM)
pub fn terminate_group(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, Signal::SIGTERM)
    }

    #[cfg(target_os = "windows")]
    {
        taskkill(pid, false)
    }
}

/// 强制结束整个进程组 (SIGKILL)
pub fn kill_group(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, Signal::SIGKILL)
    }

    #[cfg(target_os = "windows")]
    {
        taskkill(pid, true)
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        // 进程组已经不存在
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(target_os = "windows")]
fn taskkill(pid: u32, force: bool) -> io::Result<()> {
    let mut command = std::process::Command::new("taskkill");
    command.args(["/PID", &pid.to_string(), "/T"]);
    if force {
        command.arg("/F");
    }

    const CREATE_NO_WINDOW: u32 = 0x08000000;
    command.creation_flags(CREATE_NO_WINDOW);

    command.output().map(|_| ())
}
