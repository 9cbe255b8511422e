//! 本地静态站点开发服务器管理器。
//!
//! 每个登记的项目（Hugo、Jekyll、Eleventy、Next.js、Astro）最多对应一个开发服务器进程。
//! 管理器负责启动、停止、采集输出，并根据进程状态和近期错误日志给出
//! `running` / `stopped` / `error` 三态状态。

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use commands::{Command, ErrorBody, Response};
pub use config::ManagerConfig;
pub use error::{ManagerError, Result, StoreError};
pub use state::AppState;
