mod cli;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use cli::{Cli, Commands};
use serde::{Deserialize, Serialize};
use static_toggle::commands::{check_port_available, resume_last_project, start_project, Event};
use static_toggle::config::{self, ManagerConfig};
use static_toggle::models::{Generator, LogLevel, NewProject, Project};
use static_toggle::services::{detect_generator, JsonFileStore, ProjectScanner};
use static_toggle::{AppState, Command, Response};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = match cli.data_dir.clone() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("无法创建数据目录 {}", dir.display()))?;
            dir
        }
        None => config::data_dir()?,
    };
    let config = ManagerConfig::load(&data_dir)?;
    let state = Arc::new(AppState::new(
        config,
        Box::new(JsonFileStore::in_dir(&data_dir)),
    )?);

    match cli.command {
        Commands::List => list(&state),
        Commands::Add {
            path,
            name,
            generator,
            port,
            command,
            notes,
        } => {
            let generator = match generator {
                Some(g) => g,
                None => detect_generator(&path).ok_or_else(|| {
                    anyhow!("无法识别 {} 的生成器类型，请使用 --generator 指定", path.display())
                })?,
            };
            let project = state.registry.add(NewProject {
                name: name.unwrap_or_else(|| dir_name(&path)),
                path,
                generator,
                port,
                notes,
                command,
            })?;
            print_project(&project);
            Ok(())
        }
        Commands::Remove { project } => {
            let project = resolve_project(&state, &project)?;
            static_toggle::commands::remove_project(&project.id, &state).await?;
            println!("Removed {}", project.name);
            Ok(())
        }
        Commands::Run { projects, level } => run(state, &projects, level).await,
        Commands::Port { port } => {
            let check = check_port_available(port);
            if check.available {
                println!("Port {} is available", port);
            } else if let Some(next) = check.suggestion {
                println!("Port {} is in use, next free port: {}", port, next);
            } else {
                println!("Port {} is in use", port);
            }
            Ok(())
        }
        Commands::Scan { path, depth, add } => {
            let sites = ProjectScanner::scan_directory(&path, depth);
            for site in &sites {
                let known = state.registry.find_by_path(&site.path).is_some();
                println!(
                    "{:<10} {:<24} {}{}",
                    site.generator.display_name(),
                    site.name,
                    site.path.display(),
                    if known { "  (registered)" } else { "" }
                );
                if add && !known {
                    state.registry.add(NewProject {
                        name: site.name.clone(),
                        path: site.path.clone(),
                        generator: site.generator,
                        port: Some(site.suggested_port),
                        notes: String::new(),
                        command: None,
                    })?;
                }
            }
            if sites.is_empty() {
                println!("No projects found under {}", path.display());
            }
            Ok(())
        }
        Commands::Generators => {
            for generator in Generator::ALL {
                println!(
                    "{:<10} {:>5}  {}",
                    generator.display_name(),
                    generator.default_port(),
                    generator.command_template()
                );
            }
            Ok(())
        }
        Commands::Serve => serve(state).await,
        Commands::Config => {
            println!("data dir: {}", data_dir.display());
            println!("{}", serde_json::to_string_pretty(&state.config)?);
            Ok(())
        }
    }
}

/// 日志写到 stderr，stdout 留给命令输出和 JSON 响应
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "static_toggle=debug"
    } else {
        "static_toggle=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// 按 id、名称（忽略大小写）或路径查找项目
fn resolve_project(state: &AppState, key: &str) -> anyhow::Result<Project> {
    let projects = state.registry.list();
    if let Some(p) = projects.iter().find(|p| p.id == key) {
        return Ok(p.clone());
    }
    if let Some(p) = projects.iter().find(|p| p.name.eq_ignore_ascii_case(key)) {
        return Ok(p.clone());
    }
    state
        .registry
        .find_by_path(Path::new(key))
        .ok_or_else(|| anyhow!("项目不存在: {}", key))
}

fn list(state: &AppState) -> anyhow::Result<()> {
    let projects = state.registry.list();
    if projects.is_empty() {
        println!("No projects registered. Use `static-toggle add <path>`.");
        return Ok(());
    }
    for project in &projects {
        print_project(project);
    }
    Ok(())
}

fn print_project(project: &Project) {
    println!(
        "{}  {:<24} {:<10} {:>5}  {}",
        &project.id[..8.min(project.id.len())],
        project.name,
        project.generator.display_name(),
        project.port,
        project.path.display()
    );
}

/// 前台运行：启动项目、转发日志，Ctrl-C 后全部停止
async fn run(state: Arc<AppState>, keys: &[String], level: Option<LogLevel>) -> anyhow::Result<()> {
    let mut projects = Vec::new();
    for key in keys {
        projects.push(resolve_project(&state, key)?);
    }

    let mut logs = state.logs.subscribe();
    let mut started = 0;
    for project in &projects {
        match start_project(&project.id, &state).await {
            Ok(info) => {
                started += 1;
                println!("{} → {}", project.name, info.url);
            }
            Err(e) => eprintln!("{}: {}", project.name, e),
        }
    }
    if started == 0 {
        bail!("没有成功启动的项目");
    }

    let names: std::collections::HashMap<String, String> = projects
        .iter()
        .map(|p| (p.id.clone(), p.name.clone()))
        .collect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping servers");
                break;
            }
            received = logs.recv() => match received {
                Ok(entry) => {
                    let Some(name) = names.get(&entry.project_id) else { continue };
                    if level.map_or(true, |l| l == entry.level) {
                        println!(
                            "{} [{}] {:<5} {}",
                            entry.formatted_timestamp(),
                            name,
                            entry.level.label(),
                            entry.message
                        );
                    }
                    if !projects.iter().any(|p| state.supervisor.is_active(&p.id)) {
                        info!("all servers exited");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "log output lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    for info in state.supervisor.stop_all().await {
        println!("stopped {}", info.project_name);
    }
    Ok(())
}

/// `serve` 模式的一行请求；`id` 原样带回响应
#[derive(Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(flatten)]
    command: Command,
}

#[derive(Serialize)]
struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<serde_json::Value>,
    #[serde(flatten)]
    response: Response,
}

/// 写到 stdout 的一行：命令响应或订阅事件
#[derive(Serialize)]
#[serde(untagged)]
enum Outgoing {
    Reply(Reply),
    Event(Event),
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(outgoing) = rx.recv().await {
            let mut line = match serde_json::to_vec(&outgoing) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode reply");
                    continue;
                }
            };
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let forward = {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if tx.send(Outgoing::Event(event)).is_err() {
                    break;
                }
            }
        })
    };

    if let Some(result) = resume_last_project(&state).await {
        let response = result.map(Response::Process).unwrap_or_else(Response::from);
        let _ = tx.send(Outgoing::Reply(Reply { id: None, response }));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        // 回收已完成的命令任务
        while tasks.try_join_next().is_some() {}

        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let _ = tx.send(Outgoing::Reply(Reply {
                    id: None,
                    response: Response::Error(static_toggle::ErrorBody {
                        kind: "invalid_request".to_string(),
                        message: e.to_string(),
                    }),
                }));
                continue;
            }
        };

        // 不同项目的命令并行执行，同一项目由 supervisor 串行化
        let state = state.clone();
        let tx = tx.clone();
        let events_tx = events_tx.clone();
        tasks.spawn(async move {
            let response = state
                .dispatch_with_events(request.command, &events_tx)
                .await;
            let _ = tx.send(Outgoing::Reply(Reply {
                id: request.id,
                response,
            }));
        });
    }

    while tasks.join_next().await.is_some() {}
    state.supervisor.stop_all().await;
    // 订阅任务持有的发送端在此之后陆续关闭
    drop(events_tx);
    forward.abort();
    drop(tx);
    let _ = writer.await;
    Ok(())
}
