#![allow(dead_code)]

use static_toggle::models::{Generator, NewProject, Project};
use static_toggle::{AppState, ManagerConfig};
use std::net::TcpListener;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestEnv {
    pub state: AppState,
    pub dir: TempDir,
}

pub fn env() -> TestEnv {
    env_with(|_| {})
}

pub fn env_with(configure: impl FnOnce(&mut ManagerConfig)) -> TestEnv {
    let mut config = ManagerConfig {
        grace_period_ms: 1500,
        stop_timeout_ms: 1000,
        kill_timeout_ms: 1000,
        ..ManagerConfig::default()
    };
    configure(&mut config);
    TestEnv {
        state: AppState::in_memory(config).unwrap(),
        dir: tempfile::tempdir().unwrap(),
    }
}

pub fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

impl TestEnv {
    pub fn add(&self, name: &str, command: &str) -> Project {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        self.state
            .registry
            .add(NewProject {
                name: name.to_string(),
                path,
                generator: Generator::Hugo,
                port: Some(free_port()),
                notes: String::new(),
                command: Some(command.to_string()),
            })
            .unwrap()
    }

    pub fn messages(&self, project_id: &str) -> Vec<String> {
        self.state
            .logs
            .snapshot(project_id)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }
}

pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
