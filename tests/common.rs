use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use gatekeeper::config::Config;
use tokio::net::TcpListener;

pub async fn shutdown_signal() {
    let _str = signal::wait_for_stop_signal().await;
}

/// A running server on a fresh SQLite file. Keep the directory alive for the
/// whole test.
pub struct Server {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl Server {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub fn config(dir: &tempfile::TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.database.url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("streamgate.db").display()
    );
    cfg
}

pub async fn spawn_with<F>(configure: F) -> Server
where
    F: FnOnce(&mut Config),
{
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    configure(&mut cfg);

    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(gatekeeper::serve(cfg, listener, shutdown_signal()));

    Server {
        addr,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

pub async fn spawn() -> Server {
    spawn_with(|_| {}).await
}
