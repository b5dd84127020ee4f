#![forbid(unsafe_code)]

//! HTTP entry point. Resolves settings, prepares the download directory and
//! serves the three routes until Ctrl+C.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use fetchtube::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    downloader::{DownloaderConfig, YtDlp},
    logging::init_logging,
    server::{AppState, router, shutdown_signal},
    store::FileStore,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "fetchtube", version, about = "Download a video with yt-dlp from the browser")]
struct BackendArgs {
    /// Directory that receives downloaded files
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Directory holding index.html
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Netscape cookies file handed to yt-dlp
    #[arg(long)]
    cookies: Option<PathBuf>,
    /// yt-dlp executable
    #[arg(long = "yt-dlp")]
    ytdlp: Option<PathBuf>,
    /// Address to listen on
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Alternative `.env` file
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            download_dir: self.download_dir,
            www_root: self.www_root,
            cookies_file: self.cookies,
            ytdlp_program: self.ytdlp,
            host: self.host,
            port: self.port,
            env_path: self.env_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let RuntimeSettings {
        download_dir,
        www_root,
        cookies_file,
        ytdlp_program,
        host,
        port,
    } = resolve_runtime_settings(BackendArgs::parse().into_overrides())?;

    let store = FileStore::open(&download_dir)?;
    if !cookies_file.is_file() {
        warn!(
            cookies = %cookies_file.display(),
            "cookies file not found; age-restricted videos will fail"
        );
    }

    let downloader = YtDlp::new(DownloaderConfig::new(
        ytdlp_program,
        store.root(),
        cookies_file,
    ));
    info!(downloads = %store.root().display(), "download directory ready");

    let app = router(AppState::new(Arc::new(downloader), store, www_root));

    let addr = SocketAddr::new(host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}
