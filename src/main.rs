mod cli;
mod conda;
mod config;
mod tui;

use anyhow::Result;
use clap::Parser;
use std::fs::{self, OpenOptions};

/// 日志写入文件，避免 stderr 输出打乱全屏界面
fn init_logging(config: &config::Config) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = config.log_file() {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("无法打开日志文件 {}: {}", path.display(), e),
        }
    }
    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // 加载配置：命令行路径 > 默认路径
    let mut config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load_or_default()?,
    };
    if cli.no_dark {
        config.dark = false;
    }

    init_logging(&config);
    log::info!("conda-tui v{} 启动", env!("CARGO_PKG_VERSION"));

    tui::run(config).await?;

    Ok(())
}
