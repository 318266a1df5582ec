use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "conda-tui", version, about = "浏览 conda 环境和已安装包的终端界面")]
pub struct Cli {
    /// 使用浅色主题
    #[arg(long)]
    pub no_dark: bool,

    /// 配置文件路径（默认 ~/.config/conda-tui/config.toml）
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
