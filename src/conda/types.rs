//! conda 后端相关数据类型定义

use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// conda 后端错误
#[derive(Debug, Error)]
pub enum CondaError {
    #[error("无法启动 `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` 执行失败: {message}")]
    CommandFailed { command: String, message: String },
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("命令超时（{0} 秒）")]
    Timeout(u64),
}

/// conda 的静态配置：根前缀、环境目录、可执行文件
#[derive(Debug, Clone, Default)]
pub struct CondaContext {
    pub conda_exe: String,
    pub conda_version: String,
    pub root_prefix: PathBuf,
    pub envs_dirs: Vec<PathBuf>,
}

/// 单个已安装包的记录（来自 conda-meta 或 pip dist-info）
#[derive(Debug, Clone, Default)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub build: String,
    /// 短渠道名，如 `conda-forge`、`pkgs/main`、`pypi`
    pub schannel: String,
    /// 解压后的包目录，pip 包没有
    pub extracted_package_dir: Option<PathBuf>,
    /// 原始记录的全部字段
    pub fields: Value,
}

impl PackageRecord {
    /// 原始字段的格式化输出
    pub fn dist_fields_dump(&self) -> String {
        serde_json::to_string_pretty(&self.fields).unwrap_or_default()
    }
}

/// 外部命令的结束状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(i32),
    /// 被信号结束，没有退出码
    Signalled,
    /// 无法启动或无法等待进程
    Failed(String),
}

impl CommandStatus {
    pub fn success(&self) -> bool {
        matches!(self, CommandStatus::Exited(0))
    }
}
