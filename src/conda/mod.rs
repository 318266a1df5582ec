//! conda 封装模块：环境枚举、包记录读取、更新检查与命令执行

pub mod environment;
pub mod package;
pub mod parser;
pub mod runner;
pub mod types;
pub mod update_check;

pub use environment::{Environment, EnvironmentResolver};
pub use package::{preload_descriptions, Package, PackageList, PackageLister, UpdateStatus};
pub use types::{CommandStatus, CondaContext, CondaError, PackageRecord};

use parser::{parse_conda_info, parse_dist_info_metadata, parse_prefix_record};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// conda 数据来源：静态配置、已知前缀、前缀内的包记录。只读。
pub trait CondaBackend: Send + Sync {
    fn context(&self) -> &CondaContext;

    /// 注册表中的所有已知前缀，保持原顺序
    fn list_prefixes(&self) -> Vec<PathBuf>;

    /// 前缀内的全部已安装包记录，顺序不定
    fn iter_records(&self, prefix: &Path) -> Vec<PackageRecord>;
}

/// 通过 conda 命令行和 `conda-meta/` 读取数据
#[derive(Debug, Clone)]
pub struct CondaCli {
    context: CondaContext,
    prefixes: Vec<PathBuf>,
}

impl CondaCli {
    /// 运行 `conda info --json` 读取根前缀、环境目录和已知环境
    pub fn detect(conda_exe: &str) -> Result<Self, CondaError> {
        let output = Command::new(conda_exe)
            .args(["info", "--json"])
            .output()
            .map_err(|source| CondaError::Spawn {
                program: conda_exe.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(CondaError::CommandFailed {
                command: format!("{} info --json", conda_exe),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let info = parse_conda_info(&String::from_utf8_lossy(&output.stdout))?;
        log::info!(
            "检测到 conda {}，根前缀 {}，{} 个环境",
            info.conda_version,
            info.root_prefix.display(),
            info.envs.len()
        );

        Ok(Self {
            context: CondaContext {
                conda_exe: conda_exe.to_string(),
                conda_version: info.conda_version,
                root_prefix: info.root_prefix,
                envs_dirs: info.envs_dirs,
            },
            prefixes: info.envs,
        })
    }
}

impl CondaBackend for CondaCli {
    fn context(&self) -> &CondaContext {
        &self.context
    }

    fn list_prefixes(&self) -> Vec<PathBuf> {
        self.prefixes.clone()
    }

    fn iter_records(&self, prefix: &Path) -> Vec<PackageRecord> {
        let mut records = read_conda_meta(prefix);
        let known: HashSet<String> = records.iter().map(|r| normalize_name(&r.name)).collect();
        records.extend(
            read_pip_records(prefix)
                .into_iter()
                .filter(|r| !known.contains(&normalize_name(&r.name))),
        );
        records
    }
}

/// 读取 `<prefix>/conda-meta/*.json`，无法解析的记录跳过
pub fn read_conda_meta(prefix: &Path) -> Vec<PackageRecord> {
    let meta_dir = prefix.join("conda-meta");
    let entries = match std::fs::read_dir(&meta_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("无法读取 {}: {}", meta_dir.display(), e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| {
            let raw = std::fs::read_to_string(&path).ok()?;
            match parse_prefix_record(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("跳过无法解析的记录 {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

fn site_packages_dirs(prefix: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let windows_style = prefix.join("Lib").join("site-packages");
    if windows_style.is_dir() {
        dirs.push(windows_style);
    }
    if let Ok(entries) = std::fs::read_dir(prefix.join("lib")) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("python") {
                let site = entry.path().join("site-packages");
                if site.is_dir() {
                    dirs.push(site);
                }
            }
        }
    }
    dirs
}

/// 读取 pip 安装的包（`*.dist-info`），由 conda 安装的跳过
pub fn read_pip_records(prefix: &Path) -> Vec<PackageRecord> {
    let mut records = Vec::new();
    for site in site_packages_dirs(prefix) {
        let Ok(entries) = std::fs::read_dir(&site) else {
            continue;
        };
        for dist_info in entries.flatten().map(|e| e.path()) {
            if !dist_info.extension().is_some_and(|ext| ext == "dist-info") {
                continue;
            }
            let installer = std::fs::read_to_string(dist_info.join("INSTALLER")).unwrap_or_default();
            if installer.trim() == "conda" {
                continue;
            }
            let Ok(metadata) = std::fs::read_to_string(dist_info.join("METADATA")) else {
                continue;
            };
            if let Some((name, version)) = parse_dist_info_metadata(&metadata) {
                records.push(PackageRecord {
                    fields: json!({
                        "name": name,
                        "version": version,
                        "build": "pypi_0",
                        "channel": "pypi",
                        "installer": installer.trim(),
                    }),
                    name,
                    version,
                    build: "pypi_0".to_string(),
                    schannel: "pypi".to_string(),
                    extracted_package_dir: None,
                });
            }
        }
    }
    records
}

/// PEP 503 风格的名称归一化
fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

/// 界面使用的门面：后端 + 解析器缓存 + 包列表缓存
pub struct CondaClient {
    backend: Arc<dyn CondaBackend>,
    resolver: EnvironmentResolver,
    lister: PackageLister,
}

impl CondaClient {
    pub fn new(backend: Arc<dyn CondaBackend>) -> Self {
        Self {
            resolver: EnvironmentResolver::new(backend.context().clone()),
            lister: PackageLister::new(Arc::clone(&backend)),
            backend,
        }
    }

    pub fn context(&self) -> &CondaContext {
        self.backend.context()
    }

    pub fn conda_exe(&self) -> &str {
        &self.backend.context().conda_exe
    }

    pub fn list_environments(&self, sort: bool) -> Vec<Environment> {
        environment::list_environments(self.backend.as_ref(), &self.resolver, sort)
    }

    pub fn list_packages(&self, env: &Environment) -> PackageList {
        self.lister.list_packages_for_environment(env)
    }
}
