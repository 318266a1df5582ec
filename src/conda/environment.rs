//! conda 环境：前缀 → 名称 / 家目录相对路径，环境枚举与排序

use super::types::CondaContext;
use super::CondaBackend;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// 根环境的固定名称
pub const ROOT_ENV_NAME: &str = "base";

/// 一个 conda 环境，以前缀作为唯一标识
#[derive(Debug, Clone, Eq)]
pub struct Environment {
    pub prefix: PathBuf,
    /// 匿名环境为空串
    pub name: String,
    /// `~/...` 形式的显示路径
    pub relative_path: PathBuf,
}

impl Environment {
    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    /// 标题：有名称时 `name (~/path)`，否则只有路径
    pub fn title(&self) -> String {
        if self.is_named() {
            format!("{} ({})", self.name, self.relative_path.display())
        } else {
            self.relative_path.display().to_string()
        }
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix
    }
}

impl Hash for Environment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.prefix.hash(state);
    }
}

/// 按路径语义比较，忽略结尾斜杠和多余分隔符；Windows 下忽略大小写
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    if cfg!(windows) {
        let norm = |p: &Path| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                .collect::<Vec<_>>()
        };
        norm(a) == norm(b)
    } else {
        a.components().eq(b.components())
    }
}

/// 前缀解析器。配置在进程生命周期内不变，结果按前缀缓存，不做失效。
pub struct EnvironmentResolver {
    context: CondaContext,
    home: Option<PathBuf>,
    names: Mutex<HashMap<PathBuf, String>>,
    relative_paths: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl EnvironmentResolver {
    pub fn new(context: CondaContext) -> Self {
        Self::with_home(context, dirs::home_dir())
    }

    pub fn with_home(context: CondaContext, home: Option<PathBuf>) -> Self {
        Self {
            context,
            home,
            names: Mutex::new(HashMap::new()),
            relative_paths: Mutex::new(HashMap::new()),
        }
    }

    /// 根前缀 → `base`；父目录是某个 envs_dir → 目录名；否则空串
    pub fn resolve_name(&self, prefix: &Path) -> String {
        let mut cache = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(prefix.to_path_buf())
            .or_insert_with(|| self.compute_name(prefix))
            .clone()
    }

    fn compute_name(&self, prefix: &Path) -> String {
        if paths_equal(prefix, &self.context.root_prefix) {
            return ROOT_ENV_NAME.to_string();
        }
        let in_envs_dir = prefix.parent().is_some_and(|parent| {
            self.context
                .envs_dirs
                .iter()
                .any(|envs_dir| paths_equal(envs_dir, parent))
        });
        match prefix.file_name() {
            Some(base) if in_envs_dir => base.to_string_lossy().into_owned(),
            _ => String::new(),
        }
    }

    /// 家目录下的前缀改写为 `~/...`，家目录外的原样返回
    pub fn resolve_relative_path(&self, prefix: &Path) -> PathBuf {
        let mut cache = self
            .relative_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(prefix.to_path_buf())
            .or_insert_with(|| self.compute_relative_path(prefix))
            .clone()
    }

    fn compute_relative_path(&self, prefix: &Path) -> PathBuf {
        let Some(home) = &self.home else {
            return prefix.to_path_buf();
        };
        match prefix.strip_prefix(home) {
            Ok(rest) => Path::new("~").join(rest),
            Err(_) => prefix.to_path_buf(),
        }
    }

    pub fn resolve(&self, prefix: PathBuf) -> Environment {
        Environment {
            name: self.resolve_name(&prefix),
            relative_path: self.resolve_relative_path(&prefix),
            prefix,
        }
    }
}

/// 列出本机所有已知环境。
///
/// `sort` 为真时：有名称的环境按名称排在前面，匿名环境按显示路径排在后面。
pub fn list_environments(
    backend: &dyn CondaBackend,
    resolver: &EnvironmentResolver,
    sort: bool,
) -> Vec<Environment> {
    let environments: Vec<Environment> = backend
        .list_prefixes()
        .into_iter()
        .map(|prefix| resolver.resolve(prefix))
        .collect();

    if !sort {
        return environments;
    }

    let (mut named, mut unnamed): (Vec<_>, Vec<_>) =
        environments.into_iter().partition(Environment::is_named);
    named.sort_by(|a, b| a.name.cmp(&b.name));
    // 按文本排序，不按路径分量
    unnamed.sort_by(|a, b| {
        a.relative_path
            .to_string_lossy()
            .cmp(&b.relative_path.to_string_lossy())
    });
    named.extend(unnamed);
    named
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conda::testing::FakeBackend;

    fn context() -> CondaContext {
        CondaContext {
            conda_exe: "conda".to_string(),
            conda_version: "24.9.2".to_string(),
            root_prefix: PathBuf::from("/home/u/miniconda3"),
            envs_dirs: vec![
                PathBuf::from("/home/u/miniconda3/envs"),
                PathBuf::from("/home/u/.conda/envs/"),
            ],
        }
    }

    fn resolver() -> EnvironmentResolver {
        EnvironmentResolver::with_home(context(), Some(PathBuf::from("/home/u")))
    }

    #[test]
    fn root_prefix_is_base() {
        let r = resolver();
        assert_eq!(r.resolve_name(Path::new("/home/u/miniconda3")), ROOT_ENV_NAME);
        assert_eq!(r.resolve_name(Path::new("/home/u/miniconda3/")), ROOT_ENV_NAME);
    }

    #[test]
    fn env_in_envs_dir_uses_base_name() {
        let r = resolver();
        assert_eq!(r.resolve_name(Path::new("/home/u/miniconda3/envs/py311")), "py311");
        // envs_dir 配置带结尾斜杠，仍按路径相等匹配
        assert_eq!(r.resolve_name(Path::new("/home/u/.conda/envs/ml")), "ml");
    }

    #[test]
    fn other_prefixes_are_anonymous() {
        let r = resolver();
        assert_eq!(r.resolve_name(Path::new("/home/u/project/.venv")), "");
        assert_eq!(r.resolve_name(Path::new("/home/u/miniconda3/envs/a/nested")), "");
        assert_eq!(r.resolve_name(Path::new("/")), "");
    }

    #[test]
    fn relative_path_uses_home_marker() {
        let r = resolver();
        assert_eq!(
            r.resolve_relative_path(Path::new("/home/u/miniconda3/envs/py311")),
            PathBuf::from("~/miniconda3/envs/py311")
        );
        assert_eq!(
            r.resolve_relative_path(Path::new("/opt/shared/env")),
            PathBuf::from("/opt/shared/env")
        );
    }

    #[test]
    fn equality_is_by_prefix_only() {
        let a = Environment {
            prefix: PathBuf::from("/x"),
            name: "a".to_string(),
            relative_path: PathBuf::from("/x"),
        };
        let b = Environment {
            name: String::new(),
            ..a.clone()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn sorted_listing_puts_named_first() {
        let backend = FakeBackend::new(context()).with_prefixes(&[
            "/home/u/work/zeta",
            "/home/u/miniconda3/envs/web",
            "/home/u/miniconda3",
            "/home/u/work/alpha",
            "/home/u/.conda/envs/analysis",
        ]);
        let r = resolver();

        let sorted = list_environments(&backend, &r, true);
        let labels: Vec<String> = sorted.iter().map(Environment::title).collect();
        assert_eq!(
            labels,
            vec![
                "analysis (~/.conda/envs/analysis)",
                "base (~/miniconda3)",
                "web (~/miniconda3/envs/web)",
                "~/work/alpha",
                "~/work/zeta",
            ]
        );

        let unsorted = list_environments(&backend, &r, false);
        assert_eq!(unsorted[0].prefix, PathBuf::from("/home/u/work/zeta"));
        assert_eq!(unsorted.len(), 5);
    }

    #[test]
    fn unnamed_environments_sort_as_text() {
        let backend =
            FakeBackend::new(context()).with_prefixes(&["/home/u/a/b", "/home/u/a-b"]);
        let sorted = list_environments(&backend, &resolver(), true);
        let labels: Vec<String> = sorted.iter().map(Environment::title).collect();
        assert_eq!(labels, vec!["~/a-b", "~/a/b"]);
    }
}
