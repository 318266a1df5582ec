//! 已安装包的包装与按环境列出

use super::environment::Environment;
use super::types::PackageRecord;
use super::CondaBackend;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// 更新状态：未知 / 有更新 / 已是最新
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    #[default]
    Unknown,
    Available {
        new_version: String,
    },
    UpToDate,
}

/// 一个已安装包。
///
/// 在记录之上补充描述（懒加载，只尝试一次）和更新状态（由更新检查写入）。
/// 更新状态放在锁里，同一个 `Arc<Package>` 被列表缓存和界面共享。
#[derive(Debug)]
pub struct Package {
    record: PackageRecord,
    description: OnceLock<String>,
    update: RwLock<UpdateStatus>,
}

/// 一个环境的包列表，按名称排序
pub type PackageList = Arc<[Arc<Package>]>;

impl Package {
    pub fn new(record: PackageRecord) -> Self {
        Self {
            record,
            description: OnceLock::new(),
            update: RwLock::new(UpdateStatus::Unknown),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn version(&self) -> &str {
        &self.record.version
    }

    pub fn build(&self) -> &str {
        &self.record.build
    }

    pub fn schannel(&self) -> &str {
        &self.record.schannel
    }

    pub fn extracted_package_dir(&self) -> Option<&Path> {
        self.record.extracted_package_dir.as_deref()
    }

    pub fn dist_fields_dump(&self) -> String {
        self.record.dist_fields_dump()
    }

    /// 包描述，来自 `<extracted_package_dir>/info/about.json` 的 `summary`。
    /// 读取失败时缓存空串，不再重试。
    pub fn description(&self) -> &str {
        self.description.get_or_init(|| match self.extracted_package_dir() {
            Some(dir) => load_summary(dir),
            None => String::new(),
        })
    }

    pub fn update_status(&self) -> UpdateStatus {
        self.update
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `None` 表示未知
    pub fn update_available(&self) -> Option<bool> {
        match self.update_status() {
            UpdateStatus::Unknown => None,
            UpdateStatus::Available { .. } => Some(true),
            UpdateStatus::UpToDate => Some(false),
        }
    }

    pub fn set_update_status(&self, status: UpdateStatus) {
        *self.update.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn status_glyph(&self) -> &'static str {
        match self.update_available() {
            None => " ",
            Some(true) => "↑",
            Some(false) => "✔",
        }
    }

    /// 有更新时显示 `旧 → 新`，否则显示当前版本
    pub fn display_version(&self) -> String {
        match self.update_status() {
            UpdateStatus::Available { new_version } => {
                format!("{} → {}", self.version(), new_version)
            }
            _ => self.version().to_string(),
        }
    }

    /// 版本列的完整文本：状态符号 + 版本
    pub fn status(&self) -> String {
        format!("{} {}", self.status_glyph(), self.display_version())
    }
}

fn load_summary(package_dir: &Path) -> String {
    let about = package_dir.join("info").join("about.json");
    let raw = match std::fs::read_to_string(&about) {
        Ok(raw) => raw,
        Err(_) => return String::new(),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => value
            .get("summary")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        Err(e) => {
            log::debug!("about.json 解析失败 {}: {}", about.display(), e);
            String::new()
        }
    }
}

/// 按环境列出已安装包，结果按环境缓存。
///
/// 同一环境重复调用返回同一批 `Arc<Package>`，更新状态的修改在再次进入时仍可见。
pub struct PackageLister {
    backend: Arc<dyn CondaBackend>,
    cache: Mutex<HashMap<Environment, PackageList>>,
}

impl PackageLister {
    pub fn new(backend: Arc<dyn CondaBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn list_packages_for_environment(&self, env: &Environment) -> PackageList {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(env)
        {
            return Arc::clone(cached);
        }

        let mut packages: Vec<Arc<Package>> = self
            .backend
            .iter_records(&env.prefix)
            .into_iter()
            .map(|record| Arc::new(Package::new(record)))
            .collect();
        packages.sort_by(|a, b| a.name().cmp(b.name()));
        log::info!(
            "环境 {} 共 {} 个包",
            env.prefix.display(),
            packages.len()
        );

        let list: PackageList = packages.into();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(env.clone()).or_insert(list))
    }
}

/// 预先读取描述，界面渲染时不再访问磁盘
pub fn preload_descriptions(packages: &[Arc<Package>]) {
    for package in packages {
        package.description();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conda::testing::{record, FakeBackend};
    use crate::conda::types::CondaContext;
    use std::path::PathBuf;

    fn env(prefix: &str) -> Environment {
        Environment {
            prefix: PathBuf::from(prefix),
            name: String::new(),
            relative_path: PathBuf::from(prefix),
        }
    }

    #[test]
    fn listing_is_sorted_and_cached_by_identity() {
        let backend = FakeBackend::new(CondaContext::default()).with_records(
            "/envs/a",
            vec![record("zlib", "1.3"), record("Pillow", "10.0"), record("numpy", "1.26")],
        );
        let lister = PackageLister::new(Arc::new(backend));
        let e = env("/envs/a");

        let first = lister.list_packages_for_environment(&e);
        let names: Vec<&str> = first.iter().map(|p| p.name()).collect();
        // 区分大小写的自然字符串顺序
        assert_eq!(names, vec!["Pillow", "numpy", "zlib"]);

        first[1].set_update_status(UpdateStatus::UpToDate);
        let second = lister.list_packages_for_environment(&e);
        assert!(Arc::ptr_eq(&first, &second));
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(Arc::ptr_eq(a, b));
        }
        assert_eq!(second[1].update_available(), Some(false));
    }

    #[test]
    fn unknown_environment_lists_nothing() {
        let lister = PackageLister::new(Arc::new(FakeBackend::new(CondaContext::default())));
        assert!(lister.list_packages_for_environment(&env("/nowhere")).is_empty());
    }

    #[test]
    fn description_reads_summary_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("info")).unwrap();
        let about = dir.path().join("info").join("about.json");
        std::fs::write(&about, r#"{"summary": "Compression library", "license": "Zlib"}"#).unwrap();

        let mut rec = record("zlib", "1.3");
        rec.extracted_package_dir = Some(dir.path().to_path_buf());
        let pkg = Package::new(rec);
        assert_eq!(pkg.description(), "Compression library");

        // 已缓存，文件变化不影响
        std::fs::write(&about, r#"{"summary": "changed"}"#).unwrap();
        assert_eq!(pkg.description(), "Compression library");
    }

    #[test]
    fn preloaded_description_survives_file_removal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("info")).unwrap();
        let about = dir.path().join("info").join("about.json");
        std::fs::write(&about, r#"{"summary": "Fast array library"}"#).unwrap();

        let mut rec = record("numpy", "1.26");
        rec.extracted_package_dir = Some(dir.path().to_path_buf());
        let packages = vec![Arc::new(Package::new(rec)), Arc::new(Package::new(record("pip", "24")))];
        preload_descriptions(&packages);

        std::fs::remove_file(&about).unwrap();
        assert_eq!(packages[0].description(), "Fast array library");
        assert_eq!(packages[1].description(), "");
    }

    #[test]
    fn missing_or_malformed_metadata_gives_empty_description() {
        let no_dir = Package::new(record("a", "1"));
        assert_eq!(no_dir.description(), "");

        let dir = tempfile::tempdir().unwrap();
        let mut rec = record("b", "1");
        rec.extracted_package_dir = Some(dir.path().to_path_buf());
        let missing = Package::new(rec.clone());
        assert_eq!(missing.description(), "");

        std::fs::create_dir_all(dir.path().join("info")).unwrap();
        std::fs::write(dir.path().join("info").join("about.json"), "{not json").unwrap();
        let malformed = Package::new(rec);
        assert_eq!(malformed.description(), "");

        // 第一次失败后缓存空串，即使文件后来出现也不重试
        std::fs::write(
            dir.path().join("info").join("about.json"),
            r#"{"summary": "late"}"#,
        )
        .unwrap();
        assert_eq!(missing.description(), "");
    }

    #[test]
    fn status_text_follows_update_state() {
        let pkg = Package::new(record("foo", "1.0"));
        assert_eq!(pkg.update_available(), None);
        assert_eq!(pkg.status(), "  1.0");

        pkg.set_update_status(UpdateStatus::UpToDate);
        assert_eq!(pkg.status(), "✔ 1.0");

        pkg.set_update_status(UpdateStatus::Available {
            new_version: "2.0".to_string(),
        });
        assert_eq!(pkg.update_available(), Some(true));
        assert_eq!(pkg.display_version(), "1.0 → 2.0");
        assert_eq!(pkg.status(), "↑ 1.0 → 2.0");
    }
}
