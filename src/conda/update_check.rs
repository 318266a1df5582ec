//! 更新状态检查：`conda update --all --dry-run --json`，解析 FETCH 列表并写回各包

use super::environment::Environment;
use super::package::{Package, UpdateStatus};
use super::parser::parse_fetch_actions;
use super::runner::CapturedProcess;
use super::types::CondaError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 一次刷新的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Running,
    Parsing,
    Applying,
    Done,
    Failed,
}

/// 检查结果。失败与“没有更新”分开保存，写回包状态时同样视为全部最新。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// 包名 → 新版本
    Updates(BTreeMap<String, String>),
    Failed(String),
}

impl UpdateCheck {
    pub fn is_failed(&self) -> bool {
        matches!(self, UpdateCheck::Failed(_))
    }
}

/// 指定环境：有名称用 `-n`，否则用 `-p`
fn env_selector(env: &Environment) -> [String; 2] {
    if env.is_named() {
        ["-n".to_string(), env.name.clone()]
    } else {
        ["-p".to_string(), env.prefix.display().to_string()]
    }
}

/// `update {-n NAME | -p PREFIX} --all --dry-run [--json]`
pub fn dry_run_args(env: &Environment, json: bool) -> Vec<String> {
    let mut args = vec!["update".to_string()];
    args.extend(env_selector(env));
    args.extend(["--all".to_string(), "--dry-run".to_string()]);
    if json {
        args.push("--json".to_string());
    }
    args
}

/// `update {-n NAME | -p PREFIX} --all --yes`
pub fn update_args(env: &Environment) -> Vec<String> {
    let mut args = vec!["update".to_string()];
    args.extend(env_selector(env));
    args.extend(["--all".to_string(), "--yes".to_string()]);
    args
}

/// 把检查结果写回包列表，按列表顺序每个包写一次，返回写入的包数
pub fn apply_update_check(packages: &[Arc<Package>], check: &UpdateCheck) -> usize {
    let empty = BTreeMap::new();
    let updates = match check {
        UpdateCheck::Updates(updates) => updates,
        UpdateCheck::Failed(_) => &empty,
    };
    for package in packages {
        let status = match updates.get(package.name()) {
            Some(new_version) => UpdateStatus::Available {
                new_version: new_version.clone(),
            },
            None => UpdateStatus::UpToDate,
        };
        package.set_update_status(status);
    }
    packages.len()
}

/// 以 dry-run 方式调用 conda，得到可更新的包
#[derive(Debug, Clone)]
pub struct UpdateChecker {
    launcher: Vec<String>,
    interval: Duration,
    timeout: Duration,
}

impl UpdateChecker {
    pub fn new(conda_exe: &str, interval: Duration, timeout: Duration) -> Self {
        Self {
            launcher: vec![conda_exe.to_string()],
            interval,
            timeout,
        }
    }

    /// 运行检查，`report` 依次收到 Running、Parsing
    pub async fn check(
        &self,
        env: &Environment,
        mut report: impl FnMut(RefreshPhase),
    ) -> UpdateCheck {
        report(RefreshPhase::Running);
        log::info!("开始检查更新: {}", env.prefix.display());

        let (program, launcher_args) = match self.launcher.split_first() {
            Some(split) => split,
            None => return UpdateCheck::Failed("未配置 conda 可执行文件".to_string()),
        };
        let mut args = launcher_args.to_vec();
        args.extend(dry_run_args(env, true));

        let mut process = match CapturedProcess::spawn(program, &args, false) {
            Ok(process) => process,
            Err(e) => {
                log::warn!("更新检查无法启动: {}", e);
                return UpdateCheck::Failed(e.to_string());
            }
        };

        // 超时过大无法表示时视为不设期限
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            match process.try_wait() {
                Ok(Some(status)) => {
                    if !status.success() {
                        log::debug!("dry-run 退出状态 {}", status);
                    }
                    break;
                }
                Ok(None) => {}
                Err(e) => return UpdateCheck::Failed(e.to_string()),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                process.kill().await;
                let err = CondaError::Timeout(self.timeout.as_secs());
                log::warn!("更新检查超时: {}: {}", env.prefix.display(), err);
                return UpdateCheck::Failed(err.to_string());
            }
            tokio::time::sleep(self.interval).await;
        }

        report(RefreshPhase::Parsing);
        let raw = match process.read_new() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => return UpdateCheck::Failed(e.to_string()),
        };

        match parse_fetch_actions(&raw) {
            Ok(updates) => {
                log::info!(
                    "检查完成: {}，{} 个包可更新",
                    env.prefix.display(),
                    updates.len()
                );
                UpdateCheck::Updates(updates)
            }
            Err(e) => {
                // 与“没有可用更新”区分开记录
                log::warn!(
                    "dry-run 输出不是有效的更新列表，按无更新处理: {}: {}",
                    env.prefix.display(),
                    e
                );
                UpdateCheck::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conda::testing::record;
    use std::path::PathBuf;

    fn named(name: &str) -> Environment {
        Environment {
            prefix: PathBuf::from(format!("/opt/conda/envs/{name}")),
            name: name.to_string(),
            relative_path: PathBuf::from(format!("/opt/conda/envs/{name}")),
        }
    }

    fn anonymous(prefix: &str) -> Environment {
        Environment {
            prefix: PathBuf::from(prefix),
            name: String::new(),
            relative_path: PathBuf::from(prefix),
        }
    }

    fn packages() -> Vec<Arc<Package>> {
        vec![
            Arc::new(Package::new(record("bar", "0.5"))),
            Arc::new(Package::new(record("foo", "1.0"))),
        ]
    }

    /// 用 `sh -c` 冒充 conda，脚本的位置参数就是 conda 的参数
    fn fake_conda(script: &str, timeout: Duration) -> UpdateChecker {
        UpdateChecker {
            launcher: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "conda".to_string(),
            ],
            interval: Duration::from_millis(10),
            timeout,
        }
    }

    #[test]
    fn args_select_by_name_or_prefix() {
        assert_eq!(
            dry_run_args(&named("py311"), true),
            vec!["update", "-n", "py311", "--all", "--dry-run", "--json"]
        );
        assert_eq!(
            dry_run_args(&anonymous("/work/.env"), false),
            vec!["update", "-p", "/work/.env", "--all", "--dry-run"]
        );
        assert_eq!(
            update_args(&named("base")),
            vec!["update", "-n", "base", "--all", "--yes"]
        );
    }

    #[test]
    fn apply_marks_fetchable_packages() {
        let pkgs = packages();
        let mut updates = BTreeMap::new();
        updates.insert("foo".to_string(), "2.0".to_string());
        updates.insert("not-installed".to_string(), "9".to_string());

        assert_eq!(apply_update_check(&pkgs, &UpdateCheck::Updates(updates)), 2);
        assert_eq!(pkgs[1].update_available(), Some(true));
        assert_eq!(pkgs[1].display_version(), "1.0 → 2.0");
        assert_eq!(pkgs[0].update_available(), Some(false));
        assert_eq!(pkgs[0].display_version(), "0.5");
    }

    #[test]
    fn failed_check_marks_everything_up_to_date() {
        let pkgs = packages();
        apply_update_check(&pkgs, &UpdateCheck::Failed("bad".to_string()));
        assert!(pkgs.iter().all(|p| p.update_available() == Some(false)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_parses_dry_run_output() {
        let checker = fake_conda(
            r#"echo '{"actions": {"FETCH": [{"name": "foo", "version": "2.0"}]}}'"#,
            Duration::from_secs(10),
        );
        let mut phases = Vec::new();
        let check = checker.check(&named("py311"), |p| phases.push(p)).await;

        let mut expected = BTreeMap::new();
        expected.insert("foo".to_string(), "2.0".to_string());
        assert_eq!(check, UpdateCheck::Updates(expected));
        assert_eq!(phases, vec![RefreshPhase::Running, RefreshPhase::Parsing]);

        let pkgs = packages();
        apply_update_check(&pkgs, &check);
        assert_eq!(pkgs[1].display_version(), "1.0 → 2.0");
        assert_eq!(pkgs[0].update_available(), Some(false));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_passes_environment_arguments() {
        // 参数不符时输出非 JSON，检查会失败
        let checker = fake_conda(
            r#"[ "$*" = "update -p /work/.env --all --dry-run --json" ] && echo '{"success": true}' || echo "unexpected: $*""#,
            Duration::from_secs(10),
        );
        let check = checker.check(&anonymous("/work/.env"), |_| {}).await;
        assert_eq!(check, UpdateCheck::Updates(BTreeMap::new()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn malformed_output_is_failure_not_error() {
        let checker = fake_conda("echo 'Solving environment: failed'", Duration::from_secs(10));
        let check = checker.check(&named("x"), |_| {}).await;
        assert!(check.is_failed());

        let pkgs = packages();
        apply_update_check(&pkgs, &check);
        assert!(pkgs.iter().all(|p| p.update_available() == Some(false)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn huge_timeout_means_no_deadline() {
        let checker = fake_conda(
            r#"echo '{"actions": {"FETCH": [{"name": "foo", "version": "2.0"}]}}'"#,
            Duration::from_secs(u64::MAX),
        );
        let check = checker.check(&named("py311"), |_| {}).await;

        let mut expected = BTreeMap::new();
        expected.insert("foo".to_string(), "2.0".to_string());
        assert_eq!(check, UpdateCheck::Updates(expected));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hanging_conda_times_out() {
        let checker = fake_conda("sleep 5", Duration::from_millis(100));
        let started = Instant::now();
        let check = checker.check(&named("x"), |_| {}).await;
        assert!(check.is_failed());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_conda_is_failure() {
        let checker = UpdateChecker::new(
            "/no/such/conda",
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        assert!(checker.check(&named("x"), |_| {}).await.is_failed());
    }
}
