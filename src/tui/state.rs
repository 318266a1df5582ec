use super::theme::Theme;
use crate::conda::update_check::{RefreshPhase, UpdateCheck};
use crate::conda::{CommandStatus, CondaClient, Environment, Package, PackageList};
use crate::config::{Config, KeyBindings};
use ratatui::widgets::{ListState, TableState};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ========== 枚举 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Home,
    Environments,
    Packages,
    Output,
}

/// 导航目标，进入包列表时携带选中的环境
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Home,
    Environments,
    Packages(Environment),
    Output { title: String, argv: Vec<String> },
}

impl Route {
    pub fn mode(&self) -> AppMode {
        match self {
            Route::Home => AppMode::Home,
            Route::Environments => AppMode::Environments,
            Route::Packages(_) => AppMode::Packages,
            Route::Output { .. } => AppMode::Output,
        }
    }
}

// ========== 事件 ==========

/// 后台任务发回界面的事件。带 `session` 的事件只作用于同一次进入的界面，过期的丢弃。
pub enum AppEvent {
    BackendReady(Arc<CondaClient>),
    BackendFailed(String),
    EnvironmentsLoaded(Vec<Environment>),
    PackagesLoaded { session: u64, packages: PackageList },
    RefreshPhase { session: u64, phase: RefreshPhase },
    UpdateCheckDone { session: u64, check: UpdateCheck },
    OutputLine { session: u64, line: String },
    OutputDone { session: u64, status: CommandStatus },
}

// ========== 子状态结构体 ==========

pub struct EnvironmentsState {
    pub items: Vec<Environment>,
    pub list: ListState,
    pub loading: bool,
}

pub struct PackagesState {
    pub session: u64,
    pub env: Environment,
    pub packages: Option<PackageList>,
    pub table: TableState,
    pub phase: RefreshPhase,
    pub check: Option<UpdateCheck>,
    /// 右侧显示选中包的原始记录
    pub details: bool,
    pub task: Option<JoinHandle<()>>,
}

pub struct OutputState {
    pub session: u64,
    pub title: String,
    pub lines: Vec<String>,
    pub scroll: usize,
    /// 运行中自动滚动到底部
    pub follow: bool,
    pub status: Option<CommandStatus>,
    pub task: Option<JoinHandle<()>>,
    /// 通知命令任务结束子进程（发送或丢弃都会触发）
    pub cancel: Option<oneshot::Sender<()>>,
}

// ========== 子状态 impl ==========

impl EnvironmentsState {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            list: ListState::default(),
            loading: false,
        }
    }

    pub fn selected(&self) -> Option<&Environment> {
        self.list.selected().and_then(|i| self.items.get(i))
    }

    /// 替换列表，尽量保持原来选中的环境
    pub fn set_items(&mut self, items: Vec<Environment>) {
        let previous = self.selected().map(|e| e.prefix.clone());
        self.items = items;
        self.loading = false;
        let index = previous
            .and_then(|p| self.items.iter().position(|e| e.prefix == p))
            .or(if self.items.is_empty() { None } else { Some(0) });
        self.list.select(index);
    }

    pub fn select_next(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let i = self.list.selected().map_or(0, |i| (i + 1).min(self.items.len() - 1));
        self.list.select(Some(i));
    }

    pub fn select_previous(&mut self) {
        let i = self.list.selected().map_or(0, |i| i.saturating_sub(1));
        self.list.select(Some(i));
    }
}

impl PackagesState {
    pub fn new(session: u64, env: Environment) -> Self {
        Self {
            session,
            env,
            packages: None,
            table: TableState::default(),
            phase: RefreshPhase::Idle,
            check: None,
            details: false,
            task: None,
        }
    }

    pub fn selected_package(&self) -> Option<&Arc<Package>> {
        let index = self.table.selected()?;
        self.packages.as_ref()?.get(index)
    }

    pub fn package_count(&self) -> usize {
        self.packages.as_ref().map_or(0, |p| p.len())
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.package_count();
        if len == 0 {
            return;
        }
        let current = self.table.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1) as usize;
        self.table.select(Some(next));
    }

    pub fn select_first(&mut self) {
        if self.package_count() > 0 {
            self.table.select(Some(0));
        }
    }

    pub fn select_last(&mut self) {
        let len = self.package_count();
        if len > 0 {
            self.table.select(Some(len - 1));
        }
    }

    /// 可更新的包数量
    pub fn updates_available(&self) -> usize {
        self.packages.as_ref().map_or(0, |pkgs| {
            pkgs.iter()
                .filter(|p| p.update_available() == Some(true))
                .count()
        })
    }
}

impl OutputState {
    pub fn new(session: u64, title: String, argv: &[String]) -> Self {
        Self {
            session,
            title,
            lines: vec![format!("$ {}", argv.join(" ")), String::new()],
            scroll: 0,
            follow: true,
            status: None,
            task: None,
            cancel: None,
        }
    }

    pub fn running(&self) -> bool {
        self.status.is_none()
    }

    pub fn add_line(&mut self, line: String) {
        self.lines.push(line);
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.scroll = self.scroll.saturating_sub(n);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, n: usize, visible_height: usize) {
        let max_scroll = self.lines.len().saturating_sub(visible_height);
        self.scroll = (self.scroll + n).min(max_scroll);
        self.follow = self.scroll == max_scroll;
    }

    pub fn clamp_scroll(&mut self, visible_height: usize) {
        let max_scroll = self.lines.len().saturating_sub(visible_height);
        if self.follow || self.scroll > max_scroll {
            self.scroll = max_scroll;
        }
    }
}

// ========== App ==========

pub struct App {
    pub route: Route,
    /// 返回栈
    pub history: Vec<Route>,
    pub config: Config,
    pub keys: KeyBindings,
    pub theme: Theme,
    pub conda: Option<Arc<CondaClient>>,
    pub error_message: Option<String>,
    pub should_quit: bool,
    // 子状态
    pub environments: EnvironmentsState,
    pub packages: Option<PackagesState>,
    pub output: Option<OutputState>,
    /// 已取消但子进程仍在退出中的命令任务
    pub background: Vec<JoinHandle<()>>,
    next_session: u64,
}

impl App {
    pub fn new(config: Config, keys: KeyBindings) -> Self {
        Self {
            route: Route::Home,
            history: Vec::new(),
            theme: Theme::from_dark(config.dark),
            config,
            keys,
            conda: None,
            error_message: None,
            should_quit: false,
            environments: EnvironmentsState::new(),
            packages: None,
            output: None,
            background: Vec::new(),
            next_session: 0,
        }
    }

    pub fn mode(&self) -> AppMode {
        self.route.mode()
    }

    pub fn next_session(&mut self) -> u64 {
        self.next_session += 1;
        self.next_session
    }

    /// 离开当前界面：取消它的后台任务，之后到达的事件会因 session 不匹配被丢弃。
    /// 包列表刷新直接中止；命令任务收到取消后自行按 SIGINT/SIGTERM/SIGKILL 结束子进程。
    pub fn detach_current(&mut self) {
        match self.route.mode() {
            AppMode::Packages => {
                if let Some(task) = self.packages.as_mut().and_then(|p| p.task.take()) {
                    task.abort();
                }
                self.packages = None;
            }
            AppMode::Output => {
                if let Some(mut output) = self.output.take() {
                    if let Some(cancel) = output.cancel.take() {
                        let _ = cancel.send(());
                    }
                    if let Some(task) = output.task.take() {
                        self.background.retain(|t| !t.is_finished());
                        self.background.push(task);
                    }
                }
            }
            AppMode::Home | AppMode::Environments => {}
        }
    }

    /// 当前包列表界面（session 匹配时）
    pub fn attached_packages(&mut self, session: u64) -> Option<&mut PackagesState> {
        self.packages.as_mut().filter(|p| p.session == session)
    }

    /// 当前输出界面（session 匹配时）
    pub fn attached_output(&mut self, session: u64) -> Option<&mut OutputState> {
        self.output.as_mut().filter(|o| o.session == session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn env(prefix: &str, name: &str) -> Environment {
        Environment {
            prefix: PathBuf::from(prefix),
            name: name.to_string(),
            relative_path: PathBuf::from(prefix),
        }
    }

    #[test]
    fn environment_selection_survives_reload() {
        let mut state = EnvironmentsState::new();
        state.set_items(vec![env("/a", "a"), env("/b", "b"), env("/c", "")]);
        assert_eq!(state.list.selected(), Some(0));
        state.select_next();
        state.select_next();
        state.select_next();
        assert_eq!(state.selected().unwrap().prefix, PathBuf::from("/c"));

        state.set_items(vec![env("/c", ""), env("/a", "a")]);
        assert_eq!(state.list.selected(), Some(0));

        state.set_items(Vec::new());
        assert_eq!(state.list.selected(), None);
    }

    #[test]
    fn output_follows_until_user_scrolls_up() {
        let mut out = OutputState::new(1, "conda info".to_string(), &["conda".to_string(), "info".to_string()]);
        assert_eq!(out.lines[0], "$ conda info");
        for i in 0..20 {
            out.add_line(format!("line {i}"));
        }
        out.clamp_scroll(5);
        assert_eq!(out.scroll, 17);

        out.scroll_up(3);
        out.add_line("more".to_string());
        out.clamp_scroll(5);
        assert_eq!(out.scroll, 14);

        out.scroll_down(100, 5);
        assert!(out.follow);
        assert_eq!(out.scroll, 18);
    }

    #[test]
    fn stale_sessions_are_not_attached() {
        let mut app = App::new(Config::default(), KeyBindings::default());
        let session = app.next_session();
        app.route = Route::Packages(env("/a", "a"));
        app.packages = Some(PackagesState::new(session, env("/a", "a")));

        assert!(app.attached_packages(session).is_some());
        assert!(app.attached_packages(session + 1).is_none());

        app.detach_current();
        assert!(app.attached_packages(session).is_none());
    }

    #[tokio::test]
    async fn leaving_output_cancels_without_aborting() {
        let mut app = App::new(Config::default(), KeyBindings::default());
        let session = app.next_session();
        let argv = vec!["conda".to_string(), "update".to_string()];
        app.route = Route::Output {
            title: "update".to_string(),
            argv: argv.clone(),
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let mut out = OutputState::new(session, "update".to_string(), &argv);
        out.cancel = Some(cancel_tx);
        out.task = Some(tokio::spawn(async move {
            // 收到取消后仍能完成收尾
            let _ = cancel_rx.await;
            let _ = done_tx.send(());
        }));
        app.output = Some(out);

        app.detach_current();
        assert!(app.attached_output(session).is_none());
        assert_eq!(app.background.len(), 1);

        for task in app.background.drain(..) {
            task.await.unwrap();
        }
        assert!(done_rx.await.is_ok());
    }
}
