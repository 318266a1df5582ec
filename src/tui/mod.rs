mod environments;
mod home;
mod layout;
mod output;
mod packages;
pub mod state;
mod theme;

use crate::conda::runner::{run_command, INTERRUPT_GRACE, TERMINATE_GRACE};
use crate::conda::update_check::{
    apply_update_check, dry_run_args, update_args, RefreshPhase, UpdateChecker,
};
use crate::conda::{preload_descriptions, CondaCli, CondaClient, Environment};
use crate::config::{Action, Config};
use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};
use state::{App, AppEvent, AppMode, OutputState, PackagesState, Route};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub async fn run(config: Config) -> Result<()> {
    let keys = config.key_bindings()?;

    // 终端初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, keys);
    let (tx, mut rx) = mpsc::channel(256);

    // 检测 conda
    let conda_exe = app.config.conda_exe();
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        let detected = tokio::task::spawn_blocking(move || CondaCli::detect(&conda_exe)).await;
        let event = match detected {
            Ok(Ok(cli)) => {
                let client = CondaClient::new(Arc::new(cli));
                log::info!(
                    "检测到 conda {} ({})",
                    client.context().conda_version,
                    client.conda_exe()
                );
                AppEvent::BackendReady(Arc::new(client))
            }
            Ok(Err(e)) => {
                log::error!("检测 conda 失败: {}", e);
                AppEvent::BackendFailed(format!("检测 conda 失败: {}", e))
            }
            Err(e) => AppEvent::BackendFailed(format!("检测 conda 失败: {}", e)),
        };
        let _ = tx_clone.send(event).await;
    });

    let result = event_loop(&mut terminal, &mut app, &tx, &mut rx).await;

    // 取消仍在运行的刷新或命令，等子进程退出后再恢复终端
    app.detach_current();
    drop(rx);
    let pending: Vec<_> = app.background.drain(..).collect();
    if !pending.is_empty() {
        log::info!("等待 {} 个命令结束", pending.len());
        let limit = INTERRUPT_GRACE + TERMINATE_GRACE + Duration::from_secs(1);
        let wait_all = async {
            for task in pending {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(limit, wait_all).await.is_err() {
            log::warn!("等待命令结束超时");
        }
    }

    // 恢复终端
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tx: &mpsc::Sender<AppEvent>,
    rx: &mut mpsc::Receiver<AppEvent>,
) -> Result<()> {
    loop {
        // 输出界面 clamp scroll
        if let Some(out) = app.output.as_mut() {
            let term_size = terminal.size()?;
            out.clamp_scroll(layout::visible_content_height(term_size.height));
        }

        terminal.draw(|f| ui(f, app))?;

        // 处理按键
        if event::poll(app.config.poll_interval())? {
            if let Event::Key(key) = event::read()? {
                let term_size = terminal.size()?;
                handle_key(key, app, tx, term_size.height);
            }
        }

        // 处理后台事件
        while let Ok(event) = rx.try_recv() {
            handle_event(event, app, tx);
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn handle_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>, term_height: u16) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    if let Some(action) = app.keys.action_for(key.code) {
        if handle_action(action, app, tx) {
            return;
        }
    }

    match app.mode() {
        AppMode::Home => {}
        AppMode::Environments => {
            if let Some(route) = environments::handle_environments_key(key, app) {
                navigate(app, route, tx, true);
            }
        }
        AppMode::Packages => packages::handle_packages_key(key, app, term_height),
        AppMode::Output => output::handle_output_key(key, app, term_height),
    }
}

/// 全局动作，返回是否已处理
fn handle_action(action: Action, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    match action {
        Action::Quit => app.should_quit = true,
        Action::Home => {
            app.history.clear();
            if app.mode() != AppMode::Home {
                navigate(app, Route::Home, tx, false);
            }
        }
        Action::Environments => {
            if app.mode() != AppMode::Environments {
                navigate(app, Route::Environments, tx, true);
            }
        }
        Action::Back => {
            if let Some(route) = app.history.pop() {
                navigate(app, route, tx, false);
            }
        }
        Action::Info => {
            let argv = conda_command(app, &["info"]);
            navigate(app, Route::Output { title: "conda info".to_string(), argv }, tx, true);
        }
        Action::Help => {
            let argv = conda_command(app, &["-h"]);
            navigate(app, Route::Output { title: "conda -h".to_string(), argv }, tx, true);
        }
        Action::Update | Action::ShowUpdates => {
            let Route::Packages(env) = &app.route else {
                return false;
            };
            let (title, args) = if action == Action::Update {
                (format!("更新 {}", env.title()), update_args(env))
            } else {
                (format!("可用更新 {}", env.title()), dry_run_args(env, false))
            };
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let argv = conda_command(app, &args);
            navigate(app, Route::Output { title, argv }, tx, true);
        }
    }
    true
}

/// 优先使用检测到的 conda，检测失败时仍按配置执行，错误会出现在输出里
fn conda_command(app: &App, args: &[&str]) -> Vec<String> {
    let exe = match &app.conda {
        Some(conda) => conda.conda_exe().to_string(),
        None => app.config.conda_exe(),
    };
    std::iter::once(exe)
        .chain(args.iter().map(|s| s.to_string()))
        .collect()
}

/// 切换界面：先取消当前界面的后台任务，再启动新界面需要的任务
fn navigate(app: &mut App, route: Route, tx: &mpsc::Sender<AppEvent>, push: bool) {
    app.detach_current();
    let previous = std::mem::replace(&mut app.route, route.clone());
    // 输出界面不入栈，返回时不会重复执行命令
    if push && previous.mode() != AppMode::Output {
        app.history.push(previous);
    }

    match route {
        Route::Home => {}
        Route::Environments => load_environments(app, tx),
        Route::Packages(env) => open_packages(app, env, tx),
        Route::Output { title, argv } => start_command(app, title, argv, tx),
    }
}

fn load_environments(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    let Some(conda) = app.conda.clone() else {
        return;
    };
    app.environments.loading = true;
    let tx = tx.clone();
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || conda.list_environments(true)).await {
            Ok(envs) => {
                log::info!("读取到 {} 个环境", envs.len());
                let _ = tx.send(AppEvent::EnvironmentsLoaded(envs)).await;
            }
            Err(e) => log::error!("读取环境列表失败: {}", e),
        }
    });
}

/// 进入包列表：读取包，然后执行一次更新检查
fn open_packages(app: &mut App, env: Environment, tx: &mpsc::Sender<AppEvent>) {
    let Some(conda) = app.conda.clone() else {
        return;
    };
    let session = app.next_session();
    let mut state = PackagesState::new(session, env.clone());
    let checker = UpdateChecker::new(
        conda.conda_exe(),
        app.config.poll_interval(),
        app.config.update_check_timeout(),
    );

    let tx = tx.clone();
    state.task = Some(tokio::spawn(async move {
        let list_env = env.clone();
        let packages =
            match tokio::task::spawn_blocking(move || {
                let packages = conda.list_packages(&list_env);
                preload_descriptions(&packages);
                packages
            })
            .await
            {
                Ok(packages) => packages,
                Err(e) => {
                    log::error!("读取包列表失败 {}: {}", env.prefix.display(), e);
                    return;
                }
            };
        if tx
            .send(AppEvent::PackagesLoaded { session, packages })
            .await
            .is_err()
        {
            return;
        }

        let phase_tx = tx.clone();
        let check = checker
            .check(&env, |phase| {
                let _ = phase_tx.try_send(AppEvent::RefreshPhase { session, phase });
            })
            .await;
        let _ = tx.send(AppEvent::UpdateCheckDone { session, check }).await;
    }));
    app.packages = Some(state);
}

/// 在输出界面执行命令，逐行转发输出
fn start_command(app: &mut App, title: String, argv: Vec<String>, tx: &mpsc::Sender<AppEvent>) {
    let session = app.next_session();
    let mut state = OutputState::new(session, title, &argv);
    let interval = app.config.poll_interval();

    let (cancel_tx, cancel_rx) = oneshot::channel();
    state.cancel = Some(cancel_tx);

    let tx = tx.clone();
    state.task = Some(tokio::spawn(async move {
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if forward_tx
                    .send(AppEvent::OutputLine { session, line })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let status = run_command(&argv, &line_tx, interval, cancel_rx).await;
        drop(line_tx);
        let _ = forwarder.await;
        let _ = tx.send(AppEvent::OutputDone { session, status }).await;
    }));
    app.output = Some(state);
}

fn handle_event(event: AppEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    match event {
        AppEvent::BackendReady(conda) => {
            app.conda = Some(conda);
            app.error_message = None;
            if app.mode() == AppMode::Environments {
                load_environments(app, tx);
            }
        }
        AppEvent::BackendFailed(msg) => {
            app.error_message = Some(msg);
        }
        AppEvent::EnvironmentsLoaded(envs) => {
            app.environments.set_items(envs);
        }
        AppEvent::PackagesLoaded { session, packages } => {
            if let Some(state) = app.attached_packages(session) {
                state.packages = Some(packages);
                if state.table.selected().is_none() {
                    state.select_first();
                }
            }
        }
        AppEvent::RefreshPhase { session, phase } => {
            if let Some(state) = app.attached_packages(session) {
                state.phase = phase;
            }
        }
        AppEvent::UpdateCheckDone { session, check } => {
            if let Some(state) = app.attached_packages(session) {
                state.phase = RefreshPhase::Applying;
                if let Some(packages) = &state.packages {
                    let applied = apply_update_check(packages, &check);
                    log::debug!("更新状态写入 {} 个包", applied);
                }
                state.phase = if check.is_failed() {
                    RefreshPhase::Failed
                } else {
                    RefreshPhase::Done
                };
                state.check = Some(check);
                state.task = None;
            } else {
                log::debug!("丢弃过期的更新检查结果 (session {})", session);
            }
        }
        AppEvent::OutputLine { session, line } => {
            if let Some(out) = app.attached_output(session) {
                out.add_line(line);
            }
        }
        AppEvent::OutputDone { session, status } => {
            if let Some(out) = app.attached_output(session) {
                out.status = Some(status);
                out.task = None;
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    match app.mode() {
        AppMode::Home => home::render_home(f, app),
        AppMode::Environments => environments::render_environments(f, app),
        AppMode::Packages => packages::render_packages(f, app),
        AppMode::Output => output::render_output(f, app),
    }
}
