use anyhow::{bail, Context, Result};
use crossterm::event::KeyCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 深色主题，命令行 `--no-dark` 可关闭
    pub dark: bool,
    /// conda 可执行文件，未设置时依次尝试 `$CONDA_EXE`、`conda`
    pub conda_exe: Option<String>,
    /// 后台轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 更新检查超时（秒）
    pub update_check_timeout_secs: u64,
    pub log_file: Option<PathBuf>,
    /// 动作名 → 按键，覆盖默认快捷键
    pub keys: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dark: true,
            conda_exe: None,
            poll_interval_ms: 50,
            update_check_timeout_secs: 600,
            log_file: None,
            keys: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conda-tui/config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// 文件不存在时使用默认值；格式错误或快捷键无效时报错
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("读取配置失败: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("配置格式错误: {}", path.display()))?
        } else {
            Self::default()
        };
        config.key_bindings()?;
        Ok(config)
    }

    pub fn conda_exe(&self) -> String {
        self.conda_exe
            .clone()
            .or_else(|| std::env::var("CONDA_EXE").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "conda".to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn update_check_timeout(&self) -> Duration {
        Duration::from_secs(self.update_check_timeout_secs)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join("conda-tui/conda-tui.log")))
    }

    pub fn key_bindings(&self) -> Result<KeyBindings> {
        KeyBindings::with_overrides(&self.keys)
    }
}

/// 可绑定按键的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Home,
    Environments,
    Back,
    Quit,
    Update,
    ShowUpdates,
    Info,
    Help,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Home,
        Action::Environments,
        Action::Back,
        Action::Quit,
        Action::Update,
        Action::ShowUpdates,
        Action::Info,
        Action::Help,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Home => "home",
            Action::Environments => "environments",
            Action::Back => "back",
            Action::Quit => "quit",
            Action::Update => "update",
            Action::ShowUpdates => "show_updates",
            Action::Info => "info",
            Action::Help => "help",
        }
    }

    fn default_key(self) -> KeyCode {
        match self {
            Action::Home => KeyCode::Char('h'),
            Action::Environments => KeyCode::Char('e'),
            Action::Back => KeyCode::Esc,
            Action::Quit => KeyCode::Char('q'),
            Action::Update => KeyCode::Char('u'),
            Action::ShowUpdates => KeyCode::Char('s'),
            Action::Info => KeyCode::Char('i'),
            Action::Help => KeyCode::Char('?'),
        }
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Action::ALL.iter().find(|a| a.name() == s) {
            Some(action) => Ok(*action),
            None => bail!("未知的动作: {}", s),
        }
    }
}

/// `esc` / `enter` / `tab` / 单个字符
fn parse_key(s: &str) -> Result<KeyCode> {
    let key = match s.to_lowercase().as_str() {
        "esc" | "escape" => KeyCode::Esc,
        "enter" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        _ => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => bail!("无法识别的按键: {:?}", s),
            }
        }
    };
    Ok(key)
}

fn key_label(code: KeyCode) -> String {
    match code {
        KeyCode::Esc => "Esc".to_string(),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::Backspace => "Backspace".to_string(),
        KeyCode::Char(c) => c.to_string(),
        other => format!("{:?}", other),
    }
}

/// 按键 → 动作
#[derive(Debug, Clone)]
pub struct KeyBindings {
    keys: HashMap<Action, KeyCode>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            keys: Action::ALL.iter().map(|a| (*a, a.default_key())).collect(),
        }
    }
}

impl KeyBindings {
    /// 未知的动作名是致命错误
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self> {
        let mut bindings = Self::default();
        for (name, key) in overrides {
            let action: Action = name.parse()?;
            let code = parse_key(key).with_context(|| format!("快捷键 {} 配置无效", name))?;
            bindings.keys.insert(action, code);
        }
        for (a, code) in &bindings.keys {
            if let Some((b, _)) = bindings.keys.iter().find(|(b, c)| *b != a && *c == code) {
                bail!(
                    "快捷键冲突: {} 与 {} 都绑定到 {}",
                    a.name(),
                    b.name(),
                    key_label(*code)
                );
            }
        }
        Ok(bindings)
    }

    pub fn action_for(&self, code: KeyCode) -> Option<Action> {
        self.keys
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(action, _)| *action)
    }

    pub fn label(&self, action: Action) -> String {
        self.keys
            .get(&action)
            .map(|code| key_label(*code))
            .unwrap_or_default()
    }
}
