use super::layout;
use super::state::{App, Route};
use super::theme::Theme;
use crate::conda::Environment;
use crate::config::Action;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

/// 列表项：命名环境 `● name (~/path)`，匿名环境 `○ ~/path`
fn environment_line(env: &Environment, theme: &Theme) -> Line<'static> {
    if env.is_named() {
        Line::from(vec![
            Span::styled("● ", Style::default().fg(theme.named)),
            Span::styled(
                env.name.clone(),
                Style::default().fg(theme.named).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" ({})", env.relative_path.display()),
                Style::default().fg(theme.dim),
            ),
        ])
    } else {
        Line::from(vec![
            Span::styled("○ ", Style::default().fg(theme.dim)),
            Span::styled(
                env.relative_path.display().to_string(),
                Style::default().fg(theme.text),
            ),
        ])
    }
}

/// 返回需要导航到的路由
pub fn handle_environments_key(key: KeyEvent, app: &mut App) -> Option<Route> {
    let state = &mut app.environments;
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => state.select_previous(),
        KeyCode::Down | KeyCode::Char('j') => state.select_next(),
        KeyCode::Enter => return state.selected().cloned().map(Route::Packages),
        _ => {}
    }
    None
}

pub fn render_environments(f: &mut Frame, app: &mut App) {
    let theme = app.theme;
    let chunks = layout::main_layout(f.area());
    layout::render_header(f, "conda-tui", &theme, chunks[0]);

    let state = &mut app.environments;
    if app.conda.is_none() || (state.loading && state.items.is_empty()) {
        let message = match &app.error_message {
            Some(err) => Line::from(Span::styled(
                format!("✗ {}", err),
                Style::default().fg(theme.error),
            )),
            None => Line::from(Span::styled("正在读取环境列表...", Style::default().fg(theme.dim))),
        };
        layout::render_notice(f, "环境", message, &theme, chunks[1]);
    } else if state.items.is_empty() {
        let message = Line::from(Span::styled("没有找到 conda 环境", Style::default().fg(theme.dim)));
        layout::render_notice(f, "环境", message, &theme, chunks[1]);
    } else {
        let items: Vec<ListItem> = state
            .items
            .iter()
            .map(|env| ListItem::new(environment_line(env, &theme)))
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .title(format!(" 环境 ({}) ", state.items.len()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(theme.border)),
            )
            .highlight_style(Style::default().bg(theme.sel_bg).add_modifier(Modifier::BOLD))
            .highlight_symbol("▸ ");
        f.render_stateful_widget(list, chunks[1], &mut state.list);
    }

    let hints = [
        ("↑↓".to_string(), "选择"),
        ("Enter".to_string(), "查看包"),
        (app.keys.label(Action::Back), "返回"),
        (app.keys.label(Action::Quit), "退出"),
    ];
    layout::render_footer(f, &layout::key_hints(&hints), &theme, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KeyBindings};
    use crossterm::event::KeyModifiers;
    use std::path::PathBuf;

    fn env(prefix: &str, name: &str, rel: &str) -> Environment {
        Environment {
            prefix: PathBuf::from(prefix),
            name: name.to_string(),
            relative_path: PathBuf::from(rel),
        }
    }

    fn text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn labels_named_and_anonymous_environments() {
        let theme = Theme::dark();
        let named = environment_line(&env("/home/u/miniconda3", "base", "~/miniconda3"), &theme);
        assert_eq!(text(&named), "● base (~/miniconda3)");
        let anonymous = environment_line(&env("/home/u/proj/.env", "", "~/proj/.env"), &theme);
        assert_eq!(text(&anonymous), "○ ~/proj/.env");
    }

    #[test]
    fn enter_opens_selected_environment() {
        let mut app = App::new(Config::default(), KeyBindings::default());
        app.environments
            .set_items(vec![env("/a", "a", "/a"), env("/b", "b", "/b")]);

        let down = KeyEvent::new(KeyCode::Down, KeyModifiers::NONE);
        assert_eq!(handle_environments_key(down, &mut app), None);

        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(
            handle_environments_key(enter, &mut app),
            Some(Route::Packages(env("/b", "b", "/b")))
        );
    }
}
