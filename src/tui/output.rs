use super::layout;
use super::state::{App, OutputState};
use super::theme::Theme;
use crate::conda::CommandStatus;
use crate::config::Action;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    style::{Modifier, Style},
    text::{Line, Span},
    Frame,
};

fn output_line(line: &str, theme: &Theme) -> Line<'static> {
    let style = if line.starts_with("$ ") {
        Style::default().fg(theme.command).add_modifier(Modifier::BOLD)
    } else if line.starts_with('✗') || line.starts_with("[终止]") {
        Style::default().fg(theme.error)
    } else if line.starts_with("[完成]") {
        if line.ends_with(" 0") {
            Style::default().fg(theme.ok).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.update).add_modifier(Modifier::BOLD)
        }
    } else {
        Style::default().fg(theme.text)
    };
    Line::from(Span::styled(line.to_string(), style))
}

/// 运行中 / 结束状态
pub fn status_text(state: &OutputState) -> String {
    match &state.status {
        None => "执行中...".to_string(),
        Some(status) if status.success() => "✓ 命令成功".to_string(),
        Some(CommandStatus::Exited(code)) => format!("✗ 命令失败 (退出码 {})", code),
        Some(CommandStatus::Signalled) => "✗ 进程被信号结束".to_string(),
        Some(CommandStatus::Failed(reason)) => format!("✗ {}", reason),
    }
}

pub fn handle_output_key(key: KeyEvent, app: &mut App, term_height: u16) {
    let Some(state) = app.output.as_mut() else {
        return;
    };
    let visible = layout::visible_content_height(term_height);
    let page = visible.max(1);
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => state.scroll_up(1),
        KeyCode::Down | KeyCode::Char('j') => state.scroll_down(1, visible),
        KeyCode::PageUp => state.scroll_up(page),
        KeyCode::PageDown => state.scroll_down(page, visible),
        KeyCode::Home => state.scroll_up(state.lines.len()),
        KeyCode::End => state.scroll_down(state.lines.len(), visible),
        _ => {}
    }
}

pub fn render_output(f: &mut Frame, app: &App) {
    let theme = &app.theme;
    let chunks = layout::main_layout(f.area());
    layout::render_header(f, "conda-tui", theme, chunks[0]);

    let Some(state) = &app.output else {
        return;
    };

    let lines: Vec<Line> = state.lines.iter().map(|l| output_line(l, theme)).collect();
    let title = if state.running() {
        format!("{} (运行中)", state.title)
    } else {
        state.title.clone()
    };
    layout::render_scrollable_lines(f, &title, lines, state.scroll, theme, chunks[1]);

    let hints = [
        ("↑↓".to_string(), "滚动"),
        ("PgUp/PgDn".to_string(), "翻页"),
        (app.keys.label(Action::Back), if state.running() { "取消" } else { "返回" }),
    ];
    let footer = format!("{}  │  {}", status_text(state), layout::key_hints(&hints));
    layout::render_footer(f, &footer, theme, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_color(line: &str) -> Option<ratatui::style::Color> {
        output_line(line, &Theme::dark()).spans[0].style.fg
    }

    #[test]
    fn colors_command_and_result_lines() {
        let theme = Theme::dark();
        assert_eq!(text_color("$ conda info"), Some(theme.command));
        assert_eq!(text_color("✗ 无法启动命令"), Some(theme.error));
        assert_eq!(text_color("[完成] 退出码: 0"), Some(theme.ok));
        assert_eq!(text_color("[完成] 退出码: 1"), Some(theme.update));
        assert_eq!(text_color("active environment : base"), Some(theme.text));
    }

    #[test]
    fn status_follows_command_result() {
        let mut state = OutputState::new(1, "conda -h".to_string(), &["conda".to_string(), "-h".to_string()]);
        assert_eq!(status_text(&state), "执行中...");
        state.status = Some(CommandStatus::Exited(0));
        assert_eq!(status_text(&state), "✓ 命令成功");
        state.status = Some(CommandStatus::Exited(2));
        assert_eq!(status_text(&state), "✗ 命令失败 (退出码 2)");
    }
}
