use super::layout;
use super::state::App;
use crate::config::Action;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Margin},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use std::sync::OnceLock;

const LOGO_SOURCE: &str = include_str!("../../resources/ascii-logo.txt");

static LOGO: OnceLock<Vec<String>> = OnceLock::new();

/// 去掉末尾换行，每行右侧补空格到最宽行，居中时图案不会错位
fn pad_lines(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw.trim_end_matches(['\r', '\n']).lines().collect();
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    lines
        .iter()
        .map(|l| format!("{:<width$}", l, width = width))
        .collect()
}

fn logo() -> &'static [String] {
    LOGO.get_or_init(|| pad_lines(LOGO_SOURCE))
}

pub fn render_home(f: &mut Frame, app: &App) {
    let theme = &app.theme;
    let chunks = layout::main_layout(f.area());
    layout::render_header(f, "conda-tui", theme, chunks[0]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border));
    let area = chunks[1];
    f.render_widget(block, area);

    let mut lines: Vec<Line> = vec![Line::from("")];

    for logo_line in logo() {
        lines.push(Line::from(Span::styled(
            logo_line.clone(),
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        )));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(""));

    // conda 信息
    match (&app.conda, &app.error_message) {
        (Some(conda), _) => {
            let ctx = conda.context();
            lines.push(info_line(app, "conda  ", &ctx.conda_version));
            lines.push(info_line(app, "可执行文件  ", &ctx.conda_exe));
            lines.push(info_line(
                app,
                "根环境  ",
                &ctx.root_prefix.display().to_string(),
            ));
        }
        (None, Some(err)) => {
            lines.push(Line::from(Span::styled(
                format!("✗ {}", err),
                Style::default().fg(theme.error),
            )));
        }
        (None, None) => lines.push(info_line(app, "conda  ", "检测中...")),
    }

    lines.push(Line::from(""));
    lines.push(Line::from(""));

    lines.push(Line::from(Span::styled(
        "── 快捷键 ──",
        Style::default().fg(theme.update).add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(""));

    for (action, desc) in [
        (Action::Environments, " 环境列表       "),
        (Action::Info, " conda info     "),
        (Action::Help, " conda 帮助     "),
        (Action::Back, " 返回           "),
        (Action::Quit, " 退出           "),
    ] {
        lines.push(shortcut_line(app, &app.keys.label(action), desc));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("conda-tui v{}  ", env!("CARGO_PKG_VERSION")),
        Style::default().fg(theme.dim),
    )));

    // 垂直居中
    let content_height = lines.len() as u16;
    let inner = area.inner(Margin {
        horizontal: 1,
        vertical: 1,
    });
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(content_height),
            Constraint::Min(0),
        ])
        .split(inner);
    f.render_widget(
        Paragraph::new(lines).alignment(Alignment::Center),
        vertical[1],
    );

    let hints = [
        (app.keys.label(Action::Environments), "环境"),
        (app.keys.label(Action::Info), "信息"),
        (app.keys.label(Action::Quit), "退出"),
    ];
    layout::render_footer(f, &layout::key_hints(&hints), theme, chunks[2]);
}

fn info_line(app: &App, label: &str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("{label}: "),
            Style::default()
                .fg(app.theme.text)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(value.to_string(), Style::default().fg(app.theme.text)),
    ])
}

fn shortcut_line(app: &App, key: &str, desc: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("  {key:<5}"),
            Style::default()
                .fg(app.theme.update)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(desc.to_string(), Style::default().fg(app.theme.text)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_every_line_to_widest() {
        let lines = pad_lines("ab\nabcd\n\n");
        assert_eq!(lines, vec!["ab  ".to_string(), "abcd".to_string()]);
    }

    #[test]
    fn padding_counts_chars_not_bytes() {
        let lines = pad_lines("██\n█\n");
        assert_eq!(lines[1], "█ ");
    }

    #[test]
    fn bundled_logo_is_rectangular() {
        let art = logo();
        assert!(!art.is_empty());
        let width = art[0].chars().count();
        assert!(art.iter().all(|l| l.chars().count() == width));
    }
}
