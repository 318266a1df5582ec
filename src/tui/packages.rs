use super::layout;
use super::state::{App, PackagesState};
use super::theme::Theme;
use crate::conda::update_check::{RefreshPhase, UpdateCheck};
use crate::conda::{Package, UpdateStatus};
use crate::config::Action;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame,
};

/// 描述列最多显示的字符数
const DESCRIPTION_WIDTH: usize = 48;

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn version_cell(package: &Package, theme: &Theme) -> Cell<'static> {
    let color = match package.update_status() {
        UpdateStatus::Available { .. } => theme.update,
        UpdateStatus::UpToDate => theme.ok,
        UpdateStatus::Unknown => theme.dim,
    };
    Cell::from(Span::styled(package.status(), Style::default().fg(color)))
}

fn package_row(package: &Package, theme: &Theme) -> Row<'static> {
    Row::new(vec![
        Cell::from(Span::styled(
            package.name().to_string(),
            Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
        )),
        Cell::from(Span::styled(
            truncate(package.description(), DESCRIPTION_WIDTH),
            Style::default().fg(theme.dim),
        )),
        version_cell(package, theme),
        Cell::from(package.build().to_string()),
        Cell::from(package.schannel().to_string()),
    ])
}

/// 刷新状态文本
pub fn phase_text(state: &PackagesState) -> String {
    match state.phase {
        RefreshPhase::Idle if state.packages.is_none() => "正在读取包列表...".to_string(),
        RefreshPhase::Idle => String::new(),
        RefreshPhase::Running => "正在检查更新...".to_string(),
        RefreshPhase::Parsing => "正在解析检查结果...".to_string(),
        RefreshPhase::Applying => "正在写入更新状态...".to_string(),
        RefreshPhase::Done => match state.updates_available() {
            0 => "✓ 全部已是最新".to_string(),
            n => format!("✓ {} 个包可更新", n),
        },
        RefreshPhase::Failed => match &state.check {
            Some(UpdateCheck::Failed(reason)) => {
                format!("✗ 更新检查失败: {} (按全部最新显示)", reason)
            }
            _ => "✗ 更新检查失败".to_string(),
        },
    }
}

pub fn handle_packages_key(key: KeyEvent, app: &mut App, term_height: u16) {
    let Some(state) = app.packages.as_mut() else {
        return;
    };
    let page = layout::visible_content_height(term_height).max(1) as isize;
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => state.move_selection(-1),
        KeyCode::Down | KeyCode::Char('j') => state.move_selection(1),
        KeyCode::PageUp => state.move_selection(-page),
        KeyCode::PageDown => state.move_selection(page),
        KeyCode::Home => state.select_first(),
        KeyCode::End => state.select_last(),
        KeyCode::Enter => state.details = !state.details,
        _ => {}
    }
}

pub fn render_packages(f: &mut Frame, app: &mut App) {
    let theme = app.theme;
    let chunks = layout::main_layout(f.area());
    layout::render_header(f, "conda-tui", &theme, chunks[0]);

    let hints = [
        ("↑↓".to_string(), "选择"),
        ("Enter".to_string(), "详情"),
        (app.keys.label(Action::Update), "更新全部"),
        (app.keys.label(Action::ShowUpdates), "查看更新"),
        (app.keys.label(Action::Back), "返回"),
    ];
    let hint_text = layout::key_hints(&hints);

    let Some(state) = app.packages.as_mut() else {
        layout::render_footer(f, &hint_text, &theme, chunks[2]);
        return;
    };

    let body = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[1]);

    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(" 前缀: ", Style::default().fg(theme.dim)),
            Span::styled(
                state.env.prefix.display().to_string(),
                Style::default().fg(theme.text),
            ),
        ])),
        body[0],
    );

    let block = Block::default()
        .title(format!(" {} ", state.env.title()))
        .title_style(Style::default().fg(theme.named).add_modifier(Modifier::BOLD))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border));

    match &state.packages {
        None => {
            let message = Line::from(Span::styled(
                "正在读取包列表...",
                Style::default().fg(theme.dim),
            ));
            layout::render_notice(f, &state.env.title(), message, &theme, body[1]);
        }
        Some(packages) => {
            let header = Row::new(["名称", "描述", "版本", "构建", "频道"])
                .style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))
                .bottom_margin(1);
            let rows: Vec<Row> = packages.iter().map(|p| package_row(p, &theme)).collect();
            let widths = [
                Constraint::Percentage(20),
                Constraint::Percentage(36),
                Constraint::Percentage(18),
                Constraint::Percentage(13),
                Constraint::Percentage(13),
            ];
            let table = Table::new(rows, widths)
                .header(header)
                .block(block)
                .row_highlight_style(Style::default().bg(theme.sel_bg));

            let details = if state.details {
                state.selected_package().map(|p| (p.name().to_string(), p.dist_fields_dump()))
            } else {
                None
            };
            match details {
                Some((name, dump)) => {
                    let split = Layout::default()
                        .direction(Direction::Horizontal)
                        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
                        .split(body[1]);
                    f.render_stateful_widget(table, split[0], &mut state.table);
                    let lines: Vec<Line> = dump
                        .lines()
                        .map(|l| Line::from(Span::styled(l.to_string(), Style::default().fg(theme.text))))
                        .collect();
                    layout::render_scrollable_lines(f, &name, lines, 0, &theme, split[1]);
                }
                None => f.render_stateful_widget(table, body[1], &mut state.table),
            }
        }
    }

    let status = phase_text(state);
    let footer = if status.is_empty() {
        hint_text
    } else {
        format!("{}  │  {}", status, hint_text)
    };
    layout::render_footer(f, &footer, &theme, chunks[2]);
}
