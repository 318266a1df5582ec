use super::theme::Theme;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Margin, Rect},
    style::{Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};

/// 标准三段式布局：Header(3) + Content(弹性) + Footer(3)
pub fn main_layout(area: Rect) -> Vec<Rect> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area)
        .to_vec()
}

/// 渲染通用 header：左侧图标，中间标题，右侧时钟
pub fn render_header(f: &mut Frame, title: &str, theme: &Theme, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(10),
        ])
        .split(inner);

    f.render_widget(Paragraph::new(" 🐍"), columns[0]);
    f.render_widget(
        Paragraph::new(title)
            .style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        columns[1],
    );
    let clock = chrono::Local::now().format("%H:%M:%S").to_string();
    f.render_widget(
        Paragraph::new(clock)
            .style(Style::default().fg(theme.dim))
            .alignment(Alignment::Right),
        columns[2],
    );
}

/// 渲染通用 footer
pub fn render_footer(f: &mut Frame, text: &str, theme: &Theme, area: Rect) {
    let footer = Paragraph::new(format!(" {}", text))
        .style(Style::default().fg(theme.footer))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border)),
        )
        .alignment(Alignment::Left);
    f.render_widget(footer, area);
}

/// 快捷键提示 `key 描述`，用 ` | ` 连接
pub fn key_hints(hints: &[(String, &str)]) -> String {
    hints
        .iter()
        .map(|(key, desc)| format!("{} {}", key, desc))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// 渲染带滚动条的内容区域
pub fn render_scrollable_lines(
    f: &mut Frame,
    title: &str,
    lines: Vec<Line<'_>>,
    scroll_offset: usize,
    theme: &Theme,
    area: Rect,
) {
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border));

    let inner = block.inner(area);
    f.render_widget(block, area);

    // 内部水平边距
    let padded = inner.inner(Margin {
        horizontal: 1,
        vertical: 0,
    });

    let total_lines = lines.len();
    let visible_height = padded.height as usize;
    let max_scroll = total_lines.saturating_sub(visible_height);
    let actual_scroll = scroll_offset.min(max_scroll);

    let visible_content: Vec<Line> = lines
        .into_iter()
        .skip(actual_scroll)
        .take(visible_height)
        .collect();

    f.render_widget(Paragraph::new(visible_content), padded);

    // 滚动条
    if total_lines > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));

        let mut scrollbar_state = ScrollbarState::new(max_scroll).position(actual_scroll);

        f.render_stateful_widget(
            scrollbar,
            area.inner(Margin {
                horizontal: 0,
                vertical: 1,
            }),
            &mut scrollbar_state,
        );
    }
}

/// 居中显示一段提示（加载中、错误等）
pub fn render_notice(f: &mut Frame, title: &str, message: Line<'_>, theme: &Theme, area: Rect) {
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);
    f.render_widget(Paragraph::new(message).alignment(Alignment::Center), vertical[1]);
}

/// 估算内容区域可见行数（总高度减去 header/footer/borders）
pub fn visible_content_height(term_height: u16) -> usize {
    term_height.saturating_sub(8) as usize
}
