//! 主题色定义，深色 / 浅色两套

use ratatui::style::Color;

/// conda 绿
pub const CONDA_GREEN: Color = Color::Rgb(67, 176, 73);
/// 有可用更新
pub const UPDATE_ORANGE: Color = Color::Rgb(219, 96, 21);

#[derive(Debug, Clone, Copy)]
pub struct Theme {
    /// 标题、logo
    pub accent: Color,
    /// 命名环境
    pub named: Color,
    pub text: Color,
    /// 次要信息
    pub dim: Color,
    pub border: Color,
    /// 选中行背景
    pub sel_bg: Color,
    pub footer: Color,
    pub update: Color,
    pub ok: Color,
    pub error: Color,
    pub command: Color,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            accent: CONDA_GREEN,
            named: CONDA_GREEN,
            text: Color::Rgb(230, 230, 235),
            dim: Color::Rgb(130, 130, 140),
            border: Color::DarkGray,
            sel_bg: Color::Rgb(40, 55, 45),
            footer: Color::Green,
            update: UPDATE_ORANGE,
            ok: CONDA_GREEN,
            error: Color::Rgb(235, 90, 90),
            command: Color::Rgb(91, 206, 250),
        }
    }

    pub fn light() -> Self {
        Self {
            accent: Color::Rgb(30, 120, 40),
            named: Color::Rgb(30, 120, 40),
            text: Color::Black,
            dim: Color::Rgb(100, 100, 110),
            border: Color::Gray,
            sel_bg: Color::Rgb(210, 235, 212),
            footer: Color::Rgb(30, 120, 40),
            update: UPDATE_ORANGE,
            ok: Color::Rgb(30, 120, 40),
            error: Color::Rgb(180, 30, 30),
            command: Color::Blue,
        }
    }

    pub fn from_dark(dark: bool) -> Self {
        if dark {
            Self::dark()
        } else {
            Self::light()
        }
    }
}
