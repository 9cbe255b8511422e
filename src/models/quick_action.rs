use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuickAction {
    OpenBrowser,
    OpenFolder,
    OpenTerminal,
    OpenEditor,
}

impl QuickAction {
    pub const ALL: [QuickAction; 4] = [
        QuickAction::OpenBrowser,
        QuickAction::OpenFolder,
        QuickAction::OpenTerminal,
        QuickAction::OpenEditor,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            QuickAction::OpenBrowser => "Open Browser",
            QuickAction::OpenFolder => "Open Finder",
            QuickAction::OpenTerminal => "Open Terminal",
            QuickAction::OpenEditor => "Open in VS Code",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            QuickAction::OpenBrowser => "safari",
            QuickAction::OpenFolder => "folder",
            QuickAction::OpenTerminal => "terminal",
            QuickAction::OpenEditor => "chevron.left.forwardslash.chevron.right",
        }
    }
}

impl FromStr for QuickAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" | "open_browser" => Ok(QuickAction::OpenBrowser),
            "folder" | "finder" | "open_folder" => Ok(QuickAction::OpenFolder),
            "terminal" | "open_terminal" => Ok(QuickAction::OpenTerminal),
            "editor" | "code" | "open_editor" => Ok(QuickAction::OpenEditor),
            other => Err(format!("未知的快捷操作: {}", other)),
        }
    }
}
