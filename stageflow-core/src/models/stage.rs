use std::fmt;

use serde::{Deserialize, Serialize};

/// One phase of the authoring pipeline.
///
/// The order is fixed and total: `Idea → Requirements → Design → Tasks → Development`.
/// `Development` is terminal. Each stage owns a chat channel named `<ordinal>-<stage>`
/// (e.g. `1-idea`), and [`Stage::from_channel_name`] is the exact inverse of
/// [`Stage::channel_name`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idea,
    Requirements,
    Design,
    Tasks,
    Development,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Idea,
        Stage::Requirements,
        Stage::Design,
        Stage::Tasks,
        Stage::Development,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idea => "idea",
            Self::Requirements => "requirements",
            Self::Design => "design",
            Self::Tasks => "tasks",
            Self::Development => "development",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idea" => Some(Self::Idea),
            "requirements" => Some(Self::Requirements),
            "design" => Some(Self::Design),
            "tasks" => Some(Self::Tasks),
            "development" => Some(Self::Development),
            _ => None,
        }
    }

    /// 1-based position in the pipeline.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Idea => 1,
            Self::Requirements => 2,
            Self::Design => 3,
            Self::Tasks => 4,
            Self::Development => 5,
        }
    }

    /// The stage that follows this one, `None` for the terminal stage.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Idea => Some(Self::Requirements),
            Self::Requirements => Some(Self::Design),
            Self::Design => Some(Self::Tasks),
            Self::Tasks => Some(Self::Development),
            Self::Development => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Whether this stage produces a markdown document in the project root.
    pub fn is_documentation(&self) -> bool {
        !self.is_terminal()
    }

    /// Chat channel name for this stage, e.g. `2-requirements`.
    pub fn channel_name(&self) -> String {
        format!("{}-{}", self.ordinal(), self.as_str())
    }

    /// Parse a channel name produced by [`Stage::channel_name`].
    ///
    /// A leading `#` and surrounding whitespace are ignored and the match is
    /// case-insensitive, but otherwise the name must match exactly.
    pub fn from_channel_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('#').to_ascii_lowercase();
        Self::ALL.into_iter().find(|stage| stage.channel_name() == name)
    }

    /// File name of the stage document, e.g. `design.md`.
    pub fn document_name(&self) -> String {
        format!("{}.md", self.as_str())
    }

    /// Title-cased label used in chat output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idea => "Idea",
            Self::Requirements => "Requirements",
            Self::Design => "Design",
            Self::Tasks => "Tasks",
            Self::Development => "Development",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
