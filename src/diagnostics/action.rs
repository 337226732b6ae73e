//! Browser action vocabulary for diagnostic captures.

use serde::{Deserialize, Serialize};

/// One scripted browser action. Sequences execute strictly in order; a
/// failing action aborts the rest of its sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Wait {
        ms: u64,
    },
    WaitForSelector {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Screenshot {
        filename: String,
    },
    Evaluate {
        script: String,
    },
}

impl std::fmt::Display for BrowserAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserAction::Navigate { url } => write!(f, "navigate to {}", url),
            BrowserAction::Click { selector } => write!(f, "click {}", selector),
            BrowserAction::Type { selector, .. } => write!(f, "type into {}", selector),
            BrowserAction::Wait { ms } => write!(f, "wait {}ms", ms),
            BrowserAction::WaitForSelector { selector, .. } => {
                write!(f, "wait for {}", selector)
            }
            BrowserAction::Screenshot { filename } => write!(f, "screenshot {}", filename),
            BrowserAction::Evaluate { .. } => write!(f, "evaluate script"),
        }
    }
}
