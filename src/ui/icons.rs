//! Shared UI icons and emojis.
//!
//! This module provides common emoji constants used across the UI components
//! for consistent visual styling.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Run indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static SHIELD: Emoji<'_, '_> = Emoji("🛡️  ", "[GATE]");
pub static SCOPE: Emoji<'_, '_> = Emoji("🔬 ", "[DIAG]");
pub static ALERT: Emoji<'_, '_> = Emoji("🚨 ", "[ESC]");
