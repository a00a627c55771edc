use std::collections::HashSet;

use woasobi_universal_agent_schema::SlashCommandInfo;

const CLAUDE_COMMANDS: &[(&str, &str, &str)] = &[
    ("help", "Show available commands", ""),
    ("compact", "Compact conversation context", "[instructions]"),
    ("clear", "Clear conversation history", ""),
    ("review", "Code review", ""),
    ("usage", "Show token usage information", ""),
    ("cost", "Show cost information", ""),
    ("model", "Show or change the model", "[model-name]"),
    ("permissions", "View and manage permissions", "[mode]"),
    ("init", "Initialize a CLAUDE.md file", ""),
    ("memory", "Edit CLAUDE.md", ""),
    ("config", "Edit config", ""),
    ("login", "Log in to your account", ""),
    ("logout", "Log out", ""),
    ("doctor", "Diagnose issues", ""),
    ("bug", "Report a bug", ""),
    ("status", "Show current session status", ""),
    ("mcp", "Show MCP server status", ""),
    ("allowed-tools", "Manage allowed tools", ""),
    ("terminal", "Open a terminal", ""),
    ("vim", "Toggle vim keybindings", ""),
    ("theme", "Change the theme", "[theme-name]"),
    ("undo", "Undo last file changes", ""),
    ("diff", "Show recent code changes", ""),
    ("pr-comments", "Show PR review comments", ""),
    ("search", "Search the codebase", "<query>"),
    ("add-dir", "Add a directory to context", "<path>"),
];

const CODEX_COMMANDS: &[(&str, &str, &str)] = &[
    ("help", "Show available commands", ""),
    ("usage", "Show token usage from latest Codex turn", ""),
    ("model", "Change the model", "<model-name>"),
    ("approval", "Change approval mode", "<mode>"),
    ("undo", "Undo last file changes", ""),
    ("clear", "Clear conversation history", ""),
    ("history", "Show conversation history", ""),
    ("compact", "Compact conversation context", ""),
];

fn to_infos(table: &[(&str, &str, &str)]) -> Vec<SlashCommandInfo> {
    table
        .iter()
        .map(|(name, description, hint)| SlashCommandInfo::new(*name, *description, *hint))
        .collect()
}

pub fn builtin_claude_commands() -> Vec<SlashCommandInfo> {
    to_infos(CLAUDE_COMMANDS)
}

pub fn builtin_codex_commands() -> Vec<SlashCommandInfo> {
    to_infos(CODEX_COMMANDS)
}

/// Discovered commands first, filling blank descriptions from the built-in
/// table, then any built-ins the backend did not advertise.
pub fn merge_commands(
    discovered: Vec<SlashCommandInfo>,
    builtin: Vec<SlashCommandInfo>,
) -> Vec<SlashCommandInfo> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(discovered.len() + builtin.len());
    for mut command in discovered {
        if !seen.insert(command.name.clone()) {
            continue;
        }
        if command.description.is_empty() {
            if let Some(known) = builtin.iter().find(|known| known.name == command.name) {
                command.description = known.description.clone();
                command.argument_hint = known.argument_hint.clone();
            }
        }
        merged.push(command);
    }
    for command in builtin {
        if seen.insert(command.name.clone()) {
            merged.push(command);
        }
    }
    merged
}
