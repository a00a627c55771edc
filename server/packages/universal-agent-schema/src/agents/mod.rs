pub mod claude;
pub mod codex;
