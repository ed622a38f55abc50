use std::sync::LazyLock;

use regex::Regex;

use crate::policy::ParsedCommand;
use crate::policy::rules::DenyRule;

/// `:(){ :|:& };:` with arbitrary spacing.
static FORK_BOMB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").expect("fork bomb pattern")
});

/// The canonical fork bomb, matched against unquoted text only.
pub struct ForkBombRule;

impl DenyRule for ForkBombRule {
    fn reason(&self) -> &str {
        "Fork bomb detected"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        FORK_BOMB.is_match(&command.masked)
    }
}
