use crate::policy::rules::DenyRule;
use crate::policy::{CommandContext, ParsedCommand};

fn is_rm(ctx: &CommandContext) -> bool {
    ctx.program == "rm"
}

/// `-r`, `-R`, `-rf`, `-fR`, ... or `--recursive`.
fn is_recursive_option(option: &str) -> bool {
    if option == "--recursive" {
        return true;
    }
    match option.strip_prefix('-') {
        Some(short) if !short.starts_with('-') => short.chars().any(|c| c == 'r' || c == 'R'),
        _ => false,
    }
}

/// `/`, `//`, `/*`, `/.`, `/..`: operands that resolve to the root itself.
fn names_root(operand: &str) -> bool {
    let stripped = operand.trim_end_matches(['*', '.']);
    !stripped.is_empty() && stripped.chars().all(|c| c == '/')
}

/// Recursive `rm` of the filesystem root.
pub struct RmRootRule;

impl DenyRule for RmRootRule {
    fn reason(&self) -> &str {
        "Destructive: rm root"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        command.contexts.iter().filter(|c| is_rm(c)).any(|ctx| {
            ctx.options().any(is_recursive_option) && ctx.operands().any(names_root)
        })
    }
}

/// Any `rm` that disables GNU rm's root safeguard.
pub struct NoPreserveRootRule;

impl DenyRule for NoPreserveRootRule {
    fn reason(&self) -> &str {
        "Destructive: rm no-preserve-root"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        command
            .contexts
            .iter()
            .filter(|c| is_rm(c))
            .any(|ctx| ctx.has_flag("--no-preserve-root"))
    }
}
