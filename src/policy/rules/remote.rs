use crate::policy::rules::DenyRule;
use crate::policy::{CommandContext, ParsedCommand};

/// Remote content executed by an interpreter:
///
/// - `curl URL | bash`, `wget -O- URL | tee log | sh`
/// - `bash <(curl URL)`, `sh -c "$(wget -O- URL)"`
pub struct RemoteExecRule {
    downloaders: Vec<String>,
    shells: Vec<String>,
}

impl RemoteExecRule {
    pub fn new(downloaders: Vec<String>, shells: Vec<String>) -> Self {
        Self {
            downloaders,
            shells,
        }
    }

    fn is_downloader(&self, ctx: &CommandContext) -> bool {
        ctx.is_any_of(&self.downloaders)
    }

    fn is_shell(&self, ctx: &CommandContext) -> bool {
        ctx.is_any_of(&self.shells)
    }
}

impl DenyRule for RemoteExecRule {
    fn reason(&self) -> &str {
        "Remote code execution"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        let piped = command.contexts.iter().enumerate().any(|(i, ctx)| {
            self.is_downloader(ctx)
                && command
                    .pipeline
                    .piped_from(i)
                    .any(|j| self.is_shell(&command.contexts[j]))
        });
        if piped {
            return true;
        }

        command
            .contexts
            .iter()
            .zip(&command.substitution_contexts)
            .any(|(ctx, substituted)| {
                self.is_shell(ctx) && substituted.iter().any(|s| self.is_downloader(s))
            })
    }
}
