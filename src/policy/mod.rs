pub mod context;
pub mod rules;

pub use context::CommandContext;
pub use rules::DenyRule;

use log::debug;

use crate::config::{Config, PolicyConfig};
use crate::parse::{self, ParsedPipeline};

/// Nested command bodies (substitutions, `sh -c`, `eval`) deeper than this
/// are denied outright.
const MAX_NESTING: usize = 8;

/// Outcome of checking a command against a policy.
///
/// `reason` is present exactly when the command is not valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn allow() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether a command string may be handed to a shell.
///
/// The executor and file processor only see this trait, so the default
/// deny-list can be extended or replaced by a stronger collaborator.
pub trait CommandPolicy: Send + Sync {
    fn evaluate(&self, command: &str) -> ValidationResult;
}

/// A command string decomposed for rule matching.
#[derive(Debug)]
pub struct ParsedCommand<'a> {
    /// The command exactly as received.
    pub raw: &'a str,
    /// `raw` with all quoted and escaped characters blanked out.
    pub masked: String,
    pub pipeline: ParsedPipeline,
    /// One context per pipeline segment, index-aligned with `pipeline.segments`.
    pub contexts: Vec<CommandContext>,
    /// Per segment, the contexts of the top-level commands in the
    /// substitution bodies expanded into it. Index-aligned with `contexts`.
    pub substitution_contexts: Vec<Vec<CommandContext>>,
}

impl<'a> ParsedCommand<'a> {
    pub fn new(raw: &'a str, wrappers: &[String]) -> Self {
        let pipeline = parse::parse(raw);
        let contexts = pipeline
            .segments
            .iter()
            .map(|s| CommandContext::from_segment(s, wrappers))
            .collect();
        let substitution_contexts = (0..pipeline.segments.len())
            .map(|i| {
                pipeline
                    .substitutions_of(i)
                    .iter()
                    .flat_map(|body| parse::parse(body).segments)
                    .map(|s| CommandContext::from_segment(&s, wrappers))
                    .collect()
            })
            .collect();

        Self {
            raw,
            masked: parse::mask_quoted(raw),
            pipeline,
            contexts,
            substitution_contexts,
        }
    }
}

/// Ordered deny-list: allow by default, deny on the first matching rule.
///
/// After the rules pass on the outer command, every nested command body is
/// evaluated the same way: substitution bodies, the body of
/// `<shell> -c '...'`, and the arguments of `eval`.
pub struct DenyListPolicy {
    rules: Vec<Box<dyn DenyRule>>,
    shells: Vec<String>,
    wrappers: Vec<String>,
}

impl DenyListPolicy {
    /// Build the default rule set from configuration.
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            rules: rules::default_rules(config),
            shells: config.shells.clone(),
            wrappers: config.wrappers.clone(),
        }
    }

    /// Append a rule; it runs after all existing rules.
    pub fn push_rule(&mut self, rule: Box<dyn DenyRule>) {
        self.rules.push(rule);
    }

    /// Reasons of all rules, in evaluation order.
    pub fn reasons(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.reason())
    }

    fn evaluate_at(&self, command: &str, depth: usize) -> ValidationResult {
        if depth > MAX_NESTING {
            return ValidationResult::deny("Command nesting too deep");
        }

        let parsed = ParsedCommand::new(command, &self.wrappers);
        if let Some(rule) = self.rules.iter().find(|r| r.matches(&parsed)) {
            debug!("deny rule matched at depth {depth}: {}", rule.reason());
            return ValidationResult::deny(rule.reason());
        }

        for body in self.nested_bodies(&parsed) {
            let result = self.evaluate_at(&body, depth + 1);
            if !result.valid {
                return result;
            }
        }

        ValidationResult::allow()
    }

    /// Command text the shell will parse again when `parsed` runs.
    fn nested_bodies(&self, parsed: &ParsedCommand) -> Vec<String> {
        let mut bodies = parsed.pipeline.substitutions.clone();

        for ctx in &parsed.contexts {
            if ctx.program == "eval" {
                let body = ctx.args().join(" ");
                if !body.trim().is_empty() {
                    bodies.push(body);
                }
            } else if ctx.is_any_of(&self.shells)
                && let Some(body) = shell_c_body(ctx)
            {
                bodies.push(body.to_string());
            }
        }

        bodies
    }
}

/// The command string passed to `sh -c BODY` (also `-ec`, `-lc`, ...).
fn shell_c_body(ctx: &CommandContext) -> Option<&str> {
    let args = ctx.args();
    let flag = args.iter().position(|a| {
        a.strip_prefix('-')
            .is_some_and(|short| !short.starts_with('-') && short.contains('c'))
    })?;
    args[flag + 1..]
        .iter()
        .find(|a| !a.starts_with('-'))
        .map(String::as_str)
}

impl Default for DenyListPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default_config().policy)
    }
}

impl CommandPolicy for DenyListPolicy {
    fn evaluate(&self, command: &str) -> ValidationResult {
        self.evaluate_at(command, 0)
    }
}
