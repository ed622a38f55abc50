//! Deny rules: each rule recognizes one destructive command shape.
//!
//! Rules look at shell structure (program word, options, operands,
//! redirections, pipes) rather than raw substrings, so quoted text passed as
//! data to a harmless command never matches. They remain a heuristic: path
//! indirection, variable expansion or an alternative tool all get through.

/// Raw writes and formatting of block devices.
pub mod disk;
/// The canonical shell fork bomb.
pub mod fork_bomb;
/// Downloads piped into an interpreter.
pub mod remote;
/// Recursive deletion of the filesystem root.
pub mod rm;

use crate::config::PolicyConfig;
use crate::policy::ParsedCommand;

/// A single denial rule.
///
/// Rules are evaluated in order by [`DenyListPolicy`](crate::policy::DenyListPolicy);
/// the first rule whose [`matches`](DenyRule::matches) returns true decides
/// the verdict with its [`reason`](DenyRule::reason).
pub trait DenyRule: Send + Sync {
    /// Human-readable reason reported when the rule fires.
    fn reason(&self) -> &str;

    /// Whether the parsed command has the shape this rule denies.
    fn matches(&self, command: &ParsedCommand) -> bool;
}

/// The default rule set, in evaluation order.
pub fn default_rules(config: &PolicyConfig) -> Vec<Box<dyn DenyRule>> {
    let devices = disk::BlockDevices::new(&config.block_devices);
    vec![
        Box::new(rm::RmRootRule),
        Box::new(rm::NoPreserveRootRule),
        Box::new(disk::FormatDiskRule::new(devices.clone())),
        Box::new(disk::DdToDiskRule::new(devices.clone())),
        Box::new(fork_bomb::ForkBombRule),
        Box::new(disk::WriteToDiskRule::new(devices)),
        Box::new(remote::RemoteExecRule::new(
            config.downloaders.clone(),
            config.shells.clone(),
        )),
    ]
}
