use crate::policy::ParsedCommand;
use crate::policy::rules::DenyRule;

/// Path prefixes naming raw block devices (`/dev/sd`, `/dev/nvme`, ...).
#[derive(Debug, Clone)]
pub struct BlockDevices {
    prefixes: Vec<String>,
}

impl BlockDevices {
    pub fn new(prefixes: &[String]) -> Self {
        Self {
            prefixes: prefixes.to_vec(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

fn is_format_tool(program: &str) -> bool {
    program == "mkfs" || program == "mke2fs" || program.starts_with("mkfs.")
}

/// Filesystem creation on a block device: `mkfs.ext4 /dev/sda1`.
pub struct FormatDiskRule {
    devices: BlockDevices,
}

impl FormatDiskRule {
    pub fn new(devices: BlockDevices) -> Self {
        Self { devices }
    }
}

impl DenyRule for FormatDiskRule {
    fn reason(&self) -> &str {
        "Destructive: format disk"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        command
            .contexts
            .iter()
            .filter(|ctx| is_format_tool(&ctx.program))
            .any(|ctx| ctx.args().iter().any(|a| self.devices.matches(a)))
    }
}

/// `dd` with an output file on a block device.
pub struct DdToDiskRule {
    devices: BlockDevices,
}

impl DdToDiskRule {
    pub fn new(devices: BlockDevices) -> Self {
        Self { devices }
    }
}

impl DenyRule for DdToDiskRule {
    fn reason(&self) -> &str {
        "Destructive: dd to disk"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        command
            .contexts
            .iter()
            .filter(|ctx| ctx.program == "dd")
            .any(|ctx| {
                ctx.args()
                    .iter()
                    .filter_map(|a| a.strip_prefix("of="))
                    .any(|target| self.devices.matches(target))
            })
    }
}

/// Shell output redirection into a block device: `cat img > /dev/sdb`.
pub struct WriteToDiskRule {
    devices: BlockDevices,
}

impl WriteToDiskRule {
    pub fn new(devices: BlockDevices) -> Self {
        Self { devices }
    }
}

impl DenyRule for WriteToDiskRule {
    fn reason(&self) -> &str {
        "Destructive: write to disk"
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        command
            .contexts
            .iter()
            .flat_map(|ctx| ctx.redirections.iter())
            .any(|r| self.devices.matches(&r.target))
    }
}
