pub mod shell;
pub mod tokenize;
pub mod types;

pub use shell::{SUBST_PLACEHOLDER, mask_quoted, parse, redirections};
pub use tokenize::{is_assignment, program_name, tokenize};
pub use types::{Operator, ParsedPipeline, Redirection, ShellSegment};
