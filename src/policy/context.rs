use crate::parse::{self, Redirection, ShellSegment};

/// Reserved words that may precede a command inside compound statements.
const KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "do", "done", "while", "until", "for", "case", "esac",
    "in", "{", "}", "!", "coproc",
];

/// Short options that consume the following word, per wrapper.
const WRAPPER_VALUE_FLAGS: &[(&str, &[&str])] = &[
    ("sudo", &["-u", "-g", "-C", "-D", "-h", "-p", "-r", "-t", "-U", "-T"]),
    ("doas", &["-u", "-C"]),
    ("env", &["-u", "-C", "-S"]),
    ("nice", &["-n"]),
    ("ionice", &["-c", "-n", "-p"]),
    ("timeout", &["-s", "-k"]),
    ("stdbuf", &["-i", "-o", "-e"]),
    ("xargs", &["-I", "-L", "-n", "-P", "-s", "-d", "-E", "-a"]),
];

fn takes_value(wrapper: &str, flag: &str) -> bool {
    WRAPPER_VALUE_FLAGS
        .iter()
        .any(|(name, flags)| *name == wrapper && flags.contains(&flag))
}

/// Context for evaluating a single command segment.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// All words in the segment (tokenized via shlex).
    pub words: Vec<String>,
    /// Leading KEY=VALUE environment variable assignments.
    pub env_vars: Vec<(String, String)>,
    /// Basename of the word that actually runs, after assignments, shell
    /// keywords and wrappers (`sudo`, `env`, `timeout 5`, ...). Empty when
    /// the segment runs nothing.
    pub program: String,
    /// Output redirections of the segment.
    pub redirections: Vec<Redirection>,
    program_index: Option<usize>,
}

impl CommandContext {
    /// Build a context from a parsed segment.
    pub fn from_segment(segment: &ShellSegment, wrappers: &[String]) -> Self {
        let mut ctx = Self::from_words(parse::tokenize(&segment.command), wrappers);
        ctx.redirections = segment.redirections.clone();
        ctx
    }

    /// Build a context from a raw single-command string.
    pub fn from_command(raw: &str, wrappers: &[String]) -> Self {
        let mut ctx = Self::from_words(parse::tokenize(raw), wrappers);
        ctx.redirections = parse::redirections(raw);
        ctx
    }

    fn from_words(words: Vec<String>, wrappers: &[String]) -> Self {
        let env_vars = words
            .iter()
            .take_while(|w| parse::is_assignment(w))
            .filter_map(|w| w.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let program_index = locate_program(&words, wrappers);
        let program = program_index
            .map(|i| parse::program_name(&words[i]).to_string())
            .unwrap_or_default();

        Self {
            words,
            env_vars,
            program,
            redirections: Vec::new(),
            program_index,
        }
    }

    /// Words after the program word.
    pub fn args(&self) -> &[String] {
        match self.program_index {
            Some(i) => &self.words[i + 1..],
            None => &[],
        }
    }

    /// Arguments that are not options: everything not starting with `-`,
    /// plus everything after a bare `--`.
    pub fn operands(&self) -> impl Iterator<Item = &str> {
        let mut after_dashdash = false;
        self.args().iter().filter_map(move |arg| {
            if after_dashdash {
                return Some(arg.as_str());
            }
            if arg == "--" {
                after_dashdash = true;
                return None;
            }
            (!arg.starts_with('-') || arg == "-").then_some(arg.as_str())
        })
    }

    /// Options before a bare `--`.
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.args()
            .iter()
            .take_while(|arg| *arg != "--")
            .filter(|arg| arg.starts_with('-') && arg.len() > 1)
            .map(String::as_str)
    }

    /// Check if any option matches a flag exactly.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.options().any(|o| o == flag)
    }

    /// Whether the program is one of `names`.
    pub fn is_any_of(&self, names: &[String]) -> bool {
        !self.program.is_empty() && names.iter().any(|n| *n == self.program)
    }
}

/// Index of the word that will be executed, skipping assignments, keywords
/// and wrapper commands together with their options.
fn locate_program(words: &[String], wrappers: &[String]) -> Option<usize> {
    let mut wrapper: Option<&str> = None;
    let mut pending_duration = false;
    let mut i = 0;

    while i < words.len() {
        let word = words[i].as_str();
        if word == "function" {
            // `function NAME {` defines NAME; the body follows
            i += 2;
            continue;
        }
        if parse::is_assignment(word) || KEYWORDS.contains(&word) {
            i += 1;
            continue;
        }
        if let Some(name) = wrapper {
            if word.starts_with('-') && word.len() > 1 {
                i += if takes_value(name, word) { 2 } else { 1 };
                continue;
            }
            if pending_duration {
                pending_duration = false;
                i += 1;
                continue;
            }
        }
        let name = parse::program_name(word);
        if wrappers.iter().any(|w| w == name) {
            wrapper = Some(name);
            pending_duration = name == "timeout";
            i += 1;
            continue;
        }
        return Some(i);
    }
    None
}
