use super::types::{Operator, ParsedPipeline, Redirection, ShellSegment};

/// Text left in the outer command where a substitution body was removed.
pub const SUBST_PLACEHOLDER: &str = "__SUBST__";

/// How a single character relates to shell quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    /// Unquoted, unescaped: shell syntax applies.
    Plain,
    /// A quote character or the backslash starting an escape.
    Quote,
    /// The character following a backslash.
    Escaped,
    /// Inside single quotes.
    Single,
    /// Inside double quotes.
    Double,
}

/// Quote and escape state while scanning a command left to right.
#[derive(Debug, Default)]
struct QuoteState {
    single: bool,
    double: bool,
    escaped: bool,
}

impl QuoteState {
    fn feed(&mut self, c: char) -> Lexeme {
        if self.escaped {
            self.escaped = false;
            return Lexeme::Escaped;
        }
        if self.single {
            if c == '\'' {
                self.single = false;
                return Lexeme::Quote;
            }
            return Lexeme::Single;
        }
        if c == '\\' {
            self.escaped = true;
            return Lexeme::Quote;
        }
        if self.double {
            if c == '"' {
                self.double = false;
                return Lexeme::Quote;
            }
            return Lexeme::Double;
        }
        match c {
            '\'' => {
                self.single = true;
                Lexeme::Quote
            }
            '"' => {
                self.double = true;
                Lexeme::Quote
            }
            _ => Lexeme::Plain,
        }
    }
}

/// Split a command at shell operators (&&, ||, ;, newline, |, |&, &),
/// respecting single/double quotes and backslash escapes.
///
/// Unquoted parentheses also end a segment, so subshells, function bodies
/// (`f() { ...; }`) and case arms (`x) ...;;`) expose the commands inside
/// them. A parenthesis followed by a real operator, as in `(a) | b`, takes
/// that operator. The returned operators always number one less than the
/// returned segments.
fn split_compound_command(command: &str) -> (Vec<String>, Vec<Operator>) {
    let chars: Vec<char> = command.chars().collect();
    let mut parts = Vec::new();
    let mut operators = Vec::new();
    let mut buf = String::new();
    let mut state = QuoteState::default();
    // last operator was inserted at a parenthesis
    let mut at_paren = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if state.feed(c) != Lexeme::Plain {
            buf.push(c);
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let (op, width) = match (c, next) {
            ('&', Some('&')) => (Some(Operator::And), 2),
            ('|', Some('|')) => (Some(Operator::Or), 2),
            ('|', Some('&')) => (Some(Operator::PipeErr), 2),
            // `>|` is a clobbering redirect, not a pipe
            ('|', _) if prev == Some('>') => (None, 1),
            ('|', _) => (Some(Operator::Pipe), 1),
            (';' | '\n', _) => (Some(Operator::Semi), 1),
            // `&>`, `>&2`, `<&0` belong to redirections
            ('&', Some('>')) => (None, 1),
            ('&', _) if matches!(prev, Some('>' | '<')) => (None, 1),
            ('&', _) => (Some(Operator::Background), 1),
            _ => (None, 1),
        };

        match op {
            Some(op) => {
                if push_segment(&mut parts, &mut operators, &mut buf, op) {
                    at_paren = false;
                } else if at_paren && let Some(last) = operators.last_mut() {
                    *last = op;
                    at_paren = false;
                }
            }
            None if c == '(' || c == ')' => {
                if push_segment(&mut parts, &mut operators, &mut buf, Operator::Semi) {
                    at_paren = true;
                }
            }
            None => buf.push(c),
        }
        i += width;
    }

    let tail = buf.trim();
    if !tail.is_empty() {
        parts.push(tail.to_string());
    } else {
        // trailing operator, e.g. `sleep 10 &`
        operators.pop();
    }

    (parts, operators)
}

/// Close the segment in `buf`, if it holds one. Returns whether a segment
/// and its operator were pushed.
fn push_segment(
    parts: &mut Vec<String>,
    operators: &mut Vec<Operator>,
    buf: &mut String,
    op: Operator,
) -> bool {
    let trimmed = buf.trim();
    let pushed = !trimmed.is_empty();
    if pushed {
        parts.push(trimmed.to_string());
        operators.push(op);
    }
    buf.clear();
    pushed
}

/// Read the body of a `$(`, `<(` or `>(` span starting just after the
/// opening parenthesis. Returns the body and the index after the closing
/// parenthesis.
fn take_balanced(chars: &[char], mut i: usize) -> (String, usize) {
    let mut depth: u32 = 1;
    let mut inner = String::new();
    let mut state = QuoteState::default();

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if state.feed(c) == Lexeme::Plain {
            if c == '(' {
                depth += 1;
            } else if c == ')' {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
        }
        inner.push(c);
    }

    (inner, i)
}

/// Read a backtick body starting just after the opening backtick.
fn take_backtick(chars: &[char], mut i: usize) -> (String, usize) {
    let mut inner = String::new();

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            inner.push(c);
            inner.push(chars[i + 1]);
            i += 2;
            continue;
        }
        i += 1;
        if c == '`' {
            break;
        }
        inner.push(c);
    }

    (inner, i)
}

/// Extract command substitution contents from `$(...)`, backticks and
/// process substitutions `<(...)` / `>(...)`.
///
/// Returns the outer command with substitutions replaced by
/// [`SUBST_PLACEHOLDER`], plus the extracted inner command strings. Nested
/// substitutions stay inside their parent body and surface when the body is
/// parsed in turn.
///
/// `$()` and backticks are extracted inside double quotes (the shell expands
/// them there). Single quotes block all substitution.
fn extract_substitutions(command: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = command.chars().collect();
    let mut outer = String::new();
    let mut inners = Vec::new();
    let mut state = QuoteState::default();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let lexeme = state.feed(c);
        let expands = matches!(lexeme, Lexeme::Plain | Lexeme::Double);
        let next = chars.get(i + 1).copied();

        let taken = match (c, next) {
            ('$', Some('(')) if expands => Some(take_balanced(&chars, i + 2)),
            ('`', _) if expands => Some(take_backtick(&chars, i + 1)),
            ('<' | '>', Some('(')) if lexeme == Lexeme::Plain => {
                Some(take_balanced(&chars, i + 2))
            }
            _ => None,
        };

        match taken {
            Some((inner, after)) => {
                // `$()` expands to nothing and leaves no placeholder
                let trimmed = inner.trim();
                if !trimmed.is_empty() {
                    inners.push(trimmed.to_string());
                    outer.push_str(SUBST_PLACEHOLDER);
                }
                i = after;
            }
            None => {
                outer.push(c);
                i += 1;
            }
        }
    }

    (outer, inners)
}

/// Read one shell word starting at `start`, skipping leading whitespace and
/// removing quote characters. Returns the word and the index after it.
fn read_word(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }

    let mut word = String::new();
    let mut state = QuoteState::default();
    while i < chars.len() {
        let c = chars[i];
        match state.feed(c) {
            Lexeme::Plain if c.is_whitespace() || "|&;<>()".contains(c) => break,
            Lexeme::Quote => {}
            _ => word.push(c),
        }
        i += 1;
    }

    (word, i)
}

/// Find output redirections (>, >>, >|, &>, &>>, N>, >&word) outside quotes
/// and the words they write to.
///
/// Does NOT report:
///   - Input redirection (<) or here-docs (<<, <<<)
///   - fd-to-fd duplication: >&N, N>&M, >&-, N>&- (e.g. 2>&1)
///   - Process substitution >(...)
pub fn redirections(command: &str) -> Vec<Redirection> {
    let chars: Vec<char> = command.chars().collect();
    let len = chars.len();
    let mut found = Vec::new();
    let mut state = QuoteState::default();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if state.feed(c) != Lexeme::Plain {
            i += 1;
            continue;
        }

        // Locate the `>` of a redirection operator starting at i.
        let gt = if c == '>' {
            i
        } else if c == '&' && chars.get(i + 1) == Some(&'>') {
            i + 1
        } else if c.is_ascii_digit() && (i == 0 || chars[i - 1].is_whitespace()) {
            let mut k = i;
            while k < len && chars[k].is_ascii_digit() {
                k += 1;
            }
            if chars.get(k) != Some(&'>') {
                i = k;
                continue;
            }
            k
        } else {
            i += 1;
            continue;
        };

        let mut end = gt + 1;
        match chars.get(end) {
            Some('(') => {
                i = end;
                continue;
            }
            Some('>' | '|') => end += 1,
            Some('&') => {
                if chars
                    .get(end + 1)
                    .is_some_and(|d| d.is_ascii_digit() || *d == '-')
                {
                    i = end + 2;
                    continue;
                }
                end += 1;
            }
            _ => {}
        }

        let operator: String = chars[i..end].iter().collect();
        let (target, after) = read_word(&chars, end);
        found.push(Redirection { operator, target });
        i = after.max(end);
    }

    found
}

/// Replace every quoted or escaped character with a space, keeping the
/// quote characters themselves and all unquoted text in place.
///
/// Pattern rules run against the masked text so literal data inside quotes
/// can never match shell structure.
pub fn mask_quoted(command: &str) -> String {
    let mut state = QuoteState::default();
    command
        .chars()
        .map(|c| match state.feed(c) {
            Lexeme::Plain | Lexeme::Quote => c,
            Lexeme::Escaped | Lexeme::Single | Lexeme::Double => ' ',
        })
        .collect()
}

/// Parse a full command string into a [`ParsedPipeline`].
///
/// Extracts substitutions first, then splits the outer command at compound
/// operators. Each segment carries its own redirections and the range of
/// substitution bodies whose placeholders it holds.
pub fn parse(command: &str) -> ParsedPipeline {
    let (outer, substitutions) = extract_substitutions(command);
    let (parts, operators) = split_compound_command(&outer);

    let mut next = 0;
    let segments = parts
        .into_iter()
        .map(|command| {
            let start = next.min(substitutions.len());
            next += command.matches(SUBST_PLACEHOLDER).count();
            ShellSegment {
                redirections: redirections(&command),
                substitutions: start..next.min(substitutions.len()),
                command,
            }
        })
        .collect();

    ParsedPipeline {
        segments,
        operators,
        substitutions,
    }
}
