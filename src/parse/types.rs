//! Types produced by the shell parser and consumed by the policy layer.

use std::ops::Range;

/// Shell operator separating consecutive pipeline segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `&&`: run next only if previous succeeded
    And,
    /// `||`: run next only if previous failed
    Or,
    /// `;` or a newline: run next unconditionally
    Semi,
    /// `|`: pipe stdout
    Pipe,
    /// `|&`: pipe stdout+stderr
    PipeErr,
    /// `&`: run previous in the background
    Background,
}

impl Operator {
    /// The operator's shell syntax.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Semi => ";",
            Operator::Pipe => "|",
            Operator::PipeErr => "|&",
            Operator::Background => "&",
        }
    }

    /// Whether the next segment reads this segment's output.
    pub fn is_pipe(self) -> bool {
        matches!(self, Operator::Pipe | Operator::PipeErr)
    }
}

/// An output redirection found outside quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// The redirection operator as written, e.g. `">"`, `"2>>"`, `"&>"`.
    pub operator: String,
    /// The word the output is written to, with surrounding quotes removed.
    pub target: String,
}

/// A single command within a compound command line.
#[derive(Debug, Clone)]
pub struct ShellSegment {
    /// Command text, with substitution spans replaced by `__SUBST__`.
    pub command: String,
    /// Output redirections in this segment.
    pub redirections: Vec<Redirection>,
    /// Indices into [`ParsedPipeline::substitutions`] of the bodies
    /// substituted into this segment.
    pub substitutions: Range<usize>,
}

/// A fully decomposed compound command: segments interleaved with operators.
///
/// For `ls -la` there is one segment and no operators. For `a && b | c`
/// there are three segments and two operators (`&&`, `|`). Substitution
/// bodies (`$(..)`, backticks, `<(..)`, `>(..)`) are collected separately so
/// the caller can evaluate them as commands of their own.
#[derive(Debug, Clone, Default)]
pub struct ParsedPipeline {
    pub segments: Vec<ShellSegment>,
    pub operators: Vec<Operator>,
    pub substitutions: Vec<String>,
}

impl ParsedPipeline {
    /// Indices of the segments that read the output of segment `from`,
    /// following consecutive pipe operators.
    pub fn piped_from(&self, from: usize) -> impl Iterator<Item = usize> + '_ {
        (from..self.operators.len())
            .take_while(|&i| self.operators[i].is_pipe())
            .map(|i| i + 1)
            .filter(|&i| i < self.segments.len())
    }

    /// Substitution bodies that expand inside segment `index`.
    pub fn substitutions_of(&self, index: usize) -> &[String] {
        self.segments
            .get(index)
            .and_then(|s| self.substitutions.get(s.substitutions.clone()))
            .unwrap_or(&[])
    }
}
