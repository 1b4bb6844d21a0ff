//! Branch-table simulation for the table cipher
//!
//! One n-transform shape is not a simple array operation but a minified
//! character-substitution state machine: a `for` loop around a `switch` on a
//! counter, building a lookup table of character codes. Rather than model it
//! with host control flow, the switch body is parsed into an explicit
//! statement list and simulated with a program counter, producing a concrete
//! [`TableTransducer`] that is all the decode path ever touches.

use crate::decipher::catalog::{adjust_regex, switch_tokens_regex};
use crate::error::DescrambleError;
use tracing::debug;

/// Defensive termination bound for the simulation loop. Not part of the
/// original machine's semantics; a malformed script must not hang us.
const MAX_ITERATIONS: u32 = 256;

/// One statement of the switch dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stmt {
    Case(i64),
    Default,
    Adjust(AdjustOp, i64),
    Append,
    Continue,
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdjustOp {
    Add,
    Sub,
    Set,
}

/// Parsed switch body, alive only for the duration of one interpretation
pub struct SwitchMachine {
    stmts: Vec<Stmt>,
    /// Index of the first statement after the `default:` label
    default_index: Option<usize>,
}

/// Whether the implicit per-iteration append sits inside the loop braces
/// (after the switch) or only appears as explicit statements in the cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendPlacement {
    AfterSwitch,
    InsideCases,
}

impl SwitchMachine {
    /// Parse the statements between `switch(f){` and `}`. Unrecognized text
    /// is skipped; the dialect is closed by construction of the token set.
    pub fn parse(switch_body: &str) -> Result<Self, DescrambleError> {
        let tokens = switch_tokens_regex()?;
        let adjust = adjust_regex()?;

        let mut stmts = Vec::new();
        let mut default_index = None;

        for cap in tokens.captures_iter(switch_body) {
            let stmt = if let Some(m) = cap.name("case") {
                let value = m.as_str()[5..m.as_str().len() - 1].parse::<i64>()?;
                Stmt::Case(value)
            } else if cap.name("default").is_some() {
                Stmt::Default
            } else if let Some(m) = cap.name("adjust") {
                let parts = adjust.captures(m.as_str()).ok_or_else(|| {
                    DescrambleError::StructuralMismatch(format!(
                        "unparseable counter adjustment: {}",
                        m.as_str()
                    ))
                })?;
                let op = match &parts[1] {
                    "+=" => AdjustOp::Add,
                    "-=" => AdjustOp::Sub,
                    _ => AdjustOp::Set,
                };
                Stmt::Adjust(op, parts[2].parse::<i64>()?)
            } else if cap.name("append").is_some() {
                Stmt::Append
            } else if cap.name("cont").is_some() {
                Stmt::Continue
            } else {
                Stmt::Break
            };

            stmts.push(stmt);
            if stmt == Stmt::Default {
                default_index = Some(stmts.len());
            }
        }

        Ok(SwitchMachine {
            stmts,
            default_index,
        })
    }

    /// Simulate the machine to materialize its lookup table and terminal
    /// counter. The counter starts at 64; the loop guard is
    /// `(++f - table.len - 32) != 0`, capped at [`MAX_ITERATIONS`].
    pub fn simulate(&self, placement: AppendPlacement) -> TableTransducer {
        let mut f: i64 = 64;
        let mut table: Vec<char> = Vec::new();
        let mut iterations = 0u32;

        loop {
            f += 1;
            if f - table.len() as i64 - 32 == 0 {
                break;
            }
            iterations += 1;
            if iterations >= MAX_ITERATIONS {
                debug!("table cipher simulation hit the iteration cap");
                break;
            }

            let case_pos = self
                .stmts
                .iter()
                .position(|s| matches!(s, Stmt::Case(v) if *v == f));

            let mut case_continue = false;
            match case_pos {
                Some(pos) => {
                    if self.run_stmts(pos + 1, &mut f, &mut table) == RunOutcome::Continue {
                        case_continue = true;
                    }
                }
                None => {
                    if let Some(start) = self.default_index {
                        if self.run_stmts(start, &mut f, &mut table) == RunOutcome::Continue {
                            case_continue = true;
                        }
                    }
                }
            }

            if placement == AppendPlacement::AfterSwitch {
                if case_continue {
                    continue;
                }
                push_code_point(&mut table, f);
            }
        }

        TableTransducer { table, terminal: f }
    }

    fn run_stmts(&self, start: usize, f: &mut i64, table: &mut Vec<char>) -> RunOutcome {
        for stmt in &self.stmts[start..] {
            match stmt {
                Stmt::Continue => return RunOutcome::Continue,
                Stmt::Break => return RunOutcome::Break,
                Stmt::Adjust(op, value) => match op {
                    AdjustOp::Add => *f += value,
                    AdjustOp::Sub => *f -= value,
                    AdjustOp::Set => *f = *value,
                },
                Stmt::Append => push_code_point(table, *f),
                // labels between statements fall through
                Stmt::Case(_) | Stmt::Default => {}
            }
        }
        RunOutcome::End
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Continue,
    Break,
    End,
}

fn push_code_point(table: &mut Vec<char>, f: i64) {
    if let Some(ch) = u32::try_from(f).ok().and_then(char::from_u32) {
        table.push(ch);
    }
}

/// Concrete lookup-based string transducer materialized from a simulated
/// switch machine. Owns the table and the terminal counter; applying it is
/// deterministic and touches nothing beyond the passed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTransducer {
    table: Vec<char>,
    terminal: i64,
}

impl TableTransducer {
    #[cfg(test)]
    pub(crate) fn new(table: Vec<char>, terminal: i64) -> Self {
        TableTransducer { table, terminal }
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn terminal(&self) -> i64 {
        self.terminal
    }

    /// Map scrambled input characters in place against the seed string.
    /// Output at position m is
    /// `table[(idx(in[m]) - idx(seed[m]) + m - 32 + k) mod table.len]`, with
    /// k starting at the terminal counter and decrementing per character.
    /// Each output character is appended to the seed as it is produced, so a
    /// seed shorter than the input reads back its own output.
    pub fn apply(&self, chars: &mut [char], seed: &str) -> Result<(), String> {
        let len = self.table.len() as i64;
        if len == 0 {
            return Err("empty substitution table".to_string());
        }

        let mut seed: Vec<char> = seed.chars().collect();
        let mut k = self.terminal;

        for m in 0..chars.len() {
            let in_idx = self.index_of(chars[m]);
            let seed_idx = seed.get(m).map_or(-1, |&c| self.index_of(c));
            let idx = (in_idx - seed_idx + m as i64 - 32 + k).rem_euclid(len);
            k -= 1;

            let out = self.table[idx as usize];
            chars[m] = out;
            seed.push(out);
        }

        Ok(())
    }

    fn index_of(&self, c: char) -> i64 {
        self.table
            .iter()
            .position(|&t| t == c)
            .map_or(-1, |i| i as i64)
    }
}
