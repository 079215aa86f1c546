//! Interactive confirmation of suggested assertions.

use crate::mutation::Mutant;
use console::{style, Term};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Lines shown above and below the highlighted line.
const CONTEXT_RADIUS: usize = 3;

/// An assertion about to be inserted, as shown to the user.
#[derive(Debug)]
pub struct Suggestion<'a> {
    pub file: &'a Path,
    /// Content of `file` with the assertion already in place.
    pub lines: &'a [String],
    /// 0-based index of the assertion in `lines`.
    pub index: usize,
    pub mutant: &'a Mutant,
    pub current: usize,
    pub total: usize,
}

/// Decides whether a suggested assertion is kept.
pub trait Confirm {
    fn confirm(&mut self, suggestion: &Suggestion<'_>) -> io::Result<bool>;
}

/// Accepts every suggestion without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Confirm for AcceptAll {
    fn confirm(&mut self, _suggestion: &Suggestion<'_>) -> io::Result<bool> {
        Ok(true)
    }
}

/// Prompts on a terminal and reads `y`/`n` answers.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
    fancy: bool,
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        // styling only on a real TTY and when NO_COLOR/CI are not set
        let fancy = Term::stdout().is_term()
            && env::var_os("NO_COLOR").is_none()
            && env::var_os("CI").is_none();
        Self::new(io::stdin().lock(), io::stdout(), fancy)
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W, fancy: bool) -> Self {
        Self {
            input,
            output,
            fancy,
        }
    }

    fn show(&mut self, suggestion: &Suggestion<'_>) -> io::Result<()> {
        let mutant = suggestion.mutant;
        writeln!(self.output, "=======================================")?;
        writeln!(
            self.output,
            "\n{}",
            style(mutant.to_string()).bold().force_styling(self.fancy)
        )?;

        match mutant.source_context(CONTEXT_RADIUS as u32) {
            Ok(context) => {
                writeln!(self.output, "\n{}:", mutant.original_file.display())?;
                for (number, text) in context {
                    if number == mutant.line_number {
                        let marked = format!("* {number:>4} {text}");
                        writeln!(self.output, "{}", style(marked).red().force_styling(self.fancy))?;
                    } else {
                        writeln!(self.output, "  {number:>4} {text}")?;
                    }
                }
            }
            Err(e) => tracing::debug!("No source context for {}: {:#}", mutant, e),
        }

        writeln!(self.output, "\n{}:", suggestion.file.display())?;
        let first = suggestion.index.saturating_sub(CONTEXT_RADIUS);
        let last = (suggestion.index + CONTEXT_RADIUS).min(suggestion.lines.len().saturating_sub(1));
        for (i, text) in suggestion.lines.iter().enumerate().take(last + 1).skip(first) {
            if i == suggestion.index {
                let added = format!("+ {:>4} {text}", i + 1);
                writeln!(self.output, "{}", style(added).green().force_styling(self.fancy))?;
            } else {
                writeln!(self.output, "  {:>4} {text}", i + 1)?;
            }
        }
        Ok(())
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, suggestion: &Suggestion<'_>) -> io::Result<bool> {
        self.show(suggestion)?;
        write!(
            self.output,
            "\n({}/{}) Add this new assertion? (y/n): ",
            suggestion.current, suggestion.total
        )?;
        self.output.flush()?;

        loop {
            let mut answer = String::new();
            if self.input.read_line(&mut answer)? == 0 {
                // closed input declines
                writeln!(self.output)?;
                return Ok(false);
            }
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {
                    write!(self.output, "Please type \"y\" or \"n\": ")?;
                    self.output.flush()?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn mutant() -> Mutant {
        Mutant {
            original_file: PathBuf::from("/nonexistent/Bank.java"),
            compiled_artifact: PathBuf::from("mutants/Bank.class"),
            mutated_class: "bank.Bank".to_string(),
            line_number: 12,
            mutator_kind: "MathMutator".to_string(),
            notes: String::new(),
            survived: true,
            method: None,
        }
    }

    fn lines() -> Vec<String> {
        (1..=10).map(|i| format!("line {i}")).collect()
    }

    fn ask(input: &str) -> (bool, String) {
        let lines = lines();
        let mutant = mutant();
        let suggestion = Suggestion {
            file: Path::new("BankTest.java"),
            lines: &lines,
            index: 4,
            mutant: &mutant,
            current: 1,
            total: 2,
        };
        let mut out = Vec::new();
        let answer = TerminalPrompt::new(Cursor::new(input.as_bytes()), &mut out, false)
            .confirm(&suggestion)
            .unwrap();
        (answer, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_yes_accepts() {
        let (answer, out) = ask("YES\n");
        assert!(answer);
        assert!(out.contains("MathMutator at /nonexistent/Bank.java:12"));
        assert!(out.contains("+    5 line 5"));
        assert!(out.contains("     2 line 2"));
        assert!(!out.contains("line 1\n"));
        assert!(out.contains("(1/2)"));
    }

    #[test]
    fn test_retries_until_valid_answer() {
        let (answer, out) = ask("maybe\nn\n");
        assert!(!answer);
        assert!(out.contains("Please type"));
    }

    #[test]
    fn test_closed_input_declines() {
        let (answer, _) = ask("");
        assert!(!answer);
    }
}
