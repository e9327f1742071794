use std::io::{self, BufRead, Write};

use crate::error::TagError;

use super::TagAnalysis;

/// Operator decisions taken during tagging.
pub trait OperatorPrompt {
    /// Whether to retry after a failed analysis.
    fn retry_after(&mut self, error: &TagError) -> bool;

    /// Whether to keep this analysis; `false` reshuffles and asks again.
    fn accept(&mut self, analysis: &TagAnalysis) -> bool;

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Asks on the terminal.
pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn retry_after(&mut self, error: &TagError) -> bool {
        let question = format!("Tag analysis failed ({}). Retry? (y/n): ", error);
        ask(&mut io::stdin().lock(), &mut io::stdout(), &question)
    }

    fn accept(&mut self, analysis: &TagAnalysis) -> bool {
        let question = format!("Tags: {}\nUse these tags? (y/n): ", analysis.to_caption());
        ask(&mut io::stdin().lock(), &mut io::stdout(), &question)
    }
}

/// Accepts every analysis and never retries.
pub struct AutoConfirm;

impl OperatorPrompt for AutoConfirm {
    fn retry_after(&mut self, _error: &TagError) -> bool {
        false
    }

    fn accept(&mut self, _analysis: &TagAnalysis) -> bool {
        true
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// `y`/`yes` (any case) is yes; anything else, including EOF, is no.
fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> bool {
    if write!(output, "{}", question).and_then(|_| output.flush()).is_err() {
        return false;
    }

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn answer(input: &str) -> bool {
        let mut out = Vec::new();
        ask(&mut Cursor::new(input.as_bytes()), &mut out, "ok? ")
    }

    #[test]
    fn test_ask_yes_variants() {
        assert!(answer("y\n"));
        assert!(answer("YES\n"));
        assert!(answer("  yes  \n"));
    }

    #[test]
    fn test_ask_no_and_eof() {
        assert!(!answer("n\n"));
        assert!(!answer("maybe\n"));
        assert!(!answer(""));
    }

    #[test]
    fn test_ask_prints_question() {
        let mut out = Vec::new();
        ask(&mut Cursor::new(b"y\n".as_slice()), &mut out, "Retry? ");
        assert_eq!(String::from_utf8(out).unwrap(), "Retry? ");
    }

    #[test]
    fn test_auto_confirm() {
        let mut prompt = AutoConfirm;
        assert!(!prompt.retry_after(&TagError::NoTags));
        assert!(!prompt.is_interactive());
    }
}
