//! Yes/no and free-text prompts on the terminal.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

/// Ask a yes/no question; an empty answer means no. `assume_yes` skips the
/// prompt.
pub fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let stdin = io::stdin();
    confirm_from(&mut stdin.lock(), question)
}

pub fn prompt_line(question: &str) -> Result<String> {
    let stdin = io::stdin();
    prompt_from(&mut stdin.lock(), question)
}

fn prompt_from(input: &mut impl BufRead, question: &str) -> Result<String> {
    print!("{question} ");
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn confirm_from(input: &mut impl BufRead, question: &str) -> Result<bool> {
    let answer = prompt_from(input, &format!("{question} [y/N]"))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_confirm_answers() {
        assert!(confirm_from(&mut Cursor::new("y\n"), "Apply?").unwrap());
        assert!(confirm_from(&mut Cursor::new("YES\n"), "Apply?").unwrap());
        assert!(!confirm_from(&mut Cursor::new("\n"), "Apply?").unwrap());
        assert!(!confirm_from(&mut Cursor::new("nope\n"), "Apply?").unwrap());
        assert!(!confirm_from(&mut Cursor::new(""), "Apply?").unwrap());
    }

    #[test]
    fn test_assume_yes_skips_prompt() {
        assert!(confirm("Apply?", true).unwrap());
    }

    #[test]
    fn test_prompt_trims() {
        assert_eq!(prompt_from(&mut Cursor::new("  42 \n"), "Id?").unwrap(), "42");
    }
}
