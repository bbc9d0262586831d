use std::io::{self, BufRead, Write};

/// Ask a yes/no question on stderr and read the answer from stdin.
///
/// An empty answer, or stdin being closed, picks `default`.
pub fn confirm(question: &str, default: bool) -> anyhow::Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    confirm_with(&mut input, &mut io::stderr(), question, default)
}

fn confirm_with(
    input: &mut impl BufRead,
    output: &mut impl Write,
    question: &str,
    default: bool,
) -> anyhow::Result<bool> {
    let choices = if default { "[Y/n]" } else { "[y/N]" };

    loop {
        write!(output, "{question} {choices} ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(default);
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(output, "Please answer y or n.")?,
        }
    }
}
