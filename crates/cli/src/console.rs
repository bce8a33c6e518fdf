//! Line-oriented operator input and output

use std::io::{self, BufRead, Stdout, StdinLock, Write};

use libregtree::Operator;

/// Reads operator answers from `input`, writes prompts to `output`.
///
/// Every `read_*` returns `Ok(None)` once input is exhausted.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl Console<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{text}")
    }

    /// Print `text` without a newline and flush
    pub fn prompt(&mut self, text: &str) -> io::Result<()> {
        write!(self.output, "{text}")?;
        self.output.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub fn read_string(&mut self) -> io::Result<Option<String>> {
        self.read_line()
    }

    /// Read an integer, asking again on anything unparsable
    pub fn read_int(&mut self) -> io::Result<Option<i64>> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            match line.parse() {
                Ok(n) => return Ok(Some(n)),
                Err(_) => self.prompt("Please enter a whole number: ")?,
            }
        }
    }

    /// Read a y/n answer, case-insensitive
    pub fn read_yes_no(&mut self) -> io::Result<Option<bool>> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            match line.chars().next().map(|c| c.to_ascii_uppercase()) {
                Some('Y') => return Ok(Some(true)),
                Some('N') => return Ok(Some(false)),
                _ => self.prompt("Please answer y or n: ")?,
            }
        }
    }

    /// Show numbered options and read until one of `1..=options.len()` is picked
    pub fn choose(&mut self, options: &[&str]) -> io::Result<Option<usize>> {
        loop {
            self.say("")?;
            for (i, option) in options.iter().enumerate() {
                self.say(&format!("[{}] {option}", i + 1))?;
            }
            self.prompt("> ")?;
            match self.read_int()? {
                None => return Ok(None),
                Some(n) => match usize::try_from(n) {
                    Ok(picked) if (1..=options.len()).contains(&picked) => return Ok(Some(picked)),
                    _ => continue,
                },
            }
        }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Operator for Console<R, W> {
    fn show_query(&mut self, prompt: &str, branch_count: u32) -> io::Result<()> {
        self.say(prompt)?;
        self.prompt(&format!("Choose a branch [0-{}]: ", branch_count - 1))
    }

    fn read_choice(&mut self, _branch_count: u32) -> io::Result<Option<i64>> {
        self.read_int()
    }

    fn reject_choice(&mut self, choice: i64, branch_count: u32) -> io::Result<()> {
        self.prompt(&format!(
            "{choice} is not a branch, pick 0 to {}: ",
            branch_count - 1
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn read_int_skips_garbage() {
        let mut c = console("abc\n  42 \n");
        assert_eq!(c.read_int().unwrap(), Some(42));
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("whole number"));
    }

    #[test]
    fn read_int_at_eof() {
        let mut c = console("x\n");
        assert_eq!(c.read_int().unwrap(), None);
    }

    #[test]
    fn yes_no_is_case_insensitive() {
        let mut c = console("maybe\nY\nno\n");
        assert_eq!(c.read_yes_no().unwrap(), Some(true));
        assert_eq!(c.read_yes_no().unwrap(), Some(false));
        assert_eq!(c.read_yes_no().unwrap(), None);
    }

    #[test]
    fn choose_repeats_until_in_range() {
        let mut c = console("0\n3\n2\n");
        assert_eq!(c.choose(&["print", "predict"]).unwrap(), Some(2));
        let out = String::from_utf8(c.into_output()).unwrap();
        assert_eq!(out.matches("[1] print").count(), 3);
    }

    #[test]
    fn operator_prompt_shows_branch_range() {
        let mut c = console("1\n");
        c.show_query("age <= 30?", 2).unwrap();
        assert_eq!(c.read_choice(2).unwrap(), Some(1));
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("age <= 30?\n"));
        assert!(out.contains("[0-1]"));
    }

    #[test]
    fn choose_ignores_negative_numbers() {
        let mut c = console("-1\n1\n");
        assert_eq!(c.choose(&["learn", "load"]).unwrap(), Some(1));
    }

    struct ClosedTerminal;

    impl Write for ClosedTerminal {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn operator_reports_output_failures() {
        let mut c = Console::new(Cursor::new(Vec::<u8>::new()), ClosedTerminal);
        assert_eq!(
            c.show_query("age <= 30?", 2).unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
        assert!(c.reject_choice(5, 2).is_err());
    }
}
