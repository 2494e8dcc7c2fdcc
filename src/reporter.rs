use std::fmt::{self, Display, Formatter};
use std::io::Write;

/// Where in the source a compile error was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSite<'a> {
    /// At the end of the input
    End,
    /// At a token, carrying its source text
    Lexeme(&'a str),
    /// At a malformed token, whose message already says everything
    Scan,
}

impl Display for ErrorSite<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSite::End => f.write_str(" at end"),
            ErrorSite::Lexeme(lexeme) => write!(f, " at '{}'", lexeme),
            ErrorSite::Scan => Ok(()),
        }
    }
}

pub trait Reporter {
    fn report(&mut self, line: usize, site: ErrorSite<'_>, msg: &str);
}

// A reporter that renders error messages to the output
pub struct WriteReporter<W> {
    writer: W,
}

impl<W> WriteReporter<W> {
    pub fn new(writer: W) -> WriteReporter<W> {
        WriteReporter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Reporter for WriteReporter<W>
where
    W: Write,
{
    fn report(&mut self, line: usize, site: ErrorSite<'_>, msg: &str) {
        // If the write fails, we don't care
        _ = writeln!(self.writer, "[line {}] Error{}: {}", line, site, msg);
    }
}

pub struct NoopReporter {}

impl Reporter for NoopReporter {
    fn report(&mut self, _line: usize, _site: ErrorSite<'_>, _msg: &str) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_each_site() {
        let mut reporter = WriteReporter::new(Vec::new());
        reporter.report(1, ErrorSite::Lexeme("+"), "Expect expression.");
        reporter.report(2, ErrorSite::End, "Expect ')' after expression.");
        reporter.report(3, ErrorSite::Scan, "Unfinished string.");
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            "[line 1] Error at '+': Expect expression.\n\
             [line 2] Error at end: Expect ')' after expression.\n\
             [line 3] Error: Unfinished string.\n",
            text
        );
    }
}
