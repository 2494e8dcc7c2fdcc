use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};

/// A token in the input stream
/// `lexeme` borrows the source text, except for error tokens where it carries
/// the error message instead
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenType,
    pub lexeme: &'src str,
    /// Byte offset of the token in the source
    pub start: usize,
    pub line: usize,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenType {
    Symbol(Symbol),
    Keyword(Keyword),
    Identifier,
    String,
    Number,
    // Reserved numeric bases, never produced by the scanner yet
    Binary,
    Hex,
    Octal,
    InterpStart,
    InterpEnd,
    Error,
    Eof,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(sym) => sym.fmt(f),
            Self::Keyword(kw) => kw.fmt(f),
            Self::Identifier => f.write_str("identifier"),
            Self::String => f.write_str("string"),
            Self::Number => f.write_str("number"),
            Self::Binary => f.write_str("binary number"),
            Self::Hex => f.write_str("hex number"),
            Self::Octal => f.write_str("octal number"),
            Self::InterpStart => f.write_str("interpolation start"),
            Self::InterpEnd => f.write_str("interpolation end"),
            Self::Error => f.write_str("error"),
            Self::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Symbol {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    Caret,
    Percent,
    Question,
    Colon,
    Dollar,

    // One or two character tokens.
    PlusPlus,
    MinusMinus,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    CaretEqual,
    PercentEqual,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    ShiftLeft,
    ShiftRight,

    // Three character tokens.
    ShiftLeftEqual,
    ShiftRightEqual,
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    And,
    Break,
    Case,
    Class,
    Continue,
    Else,
    False,
    For,
    Func,
    If,
    Import,
    In,
    Is,
    Match,
    Null,
    Or,
    Return,
    SelfKw,
    Super,
    True,
    Var,
    While,
}

const KEYWORD_LITERAL_TO_SYMBOL: [(&str, Keyword); 22] = [
    ("and", Keyword::And),
    ("break", Keyword::Break),
    ("case", Keyword::Case),
    ("class", Keyword::Class),
    ("continue", Keyword::Continue),
    ("else", Keyword::Else),
    ("false", Keyword::False),
    ("for", Keyword::For),
    ("func", Keyword::Func),
    ("if", Keyword::If),
    ("import", Keyword::Import),
    ("in", Keyword::In),
    ("is", Keyword::Is),
    ("match", Keyword::Match),
    ("null", Keyword::Null),
    ("or", Keyword::Or),
    ("return", Keyword::Return),
    ("self", Keyword::SelfKw),
    ("super", Keyword::Super),
    ("true", Keyword::True),
    ("var", Keyword::Var),
    ("while", Keyword::While),
];

impl Display for Keyword {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

const UNFINISHED_STRING: &str = "Unfinished string.";
const UNTERMINATED_INTERPOLATION: &str = "Unterminated string interpolation.";
const UNEXPECTED_CHARACTER: &str = "Unexpected character.";

#[derive(Clone)]
pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: usize,

    // Tokens already produced but not yet handed out, drained before scanning more text
    queue: VecDeque<Token<'src>>,
    // The quote character of every string with an open `${`, innermost last
    interpolations: Vec<char>,
    emitted_eof: bool, // Have we sent the EOF yet
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
            queue: VecDeque::new(),
            interpolations: Vec::new(),
            emitted_eof: false,
        }
    }

    pub fn interpolation_depth(&self) -> usize {
        self.interpolations.len()
    }

    /// Produce the next token. Once the end of input is reached every further
    /// call returns another `Eof` token.
    pub fn scan_token(&mut self) -> Token<'src> {
        if let Some(token) = self.queue.pop_front() {
            return token;
        }

        self.skip_whitespace();
        self.start = self.current;

        let Some(ch) = self.advance() else {
            if !self.interpolations.is_empty() {
                // Report once, the next call sees a clean end of input
                self.interpolations.clear();
                return self.error_token(UNTERMINATED_INTERPOLATION);
            }
            return self.make_token(TokenType::Eof);
        };

        if ch.is_ascii_digit() {
            return self.number();
        }
        if is_alpha(ch) {
            return self.identifier();
        }

        let symbol = match ch {
            '(' => Symbol::LeftParen,
            ')' => Symbol::RightParen,
            '[' => Symbol::LeftBracket,
            ']' => Symbol::RightBracket,
            '{' => Symbol::LeftBrace,
            '}' => {
                if let Some(quote) = self.interpolations.pop() {
                    let end = self.make_token(TokenType::InterpEnd);
                    // Pick the enclosing string back up where the `${` left it
                    let rest = self.string(quote);
                    self.queue.push_front(rest);
                    return end;
                }
                Symbol::RightBrace
            }
            ',' => Symbol::Comma,
            ';' => Symbol::Semicolon,
            '.' => Symbol::Dot,
            '?' => Symbol::Question,
            ':' => Symbol::Colon,
            '$' => Symbol::Dollar,
            '+' => {
                if self.consume_next_char_if_eq('+') {
                    Symbol::PlusPlus
                } else if self.consume_next_char_if_eq('=') {
                    Symbol::PlusEqual
                } else {
                    Symbol::Plus
                }
            }
            '-' => {
                if self.consume_next_char_if_eq('-') {
                    Symbol::MinusMinus
                } else if self.consume_next_char_if_eq('=') {
                    Symbol::MinusEqual
                } else {
                    Symbol::Minus
                }
            }
            '*' => self.one_or_two('=', Symbol::StarEqual, Symbol::Star),
            '/' => self.one_or_two('=', Symbol::SlashEqual, Symbol::Slash),
            '%' => self.one_or_two('=', Symbol::PercentEqual, Symbol::Percent),
            '^' => self.one_or_two('=', Symbol::CaretEqual, Symbol::Caret),
            '!' => self.one_or_two('=', Symbol::BangEqual, Symbol::Bang),
            '=' => self.one_or_two('=', Symbol::EqualEqual, Symbol::Equal),
            '<' => {
                if self.consume_next_char_if_eq('=') {
                    Symbol::LessEqual
                } else if self.consume_next_char_if_eq('<') {
                    self.one_or_two('=', Symbol::ShiftLeftEqual, Symbol::ShiftLeft)
                } else {
                    Symbol::Less
                }
            }
            '>' => {
                if self.consume_next_char_if_eq('=') {
                    Symbol::GreaterEqual
                } else if self.consume_next_char_if_eq('>') {
                    self.one_or_two('=', Symbol::ShiftRightEqual, Symbol::ShiftRight)
                } else {
                    Symbol::Greater
                }
            }
            '"' | '\'' => return self.string(ch),
            _ => return self.error_token(UNEXPECTED_CHARACTER),
        };

        self.make_token(TokenType::Symbol(symbol))
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.current += ch.len_utf8();
        Some(ch)
    }

    fn consume_next_char_if_eq(&mut self, next_ch: char) -> bool {
        if self.peek() == Some(next_ch) {
            self.current += next_ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn one_or_two(&mut self, next_ch: char, matched: Symbol, otherwise: Symbol) -> Symbol {
        if self.consume_next_char_if_eq(next_ch) {
            matched
        } else {
            otherwise
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\r' | '\t') => {
                    self.current += 1;
                }
                Some('\n') => {
                    self.line += 1;
                    self.current += 1;
                }
                Some('/') => match self.peek_next() {
                    Some('/') => {
                        while !matches!(self.peek(), Some('\n') | None) {
                            self.advance();
                        }
                    }
                    Some('*') => {
                        // Block comments don't nest, the first `*/` closes
                        self.current += 2;
                        loop {
                            match self.peek() {
                                None => break,
                                Some('*') if self.peek_next() == Some('/') => {
                                    self.current += 2;
                                    break;
                                }
                                Some('\n') => {
                                    self.line += 1;
                                    self.current += 1;
                                }
                                Some(_) => {
                                    self.advance();
                                }
                            }
                        }
                    }
                    _ => return,
                },
                _ => return,
            }
        }
    }

    fn make_token(&self, kind: TokenType) -> Token<'src> {
        Token {
            kind,
            lexeme: &self.source[self.start..self.current],
            start: self.start,
            line: self.line,
        }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token {
            kind: TokenType::Error,
            lexeme: message,
            start: self.start,
            line: self.line,
        }
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.current += 1;
        }
        if self.peek() == Some('.') && self.peek_next().is_some_and(|ch| ch.is_ascii_digit()) {
            self.current += 1;
            while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                self.current += 1;
            }
        }
        self.make_token(TokenType::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while self.peek().is_some_and(|ch| is_alpha(ch) || ch.is_ascii_digit()) {
            self.current += 1;
        }
        let identifier = &self.source[self.start..self.current];
        let kind = match KEYWORD_LITERAL_TO_SYMBOL
            .iter()
            .find(|(lit, _)| *lit == identifier)
        {
            Some((_, kw)) => TokenType::Keyword(*kw),
            None => TokenType::Identifier,
        };
        self.make_token(kind)
    }

    /// Scan string contents up to `quote`. The lexeme excludes the quotes.
    /// On `${` the text so far is returned and an `InterpStart` is queued.
    fn string(&mut self, quote: char) -> Token<'src> {
        self.start = self.current;
        loop {
            match self.peek() {
                None => return self.error_token(UNFINISHED_STRING),
                Some(ch) if ch == quote => break,
                Some('$') if self.peek_next() == Some('{') => {
                    let string = self.make_token(TokenType::String);
                    self.start = self.current;
                    self.current += 2;
                    self.interpolations.push(quote);
                    let interp = self.make_token(TokenType::InterpStart);
                    self.queue.push_back(interp);
                    return string;
                }
                Some('\n') => {
                    self.line += 1;
                    self.current += 1;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }

        let token = self.make_token(TokenType::String);
        // The closing quote
        self.advance();
        token
    }
}

fn is_alpha(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

impl<'src> Iterator for Scanner<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted_eof {
            return None;
        }
        let token = self.scan_token();
        if token.kind == TokenType::Eof {
            self.emitted_eof = true;
        }
        Some(token)
    }
}
