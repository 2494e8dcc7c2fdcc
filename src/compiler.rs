use thiserror::Error;
use tracing::debug;

use crate::{
    bytecode::{BinaryOp, Chunk},
    reporter::{ErrorSite, Reporter},
    scanner::{Keyword, Scanner, Symbol, Token, TokenType},
    value::Value,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("compile error ({errors} reported)")]
pub struct CompileError {
    pub errors: usize,
}

pub struct ErrorHandler<'r, R> {
    reporter: &'r mut R,
    in_panic: bool,
    has_errored: bool,
    reported: usize,
}

impl<'r, R> ErrorHandler<'r, R> {
    pub fn new(reporter: &'r mut R) -> ErrorHandler<'r, R> {
        ErrorHandler {
            reporter,
            in_panic: false,
            has_errored: false,
            reported: 0,
        }
    }
}

impl<'r, R> ErrorHandler<'r, R>
where
    R: Reporter,
{
    /// Report against `token`. Everything after the first error is swallowed
    /// until the parser resynchronizes, which expressions never do.
    pub fn report(&mut self, token: &Token<'_>, msg: &str) {
        self.has_errored = true;
        if self.in_panic {
            return;
        }
        self.in_panic = true;
        self.reported += 1;

        let site = match token.kind {
            TokenType::Eof => ErrorSite::End,
            TokenType::Error => ErrorSite::Scan,
            _ => ErrorSite::Lexeme(token.lexeme),
        };
        self.reporter.report(token.line, site, msg);
    }
}

/// Compile `source` as a single expression into `chunk`, finishing with a
/// `Return`. On failure the chunk holds partial code and must be thrown away.
pub fn compile<R>(source: &str, chunk: &mut Chunk, reporter: &mut R) -> Result<(), CompileError>
where
    R: Reporter,
{
    let mut parser = Parser::new(Scanner::new(source), chunk, ErrorHandler::new(reporter));

    parser.advance();
    parser.expression();
    parser.consume(TokenType::Eof, "Expect end of expression.");
    parser.end();

    if parser.error.has_errored {
        Err(CompileError {
            errors: parser.error.reported,
        })
    } else {
        debug!(
            bytes = parser.chunk.len(),
            constants = parser.chunk.constants().len(),
            "compiled chunk"
        );
        Ok(())
    }
}

/* Binding power, loosest first
Assignment  = += -= *= /= %= ^= <<= >>=   (reserved)
Ternary     ?:                            (reserved)
Or          or                            (reserved)
And         and                           (reserved)
Equality    == !=
Comparison  < > <= >=
Shift       << >>
Term        + -
Factor      * / %
Power       ^
Unary       ! -
Call        . ()                          (reserved)
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Ternary,
    Or,
    And,
    Equality,
    Comparison,
    Shift,
    Term,
    Factor,
    Power,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// One step tighter, used for the right operand of a left associative operator
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Shift,
            Precedence::Shift => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Power,
            Precedence::Power => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// What to do with a token that starts an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Grouping,
    Unary,
    Number,
    Literal,
}

/// What to do with a token that continues an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Infix {
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseRule {
    pub prefix: Option<Prefix>,
    pub infix: Option<Infix>,
    pub precedence: Precedence,
}

const fn parse_rule(
    prefix: Option<Prefix>,
    infix: Option<Infix>,
    precedence: Precedence,
) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

const NO_RULE: ParseRule = parse_rule(None, None, Precedence::None);

const fn binary(precedence: Precedence) -> ParseRule {
    parse_rule(None, Some(Infix::Binary), precedence)
}

pub fn rule(kind: TokenType) -> ParseRule {
    match kind {
        TokenType::Symbol(sym) => match sym {
            Symbol::LeftParen => parse_rule(Some(Prefix::Grouping), None, Precedence::None),
            Symbol::Minus => parse_rule(Some(Prefix::Unary), Some(Infix::Binary), Precedence::Term),
            Symbol::Bang => parse_rule(Some(Prefix::Unary), None, Precedence::None),
            Symbol::Plus => binary(Precedence::Term),
            Symbol::Slash | Symbol::Star | Symbol::Percent => binary(Precedence::Factor),
            Symbol::Caret => binary(Precedence::Power),
            Symbol::ShiftLeft | Symbol::ShiftRight => binary(Precedence::Shift),
            Symbol::Less | Symbol::LessEqual | Symbol::Greater | Symbol::GreaterEqual => {
                binary(Precedence::Comparison)
            }
            Symbol::EqualEqual | Symbol::BangEqual => binary(Precedence::Equality),
            Symbol::RightParen
            | Symbol::LeftBracket
            | Symbol::RightBracket
            | Symbol::LeftBrace
            | Symbol::RightBrace
            | Symbol::Comma
            | Symbol::Dot
            | Symbol::Semicolon
            | Symbol::Question
            | Symbol::Colon
            | Symbol::Dollar
            | Symbol::PlusPlus
            | Symbol::MinusMinus
            | Symbol::PlusEqual
            | Symbol::MinusEqual
            | Symbol::StarEqual
            | Symbol::SlashEqual
            | Symbol::CaretEqual
            | Symbol::PercentEqual
            | Symbol::Equal
            | Symbol::ShiftLeftEqual
            | Symbol::ShiftRightEqual => NO_RULE,
        },
        TokenType::Keyword(key) => match key {
            Keyword::True | Keyword::False | Keyword::Null => {
                parse_rule(Some(Prefix::Literal), None, Precedence::None)
            }
            Keyword::And
            | Keyword::Or
            | Keyword::Break
            | Keyword::Case
            | Keyword::Class
            | Keyword::Continue
            | Keyword::Else
            | Keyword::For
            | Keyword::Func
            | Keyword::If
            | Keyword::Import
            | Keyword::In
            | Keyword::Is
            | Keyword::Match
            | Keyword::Return
            | Keyword::SelfKw
            | Keyword::Super
            | Keyword::Var
            | Keyword::While => NO_RULE,
        },
        TokenType::Number | TokenType::Binary | TokenType::Hex | TokenType::Octal => {
            parse_rule(Some(Prefix::Number), None, Precedence::None)
        }
        TokenType::Identifier
        | TokenType::String
        | TokenType::InterpStart
        | TokenType::InterpEnd
        | TokenType::Error
        | TokenType::Eof => NO_RULE,
    }
}

fn token_to_binary_op(token_type: TokenType) -> Option<BinaryOp> {
    let TokenType::Symbol(sym) = token_type else {
        return None;
    };
    let op = match sym {
        Symbol::Plus => BinaryOp::Add,
        Symbol::Minus => BinaryOp::Subtract,
        Symbol::Star => BinaryOp::Multiply,
        Symbol::Slash => BinaryOp::Divide,
        Symbol::Percent => BinaryOp::Modulo,
        Symbol::Caret => BinaryOp::Power,
        Symbol::ShiftLeft => BinaryOp::ShiftLeft,
        Symbol::ShiftRight => BinaryOp::ShiftRight,
        Symbol::EqualEqual => BinaryOp::Equal,
        Symbol::BangEqual => BinaryOp::NotEqual,
        Symbol::Greater => BinaryOp::Greater,
        Symbol::GreaterEqual => BinaryOp::GreaterEqual,
        Symbol::Less => BinaryOp::Less,
        Symbol::LessEqual => BinaryOp::LessEqual,
        _ => return None,
    };
    Some(op)
}

/// Deepest run of nested groupings and operands the parser descends into
const MAX_NESTING: usize = 256;

struct Parser<'src, 'c, 'r, R> {
    scanner: Scanner<'src>,
    chunk: &'c mut Chunk,
    error: ErrorHandler<'r, R>,
    previous: Token<'src>,
    current: Token<'src>,
    depth: usize,
}

impl<'src, 'c, 'r, R> Parser<'src, 'c, 'r, R>
where
    R: Reporter,
{
    fn new(
        scanner: Scanner<'src>,
        chunk: &'c mut Chunk,
        error: ErrorHandler<'r, R>,
    ) -> Parser<'src, 'c, 'r, R> {
        // Placeholder until the first advance
        let start = Token {
            kind: TokenType::Eof,
            lexeme: "",
            start: 0,
            line: 1,
        };
        Parser {
            scanner,
            chunk,
            error,
            previous: start,
            current: start,
            depth: 0,
        }
    }

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenType::Error {
                break;
            }
            let token = self.current;
            self.error.report(&token, token.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenType, msg: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            let token = self.current;
            self.error.report(&token, msg);
        }
    }

    fn end(&mut self) {
        self.chunk.emit_return(self.previous.line);
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, min_precedence: Precedence) {
        if self.depth == MAX_NESTING {
            let token = self.current;
            self.error.report(&token, "Expression nests too deeply.");
            return;
        }

        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            let token = self.previous;
            self.error.report(&token, "Expect expression.");
            return;
        };

        self.depth += 1;
        self.prefix(prefix);
        while min_precedence <= rule(self.current.kind).precedence {
            self.advance();
            match rule(self.previous.kind).infix {
                Some(infix) => self.infix(infix),
                None => break,
            }
        }
        self.depth -= 1;
    }

    fn prefix(&mut self, prefix: Prefix) {
        match prefix {
            Prefix::Grouping => self.grouping(),
            Prefix::Unary => self.unary(),
            Prefix::Number => self.number(),
            Prefix::Literal => self.literal(),
        }
    }

    fn infix(&mut self, infix: Infix) {
        match infix {
            Infix::Binary => self.binary(),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(
            TokenType::Symbol(Symbol::RightParen),
            "Expect ')' after expression.",
        );
    }

    fn unary(&mut self) {
        let operator = self.previous;
        self.parse_precedence(Precedence::Unary);

        match operator.kind {
            TokenType::Symbol(Symbol::Minus) => self.chunk.emit_negate(operator.line),
            TokenType::Symbol(Symbol::Bang) => self.chunk.emit_not(operator.line),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.previous;
        let precedence = rule(operator.kind).precedence;
        self.parse_precedence(precedence.next());

        if let Some(op) = token_to_binary_op(operator.kind) {
            self.chunk.emit_binary_op(op, operator.line);
        }
    }

    fn number(&mut self) {
        let token = self.previous;
        match token.lexeme.parse::<f64>() {
            Ok(number) => self.emit_constant(Value::Number(number), token.line),
            Err(_) => self.error.report(&token, "Invalid number literal."),
        }
    }

    fn literal(&mut self) {
        let token = self.previous;
        match token.kind {
            TokenType::Keyword(Keyword::True) => self.chunk.emit_bool(true, token.line),
            TokenType::Keyword(Keyword::False) => self.chunk.emit_bool(false, token.line),
            TokenType::Keyword(Keyword::Null) => self.chunk.emit_null(token.line),
            _ => {}
        }
    }

    fn emit_constant(&mut self, value: Value, line: usize) {
        if let Err(e) = self.chunk.write_constant(value, line) {
            let token = self.previous;
            self.error.report(&token, &e.to_string());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::OpCode;
    use crate::reporter::WriteReporter;

    fn compile_ok(source: &str) -> Chunk {
        let mut chunk = Chunk::new();
        let mut reporter = WriteReporter::new(Vec::new());
        let result = compile(source, &mut chunk, &mut reporter);
        let errors = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(result.is_ok(), "unexpected errors: {}", errors);
        chunk
    }

    fn compile_err(source: &str) -> (CompileError, String) {
        let mut chunk = Chunk::new();
        let mut reporter = WriteReporter::new(Vec::new());
        let error = compile(source, &mut chunk, &mut reporter).unwrap_err();
        (error, String::from_utf8(reporter.into_inner()).unwrap())
    }

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        let mut ops = Vec::new();
        let mut offset = 0;
        while offset < chunk.len() {
            let op = OpCode::decode(chunk.code()[offset]).unwrap();
            ops.push(op);
            offset += 1 + op.operand_len();
        }
        ops
    }

    #[test]
    fn factor_binds_tighter_than_term() {
        let chunk = compile_ok("1 + 2 * 3");
        assert_eq!(
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Multiply,
                OpCode::Add,
                OpCode::Return,
            ],
            ops(&chunk)
        );
    }

    #[test]
    fn operators_are_left_associative() {
        let chunk = compile_ok("2 ^ 3 ^ 2");
        assert_eq!(
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Power,
                OpCode::Constant,
                OpCode::Power,
                OpCode::Return,
            ],
            ops(&chunk)
        );
        let chunk = compile_ok("8 - 4 - 2");
        assert_eq!(OpCode::Subtract, ops(&chunk)[2]);
    }

    #[test]
    fn grouping_overrides_precedence() {
        let chunk = compile_ok("(1 + 2) * 3");
        assert_eq!(
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Add,
                OpCode::Constant,
                OpCode::Multiply,
                OpCode::Return,
            ],
            ops(&chunk)
        );
    }

    #[test]
    fn unary_and_literals() {
        assert_eq!(
            vec![OpCode::Constant, OpCode::Negate, OpCode::Return],
            ops(&compile_ok("-5"))
        );
        assert_eq!(
            vec![OpCode::True, OpCode::Not, OpCode::Not, OpCode::Return],
            ops(&compile_ok("!!true"))
        );
        let chunk = compile_ok("null == false");
        assert_eq!(
            vec![OpCode::Null, OpCode::False, OpCode::Equal, OpCode::Return],
            ops(&chunk)
        );
        assert!(chunk.constants().is_empty());
    }

    #[test]
    fn comparison_shift_and_equality_layers() {
        let chunk = compile_ok("1 << 2 < 3 != 4 >= 5");
        assert_eq!(
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::ShiftLeft,
                OpCode::Constant,
                OpCode::Less,
                OpCode::Constant,
                OpCode::Constant,
                OpCode::GreaterEqual,
                OpCode::NotEqual,
                OpCode::Return,
            ],
            ops(&chunk)
        );
    }

    #[test]
    fn numbers_become_constants() {
        let chunk = compile_ok("3.14");
        assert_eq!(&[Value::Number(3.14)], chunk.constants());
    }

    #[test]
    fn many_constants_use_big_encoding() {
        let source = vec!["1"; 300].join(" + ");
        let chunk = compile_ok(&source);
        assert_eq!(300, chunk.constants().len());
        assert!(ops(&chunk).contains(&OpCode::ConstantBig));
    }

    #[test]
    fn lines_come_from_operator_tokens() {
        let chunk = compile_ok("1\n+\n2");
        // Constant, index, Constant, index, Add, Return
        assert_eq!(&[1, 1, 3, 3, 2, 3], chunk.lines());
    }

    #[test]
    fn unclosed_grouping() {
        let (error, text) = compile_err("(1");
        assert_eq!(1, error.errors);
        assert_eq!("[line 1] Error at end: Expect ')' after expression.\n", text);
    }

    #[test]
    fn missing_operand() {
        let (_, text) = compile_err("1 +\n");
        assert_eq!("[line 2] Error at end: Expect expression.\n", text);
        let (_, text) = compile_err("and");
        assert_eq!("[line 1] Error at 'and': Expect expression.\n", text);
    }

    #[test]
    fn trailing_tokens() {
        let (_, text) = compile_err("1 2");
        assert_eq!("[line 1] Error at '2': Expect end of expression.\n", text);
    }

    #[test]
    fn reserved_operators_have_no_action() {
        let (_, text) = compile_err("1 ? 2 : 3");
        assert_eq!("[line 1] Error at '?': Expect end of expression.\n", text);
        let (_, text) = compile_err("x");
        assert_eq!("[line 1] Error at 'x': Expect expression.\n", text);
    }

    #[test]
    fn panic_mode_reports_once() {
        let (error, text) = compile_err("(+ * )");
        assert_eq!(1, error.errors);
        assert_eq!("[line 1] Error at '+': Expect expression.\n", text);
    }

    #[test]
    fn deep_nesting_is_a_compile_error() {
        let (error, text) = compile_err(&"(".repeat(100_000));
        assert_eq!(1, error.errors);
        assert_eq!("[line 1] Error at '(': Expression nests too deeply.\n", text);

        let source = format!("{}1", "-".repeat(100_000));
        let (error, text) = compile_err(&source);
        assert_eq!(1, error.errors);
        assert_eq!("[line 1] Error at '-': Expression nests too deeply.\n", text);
    }

    #[test]
    fn nesting_below_the_limit_compiles() {
        let depth = MAX_NESTING - 1;
        let source = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(vec![OpCode::Constant, OpCode::Return], ops(&compile_ok(&source)));

        let source = format!("{}1", "-".repeat(depth));
        assert_eq!(depth + 2, ops(&compile_ok(&source)).len());

        // Long flat chains never nest
        let source = vec!["1"; 10_000].join(" + ");
        assert_eq!(OpCode::Add, ops(&compile_ok(&source))[2]);
    }

    #[test]
    fn scan_errors_are_reported_by_message() {
        let (_, text) = compile_err("\"abc");
        assert_eq!("[line 1] Error: Unfinished string.\n", text);
        let (_, text) = compile_err("1 + @");
        assert_eq!("[line 1] Error: Unexpected character.\n", text);
    }

    #[test]
    fn every_binary_operator_has_an_opcode() {
        for sym in [
            Symbol::Plus,
            Symbol::Minus,
            Symbol::Star,
            Symbol::Slash,
            Symbol::Percent,
            Symbol::Caret,
            Symbol::ShiftLeft,
            Symbol::ShiftRight,
            Symbol::EqualEqual,
            Symbol::BangEqual,
            Symbol::Greater,
            Symbol::GreaterEqual,
            Symbol::Less,
            Symbol::LessEqual,
        ] {
            let kind = TokenType::Symbol(sym);
            assert_eq!(Some(Infix::Binary), rule(kind).infix);
            assert!(token_to_binary_op(kind).is_some());
        }
    }
}
