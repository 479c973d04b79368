//! Tokenizer. Produces a flat token stream with explicit `Newline`,
//! `Indent` and `Dedent` markers so the parser never looks at whitespace.

use super::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    /// Keywords of the full language that this interpreter does not run.
    Reserved(&'static str),

    Newline,
    Indent,
    Dedent,
    Eof,

    KwAnd,
    KwAs,
    KwAssert,
    KwBreak,
    KwContinue,
    KwDef,
    KwDel,
    KwElif,
    KwElse,
    KwExcept,
    KwFalse,
    KwFinally,
    KwFor,
    KwFrom,
    KwGlobal,
    KwIf,
    KwImport,
    KwIn,
    KwIs,
    KwLambda,
    KwNone,
    KwNot,
    KwOr,
    KwPass,
    KwRaise,
    KwReturn,
    KwTrue,
    KwTry,
    KwWhile,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Arrow,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    DoubleStarAssign,

    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "and" => TokenKind::KwAnd,
        "as" => TokenKind::KwAs,
        "assert" => TokenKind::KwAssert,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "def" => TokenKind::KwDef,
        "del" => TokenKind::KwDel,
        "elif" => TokenKind::KwElif,
        "else" => TokenKind::KwElse,
        "except" => TokenKind::KwExcept,
        "False" => TokenKind::KwFalse,
        "finally" => TokenKind::KwFinally,
        "for" => TokenKind::KwFor,
        "from" => TokenKind::KwFrom,
        "global" => TokenKind::KwGlobal,
        "if" => TokenKind::KwIf,
        "import" => TokenKind::KwImport,
        "in" => TokenKind::KwIn,
        "is" => TokenKind::KwIs,
        "lambda" => TokenKind::KwLambda,
        "None" => TokenKind::KwNone,
        "not" => TokenKind::KwNot,
        "or" => TokenKind::KwOr,
        "pass" => TokenKind::KwPass,
        "raise" => TokenKind::KwRaise,
        "return" => TokenKind::KwReturn,
        "True" => TokenKind::KwTrue,
        "try" => TokenKind::KwTry,
        "while" => TokenKind::KwWhile,
        "class" => TokenKind::Reserved("class"),
        "with" => TokenKind::Reserved("with"),
        "yield" => TokenKind::Reserved("yield"),
        "nonlocal" => TokenKind::Reserved("nonlocal"),
        "async" => TokenKind::Reserved("async"),
        "await" => TokenKind::Reserved("await"),
        _ => return None,
    };
    Some(kind)
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    brackets: Vec<(char, usize, usize)>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            brackets: Vec::new(),
            tokens: Vec::new(),
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, line: usize, col: usize) {
        self.tokens.push(Token { kind, line, col });
    }

    fn push_newline(&mut self, line: usize, col: usize) {
        let needed = matches!(
            self.tokens.last(),
            Some(t) if !matches!(t.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        );
        if needed {
            self.push(TokenKind::Newline, line, col);
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        loop {
            if self.at_line_start && self.brackets.is_empty() && !self.indentation()? {
                break;
            }
            let Some(c) = self.peek() else { break };
            let (line, col) = (self.line, self.col);
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.brackets.is_empty() {
                        self.push_newline(line, col);
                        self.at_line_start = true;
                    }
                }
                '#' => self.skip_comment(),
                '\\' => {
                    self.bump();
                    match (self.peek(), self.peek_at(1)) {
                        (Some('\n'), _) => {
                            self.bump();
                        }
                        (Some('\r'), Some('\n')) => {
                            self.bump();
                            self.bump();
                        }
                        _ => {
                            return Err(SyntaxError::new(
                                "unexpected character after line continuation character",
                                line,
                                col,
                            ))
                        }
                    }
                }
                '0'..='9' => self.number(line, col)?,
                '.' if matches!(self.peek_at(1), Some('0'..='9')) => self.number(line, col)?,
                '"' | '\'' => {
                    let text = self.string(line, col, false)?;
                    self.push(TokenKind::Str(text), line, col);
                }
                c if c == '_' || c.is_alphabetic() => self.word(line, col)?,
                _ => self.operator(line, col)?,
            }
        }
        if let Some(&(open, line, col)) = self.brackets.last() {
            return Err(SyntaxError::new(
                format!("'{}' was never closed", open),
                line,
                col,
            ));
        }
        let (line, col) = (self.line, self.col);
        self.push_newline(line, col);
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, col);
        }
        self.push(TokenKind::Eof, line, col);
        Ok(self.tokens)
    }

    /// Measures the indentation of the next logical line and emits
    /// `Indent`/`Dedent`. Blank and comment-only lines are skipped.
    /// Returns false at end of input.
    fn indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let mut width = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') | Some('\r') => {
                    self.bump();
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {}
            }

            let (line, col) = (self.line, self.col);
            let current = self.indents.last().copied().unwrap_or(0);
            if width > current {
                self.indents.push(width);
                self.push(TokenKind::Indent, line, col);
            } else if width < current {
                while width < self.indents.last().copied().unwrap_or(0) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, line, col);
                }
                if width != self.indents.last().copied().unwrap_or(0) {
                    return Err(SyntaxError::new(
                        "unindent does not match any outer indentation level",
                        line,
                        col,
                    ));
                }
            }
            self.at_line_start = false;
            return Ok(true);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn word(&mut self, line: usize, col: usize) -> Result<(), SyntaxError> {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('"' | '\'')) {
            match word.as_str() {
                "r" | "R" => {
                    let text = self.string(line, col, true)?;
                    self.push(TokenKind::Str(text), line, col);
                    return Ok(());
                }
                "f" | "F" => {
                    let text = self.string(line, col, false)?;
                    self.push(TokenKind::FStr(text), line, col);
                    return Ok(());
                }
                _ => {}
            }
        }
        let kind = keyword(&word).unwrap_or(TokenKind::Name(word));
        self.push(kind, line, col);
        Ok(())
    }

    fn digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.bump();
            } else if c == '_' && matches!(self.peek_at(1), Some('0'..='9')) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn number(&mut self, line: usize, col: usize) -> Result<(), SyntaxError> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some((16, "hexadecimal")),
                Some('o' | 'O') => Some((8, "octal")),
                Some('b' | 'B') => Some((2, "binary")),
                _ => None,
            };
            if let Some((radix, label)) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.bump();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() || matches!(self.peek(), Some(c) if c.is_alphanumeric()) {
                    return Err(SyntaxError::new(
                        format!("invalid {} literal", label),
                        line,
                        col,
                    ));
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| SyntaxError::new("integer literal is too large", line, col))?;
                self.push(TokenKind::Int(value), line, col);
                return Ok(());
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.digits(&mut text);
        if self.peek() == Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent = match self.peek_at(1) {
                Some('+' | '-') => matches!(self.peek_at(2), Some('0'..='9')),
                Some('0'..='9') => true,
                _ => false,
            };
            if exponent {
                is_float = true;
                text.push('e');
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
                self.digits(&mut text);
            }
        }
        if matches!(self.peek(), Some(c) if c == '_' || c.is_alphabetic()) {
            return Err(SyntaxError::new("invalid decimal literal", self.line, self.col));
        }

        let kind = if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| SyntaxError::new("invalid float literal", line, col))?;
            TokenKind::Float(value)
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| SyntaxError::new("integer literal is too large", line, col))?;
            TokenKind::Int(value)
        };
        self.push(kind, line, col);
        Ok(())
    }

    fn string(&mut self, line: usize, col: usize, raw: bool) -> Result<String, SyntaxError> {
        let Some(quote) = self.bump() else {
            return Err(SyntaxError::new("invalid syntax", line, col));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                let message = if triple {
                    format!("unterminated triple-quoted string literal (detected at line {})", self.line)
                } else {
                    format!("unterminated string literal (detected at line {})", line)
                };
                return Err(SyntaxError::new(message, line, col));
            };
            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                value.push(c);
                self.bump();
                continue;
            }
            if c == '\n' && !triple {
                return Err(SyntaxError::new(
                    format!("unterminated string literal (detected at line {})", line),
                    line,
                    col,
                ));
            }
            if c != '\\' {
                value.push(c);
                self.bump();
                continue;
            }

            self.bump();
            let Some(escaped) = self.peek() else { continue };
            self.bump();
            if raw {
                value.push('\\');
                value.push(escaped);
                continue;
            }
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                'a' => value.push('\x07'),
                'b' => value.push('\x08'),
                'f' => value.push('\x0c'),
                'v' => value.push('\x0b'),
                '\\' | '\'' | '"' => value.push(escaped),
                '\n' => {}
                'x' => value.push(self.hex_escape(2, line, col)?),
                'u' => value.push(self.hex_escape(4, line, col)?),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
        }
        Ok(value)
    }

    fn hex_escape(&mut self, len: usize, line: usize, col: usize) -> Result<char, SyntaxError> {
        let mut digits = String::with_capacity(len);
        for _ in 0..len {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.bump();
                }
                _ => break,
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .filter(|_| digits.len() == len)
            .and_then(char::from_u32)
            .ok_or_else(|| SyntaxError::new("truncated escape sequence in string literal", line, col))
    }

    fn open_bracket(&mut self, c: char, line: usize, col: usize) {
        self.brackets.push((c, line, col));
    }

    fn close_bracket(&mut self, c: char, line: usize, col: usize) -> Result<(), SyntaxError> {
        let expected = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };
        match self.brackets.pop() {
            Some((open, ..)) if open == expected => Ok(()),
            Some((open, ..)) => Err(SyntaxError::new(
                format!(
                    "closing parenthesis '{}' does not match opening parenthesis '{}'",
                    c, open
                ),
                line,
                col,
            )),
            None => Err(SyntaxError::new(format!("unmatched '{}'", c), line, col)),
        }
    }

    fn operator(&mut self, line: usize, col: usize) -> Result<(), SyntaxError> {
        let Some(c) = self.bump() else { return Ok(()) };
        let next = self.peek();
        let third = self.peek_at(1);

        let (kind, extra) = match (c, next, third) {
            ('*', Some('*'), Some('=')) => (TokenKind::DoubleStarAssign, 2),
            ('/', Some('/'), Some('=')) => (TokenKind::DoubleSlashAssign, 2),
            ('*', Some('*'), _) => (TokenKind::DoubleStar, 1),
            ('/', Some('/'), _) => (TokenKind::DoubleSlash, 1),
            ('=', Some('='), _) => (TokenKind::Eq, 1),
            ('!', Some('='), _) => (TokenKind::NotEq, 1),
            ('<', Some('='), _) => (TokenKind::Le, 1),
            ('>', Some('='), _) => (TokenKind::Ge, 1),
            ('+', Some('='), _) => (TokenKind::PlusAssign, 1),
            ('-', Some('='), _) => (TokenKind::MinusAssign, 1),
            ('*', Some('='), _) => (TokenKind::StarAssign, 1),
            ('/', Some('='), _) => (TokenKind::SlashAssign, 1),
            ('%', Some('='), _) => (TokenKind::PercentAssign, 1),
            ('-', Some('>'), _) => (TokenKind::Arrow, 1),
            ('(', ..) => {
                self.open_bracket(c, line, col);
                (TokenKind::LParen, 0)
            }
            ('[', ..) => {
                self.open_bracket(c, line, col);
                (TokenKind::LBracket, 0)
            }
            ('{', ..) => {
                self.open_bracket(c, line, col);
                (TokenKind::LBrace, 0)
            }
            (')', ..) => {
                self.close_bracket(c, line, col)?;
                (TokenKind::RParen, 0)
            }
            (']', ..) => {
                self.close_bracket(c, line, col)?;
                (TokenKind::RBracket, 0)
            }
            ('}', ..) => {
                self.close_bracket(c, line, col)?;
                (TokenKind::RBrace, 0)
            }
            (',', ..) => (TokenKind::Comma, 0),
            (':', ..) => (TokenKind::Colon, 0),
            ('.', ..) => (TokenKind::Dot, 0),
            (';', ..) => (TokenKind::Semicolon, 0),
            ('+', ..) => (TokenKind::Plus, 0),
            ('-', ..) => (TokenKind::Minus, 0),
            ('*', ..) => (TokenKind::Star, 0),
            ('/', ..) => (TokenKind::Slash, 0),
            ('%', ..) => (TokenKind::Percent, 0),
            ('=', ..) => (TokenKind::Assign, 0),
            ('<', ..) => (TokenKind::Lt, 0),
            ('>', ..) => (TokenKind::Gt, 0),
            _ => {
                return Err(SyntaxError::new(
                    format!("invalid character '{}' (U+{:04X})", c, c as u32),
                    line,
                    col,
                ))
            }
        };
        for _ in 0..extra {
            self.bump();
        }
        self.push(kind, line, col);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("if x:\n    y = 1\n\n    # note\nz = 2\n");
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Indent).count(), 1);
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Dedent).count(), 1);
        let dedent = tokens.iter().position(|k| *k == TokenKind::Dedent).unwrap();
        assert_eq!(tokens[dedent + 1], TokenKind::Name("z".into()));
    }

    #[test]
    fn test_brackets_join_lines() {
        let tokens = kinds("x = (1,\n     2)\n");
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x_ff")[0], TokenKind::Int(255));
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("2.5e-3")[0], TokenKind::Float(0.0025));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
        assert_eq!(kinds("0b101")[0], TokenKind::Int(5));
    }

    #[test]
    fn test_strings() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], TokenKind::Str("a\\nb".into()));
        assert_eq!(kinds("'''x\ny'''")[0], TokenKind::Str("x\ny".into()));
        assert_eq!(kinds("f'{x}'")[0], TokenKind::FStr("{x}".into()));
    }

    #[test]
    fn test_errors() {
        let err = tokenize("def f(:").unwrap_err();
        assert_eq!(err.message, "'(' was never closed");
        assert_eq!((err.line, err.column), (1, 6));

        let err = tokenize("x = 'abc").unwrap_err();
        assert!(err.message.starts_with("unterminated string literal"));

        let err = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert_eq!(err.message, "unindent does not match any outer indentation level");

        let err = tokenize("x)").unwrap_err();
        assert_eq!(err.message, "unmatched ')'");
    }
}
