use super::{Result, ScriptError};

/// Token categories.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal with escapes resolved.
    Str(String),
    /// Identifier.
    Ident(String),
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `fn`
    Fn,
    /// `return`
    Return,
    /// `true`
    True,
    /// `false`
    False,
    /// `nil`
    Nil,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// Statement separator: a newline or `;`.
    Separator,
    /// End of input.
    Eof,
}

/// A token and the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token category and payload.
    pub kind: TokenKind,
    /// 1-based source line.
    pub line: usize,
}

/// Split `src` into tokens. Newlines inside `()` or `[]` are not separators.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
    line: usize,
    nesting: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
            line: 1,
            nesting: 0,
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            if ch == b'\n' {
                self.line += 1;
            }
            self.index += 1;
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current() {
            match ch {
                b'\n' if self.nesting == 0 => break,
                b' ' | b'\t' | b'\r' | b'\n' => self.advance(),
                b'#' => {
                    while let Some(ch) = self.current() {
                        if ch == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        let line = self.line;
        let Some(ch) = self.current() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
            });
        };

        let kind = match ch {
            b'\n' | b';' => {
                self.advance();
                TokenKind::Separator
            }
            b'"' | b'\'' => self.string(ch)?,
            b'0'..=b'9' => self.number()?,
            c if c == b'_' || c.is_ascii_alphabetic() => self.word(),
            _ => self.punct()?,
        };
        Ok(Token { kind, line })
    }

    fn punct(&mut self) -> Result<TokenKind> {
        let ch = self.current().unwrap_or_default();
        let next = self.peek();
        let (kind, width) = match (ch, next) {
            (b'=', Some(b'=')) => (TokenKind::Eq, 2),
            (b'!', Some(b'=')) => (TokenKind::Ne, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', _) => (TokenKind::Assign, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b'{', _) => (TokenKind::LBrace, 1),
            (b'}', _) => (TokenKind::RBrace, 1),
            (b'(', _) => {
                self.nesting += 1;
                (TokenKind::LParen, 1)
            }
            (b'[', _) => {
                self.nesting += 1;
                (TokenKind::LBracket, 1)
            }
            (b')', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                (TokenKind::RParen, 1)
            }
            (b']', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                (TokenKind::RBracket, 1)
            }
            _ => {
                let shown = self.src[self.index..].chars().next().unwrap_or('?');
                return Err(self.error(format!("unexpected character '{shown}'")));
            }
        };
        for _ in 0..width {
            self.advance();
        }
        Ok(kind)
    }

    fn string(&mut self, quote: u8) -> Result<TokenKind> {
        self.advance(); // opening quote
        let mut buf: Vec<u8> = Vec::new();
        while let Some(ch) = self.current() {
            match ch {
                b'\n' => break,
                c if c == quote => {
                    self.advance();
                    let text = String::from_utf8(buf)
                        .map_err(|_| self.error("invalid UTF-8 in string literal"))?;
                    return Ok(TokenKind::Str(text));
                }
                b'\\' => {
                    self.advance();
                    let escaped = self
                        .current()
                        .ok_or_else(|| self.error("incomplete escape"))?;
                    let value = match escaped {
                        b'"' => b'"',
                        b'\'' => b'\'',
                        b'\\' => b'\\',
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'0' => 0,
                        other => {
                            return Err(
                                self.error(format!("unknown escape: \\{}", other as char))
                            );
                        }
                    };
                    self.advance();
                    buf.push(value);
                }
                other => {
                    self.advance();
                    buf.push(other);
                }
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn number(&mut self) -> Result<TokenKind> {
        let start = self.index;
        self.digits();
        let mut is_float = false;
        if self.current() == Some(b'.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            self.digits();
        }
        if matches!(self.current(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek(), Some(b'+' | b'-')));
            if self
                .bytes
                .get(self.index + 1 + sign)
                .is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                for _ in 0..=sign {
                    self.advance();
                }
                self.digits();
            }
        }

        let text = self.src[start..self.index].replace('_', "");
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error("invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(format!("integer literal {text} is too large")))
        }
    }

    fn digits(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() || ch == b'_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.index;
        while let Some(ch) = self.current() {
            if ch == b'_' || ch.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        match &self.src[start..self.index] {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "fn" => TokenKind::Fn,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            ident => TokenKind::Ident(ident.to_string()),
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            message: message.into(),
            line: self.line,
        }
    }
}
