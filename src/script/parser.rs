use super::ast::{Accessor, BinaryOp, Expr, FnDecl, Program, Stmt, Target, UnaryOp};
use super::lexer::{Token, TokenKind, tokenize};
use super::{Result, ScriptError};
use std::rc::Rc;

/// Deepest nesting of expressions and blocks a program may use.
pub const MAX_NESTING: usize = 100;

/// Parse source text into a [`Program`].
///
/// Input that ends inside an open `(`, `[` or `{` fails with
/// [`ScriptError::Incomplete`] so an interactive caller can ask for more.
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();
    parser.skip_separators();
    while !parser.at(&TokenKind::Eof) {
        statements.push(parser.statement()?);
        parser.end_statement()?;
    }
    Ok(Program { statements })
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    open: usize,
    depth: usize,
    loops: usize,
    functions: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            index: 0,
            open: 0,
            depth: 0,
            loops: 0,
            functions: 0,
        }
    }

    fn current(&self) -> &Token {
        // `tokenize` always ends the stream with `Eof`.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.current().kind.clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.open += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.open = self.open.saturating_sub(1)
            }
            _ => {}
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    /// Record one more node on top of a chain whose tree height so far is
    /// `height` (computed from `lhs` on first use).
    fn extend(&self, height: &mut Option<usize>, lhs: &Expr, operand: usize) -> Result<()> {
        let grown = height.unwrap_or_else(|| lhs.height()).max(operand) + 1;
        *height = Some(grown);
        if grown > MAX_NESTING {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn too_deep(&self) -> ScriptError {
        self.error("expression is nested too deeply")
    }

    fn skip_separators(&mut self) {
        while self.eat(&TokenKind::Separator) {}
    }

    fn end_statement(&mut self) -> Result<()> {
        match self.current().kind {
            TokenKind::Separator => {
                self.skip_separators();
                Ok(())
            }
            TokenKind::Eof | TokenKind::RBrace => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        match self.current().kind {
            TokenKind::If => self.if_statement(),
            TokenKind::While => {
                self.advance();
                let cond = self.expression()?;
                self.loops += 1;
                let body = self.block();
                self.loops -= 1;
                Ok(Stmt::While { cond, body: body? })
            }
            TokenKind::Fn => self.function(),
            TokenKind::Return => {
                if self.functions == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                if matches!(
                    self.current().kind,
                    TokenKind::Separator | TokenKind::RBrace | TokenKind::Eof
                ) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.expression()?)))
                }
            }
            TokenKind::Break | TokenKind::Continue => {
                if self.loops == 0 {
                    return Err(self.error("'break' or 'continue' outside loop"));
                }
                match self.advance() {
                    TokenKind::Break => Ok(Stmt::Break),
                    _ => Ok(Stmt::Continue),
                }
            }
            _ => self.simple_statement(),
        }
    }

    fn simple_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;
        if !self.eat(&TokenKind::Assign) {
            return Ok(Stmt::Expr(expr));
        }
        let target = self.target(expr)?;
        let value = self.expression()?;
        Ok(Stmt::Assign(target, value))
    }

    fn target(&self, expr: Expr) -> Result<Target> {
        let mut path = Vec::new();
        let mut node = expr;
        loop {
            match node {
                Expr::Name(root) => {
                    path.reverse();
                    return Ok(Target { root, path });
                }
                Expr::Index(inner, index) => {
                    path.push(Accessor::Index(*index));
                    node = *inner;
                }
                Expr::Field(inner, name) => {
                    path.push(Accessor::Field(name));
                    node = *inner;
                }
                _ => return Err(self.error("cannot assign to expression")),
            }
        }
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.advance(); // `if`
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.eat(&TokenKind::Else) {
            if self.at(&TokenKind::If) {
                Some(vec![self.nested(Self::if_statement)?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn function(&mut self) -> Result<Stmt> {
        self.advance(); // `fn`
        let name = self.identifier("function name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params: Vec<String> = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let param = self.identifier("parameter name")?;
            if params.contains(&param) {
                return Err(self.error(format!("duplicate parameter '{param}'")));
            }
            params.push(param);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        // Loops do not extend into a nested function body.
        let loops = std::mem::take(&mut self.loops);
        self.functions += 1;
        let body = self.block();
        self.functions -= 1;
        self.loops = loops;

        Ok(Stmt::FnDef(Rc::new(FnDecl {
            name,
            params,
            body: body?,
        })))
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.unexpected("'}'"));
            }
            statements.push(self.statement()?);
            self.end_statement()?;
        }
        self.advance(); // `}`
        Ok(statements)
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let expr = self.nested(Self::or_expr)?;
        if expr.height() > MAX_NESTING {
            return Err(self.too_deep());
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        let mut height = None;
        while self.eat(&TokenKind::Or) {
            let rhs = self.and_expr()?;
            self.extend(&mut height, &lhs, rhs.height())?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expr()?;
        let mut height = None;
        while self.eat(&TokenKind::And) {
            let rhs = self.not_expr()?;
            self.extend(&mut height, &lhs, rhs.height())?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Not) {
            let operand = self.nested(Self::not_expr)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.additive()?;
        let op = match self.current().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.multiplicative()?;
        let mut height = None;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.multiplicative()?;
            self.extend(&mut height, &lhs, rhs.height())?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        let mut height = None;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            self.extend(&mut height, &lhs, rhs.height())?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            return Ok(match self.nested(Self::unary)? {
                Expr::Int(value) => Expr::Int(-value),
                Expr::Float(value) => Expr::Float(-value),
                operand => Expr::Unary(UnaryOp::Neg, Box::new(operand)),
            });
        }
        if self.eat(&TokenKind::Plus) {
            return self.nested(Self::unary);
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        let mut height = None;
        loop {
            match self.current().kind {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.list_items(&TokenKind::RParen, "')'")?;
                    let widest = args.iter().map(Expr::height).max().unwrap_or(0);
                    self.extend(&mut height, &expr, widest)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    self.extend(&mut height, &expr, index.height())?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.identifier("field name")?;
                    self.extend(&mut height, &expr, 0)?;
                    expr = Expr::Field(Box::new(expr), name);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn list_items(&mut self, close: &TokenKind, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at(close) {
            items.push(self.expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        let expr = match &self.current().kind {
            TokenKind::Int(value) => Expr::Int(*value),
            TokenKind::Float(value) => Expr::Float(*value),
            TokenKind::Str(text) => Expr::Str(text.clone()),
            TokenKind::Ident(name) => Expr::Name(name.clone()),
            TokenKind::True => Expr::Bool(true),
            TokenKind::False => Expr::Bool(false),
            TokenKind::Nil => Expr::Nil,
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.list_items(&TokenKind::RBracket, "']'")?;
                return Ok(Expr::List(items));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        let token = self.current();
        if token.kind == TokenKind::Eof {
            if self.open > 0 {
                return ScriptError::Incomplete { line: token.line };
            }
            return self.error(format!("expected {expected}, found end of input"));
        }
        self.error(format!("expected {expected}, found {}", describe(&token.kind)))
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            message: message.into(),
            line: self.current().line,
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Int(value) => format!("number {value}"),
        TokenKind::Float(value) => format!("number {value}"),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Ident(name) => format!("name '{name}'"),
        TokenKind::Separator => "end of line".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}
