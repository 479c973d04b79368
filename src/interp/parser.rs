//! Recursive-descent parser. Statements are parsed top-down; arithmetic
//! uses binding-power precedence climbing.

use std::rc::Rc;

use super::ast::*;
use super::error::{SourceText, SyntaxError};
use super::lexer::{tokenize, Token, TokenKind};

type PResult<T> = Result<T, SyntaxError>;

const BP_ADDITIVE: u8 = 10;
const BP_MULTIPLICATIVE: u8 = 20;

/// Deepest expression or block nesting accepted. Parsing, evaluation and
/// dropping the tree all recurse once per level.
pub const MAX_NESTING: usize = 100;

const TOO_MANY_PARENS: &str = "too many nested parentheses";
const TOO_DEEP: &str = "expression is too deeply nested";

/// Parses a whole execution unit.
pub fn parse_module(source: &Rc<SourceText>, text: &str) -> PResult<Vec<Stmt>> {
    let tokens = tokenize(text).map_err(|e| e.located(source))?;
    let mut parser = Parser::new(&tokens, source.clone());
    parser.module().map_err(|e| e.located(source))
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    loop_depth: usize,
    func_depth: usize,
    nesting: usize,
    source: Rc<SourceText>,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token], source: Rc<SourceText>) -> Self {
        Self {
            tokens,
            pos: 0,
            loop_depth: 0,
            func_depth: 0,
            nesting: 0,
            source,
        }
    }

    fn token(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.token().kind
    }

    fn peek_nth(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {}", what)))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek() {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    /// Opens one nesting level. The caller closes it with `leave` on the
    /// success path; an error abandons the whole parse.
    fn enter(&mut self, message: &str) -> PResult<()> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error_here(message));
        }
        self.nesting += 1;
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.nesting -= levels;
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.token();
        SyntaxError::new(message, token.line, token.col)
    }

    fn error_at(&self, expr: &Expr, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, expr.line, expr.col)
    }

    fn module(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => return Err(self.error_here("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        match self.peek() {
            TokenKind::KwIf => Ok(vec![self.if_stmt()?]),
            TokenKind::KwWhile => Ok(vec![self.while_stmt()?]),
            TokenKind::KwFor => Ok(vec![self.for_stmt()?]),
            TokenKind::KwDef => Ok(vec![self.def_stmt()?]),
            TokenKind::KwTry => Ok(vec![self.try_stmt()?]),
            TokenKind::Reserved(word) => Err(self.error_here(format!(
                "'{}' is not supported by this console",
                word
            ))),
            TokenKind::Dedent => Err(self.error_here("unexpected unindent")),
            _ => self.simple_line(),
        }
    }

    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_stmt()?];
        while self.eat(&TokenKind::Semicolon) {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.simple_stmt()?);
        }
        if !self.eat(&TokenKind::Newline) && !self.check(&TokenKind::Eof) {
            return Err(self.error_here("invalid syntax"));
        }
        Ok(stmts)
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn simple_stmt(&mut self) -> PResult<Stmt> {
        let line = self.token().line;
        let kind = match self.peek() {
            TokenKind::KwPass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::KwBreak => {
                if self.loop_depth == 0 {
                    return Err(self.error_here("'break' outside loop"));
                }
                self.advance();
                StmtKind::Break
            }
            TokenKind::KwContinue => {
                if self.loop_depth == 0 {
                    return Err(self.error_here("'continue' not properly in loop"));
                }
                self.advance();
                StmtKind::Continue
            }
            TokenKind::KwReturn => {
                if self.func_depth == 0 {
                    return Err(self.error_here("'return' outside function"));
                }
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.testlist()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::KwRaise => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.test()?)
                };
                StmtKind::Raise(value)
            }
            TokenKind::KwGlobal => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            TokenKind::KwDel => {
                self.advance();
                let mut targets = vec![self.binary(0)?];
                while self.eat(&TokenKind::Comma) {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.binary(0)?);
                }
                for target in &targets {
                    self.validate_target(target, "delete")?;
                }
                StmtKind::Del(targets)
            }
            TokenKind::KwAssert => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat(&TokenKind::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::KwImport => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let module = self.dotted_name()?;
                    let alias = if self.eat(&TokenKind::KwAs) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push((module, alias));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                StmtKind::Import(names)
            }
            TokenKind::KwFrom => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect(&TokenKind::KwImport, "'import'")?;
                let parenthesized = self.eat(&TokenKind::LParen);
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name()?;
                    let alias = if self.eat(&TokenKind::KwAs) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    if parenthesized && self.check(&TokenKind::RParen) {
                        break;
                    }
                }
                if parenthesized {
                    self.expect(&TokenKind::RParen, "')'")?;
                }
                StmtKind::ImportFrom { module, names }
            }
            _ => self.expr_stmt()?,
        };
        Ok(Stmt { kind, line })
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn aug_op(&self) -> Option<BinOp> {
        let op = match self.peek() {
            TokenKind::PlusAssign => BinOp::Add,
            TokenKind::MinusAssign => BinOp::Sub,
            TokenKind::StarAssign => BinOp::Mul,
            TokenKind::SlashAssign => BinOp::Div,
            TokenKind::DoubleSlashAssign => BinOp::FloorDiv,
            TokenKind::PercentAssign => BinOp::Mod,
            TokenKind::DoubleStarAssign => BinOp::Pow,
            _ => return None,
        };
        Some(op)
    }

    fn expr_stmt(&mut self) -> PResult<StmtKind> {
        let first = self.testlist()?;
        if let Some(op) = self.aug_op() {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(self.error_at(
                    &first,
                    format!(
                        "'{}' is an illegal expression for augmented assignment",
                        first.describe()
                    ),
                ));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }
        if !self.check(&TokenKind::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![first];
        let value = loop {
            self.advance();
            let next = self.testlist()?;
            if self.check(&TokenKind::Assign) {
                targets.push(next);
            } else {
                break next;
            }
        };
        for target in &targets {
            self.validate_target(target, "assign to")?;
        }
        Ok(StmtKind::Assign { targets, value })
    }

    fn validate_target(&self, target: &Expr, verb: &str) -> PResult<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.validate_target(item, verb)?;
                }
                Ok(())
            }
            _ => Err(self.error_at(
                target,
                format!("cannot {} {}", verb, target.describe()),
            )),
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        if !self.eat(&TokenKind::Newline) {
            return self.simple_line();
        }
        if !self.eat(&TokenKind::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        self.enter("too many levels of indentation")?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => return Err(self.error_here("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        self.leave(1);
        Ok(body)
    }

    fn loop_body(&mut self) -> PResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn else_clause(&mut self) -> PResult<Vec<Stmt>> {
        if self.eat(&TokenKind::KwElse) {
            self.expect(&TokenKind::Colon, "':'")?;
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let test = self.test()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.block()?;
        let orelse = if self.check(&TokenKind::KwElif) {
            vec![self.if_stmt()?]
        } else {
            self.else_clause()?
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let test = self.test()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.loop_body()?;
        let orelse = self.else_clause()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            line,
        })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let target = self.target_list()?;
        self.validate_target(&target, "assign to")?;
        self.expect(&TokenKind::KwIn, "'in'")?;
        let iter = self.testlist()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.loop_body()?;
        let orelse = self.else_clause()?;
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            line,
        })
    }

    fn def_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        self.expect(&TokenKind::LParen, "'('")?;
        let params = self.params(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen, "')'")?;
        if self.eat(&TokenKind::Arrow) {
            self.test()?;
        }
        self.expect(&TokenKind::Colon, "':'")?;

        let saved_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        self.func_depth += 1;
        let body = self.block();
        self.func_depth -= 1;
        self.loop_depth = saved_loop_depth;

        let def = FunctionDef::new(name, params, body?, line, self.source.clone());
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(def)),
            line,
        })
    }

    fn params(&mut self, end: &TokenKind) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut seen_default = false;
        while !self.check(end) {
            if params.iter().any(|p| p.kind == ParamKind::KwArgs) {
                return Err(self.error_here("arguments cannot follow var-keyword argument"));
            }
            let kind = if self.eat(&TokenKind::DoubleStar) {
                ParamKind::KwArgs
            } else if self.eat(&TokenKind::Star) {
                if params.iter().any(|p| p.kind == ParamKind::VarArgs) {
                    return Err(self.error_here("* argument may appear only once"));
                }
                ParamKind::VarArgs
            } else {
                ParamKind::Normal
            };
            let name = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error_here(format!(
                    "duplicate argument '{}' in function definition",
                    name
                )));
            }
            let keyword_only = params.iter().any(|p| p.kind == ParamKind::VarArgs);
            let default = if kind == ParamKind::Normal && self.eat(&TokenKind::Assign) {
                seen_default = true;
                Some(self.test()?)
            } else {
                if kind == ParamKind::Normal && seen_default && !keyword_only {
                    return Err(self.error_here("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param {
                name,
                kind,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        let line = self.advance().line;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.check(&TokenKind::KwExcept) {
            let handler_line = self.advance().line;
            let (typ, name) = if self.check(&TokenKind::Colon) {
                (None, None)
            } else {
                let typ = self.test()?;
                let name = if self.eat(&TokenKind::KwAs) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(typ), name)
            };
            self.expect(&TokenKind::Colon, "':'")?;
            let body = self.block()?;
            handlers.push(ExceptHandler {
                typ,
                name,
                body,
                line: handler_line,
            });
        }
        if let Some(bare) = handlers.iter().position(|h| h.typ.is_none()) {
            if bare + 1 != handlers.len() {
                return Err(SyntaxError::new(
                    "default 'except:' must be last",
                    handlers[bare].line,
                    1,
                ));
            }
        }

        let orelse = if handlers.is_empty() {
            Vec::new()
        } else {
            self.else_clause()?
        };
        let finalbody = if self.eat(&TokenKind::KwFinally) {
            self.expect(&TokenKind::Colon, "':'")?;
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_here("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            line,
        })
    }

    // Expressions.

    fn can_start_expr(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Name(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::FStr(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::KwNot
                | TokenKind::KwLambda
                | TokenKind::KwNone
                | TokenKind::KwTrue
                | TokenKind::KwFalse
        )
    }

    /// `test (',' test)* [',']`, producing a tuple when a comma is present.
    fn testlist(&mut self) -> PResult<Expr> {
        let first = self.test()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !Self::can_start_expr(self.peek()) {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, col))
    }

    /// Assignment targets of `for` and comprehensions. Stops before `in`.
    fn target_list(&mut self) -> PResult<Expr> {
        let first = self.binary(0)?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::KwIn) {
                break;
            }
            items.push(self.binary(0)?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, col))
    }

    fn test(&mut self) -> PResult<Expr> {
        self.enter(TOO_MANY_PARENS)?;
        let expr = self.conditional()?;
        self.leave(1);
        Ok(expr)
    }

    fn conditional(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::KwLambda) {
            return self.lambda();
        }
        let expr = self.or_test()?;
        if !self.eat(&TokenKind::KwIf) {
            return Ok(expr);
        }
        let test = self.or_test()?;
        self.expect(&TokenKind::KwElse, "'else' after 'if' expression")?;
        let orelse = self.test()?;
        let (line, col) = (expr.line, expr.col);
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(expr),
                orelse: Box::new(orelse),
            },
            line,
            col,
        ))
    }

    fn lambda(&mut self) -> PResult<Expr> {
        let token = self.advance();
        let params = self.params(&TokenKind::Colon)?;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.test()?;
        let stmt = Stmt {
            line: body.line,
            kind: StmtKind::Return(Some(body)),
        };
        let def = FunctionDef::new(
            "<lambda>".to_string(),
            params,
            vec![stmt],
            token.line,
            self.source.clone(),
        );
        Ok(Expr::new(
            ExprKind::Lambda(Rc::new(def)),
            token.line,
            token.col,
        ))
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        let mut chained = 0;
        while self.eat(&TokenKind::KwOr) {
            self.enter(TOO_DEEP)?;
            chained += 1;
            let right = self.and_test()?;
            let (line, col) = (left.line, left.col);
            left = Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), line, col);
        }
        self.leave(chained);
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        let mut chained = 0;
        while self.eat(&TokenKind::KwAnd) {
            self.enter(TOO_DEEP)?;
            chained += 1;
            let right = self.not_test()?;
            let (line, col) = (left.line, left.col);
            left = Expr::new(ExprKind::And(Box::new(left), Box::new(right)), line, col);
        }
        self.leave(chained);
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::KwNot) {
            let token = self.advance();
            self.enter(TOO_DEEP)?;
            let operand = self.not_test()?;
            self.leave(1);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                token.line,
                token.col,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.binary(0)?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Eq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Le => CmpOp::Le,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Ge => CmpOp::Ge,
                TokenKind::KwIn => CmpOp::In,
                TokenKind::KwNot if self.peek_nth(1) == Some(&TokenKind::KwIn) => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::KwIs => {
                    if self.peek_nth(1) == Some(&TokenKind::KwNot) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.binary(0)?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let (line, col) = (left.line, left.col);
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            line,
            col,
        ))
    }

    fn binary(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        let mut chained = 0;
        loop {
            let (op, bp) = match self.peek() {
                TokenKind::Plus => (BinOp::Add, BP_ADDITIVE),
                TokenKind::Minus => (BinOp::Sub, BP_ADDITIVE),
                TokenKind::Star => (BinOp::Mul, BP_MULTIPLICATIVE),
                TokenKind::Slash => (BinOp::Div, BP_MULTIPLICATIVE),
                TokenKind::DoubleSlash => (BinOp::FloorDiv, BP_MULTIPLICATIVE),
                TokenKind::Percent => (BinOp::Mod, BP_MULTIPLICATIVE),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            self.enter(TOO_DEEP)?;
            chained += 1;
            let right = self.binary(bp + 1)?;
            let (line, col) = (left.line, left.col);
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                line,
                col,
            );
        }
        self.leave(chained);
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        let token = self.advance();
        self.enter(TOO_DEEP)?;
        let operand = self.unary()?;
        self.leave(1);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            token.line,
            token.col,
        ))
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.postfix()?;
        if !self.eat(&TokenKind::DoubleStar) {
            return Ok(base);
        }
        self.enter(TOO_DEEP)?;
        let exponent = self.unary()?;
        self.leave(1);
        let (line, col) = (base.line, base.col);
        Ok(Expr::new(
            ExprKind::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
            line,
            col,
        ))
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        let mut chained = 0;
        loop {
            let (line, col) = (expr.line, expr.col);
            if matches!(
                self.peek(),
                TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot
            ) {
                self.enter(TOO_DEEP)?;
                chained += 1;
            }
            match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        line,
                        col,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                        col,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        line,
                        col,
                    );
                }
                _ => {
                    self.leave(chained);
                    return Ok(expr);
                }
            }
        }
    }

    fn call_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.check(&TokenKind::RParen) {
            if self.eat(&TokenKind::DoubleStar) {
                seen_keyword = true;
                args.push(Arg::DoubleStar(self.test()?));
            } else if self.eat(&TokenKind::Star) {
                args.push(Arg::Star(self.test()?));
            } else if matches!(self.peek(), TokenKind::Name(_))
                && self.peek_nth(1) == Some(&TokenKind::Assign)
            {
                let name = self.expect_name()?;
                self.advance();
                seen_keyword = true;
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                if seen_keyword {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                let value = self.test()?;
                let value = if self.check(&TokenKind::KwFor) {
                    self.comprehension(value)?
                } else {
                    value
                };
                args.push(Arg::Positional(value));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let (line, col) = (self.token().line, self.token().col);
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.testlist()?))
        };
        if !self.eat(&TokenKind::Colon) {
            self.expect(&TokenKind::RBracket, "']'")?;
            return match lower {
                Some(index) => Ok(*index),
                None => Err(SyntaxError::new("invalid syntax", line, col)),
            };
        }
        let upper = if matches!(self.peek(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.check(&TokenKind::RBracket) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line, col))
    }

    fn comprehension(&mut self, elt: Expr) -> PResult<Expr> {
        let (line, col) = (elt.line, elt.col);
        self.expect(&TokenKind::KwFor, "'for'")?;
        let target = self.target_list()?;
        self.validate_target(&target, "assign to")?;
        self.expect(&TokenKind::KwIn, "'in'")?;
        let iter = self.or_test()?;
        let mut conds = Vec::new();
        while self.eat(&TokenKind::KwIf) {
            conds.push(self.or_test()?);
        }
        if self.check(&TokenKind::KwFor) {
            return Err(self.error_here("nested comprehension clauses are not supported"));
        }
        Ok(Expr::new(
            ExprKind::ListComp {
                elt: Box::new(elt),
                target: Box::new(target),
                iter: Box::new(iter),
                conds,
            },
            line,
            col,
        ))
    }

    fn atom(&mut self) -> PResult<Expr> {
        let token = self.token().clone();
        let (line, col) = (token.line, token.col);
        let kind = match token.kind {
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::Int(value) => {
                self.advance();
                ExprKind::Int(value)
            }
            TokenKind::Float(value) => {
                self.advance();
                ExprKind::Float(value)
            }
            TokenKind::Str(_) | TokenKind::FStr(_) => return self.strings(),
            TokenKind::KwNone => {
                self.advance();
                ExprKind::NoneLit
            }
            TokenKind::KwTrue => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::KwFalse => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.check(&TokenKind::KwFor) {
                        let comp = self.comprehension(first)?;
                        self.expect(&TokenKind::RParen, "')'")?;
                        return Ok(comp);
                    }
                    if !self.check(&TokenKind::Comma) {
                        self.expect(&TokenKind::RParen, "')'")?;
                        return Ok(first);
                    }
                    let mut items = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        if self.check(&TokenKind::RParen) {
                            break;
                        }
                        items.push(self.test()?);
                    }
                    self.expect(&TokenKind::RParen, "')'")?;
                    ExprKind::Tuple(items)
                }
            }
            TokenKind::LBracket => {
                self.advance();
                if self.eat(&TokenKind::RBracket) {
                    ExprKind::List(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.check(&TokenKind::KwFor) {
                        let comp = self.comprehension(first)?;
                        self.expect(&TokenKind::RBracket, "']'")?;
                        return Ok(comp);
                    }
                    let mut items = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        if self.check(&TokenKind::RBracket) {
                            break;
                        }
                        items.push(self.test()?);
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    ExprKind::List(items)
                }
            }
            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let key = self.test()?;
                    self.expect(&TokenKind::Colon, "':'")?;
                    let value = self.test()?;
                    pairs.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "'}'")?;
                ExprKind::Dict(pairs)
            }
            TokenKind::Reserved(word) => {
                return Err(self.error_here(format!("'{}' is not supported by this console", word)))
            }
            _ => return Err(self.error_here("invalid syntax")),
        };
        Ok(Expr::new(kind, line, col))
    }

    /// Adjacent string literals concatenate; any f-string in the run makes
    /// the whole run an f-string.
    fn strings(&mut self) -> PResult<Expr> {
        let (line, col) = (self.token().line, self.token().col);
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                TokenKind::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                TokenKind::FStr(text) => {
                    let token = self.advance();
                    formatted = true;
                    parts.extend(self.fstring_parts(&text, token.line, token.col)?);
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::new(ExprKind::FString(parts), line, col));
        }
        let text = parts
            .into_iter()
            .map(|part| match part {
                FStringPart::Literal(text) => text,
                FStringPart::Field { .. } => String::new(),
            })
            .collect();
        Ok(Expr::new(ExprKind::Str(text), line, col))
    }

    fn fstring_parts(&self, text: &str, line: usize, col: usize) -> PResult<Vec<FStringPart>> {
        let chars: Vec<char> = text.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(SyntaxError::new(
                    "f-string: single '}' is not allowed",
                    line,
                    col,
                ));
            }
            if c != '{' {
                literal.push(c);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }

            let start = i + 1;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            let mut end = None;
            for (j, &ch) in chars.iter().enumerate().skip(start) {
                match quote {
                    Some(q) if ch == q => quote = None,
                    Some(_) => {}
                    None => match ch {
                        '\'' | '"' => quote = Some(ch),
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' => depth = depth.saturating_sub(1),
                        '}' if depth > 0 => depth -= 1,
                        '!' if chars.get(j + 1) == Some(&'=') => {}
                        '}' | '!' | ':' if depth == 0 => {
                            end = Some(j);
                            break;
                        }
                        _ => {}
                    },
                }
            }
            let Some(expr_end) = end else {
                return Err(SyntaxError::new("f-string: expecting '}'", line, col));
            };
            let source: String = chars[start..expr_end].iter().collect();
            let mut j = expr_end;
            let mut conversion = None;
            if chars.get(j) == Some(&'!') {
                match chars.get(j + 1) {
                    Some(&conv @ ('r' | 's')) => conversion = Some(conv),
                    _ => {
                        return Err(SyntaxError::new(
                            "f-string: invalid conversion character",
                            line,
                            col,
                        ))
                    }
                }
                j += 2;
            }
            let mut spec = String::new();
            if chars.get(j) == Some(&':') {
                j += 1;
                while j < chars.len() && chars[j] != '}' {
                    spec.push(chars[j]);
                    j += 1;
                }
            }
            if chars.get(j) != Some(&'}') {
                return Err(SyntaxError::new("f-string: expecting '}'", line, col));
            }
            i = j + 1;

            if !literal.is_empty() {
                parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
            }
            let expr = self.fstring_expr(&source, line, col)?;
            parts.push(FStringPart::Field {
                expr,
                conversion,
                spec,
            });
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    fn fstring_expr(&self, source: &str, line: usize, col: usize) -> PResult<Expr> {
        if source.trim().is_empty() {
            return Err(SyntaxError::new(
                "f-string: empty expression not allowed",
                line,
                col,
            ));
        }
        let relocate = |mut e: SyntaxError| {
            e.line = line;
            e.column = col;
            e.message = format!("f-string: {}", e.message);
            e
        };
        let tokens = tokenize(source.trim()).map_err(relocate)?;
        let mut parser = Parser::new(&tokens, self.source.clone());
        parser.nesting = self.nesting;
        let mut expr = parser.testlist().map_err(relocate)?;
        parser.eat(&TokenKind::Newline);
        if !parser.check(&TokenKind::Eof) {
            return Err(SyntaxError::new("f-string: invalid syntax", line, col));
        }
        relocate_expr(&mut expr, line, col);
        Ok(expr)
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Expressions parsed out of an f-string report the position of the
/// f-string itself.
fn relocate_expr(expr: &mut Expr, line: usize, col: usize) {
    expr.line = line;
    expr.col = col;
    match &mut expr.kind {
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            for item in items {
                relocate_expr(item, line, col);
            }
        }
        ExprKind::BinOp { left, right, .. }
        | ExprKind::And(left, right)
        | ExprKind::Or(left, right) => {
            relocate_expr(left, line, col);
            relocate_expr(right, line, col);
        }
        ExprKind::Unary { operand, .. } => relocate_expr(operand, line, col),
        ExprKind::Call { func, .. } => relocate_expr(func, line, col),
        ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => {
            relocate_expr(value, line, col)
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> PResult<Vec<Stmt>> {
        let source = SourceText::new("<console>", text);
        parse_module(&source, text)
    }

    #[test]
    fn test_precedence() {
        let body = parse("1 + 2 * 3 ** 2").unwrap();
        let StmtKind::Expr(expr) = &body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::BinOp { op, right, .. } = &expr.kind else {
            panic!("expected binary op");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_function_locals() {
        let body = parse("def f(a, b=1, *rest, **kw):\n    global g\n    c = a\n    g = c\n    for i in rest:\n        pass\n").unwrap();
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!("expected def");
        };
        for name in ["a", "b", "rest", "kw", "c", "i"] {
            assert!(def.locals.contains(name), "{name} should be local");
        }
        assert!(!def.locals.contains("g"));
        assert!(def.globals.contains("g"));
    }

    #[test]
    fn test_open_block_is_error() {
        let err = parse("if x:").unwrap_err();
        assert_eq!(err.message, "expected an indented block");
        let err = parse("for i in range(3):\n").unwrap_err();
        assert_eq!(err.message, "expected an indented block");
    }

    #[test]
    fn test_invalid_targets() {
        assert_eq!(parse("1 = x").unwrap_err().message, "cannot assign to literal");
        assert_eq!(parse("f() = 1").unwrap_err().message, "cannot assign to function call");
        assert_eq!(parse("break").unwrap_err().message, "'break' outside loop");
        assert_eq!(parse("return 1").unwrap_err().message, "'return' outside function");
    }

    #[test]
    fn test_syntax_error_location() {
        let err = parse("x = 1\ny = = 2").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 5);
        assert_eq!(err.source_line, "y = = 2");
        assert_eq!(err.filename, "<console>");
    }

    #[test]
    fn test_fstring_fields() {
        let body = parse("f'a{x!r:>5}b{{c}}'").unwrap();
        let StmtKind::Expr(expr) = &body[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::FString(parts) = &expr.kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(
            &parts[1],
            FStringPart::Field { conversion: Some('r'), spec, .. } if spec == ">5"
        ));
        assert!(matches!(&parts[2], FStringPart::Literal(text) if text == "b{c}"));
    }

    /// Runs `f` with room for a debug build's deepest legal parse.
    fn with_big_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_nested_parens_limit() {
        let err = with_big_stack(|| {
            let text = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
            parse(&text).unwrap_err()
        });
        assert_eq!(err.message, "too many nested parentheses");

        let ok = with_big_stack(|| {
            let text = format!("{}1{}", "[".repeat(40), "]".repeat(40));
            parse(&text).is_ok()
        });
        assert!(ok);
    }

    #[test]
    fn test_prefix_and_chain_limits() {
        let messages = with_big_stack(|| {
            [
                format!("{}1", "-".repeat(20000)),
                format!("{}x", "not ".repeat(500)),
                vec!["2"; 500].join(" ** "),
                vec!["1"; 500].join(" + "),
                format!("x{}", ".a".repeat(500)),
            ]
            .iter()
            .map(|text| parse(text).unwrap_err().message)
            .collect::<Vec<_>>()
        });
        for message in messages {
            assert_eq!(message, "expression is too deeply nested");
        }
        assert!(parse(&vec!["1"; 50].join(" + ")).is_ok());
    }

    #[test]
    fn test_indentation_limit() {
        let err = with_big_stack(|| {
            let mut text = String::new();
            for level in 0..150 {
                text.push_str(&format!("{}if x:\n", " ".repeat(level)));
            }
            text.push_str(&format!("{}pass\n", " ".repeat(150)));
            parse(&text).unwrap_err()
        });
        assert_eq!(err.message, "too many levels of indentation");
    }

    #[test]
    fn test_reserved_keyword() {
        let err = parse("class A:\n    pass").unwrap_err();
        assert!(err.message.contains("'class'"));
    }
}
