//! Recursive-descent parser with precedence climbing for binary operators.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{tokenize, TemplatePart, Token, TokenKind};
use super::EvalError;

/// Nesting bound for statements and expressions.
const MAX_NESTING: usize = 128;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof", "let",
    "new", "return", "switch", "this", "throw", "try", "typeof", "var", "void", "while", "with",
    "yield", "await", "async",
];

/// Parse a full statement list (a function body at top level).
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, EvalError> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        stmts.push(parser.statement()?);
    }
    Ok(stmts)
}

/// Parse source that must consist of exactly one expression (optionally `;`-terminated).
pub fn parse_standalone_expression(source: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(tokenize(source)?);
    let expr = parser.expression()?;
    parser.eat_punct(";");
    if !parser.at_eof() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // ── Token helpers ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(q) if *q == p)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == word)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), EvalError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}' but found {}", p, describe(&self.peek().kind))))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), EvalError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}' but found {}", word, describe(&self.peek().kind))))
        }
    }

    fn identifier(&mut self) -> Result<String, EvalError> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Any identifier, including reserved words (property names).
    fn property_name(&mut self) -> Result<String, EvalError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            message: message.into(),
            line: self.peek().line,
        }
    }

    fn unexpected(&self) -> EvalError {
        self.error(format!("Unexpected {}", describe(&self.peek().kind)))
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("Code is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Statement terminator: `;`, or nothing before `}`, end of input or a newline.
    fn end_statement(&mut self) -> Result<(), EvalError> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().newline_before {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        self.enter()?;
        let result = self.statement_inner();
        self.leave();
        result
    }

    fn statement_inner(&mut self) -> Result<Stmt, EvalError> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }

        let keyword = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => String::new(),
        };

        match keyword.as_str() {
            "let" | "const" | "var" => {
                let stmt = self.declaration()?;
                self.end_statement()?;
                Ok(stmt)
            }
            "function" => {
                self.advance();
                let name = self.identifier()?;
                let def = self.function_rest(Some(name))?;
                Ok(Stmt::Function(Rc::new(def)))
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            "do" => {
                self.advance();
                let body = Box::new(self.statement()?);
                self.expect_keyword("while")?;
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, cond })
            }
            "for" => self.for_statement(),
            "return" => {
                self.advance();
                let value = if self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            "break" => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.advance();
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "switch" => self.switch_statement(),
            "class" | "import" | "export" | "async" | "await" | "with" => {
                Err(self.error(format!("'{}' is not supported in this sandbox", keyword)))
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn switch_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        self.expect_punct("(")?;
        let discriminant = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;

        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat_punct("}") {
            let test = if self.eat_keyword("case") {
                Some(self.expression()?)
            } else if self.is_keyword("default") {
                if seen_default {
                    return Err(self.error("More than one default clause in switch statement"));
                }
                seen_default = true;
                self.advance();
                None
            } else {
                return Err(self.unexpected());
            };
            self.expect_punct(":")?;

            let mut body = Vec::new();
            while !self.is_punct("}") && !self.is_keyword("case") && !self.is_keyword("default") {
                if self.at_eof() {
                    return Err(self.error("Unexpected end of input"));
                }
                body.push(self.statement()?);
            }
            cases.push((test, body));
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, EvalError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error("Unexpected end of input"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn decl_kind(&mut self) -> Result<DeclKind, EvalError> {
        let kind = if self.is_keyword("let") {
            DeclKind::Let
        } else if self.is_keyword("const") {
            DeclKind::Const
        } else if self.is_keyword("var") {
            DeclKind::Var
        } else {
            return Err(self.unexpected());
        };
        self.advance();
        Ok(kind)
    }

    fn declaration(&mut self) -> Result<Stmt, EvalError> {
        let kind = self.decl_kind()?;
        let first = self.binding_pattern()?;
        self.declarators(kind, first)
    }

    /// Remaining declarators after the first binding pattern.
    fn declarators(&mut self, kind: DeclKind, first: Pattern) -> Result<Stmt, EvalError> {
        let mut decls = Vec::new();
        let mut pattern = first;
        loop {
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if init.is_none() && (kind == DeclKind::Const || !matches!(pattern, Pattern::Ident(_))) {
                return Err(self.error("Missing initializer in declaration"));
            }
            decls.push((pattern, init));
            if !self.eat_punct(",") {
                break;
            }
            pattern = self.binding_pattern()?;
        }
        Ok(Stmt::Decl { kind, decls })
    }

    fn for_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        self.expect_punct("(")?;

        let mut init = None;
        if self.is_keyword("let") || self.is_keyword("const") || self.is_keyword("var") {
            let kind = self.decl_kind()?;
            let pattern = self.binding_pattern()?;
            if self.eat_keyword("of") {
                let iterable = self.assignment()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForOf {
                    kind,
                    pattern,
                    iterable,
                    body,
                });
            }
            if self.eat_keyword("in") {
                let object = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForIn {
                    kind,
                    pattern,
                    object,
                    body,
                });
            }
            init = Some(Box::new(self.declarators(kind, pattern)?));
            self.expect_punct(";")?;
        } else if !self.eat_punct(";") {
            init = Some(Box::new(Stmt::Expr(self.expression()?)));
            self.expect_punct(";")?;
        }

        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.binding_pattern()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    // ── Patterns ───────────────────────────────────────────────────

    fn binding_pattern(&mut self) -> Result<Pattern, EvalError> {
        if self.eat_punct("[") {
            let mut elements = Vec::new();
            let mut rest = None;
            while !self.is_punct("]") {
                if self.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.binding_pattern()?));
                    break;
                }
                elements.push(Some(self.pattern_elem()?));
                if !self.is_punct("]") {
                    self.expect_punct(",")?;
                }
            }
            self.expect_punct("]")?;
            return Ok(Pattern::Array { elements, rest });
        }

        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            while !self.is_punct("}") {
                if self.eat_punct("...") {
                    rest = Some(Box::new(Pattern::Ident(self.identifier()?)));
                    break;
                }
                let key = match self.peek().kind.clone() {
                    TokenKind::Str(s) => {
                        self.advance();
                        s
                    }
                    TokenKind::Number(n) => {
                        self.advance();
                        super::value::format_number(n)
                    }
                    _ => self.property_name()?,
                };
                let elem = if self.eat_punct(":") {
                    self.pattern_elem()?
                } else {
                    let default = if self.eat_punct("=") {
                        Some(self.assignment()?)
                    } else {
                        None
                    };
                    PatternElem {
                        pattern: Pattern::Ident(key.clone()),
                        default,
                    }
                };
                props.push((key, elem));
                if !self.is_punct("}") {
                    self.expect_punct(",")?;
                }
            }
            self.expect_punct("}")?;
            return Ok(Pattern::Object { props, rest });
        }

        Ok(Pattern::Ident(self.identifier()?))
    }

    fn pattern_elem(&mut self) -> Result<PatternElem, EvalError> {
        let pattern = self.binding_pattern()?;
        let default = if self.eat_punct("=") {
            Some(self.assignment()?)
        } else {
            None
        };
        Ok(PatternElem { pattern, default })
    }

    // ── Expressions ────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, EvalError> {
        let first = self.assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(",") {
            exprs.push(self.assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn assignment(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let result = self.assignment_inner();
        self.leave();
        result
    }

    fn assignment_inner(&mut self) -> Result<Expr, EvalError> {
        if self.is_arrow_ahead() {
            return self.arrow_function();
        }

        let left = self.conditional()?;

        let op = match &self.peek().kind {
            TokenKind::Punct(p) => assign_op(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.advance();

        let target = match left {
            Expr::Ident(_) | Expr::Member { .. } => AssignTarget::Simple(Box::new(left)),
            Expr::Array(_) | Expr::Object(_) if op == AssignOp::Assign => {
                AssignTarget::Pattern(self.expr_to_pattern(left)?)
            }
            _ => return Err(self.error("Invalid left-hand side in assignment")),
        };
        let value = Box::new(self.assignment()?);
        Ok(Expr::Assign { op, target, value })
    }

    fn expr_to_pattern(&self, expr: Expr) -> Result<Pattern, EvalError> {
        match expr {
            Expr::Ident(name) => Ok(Pattern::Ident(name)),
            member @ Expr::Member { .. } => Ok(Pattern::Target(Box::new(member))),
            Expr::Array(items) => {
                let mut elements = Vec::new();
                let mut rest = None;
                let count = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    match item {
                        ArrayItem::Hole => elements.push(None),
                        ArrayItem::Expr(e) => elements.push(Some(self.expr_to_pattern_elem(e)?)),
                        ArrayItem::Spread(e) if i + 1 == count => {
                            rest = Some(Box::new(self.expr_to_pattern(e)?));
                        }
                        ArrayItem::Spread(_) => {
                            return Err(self.error("Rest element must be last element"))
                        }
                    }
                }
                Ok(Pattern::Array { elements, rest })
            }
            Expr::Object(items) => {
                let mut props = Vec::new();
                let mut rest = None;
                for item in items {
                    match item {
                        PropItem::KeyValue(PropKey::Static(key), value) => {
                            props.push((key, self.expr_to_pattern_elem(value)?));
                        }
                        PropItem::Spread(e) => rest = Some(Box::new(self.expr_to_pattern(e)?)),
                        PropItem::KeyValue(PropKey::Computed(_), _) => {
                            return Err(self.error("Computed keys are not supported in destructuring"))
                        }
                    }
                }
                Ok(Pattern::Object { props, rest })
            }
            _ => Err(self.error("Invalid destructuring assignment target")),
        }
    }

    fn expr_to_pattern_elem(&self, expr: Expr) -> Result<PatternElem, EvalError> {
        match expr {
            Expr::Assign {
                op: AssignOp::Assign,
                target,
                value,
            } => {
                let pattern = match target {
                    AssignTarget::Simple(e) => self.expr_to_pattern(*e)?,
                    AssignTarget::Pattern(p) => p,
                };
                Ok(PatternElem {
                    pattern,
                    default: Some(*value),
                })
            }
            other => Ok(PatternElem {
                pattern: self.expr_to_pattern(other)?,
                default: None,
            }),
        }
    }

    fn is_arrow_ahead(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_kind_at(1), TokenKind::Punct("=>"))
            }
            TokenKind::Punct("(") => {
                let mut depth = 0usize;
                let mut offset = 0usize;
                loop {
                    match self.peek_kind_at(offset) {
                        TokenKind::Punct("(") | TokenKind::Punct("[") | TokenKind::Punct("{") => {
                            depth += 1
                        }
                        TokenKind::Punct(")") | TokenKind::Punct("]") | TokenKind::Punct("}") => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return matches!(self.peek_kind_at(offset + 1), TokenKind::Punct("=>"));
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> Result<Expr, EvalError> {
        let (params, rest) = if self.is_punct("(") {
            self.parameters()?
        } else {
            let name = self.identifier()?;
            (
                vec![PatternElem {
                    pattern: Pattern::Ident(name),
                    default: None,
                }],
                None,
            )
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
        })))
    }

    fn parameters(&mut self) -> Result<(Vec<PatternElem>, Option<Pattern>), EvalError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        let mut rest = None;
        while !self.is_punct(")") {
            if self.eat_punct("...") {
                rest = Some(self.binding_pattern()?);
                break;
            }
            params.push(self.pattern_elem()?);
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct(")")?;
        Ok((params, rest))
    }

    /// Parameters and body after `function name?`.
    fn function_rest(&mut self, name: Option<String>) -> Result<FunctionDef, EvalError> {
        let (params, rest) = self.parameters()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(FunctionDef {
            name,
            params,
            rest,
            body,
        })
    }

    fn conditional(&mut self) -> Result<Expr, EvalError> {
        let cond = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let Some((op, prec)) = self.peek_binary() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            // `**` is right-associative.
            let next_min = if matches!(op, BinOrLogical::Bin(BinaryOp::Pow)) {
                prec
            } else {
                prec + 1
            };
            let right = self.binary(next_min)?;
            left = match op {
                BinOrLogical::Bin(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                BinOrLogical::Logical(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }
        Ok(left)
    }

    fn peek_binary(&self) -> Option<(BinOrLogical, u8)> {
        use BinOrLogical::{Bin, Logical};
        let found = match &self.peek().kind {
            TokenKind::Punct(p) => match *p {
                "??" => (Logical(LogicalOp::Nullish), 1),
                "||" => (Logical(LogicalOp::Or), 2),
                "&&" => (Logical(LogicalOp::And), 3),
                "|" => (Bin(BinaryOp::BitOr), 4),
                "^" => (Bin(BinaryOp::BitXor), 5),
                "&" => (Bin(BinaryOp::BitAnd), 6),
                "==" => (Bin(BinaryOp::Eq), 7),
                "!=" => (Bin(BinaryOp::NotEq), 7),
                "===" => (Bin(BinaryOp::StrictEq), 7),
                "!==" => (Bin(BinaryOp::StrictNotEq), 7),
                "<" => (Bin(BinaryOp::Lt), 8),
                ">" => (Bin(BinaryOp::Gt), 8),
                "<=" => (Bin(BinaryOp::LtEq), 8),
                ">=" => (Bin(BinaryOp::GtEq), 8),
                "<<" => (Bin(BinaryOp::Shl), 9),
                ">>" => (Bin(BinaryOp::Shr), 9),
                ">>>" => (Bin(BinaryOp::UShr), 9),
                "+" => (Bin(BinaryOp::Add), 10),
                "-" => (Bin(BinaryOp::Sub), 10),
                "*" => (Bin(BinaryOp::Mul), 11),
                "/" => (Bin(BinaryOp::Div), 11),
                "%" => (Bin(BinaryOp::Rem), 11),
                "**" => (Bin(BinaryOp::Pow), 12),
                _ => return None,
            },
            TokenKind::Ident(name) if name == "in" => (Bin(BinaryOp::In), 8),
            TokenKind::Ident(name) if name == "instanceof" => (Bin(BinaryOp::InstanceOf), 8),
            _ => return None,
        };
        Some(found)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        self.enter()?;
        let result = self.unary_inner();
        self.leave();
        result
    }

    fn unary_inner(&mut self) -> Result<Expr, EvalError> {
        let op = match &self.peek().kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Punct("~") => Some(UnaryOp::BitNot),
            TokenKind::Ident(name) if name == "typeof" => Some(UnaryOp::Typeof),
            TokenKind::Ident(name) if name == "void" => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }

        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.advance();
            let target = self.unary()?;
            self.check_update_target(&target)?;
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        let expr = self.call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.peek().newline_before {
            let increment = self.is_punct("++");
            self.advance();
            self.check_update_target(&expr)?;
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn check_update_target(&self, target: &Expr) -> Result<(), EvalError> {
        match target {
            Expr::Ident(_) | Expr::Member { .. } => Ok(()),
            _ => Err(self.error("Invalid left-hand side expression in update operation")),
        }
    }

    fn call_member(&mut self) -> Result<Expr, EvalError> {
        let mut expr = if self.eat_keyword("new") {
            let callee = self.member_only()?;
            let args = if self.is_punct("(") {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.primary()?
        };

        loop {
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Static(name),
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.is_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(index)),
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Static(name),
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberProp::Computed(Box::new(index)),
                    optional: false,
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Callee of `new`: a primary followed by member accesses only.
    fn member_only(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        while self.eat_punct(".") {
            let name = self.property_name()?;
            expr = Expr::Member {
                object: Box::new(expr),
                property: MemberProp::Static(name),
                optional: false,
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<ArrayItem>, EvalError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.is_punct(")") {
            if self.eat_punct("...") {
                args.push(ArrayItem::Spread(self.assignment()?));
            } else {
                args.push(ArrayItem::Expr(self.assignment()?));
            }
            if !self.is_punct(")") {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Template(parts) => {
                self.advance();
                let mut chunks = Vec::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => chunks.push(TemplateChunk::Text(text)),
                        TemplatePart::Expr(src) => {
                            let expr = parse_standalone_expression(&src).map_err(|e| match e {
                                EvalError::Syntax { message, .. } => EvalError::Syntax {
                                    message: format!("in template substitution: {}", message),
                                    line: token.line,
                                },
                                other => other,
                            })?;
                            chunks.push(TemplateChunk::Expr(expr));
                        }
                    }
                }
                Ok(Expr::Template(chunks))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => self.array_literal(),
            TokenKind::Punct("{") => self.object_literal(),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "function" => {
                    self.advance();
                    let name = if let TokenKind::Ident(_) = self.peek().kind {
                        Some(self.identifier()?)
                    } else {
                        None
                    };
                    let def = self.function_rest(name)?;
                    Ok(Expr::Function(Rc::new(def)))
                }
                "this" => Err(self.error("'this' is not supported in this sandbox")),
                "class" => Err(self.error("'class' is not supported in this sandbox")),
                _ => Ok(Expr::Ident(self.identifier()?)),
            },
            TokenKind::Punct("/") => Err(self.error("Regular expressions are not supported in this sandbox")),
            _ => Err(self.unexpected()),
        }
    }

    fn array_literal(&mut self) -> Result<Expr, EvalError> {
        self.expect_punct("[")?;
        let mut items = Vec::new();
        while !self.is_punct("]") {
            if self.eat_punct(",") {
                items.push(ArrayItem::Hole);
                continue;
            }
            if self.eat_punct("...") {
                items.push(ArrayItem::Spread(self.assignment()?));
            } else {
                items.push(ArrayItem::Expr(self.assignment()?));
            }
            if !self.is_punct("]") {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct("]")?;
        Ok(Expr::Array(items))
    }

    fn object_literal(&mut self) -> Result<Expr, EvalError> {
        self.expect_punct("{")?;
        let mut items = Vec::new();
        while !self.is_punct("}") {
            if self.eat_punct("...") {
                items.push(PropItem::Spread(self.assignment()?));
            } else {
                let key = match self.peek().kind.clone() {
                    TokenKind::Str(s) => {
                        self.advance();
                        PropKey::Static(s)
                    }
                    TokenKind::Number(n) => {
                        self.advance();
                        PropKey::Static(super::value::format_number(n))
                    }
                    TokenKind::Punct("[") => {
                        self.advance();
                        let expr = self.assignment()?;
                        self.expect_punct("]")?;
                        PropKey::Computed(expr)
                    }
                    _ => PropKey::Static(self.property_name()?),
                };

                if self.eat_punct(":") {
                    items.push(PropItem::KeyValue(key, self.assignment()?));
                } else if self.is_punct("(") {
                    let name = match &key {
                        PropKey::Static(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    let def = self.function_rest(name)?;
                    items.push(PropItem::KeyValue(key, Expr::Function(Rc::new(def))));
                } else {
                    match key {
                        PropKey::Static(name) => {
                            items.push(PropItem::KeyValue(PropKey::Static(name.clone()), Expr::Ident(name)));
                        }
                        PropKey::Computed(_) => return Err(self.unexpected()),
                    }
                }
            }
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(items))
    }
}

enum BinOrLogical {
    Bin(BinaryOp),
    Logical(LogicalOp),
}

fn assign_op(p: &str) -> Option<AssignOp> {
    let op = match p {
        "=" => AssignOp::Assign,
        "+=" => AssignOp::Compound(BinaryOp::Add),
        "-=" => AssignOp::Compound(BinaryOp::Sub),
        "*=" => AssignOp::Compound(BinaryOp::Mul),
        "/=" => AssignOp::Compound(BinaryOp::Div),
        "%=" => AssignOp::Compound(BinaryOp::Rem),
        "**=" => AssignOp::Compound(BinaryOp::Pow),
        "&=" => AssignOp::Compound(BinaryOp::BitAnd),
        "|=" => AssignOp::Compound(BinaryOp::BitOr),
        "^=" => AssignOp::Compound(BinaryOp::BitXor),
        "<<=" => AssignOp::Compound(BinaryOp::Shl),
        ">>=" => AssignOp::Compound(BinaryOp::Shr),
        ">>>=" => AssignOp::Compound(BinaryOp::UShr),
        "&&=" => AssignOp::Logical(LogicalOp::And),
        "||=" => AssignOp::Logical(LogicalOp::Or),
        "??=" => AssignOp::Logical(LogicalOp::Nullish),
        _ => return None,
    };
    Some(op)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {}", super::value::format_number(*n)),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Template(_) => "template literal".to_string(),
        TokenKind::Ident(name) => format!("identifier '{}'", name),
        TokenKind::Punct(p) => format!("token '{}'", p),
        TokenKind::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_statement_is_not_an_expression() {
        assert!(parse_standalone_expression("return 2+2").is_err());
        let program = parse_program("return 2+2").unwrap();
        assert!(matches!(program[0], Stmt::Return(Some(Expr::Binary(BinaryOp::Add, _, _)))));
    }

    #[test]
    fn precedence_and_associativity() {
        // 2 ** 3 ** 2 parses as 2 ** (3 ** 2)
        let expr = parse_standalone_expression("2 ** 3 ** 2").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Pow, left, right) => {
                assert!(matches!(*left, Expr::Number(n) if n == 2.0));
                assert!(matches!(*right, Expr::Binary(BinaryOp::Pow, _, _)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let expr = parse_standalone_expression("1 + 2 * 3").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::Add, _, _)));
    }

    #[test]
    fn object_literal_is_an_expression() {
        let expr = parse_standalone_expression("{ a: 1, b }").unwrap();
        match expr {
            Expr::Object(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn arrow_functions() {
        assert!(matches!(
            parse_standalone_expression("x => x * 2").unwrap(),
            Expr::Function(_)
        ));
        assert!(matches!(
            parse_standalone_expression("(a, b = 2, ...rest) => { return a }").unwrap(),
            Expr::Function(_)
        ));
        // Parenthesized expression is not an arrow.
        assert!(matches!(
            parse_standalone_expression("(1 + 2) * 3").unwrap(),
            Expr::Binary(BinaryOp::Mul, _, _)
        ));
    }

    #[test]
    fn destructuring_swap_becomes_pattern() {
        let program = parse_program("let a = 1, b = 2; [a, b] = [b, a];").unwrap();
        match &program[1] {
            Stmt::Expr(Expr::Assign {
                target: AssignTarget::Pattern(Pattern::Array { elements, .. }),
                ..
            }) => assert_eq!(elements.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn statements_without_semicolons() {
        let program = parse_program("let x = 1\nx++\nreturn x").unwrap();
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn for_of_and_classic_for() {
        let program = parse_program("for (const v of [1,2]) {} for (let i = 0; i < 3; i++) {}").unwrap();
        assert!(matches!(program[0], Stmt::ForOf { .. }));
        assert!(matches!(program[1], Stmt::For { .. }));
    }

    #[test]
    fn unsupported_syntax_is_reported() {
        let err = parse_program("class A {}").unwrap_err();
        assert!(err.to_string().contains("not supported"));
        assert!(parse_program("let = ;").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse_standalone_expression(&src).is_err());
    }
}
