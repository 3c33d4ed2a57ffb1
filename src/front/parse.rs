//! The parser
//!
//! Hand-written recursive descent with precedence climbing for binary
//! operators, in the spirit of a textbook grammar: `parse_or` calls
//! `parse_and` calls ... calls `parse_unary` calls `parse_primary`.

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::*;
use crate::common::Id;

#[derive(Display)]
#[display("Parse error: {} ({})", msg, span)]
pub struct ParseError {
    msg: String,
    span: Span,
}

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for ParseError {}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(input)?;
    parser.parse_program()
}

struct Parser<'input> {
    lexer: Lexer<'input>,
    current: Option<Token<'input>>,
    /// Byte offset just past the last consumed token, used for the span of
    /// an error raised at end-of-input.
    last_end: usize,
}

impl<'input> Parser<'input> {
    fn new(input: &'input str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next().map_err(|e| ParseError { msg: e.to_string(), span: Span::new(0, 0) })?;
        Ok(Parser { lexer, current, last_end: 0 })
    }

    fn span(&self) -> Span {
        match &self.current {
            Some(tok) => Span::new(tok.pos, tok.text.len()),
            None => Span::new(self.last_end, 0),
        }
    }

    fn kind(&self) -> Option<TokenKind> {
        self.current.map(|t| t.kind)
    }

    fn text(&self) -> &'input str {
        self.current.map(|t| t.text).unwrap_or("")
    }

    fn bump(&mut self) -> Result<Token<'input>, ParseError> {
        let tok = self.current.ok_or_else(|| self.err_here("unexpected end of input"))?;
        self.last_end = tok.pos + tok.text.len();
        self.current = self.lexer.next().map_err(|e| ParseError { msg: e.to_string(), span: self.span() })?;
        Ok(tok)
    }

    fn err_here(&self, msg: impl Into<String>) -> ParseError {
        ParseError { msg: msg.into(), span: self.span() }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.kind() == Some(kind)
    }

    fn accept(&mut self, kind: TokenKind) -> Result<bool, ParseError> {
        if self.at(kind) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'input>, ParseError> {
        if self.at(kind) {
            self.bump()
        } else {
            Err(self.err_here(format!("expected {kind}, found {}", self.describe_current())))
        }
    }

    fn describe_current(&self) -> String {
        match &self.current {
            Some(tok) => format!("{} '{}'", tok.kind, tok.text),
            None => "end of input".to_string(),
        }
    }

    fn expect_id(&mut self) -> Result<(Id, Span), ParseError> {
        let tok = self.expect(TokenKind::Id)?;
        Ok((Id::new(tok.text.to_string()), Span::new(tok.pos, tok.text.len())))
    }

    fn base_type_keyword(&self) -> Option<BaseType> {
        match self.kind()? {
            TokenKind::Int => Some(BaseType::Int),
            TokenKind::Double => Some(BaseType::Double),
            TokenKind::CharKw => Some(BaseType::Char),
            TokenKind::Bool => Some(BaseType::Bool),
            TokenKind::Void => Some(BaseType::Void),
            _ => None,
        }
    }

    fn expect_type(&mut self) -> Result<BaseType, ParseError> {
        match self.base_type_keyword() {
            Some(base) => {
                self.bump()?;
                Ok(base)
            }
            None => Err(self.err_here(format!("expected a type, found {}", self.describe_current()))),
        }
    }

    // ---- top level -------------------------------------------------

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut items = vec![];
        while self.current.is_some() {
            if self.base_type_keyword().is_some() {
                items.push(Item::Function(self.parse_function()?));
            } else if self.at(TokenKind::Start) {
                items.push(Item::Block(self.parse_block()?));
            } else {
                return Err(self.err_here(format!(
                    "expected a function definition or a 'start' block, found {}",
                    self.describe_current()
                )));
            }
        }
        Ok(Program { items })
    }

    fn parse_function(&mut self) -> Result<Function, ParseError> {
        let start_span = self.span();
        let ret_base = self.expect_type()?;
        let (name, _) = self.expect_id()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Function { name, params, ret: Type::scalar(ret_base), body, span: start_span })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = vec![];
        if self.at(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let span = self.span();
            let base = self.expect_type()?;
            let (name, _) = self.expect_id()?;
            params.push(Param { name, ty: Type::scalar(base), span });
            if !self.accept(TokenKind::Comma)? {
                break;
            }
        }
        Ok(params)
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::Start)?;
        let mut stmts = vec![];
        while self.starts_statement() {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::End)?;
        Ok(Block { stmts })
    }

    fn starts_statement(&self) -> bool {
        matches!(
            self.kind(),
            Some(
                TokenKind::Int
                    | TokenKind::Double
                    | TokenKind::CharKw
                    | TokenKind::Bool
                    | TokenKind::Void
                    | TokenKind::Id
                    | TokenKind::For
                    | TokenKind::While
                    | TokenKind::If
                    | TokenKind::Exec
                    | TokenKind::Return
            )
        )
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.kind(),
            Some(
                TokenKind::Num
                    | TokenKind::FloatNum
                    | TokenKind::CharLit
                    | TokenKind::True
                    | TokenKind::False
                    | TokenKind::Id
                    | TokenKind::LParen
                    | TokenKind::Minus
                    | TokenKind::Not
                    | TokenKind::Exec
            )
        )
    }

    // ---- statements --------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        if self.base_type_keyword().is_some() {
            self.parse_decl()
        } else if self.at(TokenKind::Id) {
            let stmt = self.parse_assign_stmt()?;
            self.expect(TokenKind::Semicolon)?;
            Ok(stmt)
        } else if self.accept(TokenKind::For)? {
            self.parse_for()
        } else if self.accept(TokenKind::While)? {
            self.parse_while()
        } else if self.accept(TokenKind::If)? {
            self.parse_if()
        } else if self.at(TokenKind::Exec) {
            let span = self.span();
            let (name, args) = self.parse_exec_call()?;
            self.expect(TokenKind::Semicolon)?;
            Ok(Stmt::Exec { name, args, span })
        } else if self.at(TokenKind::Return) {
            self.parse_return()
        } else {
            Err(self.err_here(format!("unexpected {}", self.describe_current())))
        }
    }

    fn parse_decl(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let base = self.expect_type()?;
        let (name, _) = self.expect_id()?;
        if self.accept(TokenKind::LBracket)? {
            let size_tok = self.expect(TokenKind::Num)?;
            let size: i64 = size_tok
                .text
                .parse()
                .map_err(|_| self.err_here("invalid array size"))?;
            self.expect(TokenKind::RBracket)?;
            self.expect(TokenKind::Semicolon)?;
            return Ok(Stmt::ArrayDecl { name, elem_ty: base, size, span });
        }
        let init = if self.accept(TokenKind::Assign)? {
            Some(self.parse_rhs_value()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::VarDecl { name, ty: Type::scalar(base), init, span })
    }

    /// The right-hand side of `=`: either a bracketed array literal or a
    /// plain expression.
    fn parse_rhs_value(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::LBracket) {
            self.parse_array_literal()
        } else {
            self.parse_expr()
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        self.expect(TokenKind::LBracket)?;
        let mut elems = vec![self.parse_expr()?];
        while self.accept(TokenKind::Comma)? {
            elems.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::ArrayLiteral(elems, span))
    }

    /// Parses `id = rhs` or `id[expr] = expr`, given that `id` has not yet
    /// been consumed.
    fn parse_assign_stmt(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let (name, _) = self.expect_id()?;
        if self.accept(TokenKind::LBracket)? {
            let index = self.parse_expr()?;
            self.expect(TokenKind::RBracket)?;
            self.expect(TokenKind::Assign)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign { target: Target::IndexedId(name, Box::new(index)), value, span });
        }
        self.expect(TokenKind::Assign)?;
        let value = self.parse_rhs_value()?;
        Ok(Stmt::Assign { target: Target::Id(name), value, span })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect(TokenKind::LParen)?;
        let init = if self.base_type_keyword().is_some() {
            Some(Box::new(self.parse_decl_no_semi_consumed()?))
        } else if self.at(TokenKind::Id) {
            Some(Box::new(self.parse_assign_stmt()?))
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        let update = if self.at(TokenKind::Id) {
            Some(Box::new(self.parse_assign_stmt()?))
        } else {
            None
        };
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::For { init, cond, update, body, span })
    }

    /// Variable/array declaration used inside a `for` init clause, where the
    /// statement's own trailing semicolon is the loop's separator and is
    /// consumed by the caller instead of by this helper.
    fn parse_decl_no_semi_consumed(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let base = self.expect_type()?;
        let (name, _) = self.expect_id()?;
        if self.accept(TokenKind::LBracket)? {
            let size_tok = self.expect(TokenKind::Num)?;
            let size: i64 = size_tok
                .text
                .parse()
                .map_err(|_| self.err_here("invalid array size"))?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Stmt::ArrayDecl { name, elem_ty: base, size, span });
        }
        let init = if self.accept(TokenKind::Assign)? {
            Some(self.parse_rhs_value()?)
        } else {
            None
        };
        Ok(Stmt::VarDecl { name, ty: Type::scalar(base), init, span })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body, span })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_block = self.parse_block()?;
        let else_block = if self.accept(TokenKind::Else)? { Some(self.parse_block()?) } else { None };
        Ok(Stmt::If { cond, then_block, else_block, span })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.expect(TokenKind::Return)?;
        let expr = if self.starts_expr() { Some(self.parse_expr()?) } else { None };
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Return(expr, span))
    }

    fn parse_exec_call(&mut self) -> Result<(Id, Vec<Expr>), ParseError> {
        self.expect(TokenKind::Exec)?;
        let (name, _) = self.expect_id()?;
        self.expect(TokenKind::LParen)?;
        let mut args = vec![];
        if !self.at(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            while self.accept(TokenKind::Comma)? {
                args.push(self.parse_expr()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((name, args))
    }

    // ---- expressions ---------------------------------------------------
    //
    // Precedence, loosest to tightest:
    //   or < and < equality < relational < additive < multiplicative < unary < primary

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.at(TokenKind::Or) {
            let span = self.span();
            self.bump()?;
            let right = self.parse_and()?;
            left = Expr::BinOp { op: BOp::Or, lhs: Box::new(left), rhs: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.at(TokenKind::And) {
            let span = self.span();
            self.bump()?;
            let right = self.parse_equality()?;
            left = Expr::BinOp { op: BOp::And, lhs: Box::new(left), rhs: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Eq) => BOp::Eq,
                Some(TokenKind::Ne) => BOp::Ne,
                _ => break,
            };
            let span = self.span();
            self.bump()?;
            let right = self.parse_relational()?;
            left = Expr::BinOp { op, lhs: Box::new(left), rhs: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Lt) => BOp::Lt,
                Some(TokenKind::Le) => BOp::Le,
                Some(TokenKind::Gt) => BOp::Gt,
                Some(TokenKind::Ge) => BOp::Ge,
                _ => break,
            };
            let span = self.span();
            self.bump()?;
            let right = self.parse_additive()?;
            left = Expr::BinOp { op, lhs: Box::new(left), rhs: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Plus) => BOp::Add,
                Some(TokenKind::Minus) => BOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.bump()?;
            let right = self.parse_multiplicative()?;
            left = Expr::BinOp { op, lhs: Box::new(left), rhs: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Mul) => BOp::Mul,
                Some(TokenKind::Div) => BOp::Div,
                Some(TokenKind::Mod) => BOp::Mod,
                _ => break,
            };
            let span = self.span();
            self.bump()?;
            let right = self.parse_unary()?;
            left = Expr::BinOp { op, lhs: Box::new(left), rhs: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::Not) {
            let span = self.span();
            self.bump()?;
            let operand = self.parse_unary()?;
            return Ok(Expr::UnOp { op: UOp::Not, operand: Box::new(operand), span });
        }
        if self.at(TokenKind::Minus) {
            let span = self.span();
            self.bump()?;
            let operand = self.parse_unary()?;
            return Ok(Expr::UnOp { op: UOp::Neg, operand: Box::new(operand), span });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.kind() {
            Some(TokenKind::Num) => {
                let tok = self.bump()?;
                let value: i64 = tok.text.parse().map_err(|_| self.err_here("invalid integer literal"))?;
                Ok(Expr::IntLit(value, span))
            }
            Some(TokenKind::FloatNum) => {
                let tok = self.bump()?;
                let value: f64 = tok.text.parse().map_err(|_| self.err_here("invalid float literal"))?;
                Ok(Expr::FloatLit(value, span))
            }
            Some(TokenKind::CharLit) => {
                let tok = self.bump()?;
                let value = parse_char_literal(tok.text)
                    .ok_or_else(|| ParseError { msg: "invalid character literal".into(), span })?;
                Ok(Expr::CharLit(value, span))
            }
            Some(TokenKind::True) => {
                self.bump()?;
                Ok(Expr::BoolLit(true, span))
            }
            Some(TokenKind::False) => {
                self.bump()?;
                Ok(Expr::BoolLit(false, span))
            }
            Some(TokenKind::Exec) => {
                let (name, args) = self.parse_exec_call()?;
                Ok(Expr::Exec { name, args, span })
            }
            Some(TokenKind::Id) => {
                let (name, _) = self.expect_id()?;
                if self.accept(TokenKind::LBracket)? {
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    Ok(Expr::IndexedId(name, Box::new(index), span))
                } else {
                    Ok(Expr::Id(name, span))
                }
            }
            Some(TokenKind::LParen) => {
                self.bump()?;
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.err_here(format!("expected an expression, found {}", self.describe_current()))),
        }
    }
}

fn parse_char_literal(text: &str) -> Option<u8> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars();
    let byte = match chars.next()? {
        '\\' => match chars.next()? {
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '0' => 0,
            '\\' => b'\\',
            '\'' => b'\'',
            other => other as u8,
        },
        c => c as u8,
    };
    if chars.next().is_some() {
        return None;
    }
    Some(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_addition_program() {
        let prog = parse("start int a = 10; int b = 20; int c = a + b; end").unwrap();
        assert_eq!(prog.items.len(), 1);
        match &prog.items[0] {
            Item::Block(block) => assert_eq!(block.stmts.len(), 3),
            _ => panic!("expected a block"),
        }
    }

    #[test]
    fn parses_function_and_main_block() {
        let prog = parse(
            "int add(int x, int y) start return x + y; end \
             start int r = exec add(7, 8); end",
        )
        .unwrap();
        assert_eq!(prog.items.len(), 2);
        assert!(matches!(prog.items[0], Item::Function(_)));
        assert!(matches!(prog.items[1], Item::Block(_)));
    }

    #[test]
    fn parses_array_declaration_and_indexed_read() {
        let prog = parse("start int a[4]; a = [10, 20, 30, 40]; int v = a[2]; end").unwrap();
        let Item::Block(block) = &prog.items[0] else { panic!() };
        assert_eq!(block.stmts.len(), 3);
    }

    #[test]
    fn parses_if_while_for() {
        let prog = parse(
            "start \
             if (1 < 2) start int z = 1; end else start int z = 2; end \
             while (1 < 2) start int i = 0; end \
             for (int i = 0; i < 5; i = i + 1) start int j = i; end \
             end",
        )
        .unwrap();
        let Item::Block(block) = &prog.items[0] else { panic!() };
        assert_eq!(block.stmts.len(), 3);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("start int a = ; end").is_err());
    }
}
