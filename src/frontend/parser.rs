// Purpose: Parse gs source files into the structural top-level model the rewriter needs.
// Inputs/Outputs: Token stream in, FileAst out; declaration bodies are captured as raw
// source slices, initializer expressions as a small tree for constancy classification.
// Invariants: Every captured slice must start and end on token boundaries of the input.
// Gotchas: Automatic semicolons are zero-width tokens; never use their spans for slicing.

use super::ast::{ConstDef, Expr, FileAst, Function, Global, GlobalInit, Import, Item, OtherItem, Span};
use super::diagnostic::Diagnostics;
use super::lexer::{Keyword, Lexer, Symbol, Token, TokenKind};

pub struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    idx: usize,
    last_end: usize,
    pub diags: Diagnostics,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        let tokens = Lexer::new(src).lex_all();
        Self {
            src,
            tokens,
            idx: 0,
            last_end: 0,
            diags: Diagnostics::default(),
        }
    }

    pub fn parse_file(&mut self) -> Option<FileAst> {
        self.eat_semis();
        let module = self.parse_module_clause()?;
        self.eat_semis();
        let imports = self.parse_imports()?;
        let mut items = Vec::new();
        self.eat_semis();
        while !self.at_eof() {
            let item = self.parse_item()?;
            items.push(item);
            self.eat_semis();
        }
        Some(FileAst {
            module,
            imports,
            items,
        })
    }

    fn parse_module_clause(&mut self) -> Option<String> {
        if !self.at_keyword(Keyword::Module) {
            self.error_here("expected module clause");
            return None;
        }
        self.bump();
        let name = self.expect_ident("module name")?;
        self.expect_terminator();
        Some(name)
    }

    fn parse_imports(&mut self) -> Option<Vec<Import>> {
        let mut imports = Vec::new();
        while self.at_keyword(Keyword::Import) {
            let span = self.cur_span();
            self.bump();
            let mut blank = false;
            if let TokenKind::Ident(name) = self.peek_kind() {
                if name == "_" {
                    blank = true;
                    self.bump();
                }
            }
            let path = match self.peek_kind() {
                TokenKind::StringLit(p) => {
                    let p = p.clone();
                    self.bump();
                    p
                }
                _ => {
                    self.error_here("expected import path string");
                    return None;
                }
            };
            self.expect_terminator();
            imports.push(Import { path, blank, span });
            self.eat_semis();
        }
        Some(imports)
    }

    fn parse_item(&mut self) -> Option<Item> {
        let span = self.cur_span();
        let start = span.start;
        let is_pub = if self.at_keyword(Keyword::Pub) {
            self.bump();
            true
        } else {
            false
        };
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::Fn) => self.parse_function(is_pub, span),
            TokenKind::Keyword(Keyword::Let) => self.parse_global(is_pub, span),
            TokenKind::Keyword(Keyword::Const) => self.parse_const(start, span),
            TokenKind::Keyword(Keyword::Struct) | TokenKind::Keyword(Keyword::Enum) => {
                self.parse_braced_item(start, span)
            }
            TokenKind::Keyword(Keyword::Extern) => self.parse_extern_item(start, span),
            _ => {
                self.error_here("expected top-level declaration");
                None
            }
        }
    }

    fn parse_function(&mut self, is_pub: bool, span: Span) -> Option<Item> {
        self.bump(); // fn
        let name = self.expect_ident("function name")?;
        let tail_start = self.cur_span().start;
        let tail_end = self.skip_signature_and_body()?;
        let tail = self.src[tail_start..tail_end].to_string();
        Some(Item::Function(Function {
            name,
            is_pub,
            tail,
            span,
        }))
    }

    fn parse_global(&mut self, is_pub: bool, span: Span) -> Option<Item> {
        self.bump(); // let
        let name = self.expect_ident("variable name")?;
        if !self.at_symbol(Symbol::Colon) {
            self.error_here("top-level let requires a type annotation");
            return None;
        }
        self.bump();
        let ty = self.capture_type_until_eq()?;
        if ty.is_empty() {
            self.error_here("top-level let requires a type annotation");
            return None;
        }
        let init = if self.at_symbol(Symbol::Eq) {
            self.bump();
            let expr_start = self.cur_span().start;
            let expr = self.parse_expr()?;
            let src = self.src[expr_start..self.last_end].to_string();
            Some(GlobalInit { expr, src })
        } else {
            None
        };
        self.expect_terminator();
        Some(Item::Global(Global {
            name,
            is_pub,
            ty,
            init,
            span,
        }))
    }

    fn parse_const(&mut self, start: usize, span: Span) -> Option<Item> {
        self.bump(); // const
        let name = self.expect_ident("constant name")?;
        if self.at_symbol(Symbol::Colon) {
            self.bump();
            self.capture_type_until_eq()?;
        }
        if !self.at_symbol(Symbol::Eq) {
            self.error_here("constant requires an initializer");
            return None;
        }
        self.bump();
        self.parse_expr()?;
        let src = self.src[start..self.last_end].to_string();
        self.expect_terminator();
        Some(Item::Const(ConstDef { name, src, span }))
    }

    fn parse_braced_item(&mut self, start: usize, span: Span) -> Option<Item> {
        self.bump(); // struct | enum
        let name = self.expect_ident("type name")?;
        let end = self.skip_signature_and_body()?;
        let src = self.src[start..end].to_string();
        Some(Item::Other(OtherItem {
            name: Some(name),
            src,
            span,
        }))
    }

    fn parse_extern_item(&mut self, start: usize, span: Span) -> Option<Item> {
        self.bump(); // extern
        if let TokenKind::StringLit(_) = self.peek_kind() {
            self.bump(); // abi string
        }
        let name = match self.peek_kind() {
            TokenKind::Keyword(Keyword::Fn) | TokenKind::Keyword(Keyword::Let) => {
                self.bump();
                Some(self.expect_ident("extern declaration name")?)
            }
            _ => None,
        };
        let end = self.skip_to_item_end()?;
        let src = self.src[start..end].to_string();
        Some(Item::Other(OtherItem { name, src, span }))
    }

    /// Skip tokens until the first `{` at bracket depth zero, then through its
    /// matching `}`. Returns the byte offset just past the closing brace.
    fn skip_signature_and_body(&mut self) -> Option<usize> {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => {
                    self.error_here("unterminated declaration");
                    return None;
                }
                TokenKind::Symbol(Symbol::LParen) | TokenKind::Symbol(Symbol::LBracket) => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Symbol(Symbol::RParen) | TokenKind::Symbol(Symbol::RBracket) => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                TokenKind::Symbol(Symbol::LBrace) if depth == 0 => break,
                _ => self.bump(),
            }
        }
        let mut braces = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => {
                    self.error_here("unterminated declaration");
                    return None;
                }
                TokenKind::Symbol(Symbol::LBrace) => {
                    braces += 1;
                    self.bump();
                }
                TokenKind::Symbol(Symbol::RBrace) => {
                    braces -= 1;
                    self.bump();
                    if braces == 0 {
                        return Some(self.last_end);
                    }
                }
                _ => self.bump(),
            }
        }
    }

    /// Skip an unbraced declaration to its statement end, or through a body if
    /// one turns up first.
    fn skip_to_item_end(&mut self) -> Option<usize> {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return Some(self.last_end),
                TokenKind::Symbol(Symbol::Semi) if depth == 0 => {
                    let end = self.last_end;
                    self.bump();
                    return Some(end);
                }
                TokenKind::Symbol(Symbol::LBrace) if depth == 0 => {
                    return self.skip_signature_and_body();
                }
                TokenKind::Symbol(Symbol::LParen) | TokenKind::Symbol(Symbol::LBracket) => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Symbol(Symbol::RParen) | TokenKind::Symbol(Symbol::RBracket) => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                _ => self.bump(),
            }
        }
    }

    /// Capture a type annotation as raw text, stopping at `=` or the
    /// statement end at bracket depth zero.
    fn capture_type_until_eq(&mut self) -> Option<String> {
        let start = self.cur_span().start;
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Symbol(Symbol::Eq) | TokenKind::Symbol(Symbol::Semi) if depth == 0 => {
                    break
                }
                TokenKind::Symbol(Symbol::LParen) | TokenKind::Symbol(Symbol::LBracket) => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Symbol(Symbol::RParen) | TokenKind::Symbol(Symbol::RBracket) => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                _ => self.bump(),
            }
        }
        if self.last_end <= start {
            return Some(String::new());
        }
        Some(self.src[start..self.last_end].trim().to_string())
    }

    // ---- initializer expressions ----

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let prec = match self.binary_prec() {
                Some(p) if p >= min_prec => p,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(Box::new(lhs), Box::new(rhs));
        }
        Some(lhs)
    }

    fn binary_prec(&self) -> Option<u8> {
        let sym = match self.peek_kind() {
            TokenKind::Symbol(s) => *s,
            _ => return None,
        };
        match sym {
            Symbol::OrOr => Some(1),
            Symbol::AndAnd => Some(2),
            Symbol::EqEq
            | Symbol::NotEq
            | Symbol::Lt
            | Symbol::Lte
            | Symbol::Gt
            | Symbol::Gte => Some(3),
            Symbol::Plus | Symbol::Minus | Symbol::Pipe => Some(4),
            Symbol::Star | Symbol::Slash | Symbol::Percent | Symbol::Amp => Some(5),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        match self.peek_kind() {
            TokenKind::Symbol(Symbol::Minus)
            | TokenKind::Symbol(Symbol::Bang)
            | TokenKind::Symbol(Symbol::Amp) => {
                self.bump();
                let inner = self.parse_unary()?;
                Some(Expr::Unary(Box::new(inner)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Symbol(Symbol::Dot) => {
                    self.bump();
                    let name = self.expect_ident("field name")?;
                    expr = Expr::Field(Box::new(expr), name);
                }
                TokenKind::Symbol(Symbol::LParen) => {
                    self.bump();
                    let mut args = Vec::new();
                    self.eat_semis();
                    while !self.at_symbol(Symbol::RParen) {
                        args.push(self.parse_expr()?);
                        self.eat_semis();
                        if self.at_symbol(Symbol::Comma) {
                            self.bump();
                            self.eat_semis();
                        } else {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                TokenKind::Symbol(Symbol::LBracket) => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect_symbol(Symbol::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::Symbol(Symbol::LBrace) if is_type_path(&expr) => {
                    let elems = self.parse_composite_elems(true)?;
                    expr = Expr::Composite(elems);
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        match self.peek_kind().clone() {
            TokenKind::IntLit(v) => {
                self.bump();
                Some(Expr::Int(v))
            }
            TokenKind::FloatLit(v) => {
                self.bump();
                Some(Expr::Float(v))
            }
            TokenKind::StringLit(v) => {
                self.bump();
                Some(Expr::Str(v))
            }
            TokenKind::CharLit(v) => {
                self.bump();
                Some(Expr::Char(v))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Some(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Some(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.bump();
                Some(Expr::Nil)
            }
            TokenKind::Ident(name) => {
                if name == "map" && self.peek_next_is(Symbol::LBracket) {
                    return self.parse_prefixed_composite();
                }
                self.bump();
                Some(Expr::Ident(name))
            }
            TokenKind::Symbol(Symbol::LParen) => {
                self.bump();
                self.eat_semis();
                let first = self.parse_expr()?;
                let mut elems = vec![first];
                let mut tuple = false;
                self.eat_semis();
                while self.at_symbol(Symbol::Comma) {
                    tuple = true;
                    self.bump();
                    self.eat_semis();
                    if self.at_symbol(Symbol::RParen) {
                        break;
                    }
                    elems.push(self.parse_expr()?);
                    self.eat_semis();
                }
                self.expect_symbol(Symbol::RParen)?;
                if tuple {
                    Some(Expr::Composite(elems))
                } else {
                    let inner = elems.pop()?;
                    Some(Expr::Paren(Box::new(inner)))
                }
            }
            TokenKind::Symbol(Symbol::LBracket) => {
                if self.peek_next_is(Symbol::RBracket) {
                    // []T{...} slice literal
                    return self.parse_prefixed_composite();
                }
                self.bump();
                self.eat_semis();
                let mut elems = Vec::new();
                while !self.at_symbol(Symbol::RBracket) {
                    elems.push(self.parse_expr()?);
                    self.eat_semis();
                    if self.at_symbol(Symbol::Comma) {
                        self.bump();
                        self.eat_semis();
                    } else {
                        break;
                    }
                }
                self.expect_symbol(Symbol::RBracket)?;
                Some(Expr::Composite(elems))
            }
            _ => {
                self.error_here("expected expression");
                None
            }
        }
    }

    /// `map[K]V{...}` and `[]T{...}`: skip the type prefix, then read elements.
    fn parse_prefixed_composite(&mut self) -> Option<Expr> {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof | TokenKind::Symbol(Symbol::Semi) => {
                    self.error_here("unterminated composite literal");
                    return None;
                }
                TokenKind::Symbol(Symbol::LParen) | TokenKind::Symbol(Symbol::LBracket) => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::Symbol(Symbol::RParen) | TokenKind::Symbol(Symbol::RBracket) => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                TokenKind::Symbol(Symbol::LBrace) if depth == 0 => break,
                _ => self.bump(),
            }
        }
        let elems = self.parse_composite_elems(false)?;
        Some(Expr::Composite(elems))
    }

    /// Brace-enclosed elements. With `labels` set, `ident:` prefixes are
    /// struct field labels and are skipped; without it, keys are ordinary
    /// element expressions (map literals), so their constancy counts.
    fn parse_composite_elems(&mut self, labels: bool) -> Option<Vec<Expr>> {
        self.expect_symbol(Symbol::LBrace)?;
        self.eat_semis();
        let mut elems = Vec::new();
        while !self.at_symbol(Symbol::RBrace) {
            if self.at_eof() {
                self.error_here("unterminated composite literal");
                return None;
            }
            if labels && self.at_label() {
                self.bump(); // label
                self.bump(); // colon
                self.eat_semis();
            }
            let elem = self.parse_expr()?;
            elems.push(elem);
            self.eat_semis();
            if self.at_symbol(Symbol::Colon) {
                // map key just parsed; now its value
                self.bump();
                self.eat_semis();
                elems.push(self.parse_expr()?);
                self.eat_semis();
            }
            if self.at_symbol(Symbol::Comma) {
                self.bump();
                self.eat_semis();
            } else {
                break;
            }
        }
        self.eat_semis();
        self.expect_symbol(Symbol::RBrace)?;
        Some(elems)
    }

    fn at_label(&self) -> bool {
        if !matches!(self.peek_kind(), TokenKind::Ident(_)) {
            return false;
        }
        self.peek_next_is(Symbol::Colon)
    }

    // ---- cursor helpers ----

    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_next_is(&self, sym: Symbol) -> bool {
        match self.tokens.get(self.idx + 1) {
            Some(t) => t.kind == TokenKind::Symbol(sym),
            None => false,
        }
    }

    fn cur_span(&self) -> Span {
        self.peek().span.clone()
    }

    fn bump(&mut self) {
        let tok = self.peek();
        if tok.span.end > tok.span.start {
            self.last_end = tok.span.end;
        }
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn at_symbol(&self, sym: Symbol) -> bool {
        *self.peek_kind() == TokenKind::Symbol(sym)
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        *self.peek_kind() == TokenKind::Keyword(kw)
    }

    fn eat_semis(&mut self) {
        while self.at_symbol(Symbol::Semi) {
            self.bump();
        }
    }

    fn expect_symbol(&mut self, sym: Symbol) -> Option<()> {
        if self.at_symbol(sym) {
            self.bump();
            Some(())
        } else {
            self.error_here(format!("expected {:?}", sym));
            None
        }
    }

    fn expect_ident(&mut self, what: &str) -> Option<String> {
        match self.peek_kind() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Some(name)
            }
            _ => {
                self.error_here(format!("expected {}", what));
                None
            }
        }
    }

    fn expect_terminator(&mut self) {
        if self.at_symbol(Symbol::Semi) {
            self.bump();
        } else if !self.at_eof() {
            self.error_here("expected end of statement");
        }
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let span = self.cur_span();
        self.diags.push(message, Some(span));
    }
}

fn is_type_path(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Field(base, _) => is_type_path(base),
        _ => false,
    }
}

/// Parse a whole file, rendering diagnostics into the error message.
pub fn parse_source(src: &str, name: Option<&str>) -> anyhow::Result<FileAst> {
    let mut parser = Parser::new(src);
    match parser.parse_file() {
        Some(file) if parser.diags.is_empty() => Ok(file),
        _ => anyhow::bail!(
            "{}",
            super::diagnostic::render_diags(&parser.diags, src, name).trim_end()
        ),
    }
}
