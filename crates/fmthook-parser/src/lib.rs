//! fmthook-parser — parseur du langage invité
//!
//! Branches :
//! - `fmthook-lexer` pour la tokenisation
//! - `fmthook-core` pour `Span/Spanned`
//! - `fmthook-ast` pour l’AST cible
//!
//! Grammaire (essentiel):
//! ```text
//! program        := stmt*
//! block          := "{" stmt* "}"
//! stmt           := "fn" ident "(" params? ")" block
//!                 | "let" ident "=" expr ";"
//!                 | ident "=" expr ";"
//!                 | "use" ident ";"
//!                 | "return" expr? ";"
//!                 | "while" "(" expr ")" block
//!                 | "if" "(" expr ")" block ("else" (block | if_stmt))?
//!                 | expr ";"
//! params         := param ("," param)*
//! param          := ident ("=" expr)?      // défauts en fin de liste
//!
//! expr           := pratt_expression
//! primary        := ident | literal | "(" expr ")" | call | field | fstring
//! call           := primary "(" args? ")"
//! field          := primary "." ident
//! literal        := INT | FLOAT | STRING | "True" | "False" | "None"
//! fstring        := 'f"' (text | "{" expr ("!" ("s"|"r"))? (":" spec)? "}")* '"'
//! ```
//!
//! Les expressions des champs `{…}` sont re-lexées et parsées depuis leur plage
//! dans la source d'origine : les erreurs pointent au bon endroit.

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::rc::Rc;

use fmthook_ast as ast;
use fmthook_core::{Pos, SourceId, Span};
use fmthook_lexer::{FStrField, FStrPart, Keyword, LexError, Lexer, LexerOptions, LineMap, Token, TokenKind};
use thiserror::Error;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur de parsing avec span.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    /// Localisation.
    pub span: Span,
    /// Ligne (1-based).
    pub line: u32,
    /// Colonne (1-based).
    pub column: u32,
    /// Message humain.
    pub message: String,
}

type PResult<T> = Result<T, ParseError>;

/// Parse une source complète (options par défaut).
pub fn parse(src: &str) -> PResult<ast::Program> { Parser::new(src, SourceId(0)).parse_program() }

/* ─────────────────────────── Parser ─────────────────────────── */

/// Parser fmthook.
pub struct Parser<'a> {
    src: &'a str,
    /// Lexer interne.
    lx: Lexer<'a>,
    /// Buffer 1-token d’anticipation.
    look: Option<Token<'a>>,
    /// Dernier span consommé.
    last_span: Option<Span>,
    source: SourceId,
    opts: LexerOptions,
    lines: Rc<LineMap>,
}

impl<'a> Parser<'a> {
    /// Crée un parser depuis une source.
    pub fn new(src: &'a str, source: SourceId) -> Self { Self::with_options(src, source, LexerOptions::default()) }

    /// Crée avec options de lexer.
    pub fn with_options(src: &'a str, source: SourceId, opts: LexerOptions) -> Self {
        Self {
            src,
            lx: Lexer::with_options(src, source, opts),
            look: None,
            last_span: None,
            source,
            opts,
            lines: Rc::new(LineMap::new(src)),
        }
    }

    /// Parser restreint à l'expression d'un champ de chaîne formatée.
    fn for_field(&self, span: Span) -> Self {
        Self {
            src: self.src,
            lx: Lexer::for_span(self.src, span, self.opts),
            look: None,
            last_span: None,
            source: self.source,
            opts: self.opts,
            lines: Rc::clone(&self.lines),
        }
    }

    /// Parse un programme complet.
    pub fn parse_program(&mut self) -> PResult<ast::Program> {
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::Eof)? {
            stmts.push(self.parse_stmt()?);
        }
        Ok(ast::Program { stmts })
    }

    /// Parse une expression seule (toute la source doit être consommée).
    pub fn parse_expression(&mut self) -> PResult<ast::Expr> {
        let e = self.parse_expr()?;
        let t = self.peek()?;
        if !matches!(t.value, TokenKind::Eof) {
            return Err(self.err_at(t.span, "fin d'expression attendue"));
        }
        Ok(e)
    }

    /* ─────────── Blocs & Stmts ─────────── */

    fn parse_block(&mut self) -> PResult<ast::Block> {
        let lb = self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace)? {
            if self.check(&TokenKind::Eof)? {
                let t = self.peek()?;
                return Err(self.err_at(t.span, "`}` attendu"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(ast::Block { stmts, span: self.ast_span(lb.span) })
    }

    fn parse_stmt(&mut self) -> PResult<ast::Stmt> {
        let t = self.peek()?;
        let span = self.ast_span(t.span);
        match t.value {
            TokenKind::Kw(Keyword::Fn) => {
                self.bump()?;
                let name = self.expect_ident()?.to_string();
                self.expect(&TokenKind::LParen)?;
                let mut params = Vec::new();
                let mut defaults = Vec::new();
                if !self.check(&TokenKind::RParen)? {
                    loop {
                        let at = self.peek()?.span;
                        let param = self.expect_ident()?.to_string();
                        if self.eat(&TokenKind::Eq)? {
                            defaults.push(self.parse_expr()?);
                        } else if !defaults.is_empty() {
                            return Err(self.err_at(at, format!("paramètre `{param}` sans défaut après un paramètre par défaut")));
                        }
                        params.push(param);
                        if !self.eat(&TokenKind::Comma)? {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(ast::Stmt::Fn(ast::Function { name, params, defaults, body, span }))
            }
            TokenKind::Kw(Keyword::Let) => {
                self.bump()?;
                let name = self.expect_ident()?.to_string();
                self.expect(&TokenKind::Eq)?;
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Let { name, value, span })
            }
            TokenKind::Kw(Keyword::Use) => {
                self.bump()?;
                let name = self.expect_ident()?.to_string();
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Use { name, span })
            }
            TokenKind::Kw(Keyword::Return) => {
                self.bump()?;
                let value = if self.check(&TokenKind::Semi)? { None } else { Some(self.parse_expr()?) };
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Return(value, span))
            }
            TokenKind::Kw(Keyword::While) => {
                self.bump()?;
                self.expect(&TokenKind::LParen)?;
                let condition = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(ast::Stmt::While { condition, body, span })
            }
            TokenKind::Kw(Keyword::If) => self.parse_if(),
            _ => {
                let e = self.parse_expr()?;
                if self.check(&TokenKind::Eq)? {
                    let eq = self.bump()?;
                    let ast::Expr::Ident(name) = e else {
                        return Err(self.err_at(eq.span, "seul un nom peut être assigné"));
                    };
                    let value = self.parse_expr()?;
                    self.expect(&TokenKind::Semi)?;
                    return Ok(ast::Stmt::Assign { name, value, span });
                }
                self.expect(&TokenKind::Semi)?;
                Ok(ast::Stmt::Expr(e, span))
            }
        }
    }

    fn parse_if(&mut self) -> PResult<ast::Stmt> {
        let k = self.expect(&TokenKind::Kw(Keyword::If))?;
        let span = self.ast_span(k.span);
        self.expect(&TokenKind::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let then_block = self.parse_block()?;
        let else_block = if self.eat(&TokenKind::Kw(Keyword::Else))? {
            if self.check(&TokenKind::Kw(Keyword::If))? {
                let nested = self.parse_if()?;
                Some(ast::Block { span: nested.span(), stmts: vec![nested] })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(ast::Stmt::If { condition, then_block, else_block, span })
    }

    /* ─────────── Expressions (Pratt) ─────────── */

    fn parse_expr(&mut self) -> PResult<ast::Expr> { self.parse_prec(0) }

    fn parse_prec(&mut self, min_bp: u8) -> PResult<ast::Expr> {
        let mut lhs = self.parse_unary()?;

        loop {
            let op = match self.peek()?.value {
                TokenKind::EqEq => ast::BinaryOp::Eq,
                TokenKind::Ne => ast::BinaryOp::Ne,
                TokenKind::Lt => ast::BinaryOp::Lt,
                TokenKind::Le => ast::BinaryOp::Le,
                TokenKind::Gt => ast::BinaryOp::Gt,
                TokenKind::Ge => ast::BinaryOp::Ge,
                TokenKind::Plus => ast::BinaryOp::Add,
                TokenKind::Minus => ast::BinaryOp::Sub,
                TokenKind::Star => ast::BinaryOp::Mul,
                TokenKind::Slash => ast::BinaryOp::Div,
                TokenKind::Percent => ast::BinaryOp::Mod,
                _ => break,
            };
            let (lbp, rbp) = precedence(op);
            if lbp < min_bp {
                break;
            }
            self.bump()?;
            let rhs = self.parse_prec(rbp)?;
            lhs = ast::Expr::Binary { left: Box::new(lhs), op, right: Box::new(rhs) };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<ast::Expr> {
        let op = match self.peek()?.value {
            TokenKind::Minus => ast::UnaryOp::Neg,
            TokenKind::Bang => ast::UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.bump()?;
        let e = self.parse_unary()?;
        Ok(ast::Expr::Unary { op, expr: Box::new(e) })
    }

    fn parse_postfix(&mut self) -> PResult<ast::Expr> {
        let mut e = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::LParen)? {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen)? {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma)? {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen)?;
                e = ast::Expr::Call { func: Box::new(e), args };
                continue;
            }
            if self.eat(&TokenKind::Dot)? {
                let field = self.expect_ident()?.to_string();
                e = ast::Expr::Field { expr: Box::new(e), field };
                continue;
            }
            break;
        }
        Ok(e)
    }

    fn parse_primary(&mut self) -> PResult<ast::Expr> {
        let t = self.bump()?;
        Ok(match t.value {
            TokenKind::Ident(s) => ast::Expr::Ident(s.to_string()),
            TokenKind::Int(i) => ast::Expr::Literal(ast::Literal::Int(i)),
            TokenKind::Float(f) => ast::Expr::Literal(ast::Literal::Float(f)),
            TokenKind::Str(s) => ast::Expr::Literal(ast::Literal::Str(s)),
            TokenKind::FStr(parts) => ast::Expr::FString(self.convert_fstring(parts)?),
            TokenKind::Kw(Keyword::True) => ast::Expr::Literal(ast::Literal::Bool(true)),
            TokenKind::Kw(Keyword::False) => ast::Expr::Literal(ast::Literal::Bool(false)),
            TokenKind::Kw(Keyword::None) => ast::Expr::Literal(ast::Literal::None),
            TokenKind::LParen => {
                let e = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                e
            }
            _ => return Err(self.err_at(t.span, "expression attendue")),
        })
    }

    /* ─────────── Chaînes formatées ─────────── */

    fn convert_fstring(&self, parts: Vec<FStrPart>) -> PResult<Vec<ast::FStringPart>> {
        parts
            .into_iter()
            .map(|p| match p {
                FStrPart::Lit(s) => Ok(ast::FStringPart::Literal(s)),
                FStrPart::Field(f) => self.convert_field(f),
            })
            .collect()
    }

    fn convert_field(&self, field: FStrField) -> PResult<ast::FStringPart> {
        let expr = self.for_field(field.expr).parse_expression()?;
        let conversion = match field.conversion {
            None => None,
            Some('s') => Some(ast::Conversion::Str),
            Some('r') => Some(ast::Conversion::Repr),
            Some(other) => return Err(self.err_at(field.expr, format!("conversion inconnue `!{other}`"))),
        };
        let spec = field.spec.map(|s| self.convert_fstring(s)).transpose()?;
        Ok(ast::FStringPart::Field { expr: Box::new(expr), conversion, spec })
    }

    /* ─────────── Utilitaires ─────────── */

    fn fill(&mut self) -> PResult<()> {
        if self.look.is_none() {
            let t = self.lx.next_token().map_err(|e| self.lex_err(&e))?;
            self.look = Some(t);
        }
        Ok(())
    }

    fn peek(&mut self) -> PResult<Token<'a>> {
        self.fill()?;
        self.look.clone().ok_or_else(|| self.err_at(self.prev_span(), "EOF"))
    }

    fn bump(&mut self) -> PResult<Token<'a>> {
        self.fill()?;
        let t = self.look.take().ok_or_else(|| self.err_at(self.prev_span(), "EOF"))?;
        self.last_span = Some(t.span);
        Ok(t)
    }

    fn check(&mut self, kind: &TokenKind<'_>) -> PResult<bool> {
        self.fill()?;
        Ok(self.look.as_ref().is_some_and(|t| token_eq(&t.value, kind)))
    }

    fn eat(&mut self, kind: &TokenKind<'_>) -> PResult<bool> {
        if self.check(kind)? {
            self.bump()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, kind: &TokenKind<'_>) -> PResult<Token<'a>> {
        let t = self.peek()?;
        if token_eq(&t.value, kind) {
            return self.bump();
        }
        Err(self.err_at(t.span, format!("attendu: {}, trouvé: {}", describe(kind), describe(&t.value))))
    }

    fn expect_ident(&mut self) -> PResult<&'a str> {
        let t = self.peek()?;
        if let TokenKind::Ident(s) = t.value {
            self.bump()?;
            Ok(s)
        } else {
            Err(self.err_at(t.span, format!("identifiant attendu, trouvé: {}", describe(&t.value))))
        }
    }

    fn prev_span(&self) -> Span {
        self.last_span.unwrap_or_else(|| Span::new(self.source, Pos(0), Pos(0)))
    }

    fn ast_span(&self, span: Span) -> ast::Span {
        let (line, column) = self.lines.line_col(span.start);
        ast::Span::new(line, column, span.start.0)
    }

    fn err_at(&self, span: Span, message: impl Into<String>) -> ParseError {
        let (line, column) = self.lines.line_col(span.start);
        ParseError { span, line, column, message: message.into() }
    }

    fn lex_err(&self, e: &LexError) -> ParseError { self.err_at(e.span, e.kind.to_string()) }
}

/* ─────────────────────────── Opérateurs & helpers ─────────────────────────── */

const fn precedence(op: ast::BinaryOp) -> (u8, u8) {
    // Pratt binding power (gauche-associatif)
    match op {
        ast::BinaryOp::Eq | ast::BinaryOp::Ne => (5, 6),
        ast::BinaryOp::Lt | ast::BinaryOp::Le | ast::BinaryOp::Gt | ast::BinaryOp::Ge => (7, 8),
        ast::BinaryOp::Add | ast::BinaryOp::Sub => (9, 10),
        ast::BinaryOp::Mul | ast::BinaryOp::Div | ast::BinaryOp::Mod => (11, 12),
    }
}

fn token_eq(a: &TokenKind<'_>, b: &TokenKind<'_>) -> bool {
    match (a, b) {
        (TokenKind::Kw(ka), TokenKind::Kw(kb)) => ka == kb,
        (
            TokenKind::Ident(_) | TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::Str(_) | TokenKind::FStr(_),
            _,
        ) => false,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

fn describe(kind: &TokenKind<'_>) -> String {
    match kind {
        TokenKind::Eof => "fin de fichier".into(),
        TokenKind::Ident(s) => format!("identifiant `{s}`"),
        TokenKind::Kw(k) => format!("mot-clé {k:?}"),
        TokenKind::Int(i) => format!("entier {i}"),
        TokenKind::Float(f) => format!("flottant {f}"),
        TokenKind::Str(_) => "chaîne".into(),
        TokenKind::FStr(_) => "chaîne formatée".into(),
        other => format!("{other:?}"),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use fmthook_ast::{BinaryOp, Expr, FStringPart, Literal, Stmt};
    use pretty_assertions::assert_eq;

    fn parse_ok(src: &str) -> ast::Program { parse(src).expect("parse ok") }

    fn ident(s: &str) -> Box<Expr> { Box::new(Expr::Ident(s.into())) }

    #[test]
    fn functions_and_calls() {
        let prg = parse_ok(
            r#"
            fn add(a, b) { return a + b; }
            print(add(1, 2));
        "#,
        );
        assert_eq!(prg.stmts.len(), 2);
        let Stmt::Fn(f) = &prg.stmts[0] else { panic!("fn attendu") };
        assert_eq!(f.params, vec!["a".to_string(), "b".into()]);
        assert_eq!(f.span.line, 2);
        assert!(matches!(&prg.stmts[1], Stmt::Expr(Expr::Call { args, .. }, sp) if args.len() == 1 && sp.line == 3));
    }

    #[test]
    fn trailing_params_take_defaults() {
        let prg = parse_ok("fn hook(v, s = None, w = -1) { return v; }");
        let Stmt::Fn(f) = &prg.stmts[0] else { panic!("fn attendu") };
        assert_eq!(f.params, vec!["v".to_string(), "s".into(), "w".into()]);
        assert_eq!(f.required_params(), 1);
        assert_eq!(f.defaults[0], Expr::Literal(Literal::None));
        assert!(matches!(&f.defaults[1], Expr::Unary { expr, .. } if **expr == Expr::Literal(Literal::Int(1))));

        let err = parse("fn bad(a = 1, b) { }").unwrap_err();
        assert_eq!(err.column, 15);
    }

    #[test]
    fn precedence_is_respected() {
        let prg = parse_ok("let x = 1 + 2 * 3 == 7;");
        let Stmt::Let { value, .. } = &prg.stmts[0] else { panic!("let attendu") };
        let Expr::Binary { op: BinaryOp::Eq, left, .. } = value else { panic!("== en tête") };
        assert!(matches!(**left, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn assignment_use_and_control_flow() {
        let prg = parse_ok(
            r#"
            use helpers;
            let i = 0;
            while (i < 3) { i = i + 1; }
            if (i == 3) { print("ok"); } else if (i > 3) { print("big"); } else { print("small"); }
            x = helpers.value;
        "#,
        );
        assert!(matches!(&prg.stmts[0], Stmt::Use { name, .. } if name == "helpers"));
        let Stmt::While { body, .. } = &prg.stmts[2] else { panic!("while attendu") };
        assert!(matches!(&body.stmts[0], Stmt::Assign { name, .. } if name == "i"));
        let Stmt::If { else_block: Some(b), .. } = &prg.stmts[3] else { panic!("if attendu") };
        assert!(matches!(&b.stmts[0], Stmt::If { else_block: Some(_), .. }));
        assert!(matches!(&prg.stmts[4], Stmt::Assign { value: Expr::Field { field, .. }, .. } if field == "value"));
    }

    #[test]
    fn fstring_fields_become_expressions() {
        let prg = parse_ok(r#"print(f"{a + 1!r:>{w}} and {f(b)}");"#);
        let Stmt::Expr(Expr::Call { args, .. }, _) = &prg.stmts[0] else { panic!("appel attendu") };
        let Expr::FString(parts) = &args[0] else { panic!("f-string attendue") };
        assert_eq!(
            parts[0],
            FStringPart::Field {
                expr: Box::new(Expr::Binary {
                    left: ident("a"),
                    op: BinaryOp::Add,
                    right: Box::new(Expr::Literal(Literal::Int(1))),
                }),
                conversion: Some(ast::Conversion::Repr),
                spec: Some(vec![FStringPart::Literal(">".into()), FStringPart::field(Expr::Ident("w".into()))]),
            }
        );
        assert_eq!(parts[1], FStringPart::Literal(" and ".into()));
        assert!(matches!(&parts[2], FStringPart::Field { expr, .. } if matches!(**expr, Expr::Call { .. })));
    }

    #[test]
    fn errors_point_at_the_right_line() {
        let err = parse("let a = 1;\nlet = 2;").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("identifiant attendu"));

        let err = parse("print(f\"{1 +}\");").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.column > 9);

        let err = parse("f(1) = 2;").unwrap_err();
        assert!(err.message.contains("assigné"));

        assert!(parse("fn f( { }").is_err());
        assert!(parse("while (x) { print(x);").is_err());
    }

    #[test]
    fn lexer_errors_surface_as_parse_errors() {
        let err = parse("let s = \"abc;").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }
}
