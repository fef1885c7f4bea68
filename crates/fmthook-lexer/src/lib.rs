//! fmthook-lexer — analyse lexicale du langage invité
//!
//! Faits saillants :
//! - `Lexer` + `LexerOptions` : commentaires `//`, `/* */` (imbriqués), ident/keywords, nombres
//!   (2/8/10/16, `_`, floats + exposant), chaînes avec échappements
//! - **chaînes formatées** `f"…{expr!r:spec}…"` découpées en parties : littéraux et champs
//!   (plage source de l'expression, conversion, spécificateur éventuellement imbriqué)
//! - `Span`/`Spanned`/`SourceId` + **LineMap** pour `(ligne, colonne)`
//!
//! Exemple éclair :
//! ```
//! use fmthook_core::SourceId;
//! use fmthook_lexer::{FStrPart, Lexer, TokenKind};
//!
//! let toks = Lexer::new(r#"print(f"{x:.2f}")"#, SourceId(0)).tokenize().unwrap();
//! assert!(matches!(&toks[2].value, TokenKind::FStr(parts) if matches!(parts[0], FStrPart::Field(_))));
//! ```

#![deny(missing_docs)]

use fmthook_core::{Pos, SourceId, Span, Spanned};
use thiserror::Error;

/* ─────────────────────────── Options & LineMap ─────────────────────────── */

/// Options du lexer.
#[derive(Debug, Clone, Copy)]
pub struct LexerOptions {
    /// Autoriser commentaires blocs imbriqués `/* ... /* .. */ ... */`.
    pub nested_block_comments: bool,
    /// Profondeur max de champs dans les spécificateurs (`{x:{w}}` = 1).
    pub max_spec_nesting: u8,
}

impl Default for LexerOptions {
    fn default() -> Self { Self { nested_block_comments: true, max_spec_nesting: 2 } }
}

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Offsets des débuts de lignes (toujours contient 0).
    pub line_starts: Vec<u32>,
}

impl LineMap {
    /// Construit la table à partir d’un `&str`.
    pub fn new(src: &str) -> Self {
        let mut ls = Vec::with_capacity(64);
        ls.push(0);
        for (i, b) in src.as_bytes().iter().enumerate() {
            if *b == b'\n' {
                ls.push((i as u32) + 1);
            }
        }
        Self { line_starts: ls }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based.
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let off = pos.0;
        let idx = match self.line_starts.binary_search(&off) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[idx];
        let col = off.saturating_sub(line_start) + 1;
        ((idx as u32) + 1, col)
    }

    /// Ligne (1-based) d'une position.
    pub fn line_of(&self, pos: Pos) -> u32 { self.line_col(pos).0 }
}

/* ─────────────────────────── Tokens ─────────────────────────── */

/// Mots-clés reconnus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `fn`
    Fn,
    /// `let`
    Let,
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `return`
    Return,
    /// `use`
    Use,
    /// `True`
    True,
    /// `False`
    False,
    /// `None`
    None,
}

/// Champ `{expr!c:spec}` d'une chaîne formatée.
#[derive(Debug, Clone, PartialEq)]
pub struct FStrField {
    /// Plage source de l'expression (entre `{` et `!`/`:`/`}`).
    pub expr: Span,
    /// Caractère de conversion (`s`, `r`).
    pub conversion: Option<char>,
    /// Spécificateur, lui-même fait de littéraux et de champs.
    pub spec: Option<Vec<FStrPart>>,
}

/// Partie d'une chaîne formatée.
#[derive(Debug, Clone, PartialEq)]
pub enum FStrPart {
    /// Texte littéral (échappements et `{{`/`}}` décodés).
    Lit(String),
    /// Champ de remplacement.
    Field(FStrField),
}

/// Genre de jeton lexical.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    /// Fin de fichier.
    Eof,
    /// Identifiant.
    Ident(&'a str),
    /// Mot-clé.
    Kw(Keyword),
    /// Littéral entier (i64).
    Int(i64),
    /// Littéral flottant (f64).
    Float(f64),
    /// Littéral chaîne (décodée).
    Str(String),
    /// Chaîne formatée.
    FStr(Vec<FStrPart>),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `;`
    Semi,
    /// `:`
    Colon,
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
    /// `=`
    Eq,
    /// `==`
    EqEq,
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
    /// `!`
    Bang,
}

/// Jeton avec span.
pub type Token<'a> = Spanned<TokenKind<'a>>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d’erreur lexicale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    /// Caractère inattendu.
    #[error("unexpected character: {0:?}")]
    UnexpectedChar(char),
    /// Commentaire bloc non terminé.
    #[error("unterminated block comment")]
    UnterminatedBlockComment,
    /// Chaîne non terminée.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// Séquence d’échappement invalide.
    #[error("invalid escape sequence")]
    InvalidEscape,
    /// Littéral numérique invalide.
    #[error("invalid number literal")]
    InvalidNumber,
    /// Dépassement entier i64.
    #[error("integer literal overflows i64")]
    IntOverflow,
    /// `}` isolé dans une chaîne formatée.
    #[error("single '}}' is not allowed in a format string")]
    SingleClosingBrace,
    /// Champ de chaîne formatée sans expression.
    #[error("empty expression in format string field")]
    EmptyField,
    /// Champ de chaîne formatée non fermé.
    #[error("expected '}}' to close format string field")]
    UnterminatedField,
    /// Conversion autre que `!s` / `!r`.
    #[error("invalid conversion character {0:?} (expected 's' or 'r')")]
    InvalidConversion(char),
    /// Spécificateurs imbriqués trop profonds.
    #[error("format specifier nesting too deep")]
    SpecTooDeep,
}

/// Erreur lexicale avec localisation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (at byte {})", span.start.0)]
pub struct LexError {
    /// Localisation.
    pub span: Span,
    /// Genre d’erreur.
    pub kind: LexErrorKind,
}

/* ─────────────────────────── Lexer ─────────────────────────── */

/// Analyseur lexical (itératif).
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    /// Position courante en bytes.
    off: usize,
    /// Id de la source.
    source: SourceId,
    /// Options.
    opts: LexerOptions,
}

impl<'a> Lexer<'a> {
    /// Crée un lexer avec options par défaut.
    pub fn new(src: &'a str, source: SourceId) -> Self { Self::with_options(src, source, LexerOptions::default()) }

    /// Crée un lexer avec `LexerOptions`.
    pub fn with_options(src: &'a str, source: SourceId, opts: LexerOptions) -> Self {
        Self { src, bytes: src.as_bytes(), off: 0, source, opts }
    }

    /// Lexer restreint à `span` (expression d'un champ de chaîne formatée).
    ///
    /// Les spans produits restent des offsets dans la source complète.
    pub fn for_span(src: &'a str, span: Span, opts: LexerOptions) -> Self {
        let end = (span.end.0 as usize).min(src.len());
        let start = (span.start.0 as usize).min(end);
        let src = &src[..end];
        Self { src, bytes: src.as_bytes(), off: start, source: span.source, opts }
    }

    /// Prochain jeton ; `Eof` est émis en fin de source.
    pub fn next_token(&mut self) -> Result<Token<'a>, LexError> {
        self.skip_ws_and_comments()?;
        let start = self.off;
        let Some(c) = self.bump_char() else {
            return Ok(Spanned::new(TokenKind::Eof, self.span_from(start)));
        };

        let kind = match c {
            'f' if self.peek_char() == Some('"') => {
                self.off += 1;
                TokenKind::FStr(self.lex_fstring(start)?)
            }
            ch if is_ident_start(ch) => {
                self.consume_while(|b| is_ident_continue(b as char));
                let s = &self.src[start..self.off];
                keyword_of(s).map_or(TokenKind::Ident(s), TokenKind::Kw)
            }
            ch if ch.is_ascii_digit() => self.lex_number(start, c)?,
            '"' => TokenKind::Str(self.lex_string(start)?),

            '=' => if self.eat('=') { TokenKind::EqEq } else { TokenKind::Eq },
            '!' => if self.eat('=') { TokenKind::Ne } else { TokenKind::Bang },
            '<' => if self.eat('=') { TokenKind::Le } else { TokenKind::Lt },
            '>' => if self.eat('=') { TokenKind::Ge } else { TokenKind::Gt },

            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,

            other => return Err(self.err_from(start, LexErrorKind::UnexpectedChar(other))),
        };

        Ok(Spanned::new(kind, self.span_from(start)))
    }

    /// Tokenise toute la source (ajoute `Eof` final).
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token()?;
            let is_eof = matches!(t.value, TokenKind::Eof);
            out.push(t);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    /* ────────── Primitives internes ────────── */

    #[inline] fn peek(&self) -> Option<u8> { self.bytes.get(self.off).copied() }
    #[inline] fn peek2(&self) -> Option<u8> { self.bytes.get(self.off + 1).copied() }
    #[inline] fn peek_char(&self) -> Option<char> { self.src.get(self.off..).and_then(|s| s.chars().next()) }
    #[inline] fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.off += c.len_utf8();
        Some(c)
    }
    #[inline] fn eat(&mut self, ch: char) -> bool {
        if self.peek_char() == Some(ch) {
            self.off += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn consume_while(&mut self, mut p: impl FnMut(u8) -> bool) {
        while let Some(b) = self.peek() {
            if p(b) { self.off += 1; } else { break; }
        }
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(c) = self.peek_char() {
                if c.is_whitespace() { self.off += c.len_utf8(); } else { break; }
            }
            if self.peek() == Some(b'/') && self.peek2() == Some(b'/') {
                self.off += 2;
                while let Some(c) = self.bump_char() {
                    if c == '\n' { break; }
                }
                continue;
            }
            if self.peek() == Some(b'/') && self.peek2() == Some(b'*') {
                let start = self.off;
                self.off += 2;
                let mut depth = 1u32;
                loop {
                    if self.peek().is_none() {
                        return Err(self.err_from(start, LexErrorKind::UnterminatedBlockComment));
                    }
                    if self.opts.nested_block_comments && self.peek() == Some(b'/') && self.peek2() == Some(b'*') {
                        self.off += 2;
                        depth += 1;
                        continue;
                    }
                    if self.peek() == Some(b'*') && self.peek2() == Some(b'/') {
                        self.off += 2;
                        depth -= 1;
                        if depth == 0 { break; }
                        continue;
                    }
                    self.bump_char();
                }
                continue;
            }
            break;
        }
        Ok(())
    }

    fn lex_string(&mut self, start_quote: usize) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            let c = self.bump_char().ok_or_else(|| self.err_from(start_quote, LexErrorKind::UnterminatedString))?;
            match c {
                '"' => break,
                '\\' => out.push(self.lex_escape()?),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    /// Décode l'échappement qui suit un `\` déjà consommé.
    fn lex_escape(&mut self) -> Result<char, LexError> {
        let esc = self.bump_char().ok_or_else(|| self.err_here(LexErrorKind::UnterminatedString))?;
        Ok(match esc {
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'x' => {
                let h1 = self.bump_char().and_then(hex_val).ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))?;
                let h2 = self.bump_char().and_then(hex_val).ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))?;
                char::from((h1 << 4) | h2)
            }
            'u' => self.read_unicode_escape()?,
            _ => return Err(self.err_here(LexErrorKind::InvalidEscape)),
        })
    }

    fn read_unicode_escape(&mut self) -> Result<char, LexError> {
        if !self.eat('{') {
            return Err(self.err_here(LexErrorKind::InvalidEscape));
        }
        let start = self.off;
        while let Some(c) = self.peek_char() {
            if c == '}' { break; }
            if !(c.is_ascii_hexdigit() || c == '_') {
                return Err(self.err_here(LexErrorKind::InvalidEscape));
            }
            self.off += 1;
        }
        let raw = self.src[start..self.off].replace('_', "");
        if !self.eat('}') {
            return Err(self.err_here(LexErrorKind::InvalidEscape));
        }
        let v = u32::from_str_radix(&raw, 16).map_err(|_| self.err_here(LexErrorKind::InvalidEscape))?;
        char::from_u32(v).ok_or_else(|| self.err_here(LexErrorKind::InvalidEscape))
    }

    /* ────────── Chaînes formatées ────────── */

    fn lex_fstring(&mut self, start: usize) -> Result<Vec<FStrPart>, LexError> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let c = self.bump_char().ok_or_else(|| self.err_from(start, LexErrorKind::UnterminatedString))?;
            match c {
                '"' => break,
                '\\' => lit.push(self.lex_escape()?),
                '{' if self.eat('{') => lit.push('{'),
                '}' if self.eat('}') => lit.push('}'),
                '}' => return Err(self.err_from(self.off - 1, LexErrorKind::SingleClosingBrace)),
                '{' => {
                    flush_lit(&mut parts, &mut lit);
                    parts.push(FStrPart::Field(self.lex_field(start, 0)?));
                }
                other => lit.push(other),
            }
        }
        flush_lit(&mut parts, &mut lit);
        Ok(parts)
    }

    /// Lit un champ dont le `{` ouvrant est déjà consommé, jusqu'au `}` inclus.
    fn lex_field(&mut self, fstr_start: usize, depth: u8) -> Result<FStrField, LexError> {
        let expr_start = self.off;
        let mut nest = 0u32;
        loop {
            let c = self.peek_char().ok_or_else(|| self.err_from(fstr_start, LexErrorKind::UnterminatedField))?;
            match c {
                '"' => {
                    // chaîne imbriquée dans l'expression : sautée telle quelle
                    self.off += 1;
                    self.lex_string(self.off - 1)?;
                }
                '(' | '{' => {
                    nest += 1;
                    self.off += 1;
                }
                ')' => {
                    nest = nest.saturating_sub(1);
                    self.off += 1;
                }
                '}' if nest > 0 => {
                    nest -= 1;
                    self.off += 1;
                }
                '!' if nest == 0 && self.peek2() != Some(b'=') => break,
                ':' | '}' if nest == 0 => break,
                _ => {
                    self.bump_char();
                }
            }
        }
        let expr = self.span_from(expr_start);
        if self.src[expr_start..self.off].trim().is_empty() {
            return Err(self.err_from(expr_start, LexErrorKind::EmptyField));
        }

        let conversion = if self.eat('!') {
            match self.bump_char() {
                Some(c @ ('s' | 'r')) => Some(c),
                Some(other) => return Err(self.err_from(self.off - other.len_utf8(), LexErrorKind::InvalidConversion(other))),
                None => return Err(self.err_from(fstr_start, LexErrorKind::UnterminatedField)),
            }
        } else {
            None
        };

        let spec = if self.eat(':') { Some(self.lex_spec(fstr_start, depth)?) } else { None };

        if !self.eat('}') {
            return Err(self.err_here(LexErrorKind::UnterminatedField));
        }
        Ok(FStrField { expr, conversion, spec })
    }

    /// Lit un spécificateur jusqu'au `}` fermant du champ (non consommé).
    fn lex_spec(&mut self, fstr_start: usize, depth: u8) -> Result<Vec<FStrPart>, LexError> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let c = self.peek_char().ok_or_else(|| self.err_from(fstr_start, LexErrorKind::UnterminatedField))?;
            match c {
                '}' => break,
                '"' => return Err(self.err_here(LexErrorKind::UnterminatedField)),
                '{' => {
                    if depth + 1 >= self.opts.max_spec_nesting {
                        return Err(self.err_here(LexErrorKind::SpecTooDeep));
                    }
                    self.off += 1;
                    flush_lit(&mut parts, &mut lit);
                    parts.push(FStrPart::Field(self.lex_field(fstr_start, depth + 1)?));
                }
                '\\' => {
                    self.off += 1;
                    lit.push(self.lex_escape()?);
                }
                other => {
                    self.off += other.len_utf8();
                    lit.push(other);
                }
            }
        }
        flush_lit(&mut parts, &mut lit);
        Ok(parts)
    }

    /* ────────── Nombres ────────── */

    fn lex_number(&mut self, start: usize, first: char) -> Result<TokenKind<'a>, LexError> {
        if first == '0' {
            let base = match self.peek() {
                Some(b'x' | b'X') => Some(16),
                Some(b'o' | b'O') => Some(8),
                Some(b'b' | b'B') => Some(2),
                _ => None,
            };
            if let Some(base) = base {
                self.off += 1;
                self.consume_while(|b| is_digit_base(b as char, base) || b == b'_');
                let raw = self.src[start + 2..self.off].replace('_', "");
                if raw.is_empty() {
                    return Err(self.err_from(start, LexErrorKind::InvalidNumber));
                }
                let v = i64::from_str_radix(&raw, base).map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))?;
                return Ok(TokenKind::Int(v));
            }
        }

        // Décimal / flottant
        self.consume_while(|b| b.is_ascii_digit() || b == b'_');
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek2().is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            self.off += 1;
            self.consume_while(|b| b.is_ascii_digit() || b == b'_');
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.off += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.off += 1;
            }
            self.consume_while(|b| b.is_ascii_digit() || b == b'_');
        }

        let raw = self.src[start..self.off].replace('_', "");
        if is_float {
            raw.parse::<f64>().map(TokenKind::Float).map_err(|_| self.err_from(start, LexErrorKind::InvalidNumber))
        } else {
            raw.parse::<i64>().map(TokenKind::Int).map_err(|_| self.err_from(start, LexErrorKind::IntOverflow))
        }
    }

    /* ────────── Spans / erreurs ────────── */

    #[inline] fn span_from(&self, start: usize) -> Span {
        Span::new(self.source, Pos(start as u32), Pos(self.off as u32))
    }
    #[inline] fn err_here(&self, kind: LexErrorKind) -> LexError {
        let at = Pos(self.off as u32);
        LexError { span: Span::new(self.source, at, at.saturating_add(1)), kind }
    }
    #[inline] fn err_from(&self, start: usize, kind: LexErrorKind) -> LexError {
        LexError { span: self.span_from(start), kind }
    }
}

/* ─────────────────────────── Helpers ─────────────────────────── */

fn flush_lit(parts: &mut Vec<FStrPart>, lit: &mut String) {
    if !lit.is_empty() {
        parts.push(FStrPart::Lit(std::mem::take(lit)));
    }
}

#[inline]
const fn is_ident_start(c: char) -> bool { c == '_' || c.is_ascii_alphabetic() }

#[inline]
const fn is_ident_continue(c: char) -> bool { c == '_' || c.is_ascii_alphanumeric() }

#[inline]
const fn is_digit_base(c: char, base: u32) -> bool {
    match base {
        2 => matches!(c, '0' | '1'),
        8 => matches!(c, '0'..='7'),
        16 => c.is_ascii_hexdigit(),
        _ => c.is_ascii_digit(),
    }
}

#[inline]
fn keyword_of(s: &str) -> Option<Keyword> {
    Some(match s {
        "fn" => Keyword::Fn,
        "let" => Keyword::Let,
        "if" => Keyword::If,
        "else" => Keyword::Else,
        "while" => Keyword::While,
        "return" => Keyword::Return,
        "use" => Keyword::Use,
        "True" => Keyword::True,
        "False" => Keyword::False,
        "None" => Keyword::None,
        _ => return None,
    })
}

#[inline]
const fn hex_val(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some((c as u8) - b'0'),
        'a'..='f' => Some((c as u8) - b'a' + 10),
        'A'..='F' => Some((c as u8) - b'A' + 10),
        _ => None,
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(src: &str) -> Vec<TokenKind<'_>> {
        Lexer::new(src, SourceId(0)).tokenize().unwrap().into_iter().map(|t| t.value).collect()
    }

    fn field<'s>(src: &'s str, part: &FStrPart) -> (&'s str, Option<char>, Option<Vec<FStrPart>>) {
        match part {
            FStrPart::Field(f) => {
                (&src[f.expr.start.0 as usize..f.expr.end.0 as usize], f.conversion, f.spec.clone())
            }
            FStrPart::Lit(l) => panic!("expected field, got literal {l:?}"),
        }
    }

    #[test]
    fn idents_keywords() {
        use Keyword::*;
        use TokenKind::*;
        let v = toks("fn let if else while return use True False None ident _x x1 fx");
        assert_eq!(
            v[..10],
            [Kw(Fn), Kw(Let), Kw(If), Kw(Else), Kw(While), Kw(Return), Kw(Use), Kw(True), Kw(False), Kw(None)]
        );
        assert_eq!(v[10..14], [Ident("ident"), Ident("_x"), Ident("x1"), Ident("fx")]);
    }

    #[test]
    fn numbers_and_floats() {
        use TokenKind::*;
        let v = toks("0xFF 0o77 0b1010 123 1_234 3.14159 1e3 2.5e-2");
        assert_eq!(v[..5], [Int(255), Int(63), Int(10), Int(123), Int(1234)]);
        assert_eq!(v[5], Float(3.14159));
        assert_eq!(v[6], Float(1000.0));
        assert_eq!(v[7], Float(0.025));
    }

    #[test]
    fn strings_and_unicode() {
        use TokenKind::*;
        let v = toks(r#""hi" "\n" "\x41" "\u{1F600}" "été""#);
        assert_eq!(v[..5], [Str("hi".into()), Str("\n".into()), Str("A".into()), Str("😀".into()), Str("été".into())]);
    }

    #[test]
    fn comments_ws() {
        use TokenKind::*;
        let v = toks("/* a /* nested é */ still */ + // line\n 1");
        assert_eq!(v, vec![Plus, Int(1), Eof]);
    }

    #[test]
    fn ops_punct() {
        use TokenKind::*;
        let v = toks("== != <= >= ! + - * / % ( ) { } , . ; : < > =");
        assert_eq!(
            v,
            vec![
                EqEq, Ne, Le, Ge, Bang, Plus, Minus, Star, Slash, Percent, LParen, RParen, LBrace, RBrace, Comma,
                Dot, Semi, Colon, Lt, Gt, Eq, Eof
            ]
        );
    }

    #[test]
    fn fstring_parts() {
        let src = r#"f"a{x}b{y!r}{{lit}}{z:>10}""#;
        let v = toks(src);
        let TokenKind::FStr(parts) = &v[0] else { panic!("expected f-string") };
        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0], FStrPart::Lit("a".into()));
        assert_eq!(field(src, &parts[1]), ("x", None, None));
        assert_eq!(parts[2], FStrPart::Lit("b".into()));
        assert_eq!(field(src, &parts[3]), ("y", Some('r'), None));
        assert_eq!(parts[4], FStrPart::Lit("{lit}".into()));
        assert_eq!(field(src, &parts[5]), ("z", None, Some(vec![FStrPart::Lit(">10".into())])));
    }

    #[test]
    fn fstring_nested_spec_and_calls() {
        let src = r#"f"{pi:.{n}f} {f(a, "}")!s} {a != b}""#;
        let v = toks(src);
        let TokenKind::FStr(parts) = &v[0] else { panic!("expected f-string") };
        let (expr, conv, spec) = field(src, &parts[0]);
        assert_eq!((expr, conv), ("pi", None));
        let spec = spec.unwrap();
        assert_eq!(spec[0], FStrPart::Lit(".".into()));
        assert_eq!(field(src, &spec[1]).0, "n");
        assert_eq!(spec[2], FStrPart::Lit("f".into()));
        assert_eq!(field(src, &parts[2]), (r#"f(a, "}")"#, Some('s'), None));
        assert_eq!(field(src, &parts[4]).0, "a != b");
    }

    #[test]
    fn fstring_empty_spec_is_kept() {
        let src = r#"f"{x:}""#;
        let v = toks(src);
        let TokenKind::FStr(parts) = &v[0] else { panic!("expected f-string") };
        assert_eq!(field(src, &parts[0]), ("x", None, Some(vec![])));
    }

    #[test]
    fn fstring_errors() {
        let err = |s: &str| Lexer::new(s, SourceId(0)).tokenize().unwrap_err().kind;
        assert_eq!(err(r#"f"a}b""#), LexErrorKind::SingleClosingBrace);
        assert_eq!(err(r#"f"{ }""#), LexErrorKind::EmptyField);
        assert_eq!(err(r#"f"{x!a}""#), LexErrorKind::InvalidConversion('a'));
        assert_eq!(err(r#"f"{x"#), LexErrorKind::UnterminatedField);
        assert_eq!(err(r#"f"{x:{y:{z}}}""#), LexErrorKind::SpecTooDeep);
    }

    #[test]
    fn sub_lexer_keeps_absolute_spans() {
        let src = "let a = f\"{b + 1}\"";
        let start = src.find('b').unwrap() as u32;
        let span = Span::new(SourceId(0), Pos(start), Pos(start + 5));
        let toks = Lexer::for_span(src, span, LexerOptions::default()).tokenize().unwrap();
        assert_eq!(toks[0].value, TokenKind::Ident("b"));
        assert_eq!(toks[0].span.start, Pos(start));
        assert_eq!(toks[2].value, TokenKind::Int(1));
        assert_eq!(toks[3].value, TokenKind::Eof);
    }

    #[test]
    fn linemap_basic() {
        let lm = LineMap::new("a\nbb\nccc");
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(2)), (2, 1));
        assert_eq!(lm.line_col(Pos(6)), (3, 3));
        assert_eq!(lm.line_of(Pos(4)), 2);
    }

    proptest::proptest! {
        #[test]
        fn lexer_never_panics(s in "\\PC{0,40}") {
            let _ = Lexer::new(&s, SourceId(0)).tokenize();
        }

        #[test]
        fn plain_fstrings_are_one_literal(s in "[a-zA-Z0-9 .,]{1,30}") {
            let src = format!("f\"{s}\"");
            let v = Lexer::new(&src, SourceId(0)).tokenize().unwrap();
            proptest::prop_assert_eq!(&v[0].value, &TokenKind::FStr(vec![FStrPart::Lit(s.clone())]));
        }
    }
}
