// src/lib.rs
//! fmthook Compiler - vérification + émission d'unités de bytecode
//!
//! - Entrée : `fmthook_ast::Program`
//! - Sortie : `fmthook_core::bytecode::Chunk` (arbre d'unités, une par fonction)
//! - Diagnostics : erreurs/warnings collectés avec `Span`
//! - Passes (trait `Pass`) puis émission en forme décodée (`Bytecode`)
//!
//! Convention d'émission :
//! - niveau module : `LOAD_NAME` / `STORE_NAME`
//! - fonctions : paramètres et `let` en variables locales, le reste via `LOAD_GLOBAL`
//! - champ de chaîne formatée : `<expr> [CONVERT c] [<spec>] FORMAT_VALUE flags`
//!
//! API principale :
//! ```
//! use fmthook_compiler::compile_source;
//!
//! let chunk = compile_source("let x = 5; print(f\"{x}\");", Some("main.fh")).unwrap();
//! assert_eq!(chunk.name, "<module>");
//! ```

#![deny(missing_docs)]

use std::{collections::BTreeSet, fmt, rc::Rc};

use fmthook_ast as ast;
use fmthook_core::{
    bytecode::{Arg, BinOp, Bytecode, Chunk, ConstValue, Conversion, Instr, Opcode, UnaryOp, FORMAT_SPEC_PRESENT},
    CoreError, SourceId,
};
use fmthook_parser::{ParseError, Parser};
use log::debug;
use thiserror::Error;

/// Nom de l'unité de niveau module.
pub const MODULE_UNIT: &str = "<module>";

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options du compilateur
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Activer des vérifications strictes (warnings→erreurs)
    pub deny_warnings: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
/* Diagnostics */
// ─────────────────────────────────────────────────────────────────────────────

/// Gravité d’un diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Alerte
    Warning,
    /// Erreur bloquante
    Error,
}

/// Un diagnostic (message, gravité, span)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Gravité
    pub severity: Severity,
    /// Message humain
    pub message: String,
    /// Localisation
    pub span: ast::Span,
}

impl Diagnostic {
    /// Construit une erreur
    pub fn error(msg: impl Into<String>, span: ast::Span) -> Self {
        Self { severity: Severity::Error, message: msg.into(), span }
    }
    /// Construit un warning
    pub fn warn(msg: impl Into<String>, span: ast::Span) -> Self {
        Self { severity: Severity::Warning, message: msg.into(), span }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {} (line {}, column {})", self.message, self.span.line, self.span.column)
    }
}

/// Erreur globale de compilation
#[derive(Debug, Error)]
pub enum CompileError {
    /// Erreur de syntaxe (lexer ou parser).
    #[error("syntax error: {0}")]
    Parse(#[from] ParseError),
    /// Diagnostics bloquants accumulés par les passes.
    #[error("{}", summarize(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// L'unité émise est invalide (pile, labels).
    #[error("invalid unit: {0}")]
    Core(#[from] CoreError),
}

fn summarize(diags: &[Diagnostic]) -> String {
    match diags {
        [] => "compilation failed".into(),
        [one] => one.to_string(),
        [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
    }
}

/// Résultat du compilateur.
pub type CompileResult<T> = Result<T, CompileError>;

// ─────────────────────────────────────────────────────────────────────────────
/* Contexte & Passes */
// ─────────────────────────────────────────────────────────────────────────────

/// Contexte mut du compilateur partagé entre passes
pub struct Ctx<'a> {
    /// Options
    pub opts: &'a CompilerOptions,
    /// Diagnostics accumulés
    pub diags: &'a mut Vec<Diagnostic>,
}

/// Trait générique d’une passe de compilation
pub trait Pass {
    /// Exécuter la passe sur le programme
    fn run(&mut self, ctx: &mut Ctx<'_>, program: &ast::Program);
}

// ─────────────────────────────────────────────────────────────────────────────
/* Passe : portées (locals de fonction, return hors fonction, code mort) */
// ─────────────────────────────────────────────────────────────────────────────

struct ScopeCheck;

impl ScopeCheck {
    fn check_stmts(ctx: &mut Ctx<'_>, stmts: &[ast::Stmt], locals: &mut Option<BTreeSet<String>>) {
        let mut returned = false;
        for st in stmts {
            if returned {
                ctx.diags.push(Diagnostic::warn("unreachable statement after `return`", st.span()));
                returned = false;
            }
            match st {
                ast::Stmt::Fn(f) => {
                    if let Some(l) = locals.as_mut() {
                        l.insert(f.name.clone());
                    }
                    let mut inner = BTreeSet::new();
                    for p in &f.params {
                        if !inner.insert(p.clone()) {
                            ctx.diags.push(Diagnostic::error(format!("duplicate parameter `{p}` in `{}`", f.name), f.span));
                        }
                    }
                    for (p, value) in f.defaulted_params() {
                        if default_const(value).is_none() {
                            ctx.diags.push(Diagnostic::error(format!("default value of `{p}` must be a constant"), f.span));
                        }
                    }
                    let mut inner = Some(inner);
                    Self::check_stmts(ctx, &f.body.stmts, &mut inner);
                }
                ast::Stmt::Let { name, span, .. } => {
                    if let Some(l) = locals.as_mut() {
                        if !l.insert(name.clone()) {
                            ctx.diags.push(Diagnostic::warn(format!("local `{name}` is redeclared"), *span));
                        }
                    }
                }
                ast::Stmt::Assign { name, span, .. } => {
                    if let Some(l) = locals.as_ref() {
                        if !l.contains(name) {
                            ctx.diags.push(Diagnostic::error(
                                format!("assignment to undeclared local `{name}` (declare it with `let`)"),
                                *span,
                            ));
                        }
                    }
                }
                ast::Stmt::Use { name, .. } => {
                    if let Some(l) = locals.as_mut() {
                        l.insert(name.clone());
                    }
                }
                ast::Stmt::Return(_, span) => {
                    if locals.is_none() {
                        ctx.diags.push(Diagnostic::error("`return` outside of a function", *span));
                    }
                    returned = true;
                }
                ast::Stmt::While { body, .. } => Self::check_stmts(ctx, &body.stmts, locals),
                ast::Stmt::If { then_block, else_block, .. } => {
                    Self::check_stmts(ctx, &then_block.stmts, locals);
                    if let Some(eb) = else_block {
                        Self::check_stmts(ctx, &eb.stmts, locals);
                    }
                }
                ast::Stmt::Expr(..) => {}
            }
        }
    }
}

impl Pass for ScopeCheck {
    fn run(&mut self, ctx: &mut Ctx<'_>, program: &ast::Program) {
        Self::check_stmts(ctx, &program.stmts, &mut None);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Backend : émission en forme décodée */
// ─────────────────────────────────────────────────────────────────────────────

/// Émetteur d'une unité (module ou fonction).
struct UnitEmitter<'f> {
    bc: Bytecode,
    /// `None` au niveau module.
    locals: Option<BTreeSet<String>>,
    filename: Option<&'f str>,
    line: u32,
}

impl<'f> UnitEmitter<'f> {
    fn module(filename: Option<&'f str>) -> Self {
        let mut bc = Bytecode::new(MODULE_UNIT);
        bc.filename = filename.map(str::to_string);
        Self { bc, locals: None, filename, line: 1 }
    }

    fn function(f: &ast::Function, filename: Option<&'f str>) -> Self {
        let mut bc = Bytecode::new(f.name.clone());
        bc.params.clone_from(&f.params);
        bc.defaults = f.defaults.iter().filter_map(default_const).collect();
        bc.filename = filename.map(str::to_string);
        Self { bc, locals: Some(f.params.iter().cloned().collect()), filename, line: f.span.line }
    }

    fn finish(mut self) -> Result<Chunk, CoreError> {
        self.emit_const(ConstValue::None);
        self.emit(Opcode::Return, Arg::None);
        self.bc.to_chunk()
    }

    /* ─────────── Utilitaires ─────────── */

    fn emit(&mut self, opcode: Opcode, arg: Arg) { self.bc.push(Instr::new(opcode, arg, self.line)); }

    fn emit_int(&mut self, opcode: Opcode, n: u32) { self.emit(opcode, Arg::Int(n)); }

    fn emit_const(&mut self, v: ConstValue) { self.emit(Opcode::LoadConst, Arg::Const(v)); }

    fn is_local(&self, name: &str) -> bool { self.locals.as_ref().is_some_and(|l| l.contains(name)) }

    fn load(&mut self, name: &str) {
        if self.locals.is_none() {
            self.emit(Opcode::LoadName, Arg::Name(name.into()));
        } else if self.is_local(name) {
            self.emit(Opcode::LoadFast, Arg::Local(name.into()));
        } else {
            self.emit(Opcode::LoadGlobal, Arg::Name(name.into()));
        }
    }

    fn store(&mut self, name: &str) {
        match self.locals.as_mut() {
            None => self.emit(Opcode::StoreName, Arg::Name(name.into())),
            Some(l) => {
                l.insert(name.to_string());
                self.emit(Opcode::StoreFast, Arg::Local(name.into()));
            }
        }
    }

    /* ─────────── Instructions ─────────── */

    fn stmts(&mut self, stmts: &[ast::Stmt]) -> Result<(), CoreError> {
        for st in stmts {
            self.stmt(st)?;
        }
        Ok(())
    }

    fn stmt(&mut self, st: &ast::Stmt) -> Result<(), CoreError> {
        self.line = st.span().line;
        match st {
            ast::Stmt::Fn(f) => {
                let code = UnitEmitter::function(f, self.filename).emit_body(&f.body)?;
                self.line = f.span.line;
                self.emit_const(ConstValue::Code(Rc::new(code)));
                self.emit(Opcode::MakeFunction, Arg::None);
                self.store(&f.name);
            }
            ast::Stmt::Let { name, value, .. } | ast::Stmt::Assign { name, value, .. } => {
                self.expr(value);
                self.store(name);
            }
            ast::Stmt::Use { name, .. } => {
                self.emit(Opcode::Import, Arg::Name(name.clone()));
                self.store(name);
            }
            ast::Stmt::Expr(e, _) => {
                self.expr(e);
                self.emit(Opcode::Pop, Arg::None);
            }
            ast::Stmt::Return(value, _) => {
                match value {
                    Some(e) => self.expr(e),
                    None => self.emit_const(ConstValue::None),
                }
                self.emit(Opcode::Return, Arg::None);
            }
            ast::Stmt::While { condition, body, .. } => {
                let top = self.bc.new_label();
                let end = self.bc.new_label();
                self.bc.place(top);
                self.expr(condition);
                self.emit(Opcode::JumpIfFalse, Arg::Label(end));
                self.stmts(&body.stmts)?;
                self.emit(Opcode::Jump, Arg::Label(top));
                self.bc.place(end);
            }
            ast::Stmt::If { condition, then_block, else_block, .. } => {
                let otherwise = self.bc.new_label();
                self.expr(condition);
                self.emit(Opcode::JumpIfFalse, Arg::Label(otherwise));
                self.stmts(&then_block.stmts)?;
                match else_block {
                    Some(eb) => {
                        let end = self.bc.new_label();
                        self.emit(Opcode::Jump, Arg::Label(end));
                        self.bc.place(otherwise);
                        self.stmts(&eb.stmts)?;
                        self.bc.place(end);
                    }
                    None => self.bc.place(otherwise),
                }
            }
        }
        Ok(())
    }

    fn emit_body(mut self, body: &ast::Block) -> Result<Chunk, CoreError> {
        self.stmts(&body.stmts)?;
        self.finish()
    }

    /* ─────────── Expressions ─────────── */

    fn expr(&mut self, e: &ast::Expr) {
        match e {
            ast::Expr::Literal(l) => self.emit_const(literal_const(l)),
            ast::Expr::Ident(name) => self.load(name),
            ast::Expr::Call { func, args } => {
                self.expr(func);
                for a in args {
                    self.expr(a);
                }
                self.emit_int(Opcode::Call, args.len() as u32);
            }
            ast::Expr::Binary { left, op, right } => {
                self.expr(left);
                self.expr(right);
                self.emit_int(Opcode::Binary, bin_op(*op) as u32);
            }
            ast::Expr::Unary { op, expr } => {
                self.expr(expr);
                let op = match op {
                    ast::UnaryOp::Neg => UnaryOp::Neg,
                    ast::UnaryOp::Not => UnaryOp::Not,
                };
                self.emit_int(Opcode::Unary, op as u32);
            }
            ast::Expr::Field { expr, field } => {
                self.expr(expr);
                self.emit(Opcode::LoadAttr, Arg::Name(field.clone()));
            }
            ast::Expr::FString(parts) => self.fstring(parts),
        }
    }

    /// Empile exactement une chaîne.
    fn fstring(&mut self, parts: &[ast::FStringPart]) {
        let mut pieces = 0u32;
        for part in parts {
            match part {
                ast::FStringPart::Literal(s) if s.is_empty() => {}
                ast::FStringPart::Literal(s) => {
                    self.emit_const(ConstValue::Str(s.clone()));
                    pieces += 1;
                }
                ast::FStringPart::Field { expr, conversion, spec } => {
                    self.field(expr, *conversion, spec.as_deref());
                    pieces += 1;
                }
            }
        }
        match pieces {
            0 => self.emit_const(ConstValue::Str(String::new())),
            1 => {}
            n => self.emit_int(Opcode::BuildString, n),
        }
    }

    fn field(&mut self, expr: &ast::Expr, conversion: Option<ast::Conversion>, spec: Option<&[ast::FStringPart]>) {
        self.expr(expr);
        if let Some(c) = conversion {
            let c = match c {
                ast::Conversion::Str => Conversion::Str,
                ast::Conversion::Repr => Conversion::Repr,
            };
            self.emit_int(Opcode::Convert, c as u32);
        }
        let mut flags = 0;
        if let Some(spec) = spec {
            match literal_text(spec) {
                Some(text) => self.emit_const(ConstValue::Str(text)),
                None => self.fstring(spec),
            }
            flags |= FORMAT_SPEC_PRESENT;
        }
        self.emit_int(Opcode::FormatValue, flags);
    }
}

fn literal_const(l: &ast::Literal) -> ConstValue {
    match l {
        ast::Literal::Int(i) => ConstValue::Int(*i),
        ast::Literal::Float(f) => ConstValue::Float(*f),
        ast::Literal::Bool(b) => ConstValue::Bool(*b),
        ast::Literal::Str(s) => ConstValue::Str(s.clone()),
        ast::Literal::None => ConstValue::None,
    }
}

/// Valeur par défaut d'un paramètre : littéral, éventuellement négatif.
fn default_const(e: &ast::Expr) -> Option<ConstValue> {
    match e {
        ast::Expr::Literal(l) => Some(literal_const(l)),
        ast::Expr::Unary { op: ast::UnaryOp::Neg, expr } => match **expr {
            ast::Expr::Literal(ast::Literal::Int(i)) => i.checked_neg().map(ConstValue::Int),
            ast::Expr::Literal(ast::Literal::Float(f)) => Some(ConstValue::Float(-f)),
            _ => None,
        },
        _ => None,
    }
}

/// Texte d'un spécificateur sans champ imbriqué.
fn literal_text(parts: &[ast::FStringPart]) -> Option<String> {
    parts.iter().try_fold(String::new(), |mut acc, p| match p {
        ast::FStringPart::Literal(s) => {
            acc.push_str(s);
            Some(acc)
        }
        ast::FStringPart::Field { .. } => None,
    })
}

const fn bin_op(op: ast::BinaryOp) -> BinOp {
    match op {
        ast::BinaryOp::Add => BinOp::Add,
        ast::BinaryOp::Sub => BinOp::Sub,
        ast::BinaryOp::Mul => BinOp::Mul,
        ast::BinaryOp::Div => BinOp::Div,
        ast::BinaryOp::Mod => BinOp::Mod,
        ast::BinaryOp::Eq => BinOp::Eq,
        ast::BinaryOp::Ne => BinOp::Ne,
        ast::BinaryOp::Lt => BinOp::Lt,
        ast::BinaryOp::Le => BinOp::Le,
        ast::BinaryOp::Gt => BinOp::Gt,
        ast::BinaryOp::Ge => BinOp::Ge,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Compiler façade */
// ─────────────────────────────────────────────────────────────────────────────

/// Le compilateur fmthook : orchestre passes + backend
pub struct Compiler {
    /// Options
    pub options: CompilerOptions,
    diags: Vec<Diagnostic>,
}

impl Compiler {
    /// Crée un compilateur
    pub const fn new(options: CompilerOptions) -> Self { Self { options, diags: Vec::new() } }

    /// Compile un programme AST → unité de module
    pub fn compile(&mut self, program: &ast::Program, filename: Option<&str>) -> CompileResult<Chunk> {
        self.diags.clear();

        // 1) Portées
        {
            let mut ctx = Ctx { opts: &self.options, diags: &mut self.diags };
            ScopeCheck.run(&mut ctx, program);
        }

        // Vérif diagnostics
        let has_errors = self.diags.iter().any(|d| d.severity == Severity::Error);
        let has_warnings = self.diags.iter().any(|d| d.severity == Severity::Warning);
        if has_errors || (self.options.deny_warnings && has_warnings) {
            let blocking = self
                .diags
                .iter()
                .filter(|d| d.severity == Severity::Error || self.options.deny_warnings)
                .cloned()
                .collect();
            return Err(CompileError::Diagnostics(blocking));
        }

        // 2) Backend
        let mut unit = UnitEmitter::module(filename);
        unit.stmts(&program.stmts)?;
        let chunk = unit.finish()?;
        debug!(
            "compiled {}: {} unit(s), {} op(s) at top level",
            filename.unwrap_or(MODULE_UNIT),
            chunk.unit_count(),
            chunk.ops.len()
        );
        Ok(chunk)
    }

    /// Diagnostics (warnings compris) de la dernière compilation
    pub fn diagnostics(&self) -> &[Diagnostic] { &self.diags }

    /// Récupère et vide les diagnostics accumulés
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> { std::mem::take(&mut self.diags) }
}

impl Default for Compiler {
    fn default() -> Self { Self::new(CompilerOptions::default()) }
}

/// Parse puis compile une source complète.
pub fn compile_source(src: &str, filename: Option<&str>) -> CompileResult<Chunk> {
    let program = Parser::new(src, SourceId(0)).parse_program()?;
    Compiler::default().compile(&program, filename)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use fmthook_core::bytecode::Op;
    use pretty_assertions::assert_eq;

    fn ops_of(chunk: &Chunk) -> Vec<(Opcode, u32)> { chunk.ops.iter().map(|o| (o.code, o.arg)).collect() }

    fn decoded(src: &str) -> Vec<Instr> {
        let chunk = compile_source(src, None).unwrap();
        Bytecode::from_chunk(&chunk).unwrap().instrs().cloned().collect()
    }

    fn shape(instrs: &[Instr]) -> Vec<(Opcode, Arg)> { instrs.iter().map(|i| (i.opcode, i.arg.clone())).collect() }

    #[test]
    fn single_field_has_no_build_string() {
        let got = decoded("f\"{x}\";");
        assert_eq!(
            shape(&got),
            vec![
                (Opcode::LoadName, Arg::Name("x".into())),
                (Opcode::FormatValue, Arg::Int(0)),
                (Opcode::Pop, Arg::None),
                (Opcode::LoadConst, Arg::Const(ConstValue::None)),
                (Opcode::Return, Arg::None),
            ]
        );
    }

    #[test]
    fn spec_conversion_and_literals() {
        let got = decoded("f\"v={x!r:.2f}!\";");
        assert_eq!(
            shape(&got[..6]),
            vec![
                (Opcode::LoadConst, Arg::Const(ConstValue::Str("v=".into()))),
                (Opcode::LoadName, Arg::Name("x".into())),
                (Opcode::Convert, Arg::Int(Conversion::Repr as u32)),
                (Opcode::LoadConst, Arg::Const(ConstValue::Str(".2f".into()))),
                (Opcode::FormatValue, Arg::Int(FORMAT_SPEC_PRESENT)),
                (Opcode::LoadConst, Arg::Const(ConstValue::Str("!".into()))),
            ]
        );
        assert_eq!((got[6].opcode, got[6].arg.clone()), (Opcode::BuildString, Arg::Int(3)));
    }

    #[test]
    fn nested_spec_field_compiles_to_inner_format() {
        let got = decoded("f\"{x:>{w}}\";");
        assert_eq!(
            shape(&got[..6]),
            vec![
                (Opcode::LoadName, Arg::Name("x".into())),
                (Opcode::LoadConst, Arg::Const(ConstValue::Str(">".into()))),
                (Opcode::LoadName, Arg::Name("w".into())),
                (Opcode::FormatValue, Arg::Int(0)),
                (Opcode::BuildString, Arg::Int(2)),
                (Opcode::FormatValue, Arg::Int(FORMAT_SPEC_PRESENT)),
            ]
        );
    }

    #[test]
    fn empty_spec_is_still_a_spec() {
        let got = decoded("f\"{x:}\";");
        assert_eq!(got[1].arg, Arg::Const(ConstValue::Str(String::new())));
        assert_eq!(got[2].arg, Arg::Int(FORMAT_SPEC_PRESENT));
    }

    #[test]
    fn empty_fstring_is_empty_constant() {
        let got = decoded("let s = f\"\";");
        assert_eq!(got[0].arg, Arg::Const(ConstValue::Str(String::new())));
        assert_eq!(got[1].opcode, Opcode::StoreName);
    }

    #[test]
    fn functions_use_fast_locals_and_globals() {
        let chunk = compile_source("fn f(a) { let b = a; return f\"{b}{c}\"; }", Some("m.fh")).unwrap();
        let code = chunk.nested().next().unwrap();
        assert_eq!(code.name, "f");
        assert_eq!(code.argcount, 1);
        assert_eq!(code.varnames, vec!["a".to_string(), "b".into()]);
        assert_eq!(code.filename.as_deref(), Some("m.fh"));
        let ops: Vec<Opcode> = code.ops.iter().map(|o| o.code).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadFast,
                Opcode::StoreFast,
                Opcode::LoadFast,
                Opcode::FormatValue,
                Opcode::LoadGlobal,
                Opcode::FormatValue,
                Opcode::BuildString,
                Opcode::Return,
                Opcode::LoadConst,
                Opcode::Return,
            ]
        );
        // module : LOAD_CONST code, MAKE_FUNCTION, STORE_NAME f
        assert_eq!(ops_of(&chunk)[1..3], [(Opcode::MakeFunction, 0), (Opcode::StoreName, 0)]);
    }

    #[test]
    fn parameter_defaults_are_stored_on_the_unit() {
        let chunk = compile_source("fn hook(v, s = None, w = -2) { return v; }", None).unwrap();
        let code = chunk.nested().next().unwrap();
        assert_eq!(code.argcount, 3);
        assert_eq!(code.defaults, vec![ConstValue::None, ConstValue::Int(-2)]);
        assert_eq!(code.min_args(), 1);

        let err = compile_source("fn f(a, b = a) { }", None).unwrap_err();
        let CompileError::Diagnostics(d) = err else { panic!("diagnostics attendus") };
        assert!(d[0].message.contains("default value of `b` must be a constant"));
    }

    #[test]
    fn control_flow_compiles_with_balanced_stack() {
        let chunk = compile_source(
            "let i = 0;\nwhile (i < 3) { if (i == 1) { print(i); } else { print(-i); } i = i + 1; }",
            None,
        )
        .unwrap();
        assert!(chunk.ops.iter().any(|o| o.code == Opcode::JumpIfFalse));
        assert_eq!(chunk.stack_size, 2);
        assert_eq!(chunk.lines.line_for_pc(0), 1);
        assert_eq!(chunk.lines.line_for_pc(3), 2);
    }

    #[test]
    fn use_and_field_access() {
        let got = decoded("use helpers; helpers.greet(1);");
        assert_eq!(
            shape(&got[..5]),
            vec![
                (Opcode::Import, Arg::Name("helpers".into())),
                (Opcode::StoreName, Arg::Name("helpers".into())),
                (Opcode::LoadName, Arg::Name("helpers".into())),
                (Opcode::LoadAttr, Arg::Name("greet".into())),
                (Opcode::LoadConst, Arg::Const(ConstValue::Int(1))),
            ]
        );
    }

    #[test]
    fn scope_errors_are_reported() {
        let err = compile_source("fn f() { x = 1; }", None).unwrap_err();
        let CompileError::Diagnostics(d) = err else { panic!("diagnostics attendus") };
        assert_eq!(d.len(), 1);
        assert!(d[0].message.contains("undeclared local `x`"));

        let err = compile_source("return 1;", None).unwrap_err();
        assert!(err.to_string().contains("outside of a function"));

        assert!(matches!(compile_source("let = ;", None), Err(CompileError::Parse(_))));
    }

    #[test]
    fn warnings_only_block_when_denied() {
        let src = "fn f() { return 1; print(2); }";
        let mut c = Compiler::default();
        let program = fmthook_parser::parse(src).unwrap();
        assert!(c.compile(&program, None).is_ok());
        assert_eq!(c.diagnostics()[0].severity, Severity::Warning);

        let mut strict = Compiler::new(CompilerOptions { deny_warnings: true });
        assert!(matches!(strict.compile(&program, None), Err(CompileError::Diagnostics(_))));
    }

    #[test]
    fn reencoding_compiled_units_is_stable() {
        let chunk = compile_source("fn g(x) { return f\"{x:{x}}\"; } print(g(1));", None).unwrap();
        let again = Bytecode::from_chunk(&chunk).unwrap().to_chunk().unwrap();
        assert_eq!(again, chunk);
        assert_eq!(chunk.ops.last(), Some(&Op::simple(Opcode::Return)));
    }
}
