// src/lib.rs
//! fmthook AST (Abstract Syntax Tree)
//!
//! Structures produites par `fmthook-parser` et consommées par
//! `fmthook-compiler`. Les instructions portent un `Span` (ligne, colonne,
//! offset) ; les expressions héritent de la ligne de leur instruction.
//!
//! # Features
//! - `serde` : permet la sérialisation/désérialisation de l’AST
//!
//! # Exemple
//! ```rust
//! use fmthook_ast::{Expr, FStringPart, Literal};
//!
//! let e = Expr::FString(vec![
//!     FStringPart::Literal("x = ".into()),
//!     FStringPart::field(Expr::Ident("x".into())),
//! ]);
//! assert_eq!(e.format_fields(), 1);
//! let _ = Expr::Literal(Literal::Int(42));
//! ```

#![deny(missing_docs)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Localisation dans le code source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Ligne de début
    pub line: u32,
    /// Colonne de début
    pub column: u32,
    /// Offset en bytes depuis le début du fichier
    pub offset: u32,
}

impl Span {
    /// Construit un nouveau `Span` à partir d'une position (ligne, colonne, offset).
    pub const fn new(line: u32, column: u32, offset: u32) -> Self { Self { line, column, offset } }
}

/// Un programme (module) complet
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Program {
    /// Instructions de niveau module, dans l'ordre
    pub stmts: Vec<Stmt>,
}

/// Déclaration de fonction
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Function {
    /// Nom de la fonction.
    pub name: String,
    /// Paramètres positionnels.
    pub params: Vec<String>,
    /// Valeurs par défaut des derniers paramètres.
    pub defaults: Vec<Expr>,
    /// Corps de la fonction.
    pub body: Block,
    /// Localisation de la déclaration.
    pub span: Span,
}

impl Function {
    /// Nombre de paramètres sans valeur par défaut.
    pub fn required_params(&self) -> usize { self.params.len().saturating_sub(self.defaults.len()) }

    /// Paires `(paramètre, défaut)` des derniers paramètres.
    pub fn defaulted_params(&self) -> impl Iterator<Item = (&str, &Expr)> + '_ {
        self.params[self.required_params()..].iter().map(String::as_str).zip(&self.defaults)
    }
}

/// Un bloc d’instructions
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    /// Instructions contenues dans le bloc.
    pub stmts: Vec<Stmt>,
    /// Localisation du bloc.
    pub span: Span,
}

/// Une instruction
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stmt {
    /// `fn name(params) { … }`
    Fn(Function),
    /// `let name = value;`
    Let {
        /// Nom de la variable.
        name: String,
        /// Valeur initiale.
        value: Expr,
        /// Localisation.
        span: Span,
    },
    /// `name = value;`
    Assign {
        /// Nom assigné.
        name: String,
        /// Valeur.
        value: Expr,
        /// Localisation.
        span: Span,
    },
    /// `use name;`
    Use {
        /// Nom du module importé.
        name: String,
        /// Localisation.
        span: Span,
    },
    /// Expression seule (souvent un appel)
    Expr(Expr, Span),
    /// Retour d’une fonction
    Return(Option<Expr>, Span),
    /// Boucle `while`
    While {
        /// Condition évaluée à chaque itération.
        condition: Expr,
        /// Corps de la boucle.
        body: Block,
        /// Localisation de la boucle.
        span: Span,
    },
    /// Conditionnelle `if ... else`
    If {
        /// Expression conditionnelle.
        condition: Expr,
        /// Bloc exécuté si la condition est vraie.
        then_block: Block,
        /// Bloc optionnel exécuté sinon (`else if` = bloc d'un seul `If`).
        else_block: Option<Block>,
        /// Localisation de l'instruction.
        span: Span,
    },
}

impl Stmt {
    /// Localisation de l'instruction.
    pub const fn span(&self) -> Span {
        match self {
            Self::Fn(f) => f.span,
            Self::Let { span, .. }
            | Self::Assign { span, .. }
            | Self::Use { span, .. }
            | Self::Expr(_, span)
            | Self::Return(_, span)
            | Self::While { span, .. }
            | Self::If { span, .. } => *span,
        }
    }
}

/// Une expression
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Expr {
    /// Valeur littérale
    Literal(Literal),
    /// Référence à une variable
    Ident(String),
    /// Appel de fonction
    Call {
        /// Expression représentant la fonction appelée.
        func: Box<Expr>,
        /// Arguments passés à l'appel.
        args: Vec<Expr>,
    },
    /// Opération binaire
    Binary {
        /// Opérande gauche.
        left: Box<Expr>,
        /// Opérateur appliqué.
        op: BinaryOp,
        /// Opérande droite.
        right: Box<Expr>,
    },
    /// Opération unaire
    Unary {
        /// Opérateur unaire appliqué.
        op: UnaryOp,
        /// Expression ciblée par l'opérateur.
        expr: Box<Expr>,
    },
    /// Accès à un attribut de module (`m.name`)
    Field {
        /// Expression support.
        expr: Box<Expr>,
        /// Nom de l'attribut.
        field: String,
    },
    /// Chaîne formatée `f"…"`
    FString(Vec<FStringPart>),
}

impl Expr {
    /// Nombre de champs de formatage (spécificateurs imbriqués compris).
    pub fn format_fields(&self) -> usize {
        match self {
            Self::FString(parts) => count_fields(parts),
            Self::Call { func, args } => func.format_fields() + args.iter().map(Self::format_fields).sum::<usize>(),
            Self::Binary { left, right, .. } => left.format_fields() + right.format_fields(),
            Self::Unary { expr, .. } | Self::Field { expr, .. } => expr.format_fields(),
            Self::Literal(_) | Self::Ident(_) => 0,
        }
    }
}

fn count_fields(parts: &[FStringPart]) -> usize {
    parts
        .iter()
        .map(|p| match p {
            FStringPart::Literal(_) => 0,
            FStringPart::Field { expr, spec, .. } => {
                1 + expr.format_fields() + spec.as_deref().map_or(0, count_fields)
            }
        })
        .sum()
}

/// Partie d'une chaîne formatée
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FStringPart {
    /// Texte littéral.
    Literal(String),
    /// Champ `{expr!conv:spec}`.
    Field {
        /// Expression formatée.
        expr: Box<Expr>,
        /// Conversion explicite.
        conversion: Option<Conversion>,
        /// Spécificateur (littéraux et champs imbriqués).
        spec: Option<Vec<FStringPart>>,
    },
}

impl FStringPart {
    /// Champ sans conversion ni spécificateur.
    pub fn field(expr: Expr) -> Self { Self::Field { expr: Box::new(expr), conversion: None, spec: None } }
}

/// Conversion d'un champ (`!s`, `!r`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Conversion {
    /// `!s`
    Str,
    /// `!r`
    Repr,
}

/// Valeurs littérales
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Literal {
    /// Entier signé 64 bits.
    Int(i64),
    /// Nombre flottant 64 bits.
    Float(f64),
    /// Booléen.
    Bool(bool),
    /// Chaîne UTF-8.
    Str(String),
    /// `None`.
    None,
}

/// Opérateurs binaires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Soustraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// Égalité.
    Eq,
    /// Différence.
    Ne,
    /// Inférieur strict.
    Lt,
    /// Inférieur ou égal.
    Le,
    /// Supérieur strict.
    Gt,
    /// Supérieur ou égal.
    Ge,
}

/// Opérateurs unaires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// Négation arithmétique (`-x`).
    Neg,
    /// Négation logique (`!x`).
    Not,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_nested_format_fields() {
        // f"{a:{w}} {g(f"{b}")}"
        let inner = Expr::FString(vec![FStringPart::field(Expr::Ident("b".into()))]);
        let call = Expr::Call { func: Box::new(Expr::Ident("g".into())), args: vec![inner] };
        let e = Expr::FString(vec![
            FStringPart::Field {
                expr: Box::new(Expr::Ident("a".into())),
                conversion: None,
                spec: Some(vec![FStringPart::field(Expr::Ident("w".into()))]),
            },
            FStringPart::Literal(" ".into()),
            FStringPart::field(call),
        ]);
        assert_eq!(e.format_fields(), 4);
    }

    #[test]
    fn stmt_span_accessor() {
        let sp = Span::new(3, 1, 20);
        let s = Stmt::Use { name: "m".into(), span: sp };
        assert_eq!(s.span(), sp);
        assert_eq!(Stmt::Return(None, sp).span().line, 3);
    }

    #[test]
    fn trailing_params_pair_with_defaults() {
        let sp = Span::default();
        let f = Function {
            name: "hook".into(),
            params: vec!["v".into(), "s".into(), "w".into()],
            defaults: vec![Expr::Literal(Literal::None), Expr::Literal(Literal::Int(3))],
            body: Block { stmts: Vec::new(), span: sp },
            span: sp,
        };
        assert_eq!(f.required_params(), 1);
        let pairs: Vec<_> = f.defaulted_params().collect();
        assert_eq!(pairs, vec![("s", &Expr::Literal(Literal::None)), ("w", &Expr::Literal(Literal::Int(3)))]);
    }
}
