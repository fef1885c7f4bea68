//! Corpus synthétiques partagés par les benches.

#![forbid(unsafe_code)]

use std::fmt::Write as _;

/// Programme de `n` fonctions, chacune avec `fields` interpolations (moitié avec spec).
pub fn synthetic_program(n: usize, fields: usize) -> String {
    let mut src = String::new();
    for i in 0..n {
        let _ = writeln!(src, "fn f{i}(v) {{");
        let _ = write!(src, "  return f\"");
        for j in 0..fields {
            if j % 2 == 0 {
                let _ = write!(src, "{{v}}-");
            } else {
                let _ = write!(src, "{{v:>{j}}}-");
            }
        }
        let _ = writeln!(src, "\";");
        let _ = writeln!(src, "}}");
    }
    src
}

/// Boucle d'appels sur les fonctions de [`synthetic_program`].
pub fn synthetic_calls(n: usize) -> String {
    let mut src = String::new();
    for i in 0..n {
        let _ = writeln!(src, "f{i}({i});");
    }
    src
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corpus_compiles() {
        let src = synthetic_program(3, 4) + &synthetic_calls(3);
        let chunk = fmthook_compiler::compile_source(&src, None).unwrap();
        assert_eq!(chunk.unit_count(), 4);
        assert_eq!(fmthook_rewrite::count_format_ops(&chunk), 12);
    }
}
