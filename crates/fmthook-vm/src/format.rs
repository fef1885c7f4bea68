//! Formateur natif : `FORMAT_VALUE` sans hook, et la native `format`.
//!
//! Mini-langage : `[[fill]align][sign][0][width][.precision][type]`
//! - align : `<` `>` `^` `=`
//! - sign  : `+` `-` ` `
//! - type  : `s d b o x X f F e E g G %`
//!
//! Sans type, un nombre garde sa représentation habituelle (`3.0`, `42`) et
//! s'aligne à droite ; le reste s'aligne à gauche.

use std::str::FromStr;

use fmthook_core::bytecode::float_repr;

use crate::{value::Number, Value, VmError, VmResult};

/// Spécificateur analysé.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    /// Caractère de remplissage.
    pub fill: char,
    /// Alignement explicite.
    pub align: Option<char>,
    /// Gestion du signe.
    pub sign: Option<char>,
    /// Remplissage par zéros après le signe.
    pub zero_pad: bool,
    /// Largeur minimale.
    pub width: usize,
    /// Précision (flottants) ou longueur max (chaînes).
    pub precision: Option<usize>,
    /// Type de présentation.
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self { Self { fill: ' ', align: None, sign: None, zero_pad: false, width: 0, precision: None, ty: None } }
}

const ALIGNS: [char; 4] = ['<', '>', '^', '='];
const TYPES: &str = "sdboxXfFeEgG%";

impl FromStr for FormatSpec {
    type Err = VmError;

    fn from_str(spec: &str) -> VmResult<Self> {
        let invalid = || VmError::Format(format!("invalid format specifier '{spec}'"));
        let mut out = Self::default();
        let chars: Vec<char> = spec.chars().collect();
        let mut i = 0;

        // [[fill]align]
        if chars.len() >= 2 && ALIGNS.contains(&chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(|c| ALIGNS.contains(c)) {
            out.align = Some(chars[0]);
            i = 1;
        }

        if let Some(c) = chars.get(i).copied().filter(|c| matches!(c, '+' | '-' | ' ')) {
            out.sign = Some(c);
            i += 1;
        }

        if chars.get(i) == Some(&'0') {
            out.zero_pad = true;
            i += 1;
        }

        let (width, next) = digits(&chars, i);
        out.width = width.unwrap_or(0);
        i = next;

        if chars.get(i) == Some(&'.') {
            let (precision, next) = digits(&chars, i + 1);
            out.precision = Some(precision.ok_or_else(|| VmError::Format("format specifier missing precision".into()))?);
            i = next;
        }

        if let Some(&c) = chars.get(i) {
            if !TYPES.contains(c) {
                return Err(invalid());
            }
            out.ty = Some(c);
            i += 1;
        }

        if i != chars.len() {
            return Err(invalid());
        }
        Ok(out)
    }
}

fn digits(chars: &[char], start: usize) -> (Option<usize>, usize) {
    let mut end = start;
    while chars.get(end).is_some_and(char::is_ascii_digit) {
        end += 1;
    }
    if end == start {
        return (None, start);
    }
    let n = chars[start..end].iter().fold(0usize, |acc, c| {
        acc.saturating_mul(10).saturating_add(c.to_digit(10).unwrap_or(0) as usize)
    });
    (Some(n), end)
}

/// Formate `value` selon `spec` (chaîne vide = `str(value)`).
pub fn format_value(value: &Value, spec: &str) -> VmResult<String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let spec: FormatSpec = spec.parse()?;
    let unknown = |c: char| VmError::Format(format!("unknown format code '{c}' for object of type '{}'", value.type_name()));

    match (value.as_number(), spec.ty) {
        // bool sans type : rendu texte
        (Some(_), None) if matches!(value, Value::Bool(_)) => format_text(&value.to_string(), &spec),
        (Some(Number::Int(n)), None | Some('d')) => Ok(format_int(n, &spec)),
        (Some(Number::Int(n)), Some(c @ ('b' | 'o' | 'x' | 'X'))) => Ok(format_int_base(n, c, &spec)),
        (Some(Number::Float(_)), Some(c @ ('d' | 'b' | 'o' | 'x' | 'X'))) => Err(unknown(c)),
        (Some(Number::Float(f)), None) => Ok(match spec.precision {
            Some(_) => format_general(f, &spec, false),
            None => pad_number(sign_of(f.is_sign_negative() && !f.is_nan(), &spec), &float_repr(f.abs()), &spec),
        }),
        (Some(n), Some(c @ ('f' | 'F'))) => Ok(format_fixed(n.as_f64(), &spec, c == 'F')),
        (Some(n), Some(c @ ('e' | 'E'))) => Ok(format_exp(n.as_f64(), &spec, c == 'E')),
        (Some(n), Some(c @ ('g' | 'G'))) => Ok(format_general(n.as_f64(), &spec, c == 'G')),
        (Some(n), Some('%')) => Ok(format_percent(n.as_f64(), &spec)),
        (Some(_), Some(c)) => Err(unknown(c)),
        (None, None | Some('s')) => format_text(&value.to_string(), &spec),
        (None, Some(c)) => Err(unknown(c)),
    }
}

/* ----------------------------- Texte ----------------------------- */

fn format_text(text: &str, spec: &FormatSpec) -> VmResult<String> {
    if spec.align == Some('=') {
        return Err(VmError::Format("'=' alignment not allowed in string format specifier".into()));
    }
    if spec.sign.is_some() {
        return Err(VmError::Format("sign not allowed in string format specifier".into()));
    }
    let text: String = match spec.precision {
        Some(p) => text.chars().take(p).collect(),
        None => text.to_owned(),
    };
    Ok(pad(&text, spec.width, spec.align.unwrap_or('<'), spec.fill))
}

/* ----------------------------- Nombres ----------------------------- */

fn sign_of(negative: bool, spec: &FormatSpec) -> &'static str {
    if negative {
        return "-";
    }
    match spec.sign {
        Some('+') => "+",
        Some(' ') => " ",
        _ => "",
    }
}

/// Signe + chiffres, avec remplissage éventuel entre les deux.
fn pad_number(sign: &str, digits: &str, spec: &FormatSpec) -> String {
    let align = spec.align.unwrap_or(if spec.zero_pad { '=' } else { '>' });
    if align == '=' {
        let fill = if spec.zero_pad && spec.align.is_none() { '0' } else { spec.fill };
        let len = sign.chars().count() + digits.chars().count();
        let padding: String = std::iter::repeat(fill).take(spec.width.saturating_sub(len)).collect();
        return format!("{sign}{padding}{digits}");
    }
    pad(&format!("{sign}{digits}"), spec.width, align, spec.fill)
}

fn format_int(n: i64, spec: &FormatSpec) -> String { pad_number(sign_of(n < 0, spec), &n.unsigned_abs().to_string(), spec) }

fn format_int_base(n: i64, ty: char, spec: &FormatSpec) -> String {
    let abs = n.unsigned_abs();
    let digits = match ty {
        'b' => format!("{abs:b}"),
        'o' => format!("{abs:o}"),
        'X' => format!("{abs:X}"),
        _ => format!("{abs:x}"),
    };
    pad_number(sign_of(n < 0, spec), &digits, spec)
}

fn special(f: f64, upper: bool) -> Option<String> {
    let s = if f.is_nan() {
        "nan"
    } else if f.is_infinite() {
        "inf"
    } else {
        return None;
    };
    Some(if upper { s.to_uppercase() } else { s.to_owned() })
}

fn format_fixed(f: f64, spec: &FormatSpec, upper: bool) -> String {
    let precision = spec.precision.unwrap_or(6);
    let abs = f.abs();
    let digits = special(abs, upper).unwrap_or_else(|| format!("{abs:.precision$}"));
    pad_number(sign_of(f.is_sign_negative() && !f.is_nan(), spec), &digits, spec)
}

fn format_exp(f: f64, spec: &FormatSpec, upper: bool) -> String {
    let precision = spec.precision.unwrap_or(6);
    let abs = f.abs();
    let digits = special(abs, upper).unwrap_or_else(|| {
        let raw = format!("{abs:.precision$e}");
        let fixed = fix_exponent(&raw);
        if upper { fixed.to_uppercase() } else { fixed }
    });
    pad_number(sign_of(f.is_sign_negative() && !f.is_nan(), spec), &digits, spec)
}

fn format_general(f: f64, spec: &FormatSpec, upper: bool) -> String {
    let precision = spec.precision.unwrap_or(6).max(1);
    let abs = f.abs();
    let digits = special(abs, upper).unwrap_or_else(|| {
        let exp = decimal_exponent(abs, precision);
        let p = i32::try_from(precision).unwrap_or(i32::MAX);
        if exp < -4 || exp >= p {
            let mantissa_digits = precision - 1;
            let raw = format!("{abs:.mantissa_digits$e}");
            let s = strip_zeros_exp(&raw);
            if upper { s.to_uppercase() } else { s }
        } else {
            let decimals = usize::try_from((p - 1 - exp).max(0)).unwrap_or(0);
            strip_zeros(&format!("{abs:.decimals$}"))
        }
    });
    pad_number(sign_of(f.is_sign_negative() && !f.is_nan(), spec), &digits, spec)
}

fn format_percent(f: f64, spec: &FormatSpec) -> String {
    let precision = spec.precision.unwrap_or(6);
    let v = f * 100.0;
    let abs = v.abs();
    let digits = special(abs, false).map_or_else(|| format!("{abs:.precision$}%"), |s| format!("{s}%"));
    pad_number(sign_of(v.is_sign_negative() && !v.is_nan(), spec), &digits, spec)
}

/// Exposant décimal après arrondi à `precision` chiffres significatifs.
fn decimal_exponent(abs: f64, precision: usize) -> i32 {
    if abs == 0.0 {
        return 0;
    }
    let mantissa_digits = precision.saturating_sub(1);
    format!("{abs:.mantissa_digits$e}").rsplit_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0)
}

/// `1.5e3` → `1.5e+03`.
fn fix_exponent(s: &str) -> String {
    let Some((mantissa, exp)) = s.split_once(['e', 'E']) else {
        return s.to_owned();
    };
    let (sign, digits) = exp.strip_prefix('-').map_or(('+', exp), |d| ('-', d));
    format!("{mantissa}e{sign}{digits:0>2}")
}

fn strip_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_owned();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_owned()
}

fn strip_zeros_exp(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, _)) => fix_exponent(&format!("{}{}", strip_zeros(mantissa), &s[mantissa.len()..])),
        None => strip_zeros(s),
    }
}

fn pad(value: &str, width: usize, align: char, fill: char) -> String {
    let len = value.chars().count();
    if width <= len {
        return value.to_owned();
    }
    let padding = width - len;
    let (left, right) = match align {
        '>' => (padding, 0),
        '^' => (padding / 2, padding - padding / 2),
        _ => (0, padding),
    };
    let mut out = String::with_capacity(value.len() + padding);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(value);
    out.extend(std::iter::repeat(fill).take(right));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn fmt(v: impl Into<Value>, spec: &str) -> String { format_value(&v.into(), spec).unwrap() }

    #[test]
    fn parses_full_spec() {
        let s: FormatSpec = "*^+08.3f".parse().unwrap();
        assert_eq!(
            s,
            FormatSpec { fill: '*', align: Some('^'), sign: Some('+'), zero_pad: true, width: 8, precision: Some(3), ty: Some('f') }
        );
        assert!("5q".parse::<FormatSpec>().is_err());
        assert!(".f".parse::<FormatSpec>().is_err());
    }

    #[test]
    fn floats() {
        assert_eq!(fmt(3.14159, ".2f"), "3.14");
        assert_eq!(fmt(3.14159, "8.3f"), "   3.142");
        assert_eq!(fmt(-3.5, "08.2f"), "-0003.50");
        assert_eq!(fmt(1234.5, "e"), "1.234500e+03");
        assert_eq!(fmt(0.000_012_5, ".3g"), "1.25e-05");
        assert_eq!(fmt(1234.5, "g"), "1234.5");
        assert_eq!(fmt(0.25, ".1%"), "25.0%");
        assert_eq!(fmt(3.0, ">6"), "   3.0");
        assert_eq!(fmt(f64::INFINITY, "F"), "INF");
    }

    #[test]
    fn ints() {
        assert_eq!(fmt(42i64, ""), "42");
        assert_eq!(fmt(42i64, "+d"), "+42");
        assert_eq!(fmt(42i64, "05"), "00042");
        assert_eq!(fmt(255i64, "x"), "ff");
        assert_eq!(fmt(255i64, "#>6X"), "####FF");
        assert_eq!(fmt(-5i64, "b"), "-101");
        assert_eq!(fmt(7i64, ".2f"), "7.00");
        assert_eq!(fmt(5i64, "<4"), "5   ");
    }

    #[test]
    fn text() {
        assert_eq!(fmt("ab", "^6"), "  ab  ");
        assert_eq!(fmt("abcdef", ".3"), "abc");
        assert_eq!(fmt("ab", "->4s"), "--ab");
        assert_eq!(fmt(Value::None, ">5"), " None");
        assert_eq!(fmt(true, ""), "True");
    }

    #[test]
    fn mismatches_are_errors() {
        assert!(format_value(&Value::from("x"), "d").is_err());
        assert!(format_value(&Value::from("x"), "=5").is_err());
        assert!(format_value(&Value::Float(1.5), "x").is_err());
        let e = format_value(&Value::from("x"), "f").unwrap_err();
        assert_eq!(e.to_string(), "format error: unknown format code 'f' for object of type 'str'");
    }

    proptest! {
        #[test]
        fn width_is_a_lower_bound(n in any::<i64>(), w in 0usize..40) {
            let s = format_value(&Value::Int(n), &format!(">{w}")).unwrap();
            prop_assert!(s.chars().count() >= w);
            prop_assert_eq!(s.trim_start(), n.to_string());
        }

        #[test]
        fn fixed_matches_rust_rounding(x in -1.0e9f64..1.0e9, p in 0usize..8) {
            let s = format_value(&Value::Float(x), &format!(".{p}f")).unwrap();
            prop_assert_eq!(s, format!("{x:.p$}"));
        }
    }
}
