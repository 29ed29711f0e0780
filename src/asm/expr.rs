use crate::asm::scan::Cursor;
use crate::asm::section::{SectionId, ABS_SECTION};
use crate::asm::symbol::SymbolTable;
use crate::error::{Error, ParseError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BitNot,
    LogNot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    LogAnd,
    LogOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    fn precedence(self) -> u8 {
        use BinOp::*;
        match self {
            LogOr => 1,
            LogAnd => 2,
            Or => 3,
            Xor => 4,
            And => 5,
            Eq | Ne => 6,
            Lt | Le | Gt | Ge => 7,
            Shl | Shr => 8,
            Add | Sub => 9,
            Mul | Div | Rem => 10,
        }
    }
}

/// Parsed expression over 64-bit integers and symbol references.
/// Symbols are interned on first reference, which is how forward
/// references enter the symbol table.
#[derive(Clone, Debug)]
pub enum Expr {
    Int(i64),
    Sym(usize),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalValue {
    Value { section: SectionId, value: u64 },
    /// At least one referenced symbol is still undefined.
    Deferred,
}

impl EvalValue {
    fn abs(v: i64) -> EvalValue {
        EvalValue::Value {
            section: ABS_SECTION,
            value: v as u64,
        }
    }
}

impl Expr {
    /// Parse an expression with C operator precedence. Stops at the
    /// first token that cannot extend the expression.
    pub fn parse(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Expr> {
        let e = Self::parse_prec(cur, symtab, 0)?;
        cur.skip_spaces();
        if cur.peek() == Some(b'?') {
            cur.bump();
            let then = Self::parse(cur, symtab)?;
            if !cur.eat(b':') {
                return Err(Error::ParseError(ParseError::UnexpectedToken));
            }
            let other = Self::parse(cur, symtab)?;
            return Ok(Expr::Ternary(Box::new(e), Box::new(then), Box::new(other)));
        }
        Ok(e)
    }

    fn parse_prec(cur: &mut Cursor, symtab: &mut SymbolTable, min_prec: u8) -> Result<Expr> {
        let mut lhs = Self::parse_unary(cur, symtab)?;
        loop {
            let save = cur.pos();
            let op = match Self::parse_binop(cur) {
                Some(op) if op.precedence() >= min_prec => op,
                _ => {
                    cur.set_pos(save);
                    return Ok(lhs);
                }
            };
            let rhs = Self::parse_prec(cur, symtab, op.precedence() + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_binop(cur: &mut Cursor) -> Option<BinOp> {
        cur.skip_spaces();
        let (op, len) = match (cur.peek()?, cur.peek_at(1)) {
            (b'<', Some(b'<')) => (BinOp::Shl, 2),
            (b'>', Some(b'>')) => (BinOp::Shr, 2),
            (b'<', Some(b'=')) => (BinOp::Le, 2),
            (b'>', Some(b'=')) => (BinOp::Ge, 2),
            (b'=', Some(b'=')) => (BinOp::Eq, 2),
            (b'!', Some(b'=')) => (BinOp::Ne, 2),
            (b'&', Some(b'&')) => (BinOp::LogAnd, 2),
            (b'|', Some(b'|')) => (BinOp::LogOr, 2),
            (b'<', _) => (BinOp::Lt, 1),
            (b'>', _) => (BinOp::Gt, 1),
            (b'&', _) => (BinOp::And, 1),
            (b'|', _) => (BinOp::Or, 1),
            (b'^', _) => (BinOp::Xor, 1),
            (b'+', _) => (BinOp::Add, 1),
            (b'-', _) => (BinOp::Sub, 1),
            (b'*', _) => (BinOp::Mul, 1),
            (b'/', _) => (BinOp::Div, 1),
            (b'%', _) => (BinOp::Rem, 1),
            _ => return None,
        };
        cur.set_pos(cur.pos() + len);
        Some(op)
    }

    fn parse_unary(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Expr> {
        cur.skip_spaces();
        match cur.peek() {
            Some(b'-') => {
                cur.bump();
                Ok(Expr::Unary(
                    UnOp::Neg,
                    Box::new(Self::parse_unary(cur, symtab)?),
                ))
            }
            Some(b'+') => {
                cur.bump();
                Self::parse_unary(cur, symtab)
            }
            Some(b'~') => {
                cur.bump();
                Ok(Expr::Unary(
                    UnOp::BitNot,
                    Box::new(Self::parse_unary(cur, symtab)?),
                ))
            }
            Some(b'!') => {
                cur.bump();
                Ok(Expr::Unary(
                    UnOp::LogNot,
                    Box::new(Self::parse_unary(cur, symtab)?),
                ))
            }
            Some(b'(') => {
                cur.bump();
                let e = Self::parse(cur, symtab)?;
                if !cur.eat(b')') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                Ok(e)
            }
            Some(c) if c.is_ascii_digit() => Ok(Expr::Int(parse_int_literal(cur)?)),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' || c == b'.' || c == b'$' => {
                let name = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::UnexpectedToken))?;
                Ok(Expr::Sym(symtab.intern(name)))
            }
            _ => Err(Error::ParseError(ParseError::MissingNumber)),
        }
    }

    /// Record every referenced symbol index into `out`.
    pub fn collect_symbols(&self, out: &mut Vec<usize>) {
        match self {
            Expr::Int(_) => {}
            Expr::Sym(idx) => out.push(*idx),
            Expr::Unary(_, a) => a.collect_symbols(out),
            Expr::Binary(_, a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Expr::Ternary(c, a, b) => {
                c.collect_symbols(out);
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
        }
    }

    /// Evaluate against the current symbol table. Any undefined symbol
    /// defers the whole expression; the caller records a patch and the
    /// symbol records the dependency.
    pub fn evaluate(&self, symtab: &SymbolTable) -> Result<EvalValue> {
        match self {
            Expr::Int(v) => Ok(EvalValue::abs(*v)),
            Expr::Sym(idx) => {
                let sym = symtab.get(*idx);
                if sym.defined {
                    Ok(EvalValue::Value {
                        section: sym.section,
                        value: sym.value,
                    })
                } else {
                    Ok(EvalValue::Deferred)
                }
            }
            Expr::Unary(op, a) => {
                let v = match a.evaluate(symtab)? {
                    EvalValue::Deferred => return Ok(EvalValue::Deferred),
                    EvalValue::Value { section, value } => {
                        if section != ABS_SECTION {
                            return Err(Error::ParseError(ParseError::UnexpectedToken));
                        }
                        value as i64
                    }
                };
                Ok(EvalValue::abs(match op {
                    UnOp::Neg => v.wrapping_neg(),
                    UnOp::BitNot => !v,
                    UnOp::LogNot => (v == 0) as i64,
                }))
            }
            Expr::Binary(op, a, b) => {
                let lhs = a.evaluate(symtab)?;
                let rhs = b.evaluate(symtab)?;
                let (ls, lv, rs, rv) = match (lhs, rhs) {
                    (EvalValue::Deferred, _) | (_, EvalValue::Deferred) => {
                        return Ok(EvalValue::Deferred)
                    }
                    (
                        EvalValue::Value {
                            section: ls,
                            value: lv,
                        },
                        EvalValue::Value {
                            section: rs,
                            value: rv,
                        },
                    ) => (ls, lv as i64, rs, rv as i64),
                };
                // section algebra: only addition of an absolute term and
                // same-section subtraction keep a relocatable meaning
                let section = match op {
                    BinOp::Add => match (ls, rs) {
                        (ABS_SECTION, s) | (s, ABS_SECTION) => s,
                        _ => return Err(Error::ParseError(ParseError::UnexpectedToken)),
                    },
                    BinOp::Sub => match (ls, rs) {
                        (s, ABS_SECTION) => s,
                        (a, b) if a == b => ABS_SECTION,
                        _ => return Err(Error::ParseError(ParseError::UnexpectedToken)),
                    },
                    _ => {
                        if ls != ABS_SECTION || rs != ABS_SECTION {
                            return Err(Error::ParseError(ParseError::UnexpectedToken));
                        }
                        ABS_SECTION
                    }
                };
                let value = match op {
                    BinOp::Add => lv.wrapping_add(rv),
                    BinOp::Sub => lv.wrapping_sub(rv),
                    BinOp::Mul => lv.wrapping_mul(rv),
                    BinOp::Div => {
                        if rv == 0 {
                            return Err(Error::ParseError(ParseError::UnexpectedToken));
                        }
                        lv.wrapping_div(rv)
                    }
                    BinOp::Rem => {
                        if rv == 0 {
                            return Err(Error::ParseError(ParseError::UnexpectedToken));
                        }
                        lv.wrapping_rem(rv)
                    }
                    BinOp::Shl => lv.wrapping_shl(rv as u32),
                    BinOp::Shr => ((lv as u64).wrapping_shr(rv as u32)) as i64,
                    BinOp::And => lv & rv,
                    BinOp::Or => lv | rv,
                    BinOp::Xor => lv ^ rv,
                    BinOp::LogAnd => ((lv != 0) && (rv != 0)) as i64,
                    BinOp::LogOr => ((lv != 0) || (rv != 0)) as i64,
                    BinOp::Eq => (lv == rv) as i64,
                    BinOp::Ne => (lv != rv) as i64,
                    BinOp::Lt => (lv < rv) as i64,
                    BinOp::Le => (lv <= rv) as i64,
                    BinOp::Gt => (lv > rv) as i64,
                    BinOp::Ge => (lv >= rv) as i64,
                };
                Ok(EvalValue::Value {
                    section,
                    value: value as u64,
                })
            }
            Expr::Ternary(c, a, b) => {
                let cond = match c.evaluate(symtab)? {
                    EvalValue::Deferred => return Ok(EvalValue::Deferred),
                    EvalValue::Value { value, .. } => value != 0,
                };
                if cond {
                    a.evaluate(symtab)
                } else {
                    b.evaluate(symtab)
                }
            }
        }
    }
}

/// Integer literal: decimal, `0x` hex, `0b` binary, leading-zero octal.
pub fn parse_int_literal(cur: &mut Cursor) -> Result<i64> {
    cur.skip_spaces();
    let first = match cur.peek() {
        Some(c) if c.is_ascii_digit() => c,
        _ => return Err(Error::ParseError(ParseError::MissingNumber)),
    };
    let radix: u32 = if first == b'0' {
        cur.bump();
        match cur.peek() {
            Some(b'x') | Some(b'X') => {
                cur.bump();
                16
            }
            Some(b'b') | Some(b'B') => {
                cur.bump();
                2
            }
            Some(c) if c.is_ascii_digit() => 8,
            _ => return Ok(0),
        }
    } else {
        10
    };
    let mut any = false;
    let mut value: u64 = 0;
    while let Some(c) = cur.peek() {
        let d = match (c as char).to_digit(radix) {
            Some(d) => d,
            None => break,
        };
        value = value.wrapping_mul(radix as u64).wrapping_add(d as u64);
        any = true;
        cur.bump();
    }
    if !any && radix != 8 {
        return Err(Error::ParseError(ParseError::MissingNumber));
    }
    Ok(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> i64 {
        let mut tab = SymbolTable::new();
        let mut cur = Cursor::new(src);
        let e = Expr::parse(&mut cur, &mut tab).unwrap();
        match e.evaluate(&tab).unwrap() {
            EvalValue::Value { value, .. } => value as i64,
            EvalValue::Deferred => panic!("unexpected deferral"),
        }
    }

    #[test]
    fn test_radix_forms() {
        assert_eq!(eval("0x1f"), 31);
        assert_eq!(eval("0b101"), 5);
        assert_eq!(eval("017"), 15);
        assert_eq!(eval("42"), 42);
        assert_eq!(eval("0"), 0);
    }

    #[test]
    fn test_c_precedence() {
        assert_eq!(eval("2+3*4"), 14);
        assert_eq!(eval("(2+3)*4"), 20);
        assert_eq!(eval("1<<4|1"), 17);
        assert_eq!(eval("7&3^1"), 2);
        assert_eq!(eval("10-4-3"), 3);
        assert_eq!(eval("-5+2"), -3);
        assert_eq!(eval("~0&0xff"), 0xff);
        assert_eq!(eval("1 ? 10 : 20"), 10);
        assert_eq!(eval("0 ? 10 : 20"), 20);
        assert_eq!(eval("3 < 4 && 4 < 3 || 1"), 1);
    }

    #[test]
    fn test_symbols_defer_until_defined() {
        let mut tab = SymbolTable::new();
        let mut cur = Cursor::new("lab + 8");
        let e = Expr::parse(&mut cur, &mut tab).unwrap();
        assert_eq!(e.evaluate(&tab).unwrap(), EvalValue::Deferred);
        tab.define("lab", 2, 0x100, false).unwrap();
        assert_eq!(
            e.evaluate(&tab).unwrap(),
            EvalValue::Value {
                section: 2,
                value: 0x108
            }
        );
    }

    #[test]
    fn test_same_section_difference_is_absolute() {
        let mut tab = SymbolTable::new();
        tab.define("a", 1, 0x40, false).unwrap();
        tab.define("b", 1, 0x10, false).unwrap();
        let mut cur = Cursor::new("a - b");
        let e = Expr::parse(&mut cur, &mut tab).unwrap();
        assert_eq!(
            e.evaluate(&tab).unwrap(),
            EvalValue::Value {
                section: ABS_SECTION,
                value: 0x30
            }
        );
        // a + b has no meaning
        let mut cur = Cursor::new("a + b");
        let e = Expr::parse(&mut cur, &mut tab).unwrap();
        assert!(e.evaluate(&tab).is_err());
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let mut tab = SymbolTable::new();
        let mut cur = Cursor::new("5/0");
        let e = Expr::parse(&mut cur, &mut tab).unwrap();
        assert!(e.evaluate(&tab).is_err());
    }
}
