use crate::asm::{Cursor, Expr, EvalValue, SymbolTable, ABS_SECTION};
use crate::error::{Error, ParseError, Result, SemanticError};
use crate::isa::gcn::arch::Arch;
use bitflags::bitflags;

bitflags! {
    /// Admissible operand categories for one operand position.
    pub struct OperandFlags: u32 {
        const SREGS = 1;
        const VREGS = 1 << 1;
        const SSOURCE = 1 << 2;
        const ONLY_INLINE_CONSTS = 1 << 3;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandType {
    Int,
    F32,
    F16,
}

/// Inclusive low register and exclusive high, as operand codes.
pub type RegPair = (u16, u16);

/// One parsed operand: the 9-bit selector code, the register-group
/// width, and the optional 32-bit literal tail. `pending` holds the
/// expression when the literal depends on an undefined symbol.
#[derive(Debug)]
pub struct GcnOperand {
    pub code: u16,
    pub regs: u16,
    pub literal: Option<u32>,
    pub pending: Option<Expr>,
    pub truncated: bool,
}

impl GcnOperand {
    fn reg(pair: RegPair) -> GcnOperand {
        GcnOperand {
            code: pair.0,
            regs: pair.1 - pair.0,
            literal: None,
            pending: None,
            truncated: false,
        }
    }

    fn inline(code: u16) -> GcnOperand {
        GcnOperand {
            code,
            regs: 1,
            literal: None,
            pending: None,
            truncated: false,
        }
    }

    pub fn is_sgpr(&self) -> bool {
        self.code < 104
    }

    pub fn is_vgpr(&self) -> bool {
        self.code >= 256
    }
}

const VCC: u16 = 106;
const TBA: u16 = 108;
const TMA: u16 = 110;
const TTMP0: u16 = 112;
const M0: u16 = 124;
const EXEC: u16 = 126;

fn reg_number(cur: &mut Cursor) -> Result<u16> {
    cur.skip_spaces();
    let mut value: u32 = 0;
    let mut any = false;
    while let Some(c) = cur.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        value = value * 10 + (c - b'0') as u32;
        if value >= 512 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        any = true;
        cur.bump();
    }
    if !any {
        return Err(Error::ParseError(ParseError::MissingNumber));
    }
    Ok(value as u16)
}

/// `[lo:hi]` body after the opening bracket was seen. Returns the
/// inclusive pair.
fn bracketed_range(cur: &mut Cursor) -> Result<(u16, u16)> {
    cur.bump(); // '['
    let lo = reg_number(cur)?;
    if !cur.eat(b':') {
        return Err(Error::ParseError(ParseError::UnterminatedRange));
    }
    let hi = reg_number(cur)?;
    if !cur.eat(b']') {
        return Err(Error::ParseError(ParseError::UnterminatedRange));
    }
    if hi <= lo {
        return Err(Error::ParseError(ParseError::RegisterOutOfRange));
    }
    Ok((lo, hi))
}

/// Scalar register range: `s3`, `s[4:7]`, or one of the named
/// registers. Returns `None` (with the cursor rewound) when the text is
/// not a scalar register and `required` is unset.
pub fn parse_sreg_range(
    cur: &mut Cursor,
    arch: Arch,
    required: bool,
) -> Result<Option<RegPair>> {
    let save = cur.pos();
    cur.skip_spaces();
    let fail = |cur: &mut Cursor<'_>, save| {
        cur.set_pos(save);
        if required {
            Err(Error::ParseError(ParseError::UnexpectedToken))
        } else {
            Ok(None)
        }
    };
    let name = match cur.clone().parse_name() {
        Some(n) => n,
        None => return fail(cur, save),
    };
    let lower = name.to_ascii_lowercase();

    // plain sN / s[lo:hi]
    if lower == "s" || (lower.starts_with('s') && lower[1..].bytes().all(|c| c.is_ascii_digit()))
    {
        cur.parse_name();
        if lower.len() > 1 {
            let mut digits = Cursor::new(&lower[1..]);
            let idx = reg_number(&mut digits)?;
            if idx >= arch.max_sgprs() {
                return Err(Error::ParseError(ParseError::RegisterOutOfRange));
            }
            return Ok(Some((idx, idx + 1)));
        }
        cur.skip_spaces();
        if cur.peek() != Some(b'[') {
            return fail(cur, save);
        }
        let (lo, hi) = bracketed_range(cur)?;
        if hi >= arch.max_sgprs() {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        let count = hi - lo + 1;
        if !matches!(count, 1 | 2 | 4 | 8 | 16) {
            return Err(Error::ParseError(ParseError::UnalignedRange));
        }
        if (count == 2 && lo & 1 != 0) || (count > 2 && lo & 3 != 0) {
            return Err(Error::ParseError(ParseError::UnalignedRange));
        }
        return Ok(Some((lo, hi + 1)));
    }

    // named registers, with _lo/_hi halves for the 64-bit ones
    let lo_hi = |base: u16, suffix: &str| -> Option<RegPair> {
        match suffix {
            "" => Some((base, base + 2)),
            "_lo" => Some((base, base + 1)),
            "_hi" => Some((base + 1, base + 2)),
            _ => None,
        }
    };
    let pair = if let Some(suffix) = lower.strip_prefix("vcc") {
        lo_hi(VCC, suffix)
    } else if let Some(suffix) = lower.strip_prefix("exec") {
        lo_hi(EXEC, suffix)
    } else if let Some(suffix) = lower.strip_prefix("tba") {
        lo_hi(TBA, suffix)
    } else if let Some(suffix) = lower.strip_prefix("tma") {
        lo_hi(TMA, suffix)
    } else if let Some(num) = lower.strip_prefix("ttmp") {
        let mut digits = Cursor::new(num);
        match reg_number(&mut digits) {
            Ok(n) if n <= 11 && digits.at_end() => Some((TTMP0 + n, TTMP0 + n + 1)),
            Ok(_) => return Err(Error::ParseError(ParseError::RegisterOutOfRange)),
            Err(_) => None,
        }
    } else if lower == "m0" {
        Some((M0, M0 + 1))
    } else if arch.has_flat() && lower.starts_with("flat_scratch") {
        lo_hi(arch.flat_scratch_reg(), &lower["flat_scratch".len()..])
    } else if arch.has_xnack() && lower.starts_with("xnack_mask") {
        lo_hi(104, &lower["xnack_mask".len()..])
    } else {
        None
    };
    match pair {
        Some(p) => {
            cur.parse_name();
            Ok(Some(p))
        }
        None => fail(cur, save),
    }
}

/// Vector register range: `v0` or `v[4:7]`; operand codes 256 + index.
pub fn parse_vreg_range(cur: &mut Cursor, required: bool) -> Result<Option<RegPair>> {
    let save = cur.pos();
    cur.skip_spaces();
    let fail = |cur: &mut Cursor<'_>, save| {
        cur.set_pos(save);
        if required {
            Err(Error::ParseError(ParseError::UnexpectedToken))
        } else {
            Ok(None)
        }
    };
    let name = match cur.clone().parse_name() {
        Some(n) => n,
        None => return fail(cur, save),
    };
    let lower = name.to_ascii_lowercase();
    if lower == "v" {
        cur.parse_name();
        cur.skip_spaces();
        if cur.peek() != Some(b'[') {
            return fail(cur, save);
        }
        let (lo, hi) = bracketed_range(cur)?;
        if hi >= 256 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        return Ok(Some((256 + lo, 256 + hi + 1)));
    }
    if lower.starts_with('v') && lower[1..].bytes().all(|c| c.is_ascii_digit()) && lower.len() > 1
    {
        cur.parse_name();
        let mut digits = Cursor::new(&lower[1..]);
        let idx = reg_number(&mut digits)?;
        if idx >= 256 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        return Ok(Some((256 + idx, 256 + idx + 1)));
    }
    fail(cur, save)
}

/// Whether the text under the cursor is exclusively a floating-point
/// value: it must carry a decimal point or an exponent, in decimal or
/// hexadecimal notation. A bare integer or symbol is not a float.
pub fn is_only_float(text: &str) -> bool {
    let b = text.trim_start().as_bytes();
    let mut i = 0;
    if i < b.len() && (b[i] == b'-' || b[i] == b'+') {
        i += 1;
    }
    if b.len() >= i + 2 && b[i] == b'0' && (b[i + 1] == b'x' || b[i + 1] == b'X') {
        i += 2;
        let before = i;
        while i < b.len() && b[i].is_ascii_hexdigit() {
            i += 1;
        }
        let point = i;
        if i >= b.len() || b[i] != b'.' {
            if point != before && i < b.len() && (b[i] == b'p' || b[i] == b'P') {
                i += 1;
                if i < b.len() && (b[i] == b'-' || b[i] == b'+') {
                    i += 1;
                }
                let exp = i;
                while i < b.len() && b[i].is_ascii_digit() {
                    i += 1;
                }
                return i != exp;
            }
            return false;
        }
        i += 1;
        let after = i;
        while i < b.len() && b[i].is_ascii_hexdigit() {
            i += 1;
        }
        point != before || i != after
    } else {
        let before = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        let point = i;
        if i >= b.len() || b[i] != b'.' {
            if point != before && i < b.len() && (b[i] == b'e' || b[i] == b'E') {
                i += 1;
                if i < b.len() && (b[i] == b'-' || b[i] == b'+') {
                    i += 1;
                }
                let exp = i;
                while i < b.len() && b[i].is_ascii_digit() {
                    i += 1;
                }
                return i != exp;
            }
            return false;
        }
        i += 1;
        let after = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        point != before || i != after
    }
}

/// C-style float text (decimal or hex) to f64, consuming the token.
fn parse_float_text(cur: &mut Cursor) -> Result<f64> {
    cur.skip_spaces();
    let start = cur.pos();
    let rest = cur.rest().as_bytes();
    let mut i = 0;
    let mut negative = false;
    if i < rest.len() && (rest[i] == b'-' || rest[i] == b'+') {
        negative = rest[i] == b'-';
        i += 1;
    }
    if rest.len() >= i + 2 && rest[i] == b'0' && (rest[i + 1] | 0x20) == b'x' {
        i += 2;
        let mut mant: u64 = 0;
        let mut digits = 0u32;
        let mut frac_digits = 0i32;
        while i < rest.len() && rest[i].is_ascii_hexdigit() {
            if digits < 16 {
                mant = mant * 16 + (rest[i] as char).to_digit(16).unwrap() as u64;
                digits += 1;
            }
            i += 1;
        }
        if i < rest.len() && rest[i] == b'.' {
            i += 1;
            while i < rest.len() && rest[i].is_ascii_hexdigit() {
                if digits < 16 {
                    mant = mant * 16 + (rest[i] as char).to_digit(16).unwrap() as u64;
                    digits += 1;
                    frac_digits += 1;
                }
                i += 1;
            }
        }
        let mut exp: i32 = 0;
        if i < rest.len() && (rest[i] | 0x20) == b'p' {
            i += 1;
            let mut exp_neg = false;
            if i < rest.len() && (rest[i] == b'-' || rest[i] == b'+') {
                exp_neg = rest[i] == b'-';
                i += 1;
            }
            let mut e: i32 = 0;
            let exp_start = i;
            while i < rest.len() && rest[i].is_ascii_digit() {
                e = e.saturating_mul(10).saturating_add((rest[i] - b'0') as i32);
                i += 1;
            }
            if i == exp_start {
                return Err(Error::ParseError(ParseError::MissingNumber));
            }
            exp = if exp_neg { -e } else { e };
        }
        cur.set_pos(start + i);
        let v = (mant as f64) * 2f64.powi(exp - 4 * frac_digits);
        Ok(if negative { -v } else { v })
    } else {
        while i < rest.len()
            && (rest[i].is_ascii_digit()
                || rest[i] == b'.'
                || (rest[i] | 0x20) == b'e'
                || ((rest[i] == b'+' || rest[i] == b'-') && i > 0 && (rest[i - 1] | 0x20) == b'e'))
        {
            i += 1;
        }
        let text = &cur.rest()[..i];
        let v: f64 = text
            .parse()
            .map_err(|_| Error::ParseError(ParseError::MissingNumber))?;
        cur.set_pos(start + i);
        Ok(v)
    }
}

/// f32 to IEEE half bits with round-to-nearest-even.
pub(crate) fn f32_to_f16_bits(x: f32) -> u16 {
    let bits = x.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x007f_ffff;
    if exp == 255 {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let unbiased = exp - 127 + 15;
    if unbiased >= 31 {
        return sign | 0x7c00;
    }
    if unbiased <= 0 {
        if unbiased < -10 {
            return sign;
        }
        let m = mant | 0x0080_0000;
        let shift = (14 - unbiased) as u32;
        let half = m >> shift;
        let rem = m & ((1u32 << shift) - 1);
        let halfway = 1u32 << (shift - 1);
        let rounded = half + u32::from(rem > halfway || (rem == halfway && half & 1 == 1));
        return sign | rounded as u16;
    }
    let half = ((unbiased as u32) << 10) | (mant >> 13);
    let rem = mant & 0x1fff;
    let rounded = half + u32::from(rem > 0x1000 || (rem == 0x1000 && half & 1 == 1));
    sign | rounded as u16
}

/// Inline-constant table for single floats: exact bit patterns only.
fn inline_f32_code(bits: u32, arch: Arch) -> Option<u16> {
    Some(match bits {
        0x0000_0000 => 128,
        0x3f00_0000 => 240,
        0xbf00_0000 => 241,
        0x3f80_0000 => 242,
        0xbf80_0000 => 243,
        0x4000_0000 => 244,
        0xc000_0000 => 245,
        0x4080_0000 => 246,
        0xc080_0000 => 247,
        0x3e22_f983 if arch.has_inv_2pi_const() => 248,
        _ => return None,
    })
}

fn inline_f16_code(bits: u16, arch: Arch) -> Option<u16> {
    Some(match bits {
        0x0000 => 128,
        0x3800 => 240,
        0xb800 => 241,
        0x3c00 => 242,
        0xbc00 => 243,
        0x4000 => 244,
        0xc000 => 245,
        0x4400 => 246,
        0xc400 => 247,
        0x3118 if arch.has_inv_2pi_const() => 248,
        _ => return None,
    })
}

/// Parse one GCN operand under the admissible-category mask.
///
/// Recognition order: scalar registers, vector registers, symbolic
/// condition codes, inline-constant floats, small-integer inline
/// constants, and finally a 32-bit literal tail. Expressions with
/// undefined symbols come back as code 255 with `pending` set.
pub fn parse_operand(
    cur: &mut Cursor,
    arch: Arch,
    flags: OperandFlags,
    ty: OperandType,
    symtab: &mut SymbolTable,
) -> Result<GcnOperand> {
    if flags == OperandFlags::SREGS {
        return parse_sreg_range(cur, arch, true).map(|p| GcnOperand::reg(p.unwrap()));
    }
    if flags == OperandFlags::VREGS {
        return parse_vreg_range(cur, true).map(|p| GcnOperand::reg(p.unwrap()));
    }
    if flags.contains(OperandFlags::SREGS) {
        if let Some(pair) = parse_sreg_range(cur, arch, false)? {
            return Ok(GcnOperand::reg(pair));
        }
    }
    if flags.contains(OperandFlags::VREGS) {
        if let Some(pair) = parse_vreg_range(cur, false)? {
            return Ok(GcnOperand::reg(pair));
        }
    }
    if !flags.contains(OperandFlags::SSOURCE) {
        return Err(Error::ParseError(ParseError::UnexpectedToken));
    }

    let save = cur.pos();
    if let Some(name) = cur.parse_name() {
        match name.to_ascii_lowercase().as_str() {
            "vccz" => return Ok(GcnOperand::inline(251)),
            "execz" => return Ok(GcnOperand::inline(252)),
            "scc" => return Ok(GcnOperand::inline(253)),
            _ => cur.set_pos(save),
        }
    }

    cur.skip_spaces();
    if cur.peek() == Some(b'@') {
        cur.bump();
        cur.skip_spaces();
    }

    if is_only_float(cur.rest()) {
        let value = parse_float_text(cur)?;
        if ty == OperandType::F16 {
            let bits = f32_to_f16_bits(value as f32);
            if let Some(code) = inline_f16_code(bits, arch) {
                return Ok(GcnOperand::inline(code));
            }
            if flags.contains(OperandFlags::ONLY_INLINE_CONSTS) {
                return Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere));
            }
            return Ok(GcnOperand {
                code: 255,
                regs: 1,
                literal: Some(bits as u32),
                pending: None,
                truncated: false,
            });
        }
        let bits = (value as f32).to_bits();
        if let Some(code) = inline_f32_code(bits, arch) {
            return Ok(GcnOperand::inline(code));
        }
        if flags.contains(OperandFlags::ONLY_INLINE_CONSTS) {
            return Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere));
        }
        return Ok(GcnOperand {
            code: 255,
            regs: 1,
            literal: Some(bits),
            pending: None,
            truncated: false,
        });
    }

    let expr = Expr::parse(cur, symtab)?;
    let value = match expr.evaluate(&*symtab)? {
        EvalValue::Value { section, value } => {
            if section != ABS_SECTION {
                return Err(Error::ParseError(ParseError::UnexpectedToken));
            }
            value
        }
        EvalValue::Deferred => {
            if flags.contains(OperandFlags::ONLY_INLINE_CONSTS) {
                return Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere));
            }
            return Ok(GcnOperand {
                code: 255,
                regs: 1,
                literal: Some(0),
                pending: Some(expr),
                truncated: false,
            });
        }
    };

    if value <= 64 {
        return Ok(GcnOperand::inline(128 + value as u16));
    }
    if (value as i64) >= -16 && (value as i64) < 0 {
        return Ok(GcnOperand::inline((192i64 - value as i64) as u16));
    }
    if flags.contains(OperandFlags::ONLY_INLINE_CONSTS) {
        return Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere));
    }
    let truncated = (value as i64) < -(1i64 << 31) || value >= (1u64 << 32);
    Ok(GcnOperand {
        code: 255,
        regs: 1,
        literal: Some(value as u32),
        pending: None,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssrc() -> OperandFlags {
        OperandFlags::SREGS | OperandFlags::SSOURCE
    }

    fn parse(text: &str, arch: Arch, flags: OperandFlags, ty: OperandType) -> Result<GcnOperand> {
        let mut symtab = SymbolTable::new();
        let mut cur = Cursor::new(text);
        parse_operand(&mut cur, arch, flags, ty, &mut symtab)
    }

    #[test]
    fn test_sreg_ranges() {
        let op = parse("s7", Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (7, 1));
        let op = parse("s[4:7]", Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (4, 4));
        assert!(matches!(
            parse("s[4:6]", Arch::Gcn1_0, ssrc(), OperandType::Int),
            Err(Error::ParseError(ParseError::UnalignedRange))
        ));
        assert!(matches!(
            parse("s[3:4]", Arch::Gcn1_0, ssrc(), OperandType::Int),
            Err(Error::ParseError(ParseError::UnalignedRange))
        ));
        assert!(matches!(
            parse("s[4:7", Arch::Gcn1_0, ssrc(), OperandType::Int),
            Err(Error::ParseError(ParseError::UnterminatedRange))
        ));
        assert!(matches!(
            parse("s103", Arch::Gcn1_2, ssrc(), OperandType::Int),
            Err(Error::ParseError(ParseError::RegisterOutOfRange))
        ));
    }

    #[test]
    fn test_named_registers() {
        let cases = [
            ("vcc", 106, 2),
            ("vcc_lo", 106, 1),
            ("vcc_hi", 107, 1),
            ("exec", 126, 2),
            ("exec_lo", 126, 1),
            ("tba", 108, 2),
            ("tma_hi", 111, 1),
            ("ttmp0", 112, 1),
            ("ttmp11", 123, 1),
            ("m0", 124, 1),
        ];
        for (text, code, regs) in cases {
            let op = parse(text, Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
            assert_eq!((op.code, op.regs), (code, regs), "operand {}", text);
        }
        // flat_scratch moves with the architecture
        let op = parse("flat_scratch", Arch::Gcn1_1, ssrc(), OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (104, 2));
        let op = parse("flat_scratch_hi", Arch::Gcn1_2, ssrc(), OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (103, 1));
        let op = parse("xnack_mask", Arch::Gcn1_2, ssrc(), OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (104, 2));
    }

    #[test]
    fn test_vreg_ranges() {
        let op = parse("v0", Arch::Gcn1_0, OperandFlags::VREGS, OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (256, 1));
        let op = parse("v[4:7]", Arch::Gcn1_0, OperandFlags::VREGS, OperandType::Int).unwrap();
        assert_eq!((op.code, op.regs), (260, 4));
        assert!(parse("v[7:4]", Arch::Gcn1_0, OperandFlags::VREGS, OperandType::Int).is_err());
    }

    #[test]
    fn test_condition_codes() {
        for (text, code) in [("vccz", 251), ("execz", 252), ("scc", 253)] {
            let op = parse(text, Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
            assert_eq!(op.code, code);
        }
    }

    #[test]
    fn test_inline_integer_codes() {
        // every value in [-16, 64] gets an inline code and no tail
        for v in -16i64..=64 {
            let text = v.to_string();
            let op = parse(&text, Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
            assert!(op.literal.is_none(), "value {}", v);
            let expect = if v >= 0 { 128 + v } else { 192 - v };
            assert_eq!(op.code as i64, expect, "value {}", v);
        }
        // just outside the range: literal tail
        for v in [-17i64, 65] {
            let op = parse(&v.to_string(), Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
            assert_eq!(op.code, 255);
            assert_eq!(op.literal, Some(v as u32));
        }
    }

    #[test]
    fn test_inline_floats() {
        let op = parse("0.5", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!((op.code, op.literal), (240, None));
        let op = parse("-2.0", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.code, 245);
        let op = parse("4.0", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.code, 246);
        // 1/(2*pi) only from GCN 1.2 on
        let op = parse("0.15915494", Arch::Gcn1_2, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.code, 248);
        let op = parse("0.15915494", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.code, 255);
        // non-alias float falls back to a literal tail
        let op = parse("0.3", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.code, 255);
        assert_eq!(op.literal, Some(0.3f32.to_bits()));
    }

    #[test]
    fn test_half_float_aliases() {
        let op = parse("0.5", Arch::Gcn1_2, ssrc(), OperandType::F16).unwrap();
        assert_eq!(op.code, 240);
        let op = parse("-4.0", Arch::Gcn1_2, ssrc(), OperandType::F16).unwrap();
        assert_eq!(op.code, 247);
        let op = parse("0.3", Arch::Gcn1_2, ssrc(), OperandType::F16).unwrap();
        assert_eq!(op.code, 255);
        assert_eq!(op.literal, Some(f32_to_f16_bits(0.3) as u32));
    }

    #[test]
    fn test_hex_floats() {
        assert!(is_only_float("0x1.8p1"));
        assert!(is_only_float("1.5"));
        assert!(is_only_float("2e3"));
        assert!(!is_only_float("123"));
        assert!(!is_only_float("0x12"));
        assert!(!is_only_float("label"));
        // 0x1.8p1 == 3.0, no alias, so a literal
        let op = parse("0x1.8p1", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.literal, Some(3.0f32.to_bits()));
        // 0x1p-1 == 0.5
        let op = parse("0x1p-1", Arch::Gcn1_0, ssrc(), OperandType::F32).unwrap();
        assert_eq!(op.code, 240);
    }

    #[test]
    fn test_only_inline_consts_rejects_literal() {
        let flags = ssrc() | OperandFlags::ONLY_INLINE_CONSTS;
        assert!(parse("13", Arch::Gcn1_0, flags, OperandType::Int).is_ok());
        assert!(matches!(
            parse("1000", Arch::Gcn1_0, flags, OperandType::Int),
            Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere))
        ));
    }

    #[test]
    fn test_deferred_expression() {
        let mut symtab = SymbolTable::new();
        let mut cur = Cursor::new("later+4");
        let op = parse_operand(
            &mut cur,
            Arch::Gcn1_0,
            ssrc(),
            OperandType::Int,
            &mut symtab,
        )
        .unwrap();
        assert_eq!(op.code, 255);
        assert!(op.pending.is_some());
        assert!(symtab.find("later").is_some());
    }

    #[test]
    fn test_literal_truncation_flag() {
        let op = parse("0x123456789", Arch::Gcn1_0, ssrc(), OperandType::Int).unwrap();
        assert_eq!(op.code, 255);
        assert!(op.truncated);
        assert_eq!(op.literal, Some(0x2345_6789));
    }
}
