use crate::asm::{Cursor, EvalValue, Expr, PatchKind, SectionId, SymbolTable, ABS_SECTION};
use crate::error::{Error, ParseError, Result, SemanticError};
use crate::isa::gcn::arch::Arch;
use crate::isa::gcn::operand::{
    parse_operand, parse_sreg_range, parse_vreg_range, GcnOperand, OperandFlags, OperandType,
};
use crate::isa::gcn::table::{EncKind, InstrMode, IsaEntry, IsaTable, NO_OPCODE2};
use smallvec::SmallVec;

/// Highest register indices touched so far by one kernel's code. The
/// kernel descriptor derives its SGPR/VGPR counts from this.
#[derive(Copy, Clone, Debug, Default)]
pub struct RegUsage {
    pub max_sgpr: Option<u16>,
    pub max_vgpr: Option<u16>,
}

impl RegUsage {
    fn update(&mut self, op: &GcnOperand) {
        if op.code < 104 {
            let hi = op.code + op.regs - 1;
            self.max_sgpr = Some(self.max_sgpr.map_or(hi, |m| m.max(hi)));
        } else if (256..512).contains(&op.code) {
            let hi = op.code - 256 + op.regs - 1;
            self.max_vgpr = Some(self.max_vgpr.map_or(hi, |m| m.max(hi)));
        }
    }
}

/// Byte offset within an instruction where a deferred expression must
/// be patched once its symbols resolve.
#[derive(Debug)]
pub struct PendingPatch {
    pub expr: Expr,
    pub kind: PatchKind,
    pub offset: usize,
}

#[derive(Debug)]
pub struct EncodedInstr {
    pub bytes: SmallVec<[u8; 8]>,
    pub pending: Option<PendingPatch>,
    /// A literal was truncated to 32 bits; report a warning.
    pub truncated: bool,
}

/// Tracks the single 32-bit literal an instruction may carry.
#[derive(Default)]
struct LitState {
    literal: Option<u32>,
    pending: Option<Expr>,
    truncated: bool,
}

impl LitState {
    fn take(&mut self, op: GcnOperand) -> Result<u16> {
        if op.code == 255 {
            if self.literal.is_some() {
                return Err(Error::SemanticError(SemanticError::TooManyLiterals));
            }
            self.literal = Some(op.literal.unwrap_or(0));
            self.pending = op.pending;
            self.truncated = op.truncated;
        }
        Ok(op.code)
    }
}

/// One parsed VOP source with its extended-form modifiers.
struct VopSrc {
    op: GcnOperand,
    neg: bool,
    abs: bool,
}

impl VopSrc {
    fn needs_extended(&self) -> bool {
        self.neg || self.abs
    }
}

#[derive(Default)]
struct VopMods {
    clamp: bool,
    omod: u8,
}

pub struct GcnEncoder<'a> {
    table: &'a IsaTable,
    arch: Arch,
}

impl<'a> GcnEncoder<'a> {
    pub fn new(table: &'a IsaTable, arch: Arch) -> GcnEncoder<'a> {
        GcnEncoder { table, arch }
    }

    /// Assemble one instruction line. `section` and `position` locate
    /// the instruction for branch-displacement computation.
    pub fn assemble(
        &self,
        mnemonic: &str,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
        section: SectionId,
        position: u64,
    ) -> Result<EncodedInstr> {
        let entry = self.table.lookup(mnemonic, self.arch.mask())?;
        let out = match entry.encoding1 {
            EncKind::Sop2 => self.encode_sop2(entry, cur, symtab, usage),
            EncKind::Sop1 => self.encode_sop1(entry, cur, symtab, usage),
            EncKind::Sopk => self.encode_sopk(entry, cur, symtab, usage),
            EncKind::Sopc => self.encode_sopc(entry, cur, symtab, usage),
            EncKind::Sopp => self.encode_sopp(entry, cur, symtab, section, position),
            EncKind::Smrd => self.encode_smrd(entry, cur, symtab, usage),
            EncKind::Vop2 | EncKind::Vop1 | EncKind::Vopc => {
                self.encode_vop(entry, cur, symtab, usage)
            }
            EncKind::Vop3A | EncKind::Vop3B => self.encode_vop3_direct(entry, cur, symtab, usage),
            EncKind::Vintrp => self.encode_vintrp(entry, cur, symtab, usage),
            EncKind::Ds => self.encode_ds(entry, cur, symtab, usage),
            EncKind::Mubuf | EncKind::Mtbuf => self.encode_mxbuf(entry, cur, symtab, usage),
            EncKind::Mimg => self.encode_mimg(entry, cur, symtab, usage),
            EncKind::Exp => self.encode_exp(entry, cur, symtab, usage),
            EncKind::Flat => self.encode_flat(entry, cur, symtab, usage),
        }?;
        cur.skip_spaces();
        if !cur.at_end() {
            return Err(Error::ParseError(ParseError::UnexpectedToken));
        }
        Ok(out)
    }

    fn comma(&self, cur: &mut Cursor) -> Result<()> {
        if cur.eat(b',') {
            Ok(())
        } else {
            Err(Error::ParseError(ParseError::UnexpectedToken))
        }
    }

    fn sreg(
        &self,
        cur: &mut Cursor,
        count: u16,
        usage: &mut RegUsage,
    ) -> Result<u16> {
        let pair = parse_sreg_range(cur, self.arch, true)?.unwrap();
        let op = GcnOperand {
            code: pair.0,
            regs: pair.1 - pair.0,
            literal: None,
            pending: None,
            truncated: false,
        };
        if op.regs != count {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        usage.update(&op);
        Ok(op.code)
    }

    fn vreg(&self, cur: &mut Cursor, count: u16, usage: &mut RegUsage) -> Result<u16> {
        let pair = parse_vreg_range(cur, true)?.unwrap();
        let op = GcnOperand {
            code: pair.0,
            regs: pair.1 - pair.0,
            literal: None,
            pending: None,
            truncated: false,
        };
        if op.regs != count {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        usage.update(&op);
        Ok(op.code - 256)
    }

    fn check_width(op: &GcnOperand, expected: u16) -> Result<()> {
        let is_reg = op.code < 128 || op.code >= 256;
        if is_reg && op.regs != expected {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        Ok(())
    }

    fn ssource(
        &self,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
        ty: OperandType,
        width: u16,
        extra: OperandFlags,
    ) -> Result<GcnOperand> {
        let flags = OperandFlags::SREGS | OperandFlags::SSOURCE | extra;
        let op = parse_operand(cur, self.arch, flags, ty, symtab)?;
        Self::check_width(&op, width)?;
        usage.update(&op);
        Ok(op)
    }

    fn instr_type(mode: InstrMode) -> OperandType {
        if mode.contains(InstrMode::TYPE_F16) {
            OperandType::F16
        } else if mode.contains(InstrMode::TYPE_F32) {
            OperandType::F32
        } else {
            OperandType::Int
        }
    }

    fn finish(words: &[u32], lits: LitState) -> EncodedInstr {
        let mut bytes: SmallVec<[u8; 8]> = SmallVec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let mut pending = None;
        if let Some(lit) = lits.literal {
            let offset = bytes.len();
            bytes.extend_from_slice(&lit.to_le_bytes());
            if let Some(expr) = lits.pending {
                pending = Some(PendingPatch {
                    expr,
                    kind: PatchKind::Literal32,
                    offset,
                });
            }
        }
        EncodedInstr {
            bytes,
            pending,
            truncated: lits.truncated,
        }
    }

    fn eval_imm(
        &self,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
    ) -> Result<(u64, Option<Expr>)> {
        let expr = Expr::parse(cur, symtab)?;
        match expr.evaluate(&*symtab)? {
            EvalValue::Value { section, value } => {
                if section != ABS_SECTION {
                    Err(Error::ParseError(ParseError::UnexpectedToken))
                } else {
                    Ok((value, None))
                }
            }
            EvalValue::Deferred => Ok((0, Some(expr))),
        }
    }

    fn encode_sop2(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let ty = Self::instr_type(e.mode);
        let mut lits = LitState::default();
        let sdst = self.sreg(cur, if e.mode.contains(InstrMode::DST_64) { 2 } else { 1 }, usage)?;
        self.comma(cur)?;
        let s0w = if e.mode.contains(InstrMode::SRC0_64) { 2 } else { 1 };
        let src0 = self.ssource(cur, symtab, usage, ty, s0w, OperandFlags::empty())?;
        self.comma(cur)?;
        let s1w = if e.mode.contains(InstrMode::SRC1_64) { 2 } else { 1 };
        let src1 = self.ssource(cur, symtab, usage, ty, s1w, OperandFlags::empty())?;
        let src0 = lits.take(src0)?;
        let src1 = lits.take(src1)?;
        let word = 0x8000_0000
            | (e.opcode1 as u32) << 23
            | (sdst as u32) << 16
            | (src1 as u32 & 0xff) << 8
            | (src0 as u32 & 0xff);
        Ok(Self::finish(&[word], lits))
    }

    fn encode_sop1(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let ty = Self::instr_type(e.mode);
        let mut lits = LitState::default();
        let mut sdst = 0u16;
        let mut src0 = 0u16;
        if !e.mode.contains(InstrMode::NO_DST) {
            sdst = self.sreg(cur, if e.mode.contains(InstrMode::DST_64) { 2 } else { 1 }, usage)?;
        }
        if !e.mode.contains(InstrMode::NO_SRC) {
            if !e.mode.contains(InstrMode::NO_DST) {
                self.comma(cur)?;
            }
            let width = if e.mode.contains(InstrMode::SRC0_64) { 2 } else { 1 };
            let op = self.ssource(cur, symtab, usage, ty, width, OperandFlags::empty())?;
            src0 = lits.take(op)?;
        }
        let word = 0xbe80_0000
            | (sdst as u32) << 16
            | (e.opcode1 as u32) << 8
            | (src0 as u32 & 0xff);
        Ok(Self::finish(&[word], lits))
    }

    fn encode_sopk(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let sdst = self.sreg(cur, 1, usage)?;
        self.comma(cur)?;
        let (value, deferred) = self.eval_imm(cur, symtab)?;
        let truncated = (value as i64) < -(1 << 15) || value >= (1 << 16);
        let word = 0xb000_0000
            | (e.opcode1 as u32) << 23
            | (sdst as u32) << 16
            | (value as u32 & 0xffff);
        let mut out = Self::finish(&[word], LitState::default());
        out.truncated = truncated;
        if let Some(expr) = deferred {
            out.pending = Some(PendingPatch {
                expr,
                kind: PatchKind::Data(2),
                offset: 0,
            });
        }
        Ok(out)
    }

    fn encode_sopc(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let ty = Self::instr_type(e.mode);
        let mut lits = LitState::default();
        let s0w = if e.mode.contains(InstrMode::SRC0_64) { 2 } else { 1 };
        let src0 = self.ssource(cur, symtab, usage, ty, s0w, OperandFlags::empty())?;
        self.comma(cur)?;
        let s1w = if e.mode.contains(InstrMode::SRC1_64) { 2 } else { 1 };
        let src1 = self.ssource(cur, symtab, usage, ty, s1w, OperandFlags::empty())?;
        let src0 = lits.take(src0)?;
        let src1 = lits.take(src1)?;
        let word = 0xbf00_0000
            | (e.opcode1 as u32) << 16
            | (src1 as u32 & 0xff) << 8
            | (src0 as u32 & 0xff);
        Ok(Self::finish(&[word], lits))
    }

    fn encode_sopp(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        section: SectionId,
        position: u64,
    ) -> Result<EncodedInstr> {
        let mut simm = 0u32;
        let mut pending = None;
        let mut truncated = false;
        if e.mode.contains(InstrMode::IMM_REL) {
            let expr = Expr::parse(cur, symtab)?;
            match expr.evaluate(&*symtab)? {
                EvalValue::Value {
                    section: target_sect,
                    value,
                } => {
                    if target_sect != section && target_sect != ABS_SECTION {
                        return Err(Error::ParseError(ParseError::UnexpectedToken));
                    }
                    simm = branch_simm16(value, position)? as u16 as u32;
                }
                EvalValue::Deferred => {
                    pending = Some(PendingPatch {
                        expr,
                        kind: PatchKind::BranchSimm16,
                        offset: 0,
                    });
                }
            }
        } else if !e.mode.contains(InstrMode::NO_SRC) {
            let (value, deferred) = self.eval_imm(cur, symtab)?;
            truncated = value >= (1 << 16) || (value as i64) < -(1 << 15);
            simm = value as u32 & 0xffff;
            if let Some(expr) = deferred {
                pending = Some(PendingPatch {
                    expr,
                    kind: PatchKind::Data(2),
                    offset: 0,
                });
            }
        }
        let word = 0xbf80_0000 | (e.opcode1 as u32) << 16 | (simm & 0xffff);
        let mut out = Self::finish(&[word], LitState::default());
        out.pending = pending;
        out.truncated = truncated;
        Ok(out)
    }

    fn encode_smrd(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let mut sdst = 0u16;
        let mut sbase = 0u16;
        let mut imm = 0u32;
        let mut offset = 0u32;
        if !e.mode.contains(InstrMode::NO_DST) {
            sdst = self.sreg(cur, e.mode.dregs(), usage)?;
        }
        if !e.mode.contains(InstrMode::NO_SRC) && !e.mode.contains(InstrMode::SMRD_NO_OFFSET) {
            self.comma(cur)?;
            let base_w = if e.mode.contains(InstrMode::SMRD_BASE4) { 4 } else { 2 };
            sbase = self.sreg(cur, base_w, usage)?;
            self.comma(cur)?;
            if let Some(pair) = parse_sreg_range(cur, self.arch, false)? {
                if pair.1 - pair.0 != 1 {
                    return Err(Error::ParseError(ParseError::RegisterOutOfRange));
                }
                offset = pair.0 as u32;
            } else {
                let (value, deferred) = self.eval_imm(cur, symtab)?;
                if deferred.is_some() {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                imm = 1;
                offset = value as u32 & 0xff;
            }
        }
        let word = 0xc000_0000
            | (e.opcode1 as u32) << 22
            | (sdst as u32) << 15
            | (sbase as u32 >> 1) << 9
            | imm << 8
            | offset;
        Ok(Self::finish(&[word], LitState::default()))
    }

    fn parse_vop_src(
        &self,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
        ty: OperandType,
        width: u16,
    ) -> Result<VopSrc> {
        cur.skip_spaces();
        let mut neg = false;
        if cur.peek() == Some(b'-')
            && !matches!(cur.peek_at(1), Some(c) if c.is_ascii_digit() || c == b'.')
        {
            cur.bump();
            neg = true;
        }
        let mut abs = false;
        cur.skip_spaces();
        let save = cur.pos();
        if cur.eat_keyword("abs") && cur.eat(b'(') {
            abs = true;
        } else {
            cur.set_pos(save);
        }
        let flags = OperandFlags::SREGS | OperandFlags::VREGS | OperandFlags::SSOURCE;
        let op = parse_operand(cur, self.arch, flags, ty, symtab)?;
        Self::check_width(&op, width)?;
        if abs && !cur.eat(b')') {
            return Err(Error::ParseError(ParseError::UnexpectedToken));
        }
        usage.update(&op);
        Ok(VopSrc { op, neg, abs })
    }

    fn parse_vop_mods(&self, cur: &mut Cursor) -> Result<VopMods> {
        let mut mods = VopMods::default();
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                return Ok(mods);
            }
            if cur.eat_keyword("clamp") {
                mods.clamp = true;
            } else if cur.eat_keyword("mul") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                match cur.bump() {
                    Some(b'2') => mods.omod = 1,
                    Some(b'4') => mods.omod = 2,
                    _ => return Err(Error::ParseError(ParseError::UnexpectedToken)),
                }
            } else if cur.eat_keyword("div") {
                if !cur.eat(b':') || cur.bump() != Some(b'2') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                mods.omod = 3;
            } else {
                return Ok(mods);
            }
        }
    }

    /// Compact VOP2/VOP1/VOPC with fall-over to the fused extended
    /// form when an operand cannot be expressed compactly.
    fn encode_vop(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let ty = Self::instr_type(e.mode);
        let mut lits = LitState::default();
        let mut need_extended = false;

        // destination: VGPR for VOP2/VOP1, scalar pair for VOPC
        let (vdst, cmp_sdst) = match e.encoding1 {
            EncKind::Vopc => {
                let pair = parse_sreg_range(cur, self.arch, true)?.unwrap();
                if pair.1 - pair.0 != 2 {
                    return Err(Error::ParseError(ParseError::RegisterOutOfRange));
                }
                usage.update(&GcnOperand {
                    code: pair.0,
                    regs: 2,
                    literal: None,
                    pending: None,
                    truncated: false,
                });
                if pair.0 != 106 {
                    need_extended = true;
                }
                (0u16, pair.0)
            }
            _ => {
                if e.mode.contains(InstrMode::NO_DST) {
                    (0u16, 0u16)
                } else {
                    (self.vreg(cur, if e.mode.contains(InstrMode::DST_64) { 2 } else { 1 }, usage)?, 0u16)
                }
            }
        };

        // carry-out: explicit vcc (or another pair, forcing VOP3B)
        let mut sdst_carry = 106u16;
        if e.mode.contains(InstrMode::VCC_SDST) {
            self.comma(cur)?;
            let pair = parse_sreg_range(cur, self.arch, true)?.unwrap();
            if pair.1 - pair.0 != 2 {
                return Err(Error::ParseError(ParseError::RegisterOutOfRange));
            }
            sdst_carry = pair.0;
            if sdst_carry != 106 {
                need_extended = true;
            }
        }

        let mut src0 = None;
        let mut src1 = None;
        if !e.mode.contains(InstrMode::NO_SRC) {
            if !e.mode.contains(InstrMode::NO_DST) || e.encoding1 == EncKind::Vopc {
                self.comma(cur)?;
            }
            let s0w = if e.mode.contains(InstrMode::SRC0_64) { 2 } else { 1 };
            src0 = Some(self.parse_vop_src(cur, symtab, usage, ty, s0w)?);
            if e.encoding1 != EncKind::Vop1 {
                self.comma(cur)?;
                let s1w = if e.mode.contains(InstrMode::SRC1_64) { 2 } else { 1 };
                src1 = Some(self.parse_vop_src(cur, symtab, usage, ty, s1w)?);
            }
        }

        // carry-in: trailing vcc (or pair, extended only)
        let mut src2_cc = 106u16;
        if e.mode.contains(InstrMode::VCC_READ) {
            self.comma(cur)?;
            let pair = parse_sreg_range(cur, self.arch, true)?.unwrap();
            if pair.1 - pair.0 != 2 {
                return Err(Error::ParseError(ParseError::RegisterOutOfRange));
            }
            src2_cc = pair.0;
            if src2_cc != 106 {
                need_extended = true;
            }
        }

        let mods = self.parse_vop_mods(cur)?;
        if mods.clamp || mods.omod != 0 {
            need_extended = true;
        }
        if src0.as_ref().map_or(false, |s| s.needs_extended())
            || src1.as_ref().map_or(false, |s| s.needs_extended())
        {
            need_extended = true;
        }
        if let Some(s1) = &src1 {
            if !s1.op.is_vgpr() {
                need_extended = true;
            }
        }

        if !need_extended {
            let s0 = src0.map_or(Ok(0), |s| lits.take(s.op))?;
            let s1 = src1.map_or(0, |s| s.op.code - 256);
            let word = match e.encoding1 {
                EncKind::Vop2 => {
                    (e.opcode1 as u32) << 25
                        | (vdst as u32) << 17
                        | (s1 as u32) << 9
                        | (s0 as u32 & 0x1ff)
                }
                EncKind::Vop1 => {
                    0x7e00_0000
                        | (vdst as u32) << 17
                        | (e.opcode1 as u32) << 9
                        | (s0 as u32 & 0x1ff)
                }
                EncKind::Vopc => {
                    0x7c00_0000
                        | (e.opcode1 as u32) << 17
                        | (s1 as u32) << 9
                        | (s0 as u32 & 0x1ff)
                }
                _ => unreachable!(),
            };
            return Ok(Self::finish(&[word], lits));
        }

        // extended form required
        let (enc2, opcode2) = match e.encoding2 {
            Some(enc) if e.opcode2 != NO_OPCODE2 => (enc, e.opcode2),
            _ => return Err(Error::ParseError(ParseError::UnexpectedToken)),
        };
        let srcs: SmallVec<[&VopSrc; 3]> = src0.iter().chain(src1.iter()).collect();
        for s in &srcs {
            if s.op.code == 255 {
                return Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere));
            }
        }
        let vdst_field = if e.encoding1 == EncKind::Vopc {
            cmp_sdst
        } else {
            vdst
        };
        let src2 = if e.mode.contains(InstrMode::VCC_READ) {
            src2_cc
        } else {
            0
        };
        self.build_vop3(
            enc2,
            opcode2,
            e.mode,
            vdst_field,
            sdst_carry,
            &srcs,
            src2,
            &mods,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_vop3(
        &self,
        enc: EncKind,
        opcode: u16,
        mode: InstrMode,
        vdst: u16,
        sdst: u16,
        srcs: &[&VopSrc],
        implicit_src2: u16,
        mods: &VopMods,
    ) -> Result<EncodedInstr> {
        let mut abs_bits = 0u32;
        let mut neg_bits = 0u32;
        let mut fields = [0u32; 3];
        for (i, s) in srcs.iter().enumerate() {
            if s.abs {
                abs_bits |= 1 << i;
            }
            if s.neg {
                neg_bits |= 1 << i;
            }
            fields[i] = s.op.code as u32;
        }
        if srcs.len() < 3 && (mode.contains(InstrMode::VCC_READ) || implicit_src2 != 0) {
            fields[srcs.len().min(2)] = implicit_src2 as u32;
        }
        let word0 = match enc {
            EncKind::Vop3A => {
                0xd000_0000
                    | (opcode as u32) << 17
                    | u32::from(mods.clamp) << 11
                    | abs_bits << 8
                    | (vdst as u32 & 0xff)
            }
            EncKind::Vop3B => {
                if mods.clamp || abs_bits != 0 {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                0xd000_0000 | (opcode as u32) << 17 | (sdst as u32) << 8 | (vdst as u32 & 0xff)
            }
            _ => return Err(Error::InternalError("extended slot is not a VOP3 family")),
        };
        let word1 = neg_bits << 29
            | (mods.omod as u32) << 27
            | fields[2] << 18
            | fields[1] << 9
            | fields[0];
        Ok(Self::finish(&[word0, word1], LitState::default()))
    }

    /// VOP3-only instructions (no compact partner).
    fn encode_vop3_direct(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let ty = Self::instr_type(e.mode);
        let vdst = self.vreg(cur, if e.mode.contains(InstrMode::DST_64) { 2 } else { 1 }, usage)?;
        let mut sdst = 0u16;
        if e.encoding1 == EncKind::Vop3B {
            self.comma(cur)?;
            let pair = parse_sreg_range(cur, self.arch, true)?.unwrap();
            if pair.1 - pair.0 != 2 {
                return Err(Error::ParseError(ParseError::RegisterOutOfRange));
            }
            sdst = pair.0;
        }
        self.comma(cur)?;
        let s0w = if e.mode.contains(InstrMode::SRC0_64) { 2 } else { 1 };
        let src0 = self.parse_vop_src(cur, symtab, usage, ty, s0w)?;
        self.comma(cur)?;
        let s1w = if e.mode.contains(InstrMode::SRC1_64) { 2 } else { 1 };
        let src1 = self.parse_vop_src(cur, symtab, usage, ty, s1w)?;
        let mut srcs: SmallVec<[VopSrc; 3]> = SmallVec::new();
        srcs.push(src0);
        srcs.push(src1);
        if e.mode.contains(InstrMode::HAS_SRC2) {
            self.comma(cur)?;
            let s2w = if e.mode.contains(InstrMode::SRC2_64) { 2 } else { 1 };
            srcs.push(self.parse_vop_src(cur, symtab, usage, ty, s2w)?);
        }
        for s in &srcs {
            if s.op.code == 255 {
                return Err(Error::SemanticError(SemanticError::LiteralNotAllowedHere));
            }
        }
        let mods = self.parse_vop_mods(cur)?;
        let refs: SmallVec<[&VopSrc; 3]> = srcs.iter().collect();
        self.build_vop3(e.encoding1, e.opcode1, e.mode, vdst, sdst, &refs, 0, &mods)
    }

    fn encode_vintrp(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let _ = symtab;
        let vdst = self.vreg(cur, 1, usage)?;
        self.comma(cur)?;
        // v_interp_mov takes a parameter selector instead of a VGPR
        let vsrc = if e.opcode1 == 2 {
            cur.skip_spaces();
            let save = cur.pos();
            match cur.parse_name().map(|n| n.to_ascii_lowercase()) {
                Some(ref n) if n == "p10" => 0u32,
                Some(ref n) if n == "p20" => 1,
                Some(ref n) if n == "p0" => 2,
                _ => {
                    cur.set_pos(save);
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
            }
        } else {
            self.vreg(cur, 1, usage)? as u32
        };
        self.comma(cur)?;
        let (attr, chan) = parse_attr(cur)?;
        let word = 0xc800_0000
            | (vdst as u32) << 18
            | (e.opcode1 as u32) << 16
            | (attr as u32) << 10
            | (chan as u32) << 8
            | (vsrc & 0xff);
        Ok(Self::finish(&[word], LitState::default()))
    }

    fn encode_ds(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let mut vdst = 0u32;
        let mut data0 = 0u32;
        let mut data1 = 0u32;
        if !e.mode.contains(InstrMode::MEM_STORE) {
            vdst = self.vreg(cur, e.mode.dregs(), usage)? as u32;
            self.comma(cur)?;
        }
        let addr = self.vreg(cur, 1, usage)? as u32;
        if e.mode.contains(InstrMode::DS_DATA0) {
            self.comma(cur)?;
            data0 = self.vreg(cur, e.mode.dregs(), usage)? as u32;
        }
        if e.mode.contains(InstrMode::DS_DATA1) {
            self.comma(cur)?;
            data1 = self.vreg(cur, e.mode.dregs(), usage)? as u32;
        }
        // offset:/offset0:/offset1:/gds modifiers
        let mut offset = 0u32;
        let mut off0 = 0u32;
        let mut off1 = 0u32;
        let mut gds = 0u32;
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                break;
            }
            if cur.eat_keyword("offset0") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                off0 = self.eval_imm_resolved(cur, symtab)? as u32 & 0xff;
            } else if cur.eat_keyword("offset1") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                off1 = self.eval_imm_resolved(cur, symtab)? as u32 & 0xff;
            } else if cur.eat_keyword("offset") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                offset = self.eval_imm_resolved(cur, symtab)? as u32 & 0xffff;
            } else if cur.eat_keyword("gds") {
                gds = 1;
            } else {
                break;
            }
        }
        let low16 = if e.mode.contains(InstrMode::DS_TWO_OFFSETS) {
            off1 << 8 | off0
        } else {
            offset
        };
        let word0 = 0xd800_0000 | (e.opcode1 as u32) << 18 | gds << 17 | low16;
        let word1 = vdst << 24 | data1 << 16 | data0 << 8 | addr;
        Ok(Self::finish(&[word0, word1], LitState::default()))
    }

    fn eval_imm_resolved(&self, cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<u64> {
        let (value, deferred) = self.eval_imm(cur, symtab)?;
        if deferred.is_some() {
            return Err(Error::ParseError(ParseError::UnexpectedToken));
        }
        Ok(value)
    }

    fn encode_mxbuf(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let vdata = self.vreg(cur, e.mode.dregs(), usage)? as u32;
        self.comma(cur)?;
        let vaddr_pair = parse_vreg_range(cur, true)?.unwrap();
        let vaddr_regs = vaddr_pair.1 - vaddr_pair.0;
        if vaddr_regs > 2 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        usage.update(&GcnOperand {
            code: vaddr_pair.0,
            regs: vaddr_regs,
            literal: None,
            pending: None,
            truncated: false,
        });
        let vaddr = (vaddr_pair.0 - 256) as u32;
        self.comma(cur)?;
        let srsrc = self.sreg(cur, 4, usage)? as u32;
        self.comma(cur)?;
        let soffset = self
            .ssource(
                cur,
                symtab,
                usage,
                OperandType::Int,
                1,
                OperandFlags::ONLY_INLINE_CONSTS,
            )?
            .code as u32;
        let mut offen = 0u32;
        let mut idxen = 0u32;
        let mut offset = 0u32;
        let mut glc = 0u32;
        let mut slc = 0u32;
        let mut tfe = 0u32;
        let mut lds = 0u32;
        let mut addr64 = 0u32;
        let mut dfmt = 0u32;
        let mut nfmt = 0u32;
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                break;
            }
            if cur.eat_keyword("offen") {
                offen = 1;
            } else if cur.eat_keyword("idxen") {
                idxen = 1;
            } else if cur.eat_keyword("offset") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                offset = self.eval_imm_resolved(cur, symtab)? as u32 & 0xfff;
            } else if cur.eat_keyword("glc") {
                glc = 1;
            } else if cur.eat_keyword("slc") {
                slc = 1;
            } else if cur.eat_keyword("tfe") {
                tfe = 1;
            } else if e.encoding1 == EncKind::Mubuf && cur.eat_keyword("lds") {
                lds = 1;
            } else if cur.eat_keyword("addr64") {
                addr64 = 1;
            } else if e.encoding1 == EncKind::Mtbuf && cur.eat_keyword("dfmt") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                dfmt = self.eval_imm_resolved(cur, symtab)? as u32 & 0xf;
            } else if e.encoding1 == EncKind::Mtbuf && cur.eat_keyword("nfmt") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                nfmt = self.eval_imm_resolved(cur, symtab)? as u32 & 0x7;
            } else {
                break;
            }
        }
        let word0 = match e.encoding1 {
            EncKind::Mubuf => {
                0xe000_0000
                    | (e.opcode1 as u32) << 18
                    | lds << 16
                    | addr64 << 15
                    | glc << 14
                    | idxen << 13
                    | offen << 12
                    | offset
            }
            _ => {
                0xe800_0000
                    | nfmt << 23
                    | dfmt << 19
                    | (e.opcode1 as u32) << 16
                    | addr64 << 15
                    | glc << 14
                    | idxen << 13
                    | offen << 12
                    | offset
            }
        };
        let word1 = soffset << 24 | tfe << 23 | slc << 22 | (srsrc >> 2) << 16 | vdata << 8 | vaddr;
        Ok(Self::finish(&[word0, word1], LitState::default()))
    }

    fn encode_mimg(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let vdata = self.vreg(cur, e.mode.dregs(), usage)? as u32;
        self.comma(cur)?;
        let vaddr_pair = parse_vreg_range(cur, true)?.unwrap();
        usage.update(&GcnOperand {
            code: vaddr_pair.0,
            regs: vaddr_pair.1 - vaddr_pair.0,
            literal: None,
            pending: None,
            truncated: false,
        });
        let vaddr = (vaddr_pair.0 - 256) as u32;
        self.comma(cur)?;
        let srsrc_pair = parse_sreg_range(cur, self.arch, true)?.unwrap();
        let srsrc_regs = srsrc_pair.1 - srsrc_pair.0;
        if srsrc_regs != 4 && srsrc_regs != 8 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        usage.update(&GcnOperand {
            code: srsrc_pair.0,
            regs: srsrc_regs,
            literal: None,
            pending: None,
            truncated: false,
        });
        // sampler ops carry an SSAMP group after the resource
        let mut ssamp = 0u32;
        if e.opcode1 >= 32 {
            self.comma(cur)?;
            ssamp = self.sreg(cur, 4, usage)? as u32;
        }
        let mut dmask = 0xfu32;
        let mut unorm = 0u32;
        let mut glc = 0u32;
        let mut slc = 0u32;
        let mut r128 = 0u32;
        let mut tfe = 0u32;
        let mut lwe = 0u32;
        let mut da = 0u32;
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                break;
            }
            if cur.eat_keyword("dmask") {
                if !cur.eat(b':') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                dmask = self.eval_imm_resolved(cur, symtab)? as u32 & 0xf;
            } else if cur.eat_keyword("unorm") {
                unorm = 1;
            } else if cur.eat_keyword("glc") {
                glc = 1;
            } else if cur.eat_keyword("slc") {
                slc = 1;
            } else if cur.eat_keyword("r128") {
                r128 = 1;
            } else if cur.eat_keyword("tfe") {
                tfe = 1;
            } else if cur.eat_keyword("lwe") {
                lwe = 1;
            } else if cur.eat_keyword("da") {
                da = 1;
            } else {
                break;
            }
        }
        let word0 = 0xf000_0000
            | slc << 25
            | (e.opcode1 as u32) << 18
            | lwe << 17
            | tfe << 16
            | r128 << 15
            | da << 14
            | glc << 13
            | unorm << 12
            | dmask << 8;
        let word1 =
            (ssamp >> 2) << 21 | ((srsrc_pair.0 as u32) >> 2) << 16 | vdata << 8 | vaddr;
        Ok(Self::finish(&[word0, word1], LitState::default()))
    }

    fn encode_exp(
        &self,
        _e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let _ = symtab;
        cur.skip_spaces();
        let target = parse_exp_target(cur)?;
        let mut srcs = [0u32; 4];
        for s in srcs.iter_mut() {
            self.comma(cur)?;
            *s = self.vreg(cur, 1, usage)? as u32;
        }
        let mut done = 0u32;
        let mut compr = 0u32;
        let mut vm = 0u32;
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                break;
            }
            if cur.eat_keyword("done") {
                done = 1;
            } else if cur.eat_keyword("compr") {
                compr = 1;
            } else if cur.eat_keyword("vm") {
                vm = 1;
            } else {
                break;
            }
        }
        let word0 =
            0xf800_0000 | vm << 12 | done << 11 | compr << 10 | (target as u32) << 4 | 0xf;
        let word1 = srcs[3] << 24 | srcs[2] << 16 | srcs[1] << 8 | srcs[0];
        Ok(Self::finish(&[word0, word1], LitState::default()))
    }

    fn encode_flat(
        &self,
        e: &IsaEntry,
        cur: &mut Cursor,
        symtab: &mut SymbolTable,
        usage: &mut RegUsage,
    ) -> Result<EncodedInstr> {
        let mut vdst = 0u32;
        let mut data = 0u32;
        if !e.mode.contains(InstrMode::MEM_STORE) {
            vdst = self.vreg(cur, e.mode.dregs(), usage)? as u32;
            self.comma(cur)?;
        }
        let addr = self.vreg(cur, 2, usage)? as u32;
        if e.mode.contains(InstrMode::MEM_STORE) {
            self.comma(cur)?;
            data = self.vreg(cur, e.mode.dregs(), usage)? as u32;
        }
        let mut glc = 0u32;
        let mut slc = 0u32;
        let mut tfe = 0u32;
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                break;
            }
            if cur.eat_keyword("glc") {
                glc = 1;
            } else if cur.eat_keyword("slc") {
                slc = 1;
            } else if cur.eat_keyword("tfe") {
                tfe = 1;
            } else {
                break;
            }
        }
        let _ = symtab;
        let word0 = 0xdc00_0000 | (e.opcode1 as u32) << 18 | slc << 17 | glc << 16;
        let word1 = vdst << 24 | tfe << 23 | data << 8 | addr;
        Ok(Self::finish(&[word0, word1], LitState::default()))
    }
}

/// Relative branch displacement in code words from the end of the
/// 4-byte instruction.
pub(crate) fn branch_simm16(target: u64, position: u64) -> Result<i16> {
    let diff = target.wrapping_sub(position.wrapping_add(4)) as i64;
    if diff % 4 != 0 {
        return Err(Error::ParseError(ParseError::UnalignedRange));
    }
    let words = diff / 4;
    if !(-(1 << 15)..(1 << 15)).contains(&words) {
        return Err(Error::ParseError(ParseError::UnexpectedToken));
    }
    Ok(words as i16)
}

fn parse_attr(cur: &mut Cursor) -> Result<(u8, u8)> {
    cur.skip_spaces();
    let name = cur
        .parse_name()
        .ok_or(Error::ParseError(ParseError::UnexpectedToken))?
        .to_ascii_lowercase();
    let rest = name
        .strip_prefix("attr")
        .ok_or(Error::ParseError(ParseError::UnexpectedToken))?;
    let (num, chan) = rest
        .split_once('.')
        .ok_or(Error::ParseError(ParseError::UnexpectedToken))?;
    let attr: u8 = num
        .parse()
        .map_err(|_| Error::ParseError(ParseError::MissingNumber))?;
    if attr >= 64 {
        return Err(Error::ParseError(ParseError::RegisterOutOfRange));
    }
    let chan = match chan {
        "x" => 0,
        "y" => 1,
        "z" => 2,
        "w" => 3,
        _ => return Err(Error::ParseError(ParseError::UnexpectedToken)),
    };
    Ok((attr, chan))
}

fn parse_exp_target(cur: &mut Cursor) -> Result<u8> {
    let name = cur
        .parse_name()
        .ok_or(Error::ParseError(ParseError::UnexpectedToken))?
        .to_ascii_lowercase();
    if let Some(num) = name.strip_prefix("mrt") {
        if num == "z" {
            return Ok(8);
        }
        let n: u8 = num
            .parse()
            .map_err(|_| Error::ParseError(ParseError::MissingNumber))?;
        if n > 7 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        return Ok(n);
    }
    if name == "null" {
        return Ok(9);
    }
    if let Some(num) = name.strip_prefix("pos") {
        let n: u8 = num
            .parse()
            .map_err(|_| Error::ParseError(ParseError::MissingNumber))?;
        if n > 3 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        return Ok(12 + n);
    }
    if let Some(num) = name.strip_prefix("param") {
        let n: u8 = num
            .parse()
            .map_err(|_| Error::ParseError(ParseError::MissingNumber))?;
        if n > 31 {
            return Err(Error::ParseError(ParseError::RegisterOutOfRange));
        }
        return Ok(32 + n);
    }
    Err(Error::ParseError(ParseError::UnexpectedToken))
}
