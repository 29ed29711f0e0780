use crate::asm::RelocKind;
use crate::error::Result;
use crate::isa::gcn::arch::Arch;
use crate::isa::gcn::table::{EncKind, InstrMode, IsaEntry, IsaTable};
use crate::support::load_u32;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt::Write;

/// Relocation to splice into the text at the literal it targets.
#[derive(Clone, Debug)]
pub struct DisasmReloc {
    pub offset: usize,
    pub kind: RelocKind,
    pub symbol: String,
    pub addend: i64,
}

/// Streaming disassembler for one code blob. Labels discovered by the
/// pre-pass and labels supplied by the caller are interleaved with the
/// decoded lines in ascending offset order.
pub struct GcnDecoder<'a> {
    input: &'a [u8],
    arch: Arch,
    index: HashMap<(EncKind, u16), &'a IsaEntry>,
    labels: Vec<usize>,
    named_labels: Vec<(usize, String)>,
    relocations: Vec<DisasmReloc>,
    output: String,
}

impl<'a> GcnDecoder<'a> {
    pub fn new(table: &'a IsaTable, arch: Arch, input: &'a [u8]) -> GcnDecoder<'a> {
        GcnDecoder {
            input,
            arch,
            index: table.decode_index(arch.mask()),
            labels: Vec::new(),
            named_labels: Vec::new(),
            relocations: Vec::new(),
            output: String::with_capacity(input.len() * 8),
        }
    }

    pub fn add_named_label(&mut self, pos: usize, name: &str) {
        self.named_labels.push((pos, name.to_string()));
    }

    pub fn add_relocation(&mut self, reloc: DisasmReloc) {
        self.relocations.push(reloc);
    }

    /// Scan branch instructions and record their targets as numeric
    /// labels, ordered by offset.
    pub fn before_disassemble(&mut self) {
        let mut pos = 0usize;
        while pos + 4 <= self.input.len() {
            let w = load_u32(self.input, pos);
            let len = self.instr_len(w);
            if let Some((EncKind::Sopp, opcode)) = classify(w) {
                if let Some(e) = self.index.get(&(EncKind::Sopp, opcode)) {
                    if e.mode.contains(InstrMode::IMM_REL) {
                        let simm = (w & 0xffff) as u16 as i16 as i64;
                        let target = pos as i64 + 4 + simm * 4;
                        if target >= 0 && (target as usize) <= self.input.len() {
                            self.labels.push(target as usize);
                        }
                    }
                }
            }
            pos += len;
        }
        self.labels.sort_unstable();
        self.labels.dedup();
        self.named_labels.sort_by(|a, b| a.0.cmp(&b.0));
        self.relocations.sort_by(|a, b| a.offset.cmp(&b.offset));
    }

    /// Decode the whole input. Returns the buffered text.
    pub fn disassemble(mut self) -> Result<String> {
        let mut pos = 0usize;
        let mut label_iter = 0usize;
        let mut named_iter = 0usize;
        while pos + 4 <= self.input.len() {
            self.write_labels_to(pos, &mut label_iter, &mut named_iter);
            let w = load_u32(self.input, pos);
            let line = self.decode_one(w, pos);
            self.output.push_str("    ");
            self.output.push_str(&line.text);
            self.output.push('\n');
            pos += line.len;
        }
        if pos < self.input.len() {
            // trailing bytes shorter than one instruction word
            self.write_labels_to(pos, &mut label_iter, &mut named_iter);
            let mut text = String::from("    .byte ");
            for (i, b) in self.input[pos..].iter().enumerate() {
                if i > 0 {
                    text.push_str(", ");
                }
                let _ = write!(text, "0x{:02x}", b);
            }
            self.output.push_str(&text);
            self.output.push('\n');
            pos = self.input.len();
        }
        self.write_labels_to(pos, &mut label_iter, &mut named_iter);
        Ok(self.output)
    }

    fn write_labels_to(&mut self, pos: usize, label_iter: &mut usize, named_iter: &mut usize) {
        while *named_iter < self.named_labels.len() && self.named_labels[*named_iter].0 <= pos {
            let (p, name) = &self.named_labels[*named_iter];
            if *p == pos {
                let line = format!("{}:\n", name);
                self.output.push_str(&line);
            }
            *named_iter += 1;
        }
        while *label_iter < self.labels.len() && self.labels[*label_iter] <= pos {
            if self.labels[*label_iter] == pos {
                let idx = *label_iter;
                let _ = writeln!(self.output, "L{}:", idx);
            }
            *label_iter += 1;
        }
    }

    fn label_name(&self, target: usize) -> Option<String> {
        self.labels
            .binary_search(&target)
            .ok()
            .map(|idx| format!("L{}", idx))
    }

    fn instr_len(&self, w: u32) -> usize {
        match classify(w) {
            Some((enc, opcode)) => {
                let entry = self.lookup(enc, opcode);
                match entry {
                    Some((e, enc)) => {
                        let mut len = word_count(enc) * 4;
                        if has_literal_tail(enc, e, w) {
                            len += 4;
                        }
                        len
                    }
                    None => word_count(enc) * 4,
                }
            }
            None => 4,
        }
    }

    fn lookup(&self, enc: EncKind, opcode: u16) -> Option<(&'a IsaEntry, EncKind)> {
        if enc == EncKind::Vop3A {
            // the word cannot tell VOP3A from VOP3B; the table can
            if let Some(e) = self.index.get(&(EncKind::Vop3A, opcode)) {
                return Some((e, EncKind::Vop3A));
            }
            if let Some(e) = self.index.get(&(EncKind::Vop3B, opcode)) {
                return Some((e, EncKind::Vop3B));
            }
            return None;
        }
        self.index.get(&(enc, opcode)).map(|e| (*e, enc))
    }

    fn decode_one(&self, w: u32, pos: usize) -> DecodedLine {
        let (enc, opcode) = match classify(w) {
            Some(x) => x,
            None => {
                return DecodedLine {
                    len: 4,
                    text: format!(".int 0x{:08x}", w),
                }
            }
        };
        let (e, enc) = match self.lookup(enc, opcode) {
            Some(x) => x,
            None => {
                return DecodedLine {
                    len: word_count(enc) * 4,
                    text: format!(".int 0x{:08x}", w),
                }
            }
        };
        let words = word_count(enc);
        let mut literal = None;
        let mut len = words * 4;
        if has_literal_tail(enc, e, w) {
            if pos + len + 4 <= self.input.len() {
                literal = Some(load_u32(self.input, pos + len));
            }
            len += 4;
        }
        let w1 = if words > 1 && pos + 8 <= self.input.len() {
            load_u32(self.input, pos + 4)
        } else {
            0
        };
        let lit_offset = pos + words * 4;
        let text = self.fmt_instr(e, enc, w, w1, literal, pos, lit_offset);
        DecodedLine { len, text }
    }

    #[allow(clippy::too_many_arguments)]
    fn fmt_instr(
        &self,
        e: &IsaEntry,
        enc: EncKind,
        w: u32,
        w1: u32,
        literal: Option<u32>,
        pos: usize,
        lit_offset: usize,
    ) -> String {
        let mut out = String::from(e.mnemonic);
        let m = e.mode;
        let dst64 = if m.contains(InstrMode::DST_64) { 2 } else { 1 };
        let s0w = if m.contains(InstrMode::SRC0_64) { 2 } else { 1 };
        let s1w = if m.contains(InstrMode::SRC1_64) { 2 } else { 1 };
        let src = |code: u32, width: u16| self.fmt_operand(code as u16, width, literal, lit_offset);
        match enc {
            EncKind::Sop2 => {
                let _ = write!(
                    out,
                    " {}, {}, {}",
                    self.fmt_operand(((w >> 16) & 0x7f) as u16, dst64, None, 0),
                    src(w & 0xff, s0w),
                    src((w >> 8) & 0xff, s1w),
                );
            }
            EncKind::Sop1 => {
                let mut first = true;
                if !m.contains(InstrMode::NO_DST) {
                    let _ = write!(
                        out,
                        " {}",
                        self.fmt_operand(((w >> 16) & 0x7f) as u16, dst64, None, 0)
                    );
                    first = false;
                }
                if !m.contains(InstrMode::NO_SRC) {
                    let sep = if first { " " } else { ", " };
                    let _ = write!(out, "{}{}", sep, src(w & 0xff, s0w));
                }
            }
            EncKind::Sopk => {
                let _ = write!(
                    out,
                    " {}, 0x{:x}",
                    self.fmt_operand(((w >> 16) & 0x7f) as u16, 1, None, 0),
                    w & 0xffff
                );
            }
            EncKind::Sopc => {
                let _ = write!(out, " {}, {}", src(w & 0xff, s0w), src((w >> 8) & 0xff, s1w));
            }
            EncKind::Sopp => {
                if m.contains(InstrMode::IMM_REL) {
                    let simm = (w & 0xffff) as u16 as i16 as i64;
                    let target = pos as i64 + 4 + simm * 4;
                    match self.label_name(target.max(0) as usize) {
                        Some(name) if target >= 0 => {
                            let _ = write!(out, " {}", name);
                        }
                        _ => {
                            let _ = write!(out, " {}", simm);
                        }
                    }
                } else if !m.contains(InstrMode::NO_SRC) {
                    let _ = write!(out, " 0x{:x}", w & 0xffff);
                }
            }
            EncKind::Smrd => {
                if !m.contains(InstrMode::NO_DST) {
                    let _ = write!(
                        out,
                        " {}",
                        self.fmt_operand(((w >> 15) & 0x7f) as u16, m.dregs(), None, 0)
                    );
                }
                if !m.contains(InstrMode::NO_SRC) && !m.contains(InstrMode::SMRD_NO_OFFSET) {
                    let base_w = if m.contains(InstrMode::SMRD_BASE4) { 4 } else { 2 };
                    let sbase = (((w >> 9) & 0x3f) * 2) as u16;
                    let _ = write!(out, ", {}", self.fmt_operand(sbase, base_w, None, 0));
                    if (w >> 8) & 1 != 0 {
                        let _ = write!(out, ", 0x{:x}", w & 0xff);
                    } else {
                        let _ = write!(out, ", {}", self.fmt_operand((w & 0xff) as u16, 1, None, 0));
                    }
                }
            }
            EncKind::Vop2 => {
                let _ = write!(out, " v{}", (w >> 17) & 0xff);
                if m.contains(InstrMode::VCC_SDST) {
                    out.push_str(", vcc");
                }
                let _ = write!(out, ", {}, v{}", src(w & 0x1ff, s0w), (w >> 9) & 0xff);
                if m.contains(InstrMode::VCC_READ) {
                    out.push_str(", vcc");
                }
            }
            EncKind::Vop1 => {
                if !m.contains(InstrMode::NO_DST) {
                    let _ = write!(out, " v{}", fmt_vreg_body((w >> 17) & 0xff, dst64));
                }
                if !m.contains(InstrMode::NO_SRC) {
                    let _ = write!(out, ", {}", src(w & 0x1ff, s0w));
                }
            }
            EncKind::Vopc => {
                let _ = write!(out, " vcc, {}, v{}", src(w & 0x1ff, s0w), (w >> 9) & 0xff);
            }
            EncKind::Vop3A | EncKind::Vop3B => {
                return self.fmt_vop3(e, enc, w, w1);
            }
            EncKind::Vintrp => {
                let _ = write!(out, " v{}, ", (w >> 18) & 0xff);
                if e.opcode1 == 2 {
                    out.push_str(match w & 0x3 {
                        0 => "p10",
                        1 => "p20",
                        _ => "p0",
                    });
                } else {
                    let _ = write!(out, "v{}", w & 0xff);
                }
                let chan = [b'x', b'y', b'z', b'w'][((w >> 8) & 3) as usize] as char;
                let _ = write!(out, ", attr{}.{}", (w >> 10) & 0x3f, chan);
            }
            EncKind::Ds => {
                let vdst = w1 >> 24;
                let addr = w1 & 0xff;
                let data0 = (w1 >> 8) & 0xff;
                let data1 = (w1 >> 16) & 0xff;
                let mut ops: SmallVec<[String; 4]> = SmallVec::new();
                if !m.contains(InstrMode::MEM_STORE) {
                    ops.push(format!("v{}", fmt_vreg_body(vdst, m.dregs())));
                }
                ops.push(format!("v{}", addr));
                if m.contains(InstrMode::DS_DATA0) {
                    ops.push(format!("v{}", fmt_vreg_body(data0, m.dregs())));
                }
                if m.contains(InstrMode::DS_DATA1) {
                    ops.push(format!("v{}", fmt_vreg_body(data1, m.dregs())));
                }
                let _ = write!(out, " {}", ops.join(", "));
                if m.contains(InstrMode::DS_TWO_OFFSETS) {
                    let (o0, o1) = (w & 0xff, (w >> 8) & 0xff);
                    if o0 != 0 {
                        let _ = write!(out, " offset0:{}", o0);
                    }
                    if o1 != 0 {
                        let _ = write!(out, " offset1:{}", o1);
                    }
                } else if w & 0xffff != 0 {
                    let _ = write!(out, " offset:{}", w & 0xffff);
                }
                if (w >> 17) & 1 != 0 {
                    out.push_str(" gds");
                }
            }
            EncKind::Mubuf | EncKind::Mtbuf => {
                let vaddr = w1 & 0xff;
                let vdata = (w1 >> 8) & 0xff;
                let srsrc = ((w1 >> 16) & 0x1f) * 4;
                let soffset = w1 >> 24;
                let offen = (w >> 12) & 1;
                let idxen = (w >> 13) & 1;
                let addr64 = (w >> 15) & 1;
                let vaddr_w = if (offen & idxen) != 0 || addr64 != 0 { 2 } else { 1 };
                let _ = write!(
                    out,
                    " v{}, v{}, {}, {}",
                    fmt_vreg_body(vdata, m.dregs()),
                    fmt_vreg_body(vaddr, vaddr_w),
                    self.fmt_operand(srsrc as u16, 4, None, 0),
                    self.fmt_operand(soffset as u16, 1, None, 0),
                );
                if idxen != 0 {
                    out.push_str(" idxen");
                }
                if offen != 0 {
                    out.push_str(" offen");
                }
                if w & 0xfff != 0 {
                    let _ = write!(out, " offset:{}", w & 0xfff);
                }
                if (w >> 14) & 1 != 0 {
                    out.push_str(" glc");
                }
                if (w1 >> 22) & 1 != 0 {
                    out.push_str(" slc");
                }
                if (w1 >> 23) & 1 != 0 {
                    out.push_str(" tfe");
                }
                if enc == EncKind::Mubuf && (w >> 16) & 1 != 0 {
                    out.push_str(" lds");
                }
                if addr64 != 0 {
                    out.push_str(" addr64");
                }
                if enc == EncKind::Mtbuf {
                    let _ = write!(out, " dfmt:{}", (w >> 19) & 0xf);
                    let _ = write!(out, " nfmt:{}", (w >> 23) & 0x7);
                }
            }
            EncKind::Mimg => {
                let vaddr = w1 & 0xff;
                let vdata = (w1 >> 8) & 0xff;
                let srsrc = ((w1 >> 16) & 0x1f) * 4;
                let ssamp = ((w1 >> 21) & 0x1f) * 4;
                let _ = write!(
                    out,
                    " v{}, v{}, {}",
                    fmt_vreg_body(vdata, m.dregs()),
                    vaddr,
                    self.fmt_operand(srsrc as u16, 4, None, 0),
                );
                if e.opcode1 >= 32 {
                    let _ = write!(out, ", {}", self.fmt_operand(ssamp as u16, 4, None, 0));
                }
                let dmask = (w >> 8) & 0xf;
                if dmask != 0xf {
                    let _ = write!(out, " dmask:{}", dmask);
                }
                for (bit, name) in [
                    (12, "unorm"),
                    (13, "glc"),
                    (14, "da"),
                    (15, "r128"),
                    (16, "tfe"),
                    (17, "lwe"),
                ] {
                    if (w >> bit) & 1 != 0 {
                        out.push(' ');
                        out.push_str(name);
                    }
                }
                if (w >> 25) & 1 != 0 {
                    out.push_str(" slc");
                }
            }
            EncKind::Exp => {
                let target = ((w >> 4) & 0x3f) as u8;
                let _ = write!(out, " {}", fmt_exp_target(target));
                for i in 0..4 {
                    let _ = write!(out, ", v{}", (w1 >> (i * 8)) & 0xff);
                }
                if (w >> 11) & 1 != 0 {
                    out.push_str(" done");
                }
                if (w >> 10) & 1 != 0 {
                    out.push_str(" compr");
                }
                if (w >> 12) & 1 != 0 {
                    out.push_str(" vm");
                }
            }
            EncKind::Flat => {
                let addr = w1 & 0xff;
                let data = (w1 >> 8) & 0xff;
                let vdst = w1 >> 24;
                if m.contains(InstrMode::MEM_STORE) {
                    let _ = write!(
                        out,
                        " v{}, v{}",
                        fmt_vreg_body(addr, 2),
                        fmt_vreg_body(data, m.dregs())
                    );
                } else {
                    let _ = write!(
                        out,
                        " v{}, v{}",
                        fmt_vreg_body(vdst, m.dregs()),
                        fmt_vreg_body(addr, 2)
                    );
                }
                if (w >> 16) & 1 != 0 {
                    out.push_str(" glc");
                }
                if (w >> 17) & 1 != 0 {
                    out.push_str(" slc");
                }
                if (w1 >> 23) & 1 != 0 {
                    out.push_str(" tfe");
                }
            }
        }
        out
    }

    fn fmt_vop3(&self, e: &IsaEntry, enc: EncKind, w: u32, w1: u32) -> String {
        let m = e.mode;
        let mut out = String::from(e.mnemonic);
        let dst64 = if m.contains(InstrMode::DST_64) { 2 } else { 1 };
        let src_widths = [
            if m.contains(InstrMode::SRC0_64) { 2u16 } else { 1 },
            if m.contains(InstrMode::SRC1_64) { 2 } else { 1 },
            if m.contains(InstrMode::SRC2_64) { 2 } else { 1 },
        ];
        let (clamp, abs_bits, sdst) = if enc == EncKind::Vop3B {
            (false, 0u32, ((w >> 8) & 0x7f) as u16)
        } else {
            (((w >> 11) & 1) != 0, (w >> 8) & 0x7, 0)
        };
        let neg_bits = w1 >> 29;
        let omod = (w1 >> 27) & 3;
        let vdst = (w & 0xff) as u16;

        // destination(s) by the compact family the row belongs to
        match e.encoding1 {
            EncKind::Vopc => {
                let _ = write!(out, " {}", self.fmt_operand(vdst, 2, None, 0));
            }
            _ => {
                let _ = write!(out, " v{}", fmt_vreg_body(vdst as u32, dst64));
                if enc == EncKind::Vop3B {
                    let _ = write!(out, ", {}", self.fmt_operand(sdst, 2, None, 0));
                }
            }
        }
        let nsrc = if m.contains(InstrMode::HAS_SRC2) {
            3
        } else if e.encoding1 == EncKind::Vop1 {
            1
        } else {
            2
        };
        let fields = [w1 & 0x1ff, (w1 >> 9) & 0x1ff, (w1 >> 18) & 0x1ff];
        for i in 0..nsrc {
            out.push_str(", ");
            if neg_bits >> i & 1 != 0 {
                out.push('-');
            }
            if abs_bits >> i & 1 != 0 {
                out.push_str("abs(");
            }
            let _ = write!(
                out,
                "{}",
                self.fmt_operand(fields[i] as u16, src_widths[i], None, 0)
            );
            if abs_bits >> i & 1 != 0 {
                out.push(')');
            }
        }
        if m.contains(InstrMode::VCC_READ) {
            let _ = write!(out, ", {}", self.fmt_operand(fields[2] as u16, 2, None, 0));
        }
        if clamp {
            out.push_str(" clamp");
        }
        match omod {
            1 => out.push_str(" mul:2"),
            2 => out.push_str(" mul:4"),
            3 => out.push_str(" div:2"),
            _ => {}
        }
        out
    }

    /// Textual form of a 9-bit operand selector.
    fn fmt_operand(&self, code: u16, width: u16, literal: Option<u32>, lit_offset: usize) -> String {
        match code {
            102 | 103 if self.arch == Arch::Gcn1_2 => named_pair("flat_scratch", 102, code, width),
            104 | 105 if self.arch == Arch::Gcn1_1 => {
                named_pair("flat_scratch", 104, code, width)
            }
            104 | 105 if self.arch == Arch::Gcn1_2 => named_pair("xnack_mask", 104, code, width),
            0..=103 => {
                if width == 1 {
                    format!("s{}", code)
                } else {
                    format!("s[{}:{}]", code, code + width - 1)
                }
            }
            106 | 107 => named_pair("vcc", 106, code, width),
            108 | 109 => named_pair("tba", 108, code, width),
            110 | 111 => named_pair("tma", 110, code, width),
            112..=123 => format!("ttmp{}", code - 112),
            124 => "m0".to_string(),
            126 | 127 => named_pair("exec", 126, code, width),
            128..=192 => format!("{}", code - 128),
            193..=208 => format!("-{}", code - 192),
            240 => "0.5".to_string(),
            241 => "-0.5".to_string(),
            242 => "1.0".to_string(),
            243 => "-1.0".to_string(),
            244 => "2.0".to_string(),
            245 => "-2.0".to_string(),
            246 => "4.0".to_string(),
            247 => "-4.0".to_string(),
            248 if self.arch.has_inv_2pi_const() => "0.15915494".to_string(),
            251 => "vccz".to_string(),
            252 => "execz".to_string(),
            253 => "scc".to_string(),
            255 => {
                if let Some(r) = self
                    .relocations
                    .iter()
                    .find(|r| r.offset == lit_offset)
                {
                    return fmt_reloc(r);
                }
                match literal {
                    Some(v) => format!("0x{:x}", v),
                    None => "0x0".to_string(),
                }
            }
            256..=511 => {
                let idx = code - 256;
                if width == 1 {
                    format!("v{}", idx)
                } else {
                    format!("v[{}:{}]", idx, idx + width - 1)
                }
            }
            _ => format!("ill_{}", code),
        }
    }
}

struct DecodedLine {
    len: usize,
    text: String,
}

fn named_pair(name: &str, base: u16, code: u16, width: u16) -> String {
    if width == 2 && code == base {
        name.to_string()
    } else if code == base {
        format!("{}_lo", name)
    } else {
        format!("{}_hi", name)
    }
}

fn fmt_vreg_body(idx: u32, width: u16) -> String {
    if width == 1 {
        format!("{}", idx)
    } else {
        format!("[{}:{}]", idx, idx + width as u32 - 1)
    }
}

fn fmt_exp_target(target: u8) -> String {
    match target {
        0..=7 => format!("mrt{}", target),
        8 => "mrtz".to_string(),
        9 => "null".to_string(),
        12..=15 => format!("pos{}", target - 12),
        32..=63 => format!("param{}", target - 32),
        _ => format!("target_{}", target),
    }
}

fn fmt_reloc(r: &DisasmReloc) -> String {
    let base = if r.addend == 0 {
        r.symbol.clone()
    } else if r.addend > 0 {
        format!("{}+{}", r.symbol, r.addend)
    } else {
        format!("{}{}", r.symbol, r.addend)
    };
    match r.kind {
        RelocKind::Abs32Lo => base,
        RelocKind::Abs32Hi => format!("{}>>32", base),
        RelocKind::PcRel32 => format!("{}-.", base),
    }
}

/// Top-level encoding classification by prefix bits, longest first.
fn classify(w: u32) -> Option<(EncKind, u16)> {
    match w >> 23 {
        0x17d => return Some((EncKind::Sop1, ((w >> 8) & 0xff) as u16)),
        0x17e => return Some((EncKind::Sopc, ((w >> 16) & 0x7f) as u16)),
        0x17f => return Some((EncKind::Sopp, ((w >> 16) & 0x7f) as u16)),
        _ => {}
    }
    if w >> 28 == 0xb {
        return Some((EncKind::Sopk, ((w >> 23) & 0x1f) as u16));
    }
    if w >> 30 == 0x2 {
        return Some((EncKind::Sop2, ((w >> 23) & 0x7f) as u16));
    }
    if w >> 27 == 0b11000 {
        return Some((EncKind::Smrd, ((w >> 22) & 0x1f) as u16));
    }
    match w >> 26 {
        0x32 => return Some((EncKind::Vintrp, ((w >> 16) & 0x3) as u16)),
        0x34 => return Some((EncKind::Vop3A, ((w >> 17) & 0x1ff) as u16)),
        0x36 => return Some((EncKind::Ds, ((w >> 18) & 0xff) as u16)),
        0x37 => return Some((EncKind::Flat, ((w >> 18) & 0x7f) as u16)),
        0x38 => return Some((EncKind::Mubuf, ((w >> 18) & 0x7f) as u16)),
        0x3a => return Some((EncKind::Mtbuf, ((w >> 16) & 0x7) as u16)),
        0x3c => return Some((EncKind::Mimg, ((w >> 18) & 0x7f) as u16)),
        0x3e => return Some((EncKind::Exp, 0)),
        _ => {}
    }
    if w >> 25 == 0x3f {
        return Some((EncKind::Vop1, ((w >> 9) & 0xff) as u16));
    }
    if w >> 25 == 0x3e {
        return Some((EncKind::Vopc, ((w >> 17) & 0xff) as u16));
    }
    if w >> 31 == 0 {
        return Some((EncKind::Vop2, ((w >> 25) & 0x3f) as u16));
    }
    None
}

fn word_count(enc: EncKind) -> usize {
    match enc {
        EncKind::Vop3A
        | EncKind::Vop3B
        | EncKind::Ds
        | EncKind::Mubuf
        | EncKind::Mtbuf
        | EncKind::Mimg
        | EncKind::Exp
        | EncKind::Flat => 2,
        _ => 1,
    }
}

/// Whether the primary word references operand code 255.
fn has_literal_tail(enc: EncKind, _e: &IsaEntry, w: u32) -> bool {
    match enc {
        EncKind::Sop2 => w & 0xff == 255 || (w >> 8) & 0xff == 255,
        EncKind::Sop1 => w & 0xff == 255,
        EncKind::Sopc => w & 0xff == 255 || (w >> 8) & 0xff == 255,
        EncKind::Vop2 | EncKind::Vop1 | EncKind::Vopc => w & 0x1ff == 255,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::gcn::table::IsaTable;

    fn decode(bytes: &[u8], arch: Arch) -> String {
        let table = IsaTable::global();
        let mut d = GcnDecoder::new(table, arch, bytes);
        d.before_disassemble();
        d.disassemble().unwrap()
    }

    #[test]
    fn test_decode_s_mov_fixture() {
        let text = decode(&[0x80, 0x00, 0x87, 0xbe], Arch::Gcn1_0);
        let line = text.trim();
        assert!(line.starts_with("s_mov_b32"), "got: {}", line);
        assert!(line.contains("s7"));
        assert!(line.ends_with("0"));
    }

    #[test]
    fn test_decode_s_endpgm() {
        let text = decode(&[0x00, 0x00, 0x81, 0xbf], Arch::Gcn1_0);
        assert_eq!(text.trim(), "s_endpgm");
    }

    #[test]
    fn test_decode_unknown_word() {
        let text = decode(&[0xff, 0xff, 0xff, 0xff], Arch::Gcn1_0);
        assert!(text.trim().starts_with(".int 0x"), "got: {}", text);
    }

    #[test]
    fn test_branch_labels() {
        // s_cbranch_scc0 +1 word; s_nop; s_endpgm
        let code: [u8; 12] = [
            0x01, 0x00, 0x84, 0xbf, // s_cbranch_scc0 L0 (skips one word)
            0x00, 0x00, 0x80, 0xbf, // s_nop 0
            0x00, 0x00, 0x81, 0xbf, // s_endpgm (target)
        ];
        let text = decode(&code, Arch::Gcn1_0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4, "text: {}", text);
        assert!(lines[0].contains("s_cbranch_scc0 L0"));
        assert_eq!(lines[2], "L0:");
        assert!(lines[3].contains("s_endpgm"));
    }

    #[test]
    fn test_backward_branch_label() {
        let code: [u8; 8] = [
            0x00, 0x00, 0x80, 0xbf, // s_nop 0   <- L0
            0xfe, 0xff, 0x82, 0xbf, // s_branch -2 words -> offset 0
        ];
        let text = decode(&code, Arch::Gcn1_0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "L0:");
        assert!(lines[2].contains("s_branch L0"));
    }

    #[test]
    fn test_named_labels_interleave() {
        let table = IsaTable::global();
        let code: [u8; 8] = [
            0x00, 0x00, 0x80, 0xbf, // s_nop
            0x00, 0x00, 0x81, 0xbf, // s_endpgm
        ];
        let mut d = GcnDecoder::new(table, Arch::Gcn1_0, &code);
        d.add_named_label(0, "kernel_entry");
        d.add_named_label(4, "tail");
        d.before_disassemble();
        let text = d.disassemble().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "kernel_entry:");
        assert_eq!(lines[2], "tail:");
    }

    #[test]
    fn test_literal_tail_decoded() {
        // s_add_u32 s0, s1, 1000
        let code: [u8; 8] = [0x01, 0xff, 0x00, 0x80, 0xe8, 0x03, 0x00, 0x00];
        let text = decode(&code, Arch::Gcn1_0);
        let line = text.trim();
        assert!(line.contains("0x3e8"), "got: {}", line);
    }

    #[test]
    fn test_reloc_splice() {
        let table = IsaTable::global();
        // s_mov_b32 s0, <literal>
        let code: [u8; 8] = [0xff, 0x00, 0x80, 0xbe, 0x00, 0x00, 0x00, 0x00];
        let mut d = GcnDecoder::new(table, Arch::Gcn1_0, &code);
        d.add_relocation(DisasmReloc {
            offset: 4,
            kind: RelocKind::Abs32Lo,
            symbol: "gdata".to_string(),
            addend: 8,
        });
        d.before_disassemble();
        let text = d.disassemble().unwrap();
        assert!(text.contains("gdata+8"), "got: {}", text);
    }

    #[test]
    fn test_vop3_round_trip_shape() {
        // assemble v_mad_f32 then decode it back
        use crate::asm::{Cursor, SymbolTable};
        use crate::isa::gcn::encoder::{GcnEncoder, RegUsage};
        let table = IsaTable::global();
        let enc = GcnEncoder::new(table, Arch::Gcn1_0);
        let mut symtab = SymbolTable::new();
        let mut usage = RegUsage::default();
        let mut cur = Cursor::new(" v1, v2, abs(v3), -v4 mul:2");
        let out = enc
            .assemble("v_mad_f32", &mut cur, &mut symtab, &mut usage, 0, 0)
            .unwrap();
        let text = decode(&out.bytes, Arch::Gcn1_0);
        let line = text.trim();
        assert!(line.starts_with("v_mad_f32 v1, v2, abs(v3), -v4"), "got: {}", line);
        assert!(line.ends_with("mul:2"));
    }

    #[test]
    fn test_flat_scratch_name_depends_on_arch() {
        // s_mov_b64 fs, fs: on GCN 1.1 regs 104-105 are flat_scratch
        let w: u32 = 0xbe80_0000 | (1 << 8) | (104 << 16) | 104;
        let text = decode(&w.to_le_bytes(), Arch::Gcn1_1);
        assert!(text.contains("flat_scratch, flat_scratch"), "got: {}", text);
        let text = decode(&w.to_le_bytes(), Arch::Gcn1_2);
        assert!(text.contains("xnack_mask"), "got: {}", text);
    }
}
