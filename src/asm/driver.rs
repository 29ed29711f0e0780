use crate::asm::expr::{EvalValue, Expr};
use crate::asm::kernel::{descriptor_reg_counts, KernelConfig, CONTROL_DIRECTIVE_SIZE};
use crate::asm::scan::Cursor;
use crate::asm::section::{PatchKind, Reloc, RelocKind, SectKind, Section, SectionId, ABS_SECTION};
use crate::asm::symbol::SymbolTable;
use crate::error::{Error, ParseError, Result, SemanticError};
use crate::fileformat::BinaryFormat;
use crate::isa::gcn::encoder::{branch_simm16, GcnEncoder, RegUsage};
use crate::isa::gcn::table::IsaTable;
use crate::isa::gcn::{Arch, GpuDevice};
use crate::support::{store_u16, store_u32, DiagnosticContext, Remark};
use std::collections::HashMap;

const MAX_RESOLVE_DEPTH: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum KernelScope {
    None,
    Config,
    ControlDirective,
}

struct KernelState {
    name: String,
    config: KernelConfig,
    control: Vec<u8>,
    usage: RegUsage,
    scope: KernelScope,
}

impl KernelState {
    fn new(name: &str) -> KernelState {
        KernelState {
            name: name.to_string(),
            config: KernelConfig::default(),
            control: Vec::new(),
            usage: RegUsage::default(),
            scope: KernelScope::None,
        }
    }
}

enum PatchTarget {
    Bytes {
        section: usize,
        offset: usize,
        kind: PatchKind,
        instr_pos: u64,
    },
    Symbol {
        index: usize,
    },
}

struct Patch {
    expr: Expr,
    target: PatchTarget,
    line: usize,
    done: bool,
}

/// Final symbol as exported to the container codec.
#[derive(Clone, Debug)]
pub struct OutSymbol {
    pub name: String,
    pub section: SectionId,
    pub value: u64,
    pub defined: bool,
    pub external: bool,
    pub global: bool,
}

#[derive(Clone, Debug)]
pub struct KernelRecord {
    pub name: String,
    pub offset: u64,
    pub fkernel: bool,
    pub config: KernelConfig,
    pub sgprs: u16,
    pub vgprs: u16,
}

/// Everything the container codec needs to emit the output binary.
pub struct AsmOutput {
    pub format: BinaryFormat,
    pub device: GpuDevice,
    pub sections: Vec<Section>,
    pub symbols: Vec<OutSymbol>,
    pub kernels: Vec<KernelRecord>,
}

/// Line-oriented assembler driver. Parse and semantic errors are
/// recorded and processing continues with the next line; the job fails
/// at the end if any error-severity remark was recorded.
pub struct Assembler {
    device: GpuDevice,
    format: BinaryFormat,
    table: &'static IsaTable,
    sections: Vec<Section>,
    cur_section: usize,
    symbols: SymbolTable,
    kernels: Vec<KernelState>,
    kernel_names: HashMap<String, usize>,
    cur_kernel: Option<usize>,
    code_kernel: Option<usize>,
    globals: Vec<String>,
    patches: Vec<Patch>,
    diag: DiagnosticContext,
    line_no: usize,
}

impl Assembler {
    pub fn new(path: &str, device: GpuDevice, format: BinaryFormat) -> Assembler {
        let mut sections = Vec::new();
        sections.push(Section::new(0, ".text", SectKind::Text));
        Assembler {
            device,
            format,
            table: IsaTable::global(),
            sections,
            cur_section: 0,
            symbols: SymbolTable::new(),
            kernels: Vec::new(),
            kernel_names: HashMap::new(),
            cur_kernel: None,
            code_kernel: None,
            globals: Vec::new(),
            patches: Vec::new(),
            diag: DiagnosticContext::new(path),
            line_no: 0,
        }
    }

    fn arch(&self) -> Arch {
        self.device.arch()
    }

    /// Feed source text. Each line is one statement; `#` starts a
    /// comment.
    pub fn assemble(&mut self, source: &str) {
        for raw_line in source.lines() {
            self.line_no += 1;
            let line = match raw_line.find('#') {
                Some(idx) => &raw_line[..idx],
                None => raw_line,
            };
            let mut cur = Cursor::new(line);
            if let Err(e) = self.process_statement(&mut cur) {
                let line_no = self.line_no;
                self.diag.record(Remark::error(line_no, cur.pos() + 1, e));
            }
        }
    }

    fn process_statement(&mut self, cur: &mut Cursor) -> Result<()> {
        loop {
            cur.skip_spaces();
            if cur.at_end() {
                return Ok(());
            }
            let save = cur.pos();
            if let Some(name) = cur.parse_name() {
                if cur.peek() == Some(b':') {
                    cur.bump();
                    let name = name.to_string();
                    self.define_label(&name)?;
                    continue;
                }
                if name.starts_with('.') {
                    let name = name.to_string();
                    return self.directive(&name[1..], cur);
                }
                let name = name.to_string();
                return self.instruction(&name, cur);
            }
            cur.set_pos(save);
            return Err(Error::ParseError(ParseError::UnexpectedToken));
        }
    }

    fn define_label(&mut self, name: &str) -> Result<()> {
        let section = self.cur_section as SectionId;
        let offset = self.sections[self.cur_section].offset();
        let (_, deps) = self.symbols.define(name, section, offset, false)?;
        self.resolve_dependents(deps)?;
        if self.sections[self.cur_section].kind == SectKind::Text {
            if let Some(&k) = self.kernel_names.get(name) {
                self.code_kernel = Some(k);
            }
        }
        Ok(())
    }

    fn directive(&mut self, name: &str, cur: &mut Cursor) -> Result<()> {
        match name {
            "rocm" => self.format = BinaryFormat::Rocm,
            "amd" => self.format = BinaryFormat::Amd,
            "amdcl2" => self.format = BinaryFormat::AmdCl2,
            "gallium" => self.format = BinaryFormat::Gallium,
            "rawcode" => self.format = BinaryFormat::Raw,
            "gpu" => {
                let arg = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::BadDirective))?;
                self.device = GpuDevice::from_name(arg)
                    .ok_or(Error::ParseError(ParseError::BadDirective))?;
            }
            "kernel" => {
                let arg = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::BadDirective))?
                    .to_string();
                let idx = match self.kernel_names.get(&arg) {
                    Some(&idx) => idx,
                    None => {
                        let idx = self.kernels.len();
                        self.kernels.push(KernelState::new(&arg));
                        self.kernel_names.insert(arg, idx);
                        idx
                    }
                };
                self.cur_kernel = Some(idx);
            }
            "fkernel" => {
                let k = self.require_kernel()?;
                self.kernels[k].config.fkernel = true;
            }
            "config" => {
                let k = self.require_kernel()?;
                self.kernels[k].scope = KernelScope::Config;
            }
            "control_directive" => {
                let k = self.require_kernel()?;
                self.kernels[k].scope = KernelScope::ControlDirective;
            }
            "text" => self.switch_section(".text", SectKind::Text),
            "data" => self.switch_section(".data", SectKind::Data),
            "rodata" => self.switch_section(".rodata", SectKind::Rodata),
            "section" => {
                let arg = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::BadDirective))?
                    .to_string();
                let kind = match arg.as_str() {
                    ".text" => SectKind::Text,
                    ".data" => SectKind::Data,
                    ".rodata" => SectKind::Rodata,
                    ".comment" => SectKind::Comment,
                    ".note" => SectKind::Note,
                    _ => SectKind::Custom,
                };
                self.switch_section(&arg, kind);
            }
            "byte" => self.emit_data_list(cur, 1)?,
            "short" | "hword" => self.emit_data_list(cur, 2)?,
            "int" | "long" => self.emit_data_list(cur, 4)?,
            "quad" => self.emit_data_list(cur, 8)?,
            "ascii" => self.emit_string(cur, false)?,
            "asciz" => self.emit_string(cur, true)?,
            "fill" => {
                let count = self.eval_abs(cur)?;
                let mut size = 1u64;
                let mut value = 0u64;
                if cur.eat(b',') {
                    size = self.eval_abs(cur)?;
                    if cur.eat(b',') {
                        value = self.eval_abs(cur)?;
                    }
                }
                if size == 0 || size > 8 {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                let le = value.to_le_bytes();
                for _ in 0..count {
                    self.emit_bytes(&le[..size as usize])?;
                }
            }
            "skip" | "space" => {
                let count = self.eval_abs(cur)?;
                let fill = if cur.eat(b',') { self.eval_abs(cur)? as u8 } else { 0 };
                self.emit_bytes(&vec![fill; count as usize])?;
            }
            "align" | "balign" => {
                let n = self.eval_abs(cur)?;
                if !n.is_power_of_two() {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                self.sections[self.cur_section].align_to(n, true);
            }
            "set" | "equ" => {
                let arg = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::BadDirective))?
                    .to_string();
                if !cur.eat(b',') {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                let expr = Expr::parse(cur, &mut self.symbols)?;
                let idx = self.symbols.intern(&arg);
                let patch = Patch {
                    expr,
                    target: PatchTarget::Symbol { index: idx },
                    line: self.line_no,
                    done: false,
                };
                self.add_patch(patch)?;
            }
            "global" | "globl" => {
                let arg = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::BadDirective))?;
                self.globals.push(arg.to_string());
            }
            "extern" => {
                let arg = cur
                    .parse_name()
                    .ok_or(Error::ParseError(ParseError::BadDirective))?
                    .to_string();
                self.symbols.mark_external(&arg);
            }
            _ => {
                // inside .config the remaining dot-keys set descriptor
                // fields of the current kernel
                let k = match self.cur_kernel {
                    Some(k) if self.kernels[k].scope == KernelScope::Config => k,
                    _ => return Err(Error::ParseError(ParseError::BadDirective)),
                };
                let mut values = Vec::new();
                cur.skip_spaces();
                if !cur.at_end() {
                    loop {
                        values.push(self.eval_abs(cur)?);
                        if !cur.eat(b',') {
                            break;
                        }
                    }
                }
                let note = self.kernels[k].config.set(name, &values)?;
                if let Some(note) = note {
                    let line_no = self.line_no;
                    self.diag
                        .record(Remark::warning(line_no, cur.pos() + 1, note.to_string()));
                }
            }
        }
        cur.skip_spaces();
        if !cur.at_end() {
            return Err(Error::ParseError(ParseError::UnexpectedToken));
        }
        Ok(())
    }

    fn instruction(&mut self, mnemonic: &str, cur: &mut Cursor) -> Result<()> {
        if let Some(k) = self.cur_kernel {
            if self.kernels[k].scope != KernelScope::None {
                return Err(Error::ParseError(ParseError::BadDirective));
            }
        }
        if self.sections[self.cur_section].kind != SectKind::Text {
            return Err(Error::ParseError(ParseError::BadDirective));
        }
        let section = self.cur_section;
        let position = self.sections[section].offset();
        let encoder = GcnEncoder::new(self.table, self.arch());
        let mut scratch = RegUsage::default();
        let usage = match self.code_kernel {
            Some(k) => &mut self.kernels[k].usage,
            None => &mut scratch,
        };
        let out = encoder.assemble(
            mnemonic,
            cur,
            &mut self.symbols,
            usage,
            section as SectionId,
            position,
        )?;
        self.sections[section].bytes.extend_from_slice(&out.bytes);
        if out.truncated {
            let line_no = self.line_no;
            self.diag.record(Remark::warning(
                line_no,
                cur.pos() + 1,
                "literal out of 32-bit range was truncated".to_string(),
            ));
        }
        if let Some(p) = out.pending {
            let patch = Patch {
                expr: p.expr,
                target: PatchTarget::Bytes {
                    section,
                    offset: position as usize + p.offset,
                    kind: p.kind,
                    instr_pos: position,
                },
                line: self.line_no,
                done: false,
            };
            self.add_patch(patch)?;
        }
        Ok(())
    }

    fn require_kernel(&self) -> Result<usize> {
        self.cur_kernel
            .ok_or(Error::ParseError(ParseError::BadDirective))
    }

    fn switch_section(&mut self, name: &str, kind: SectKind) {
        if let Some(k) = self.cur_kernel {
            self.kernels[k].scope = KernelScope::None;
        }
        if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
            self.cur_section = idx;
            return;
        }
        let id = self.sections.len() as SectionId;
        self.sections.push(Section::new(id, name, kind));
        self.cur_section = id as usize;
    }

    fn eval_abs(&mut self, cur: &mut Cursor) -> Result<u64> {
        let expr = Expr::parse(cur, &mut self.symbols)?;
        match expr.evaluate(&self.symbols)? {
            EvalValue::Value { section, value } => {
                if section != ABS_SECTION {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                Ok(value)
            }
            EvalValue::Deferred => Err(Error::ParseError(ParseError::UnexpectedToken)),
        }
    }

    /// Append raw bytes to the active sink: the 128-byte control
    /// directive when that scope is open, the current section
    /// otherwise.
    fn emit_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(k) = self.cur_kernel {
            if self.kernels[k].scope == KernelScope::ControlDirective {
                let control = &mut self.kernels[k].control;
                if control.len() + bytes.len() > CONTROL_DIRECTIVE_SIZE {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                control.extend_from_slice(bytes);
                return Ok(());
            }
        }
        self.sections[self.cur_section].bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn in_control_directive(&self) -> bool {
        matches!(self.cur_kernel,
            Some(k) if self.kernels[k].scope == KernelScope::ControlDirective)
    }

    fn emit_data_list(&mut self, cur: &mut Cursor, width: u8) -> Result<()> {
        loop {
            let expr = Expr::parse(cur, &mut self.symbols)?;
            match expr.evaluate(&self.symbols)? {
                EvalValue::Value { value, .. } => {
                    let bytes = value.to_le_bytes();
                    self.emit_bytes(&bytes[..width as usize])?;
                }
                EvalValue::Deferred => {
                    if self.in_control_directive() {
                        return Err(Error::ParseError(ParseError::UnexpectedToken));
                    }
                    let section = self.cur_section;
                    let offset = self.sections[section].bytes.len();
                    self.emit_bytes(&vec![0u8; width as usize])?;
                    let patch = Patch {
                        expr,
                        target: PatchTarget::Bytes {
                            section,
                            offset,
                            kind: PatchKind::Data(width),
                            instr_pos: offset as u64,
                        },
                        line: self.line_no,
                        done: false,
                    };
                    self.add_patch(patch)?;
                }
            }
            if !cur.eat(b',') {
                return Ok(());
            }
        }
    }

    fn emit_string(&mut self, cur: &mut Cursor, zero_terminate: bool) -> Result<()> {
        loop {
            let mut bytes = parse_string(cur)?;
            if zero_terminate {
                bytes.push(0);
            }
            self.emit_bytes(&bytes)?;
            if !cur.eat(b',') {
                return Ok(());
            }
        }
    }

    fn add_patch(&mut self, patch: Patch) -> Result<()> {
        let idx = self.patches.len();
        self.patches.push(patch);
        self.try_apply_patch(idx, 0)
    }

    fn resolve_dependents(&mut self, deps: Vec<usize>) -> Result<()> {
        for dep in deps {
            self.try_apply_patch(dep, 0)?;
        }
        Ok(())
    }

    fn try_apply_patch(&mut self, idx: usize, depth: usize) -> Result<()> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(Error::SemanticError(SemanticError::CircularDependency));
        }
        if self.patches[idx].done {
            return Ok(());
        }
        let value = self.patches[idx].expr.evaluate(&self.symbols)?;
        let (section, value) = match value {
            EvalValue::Deferred => {
                let mut syms = Vec::new();
                self.patches[idx].expr.collect_symbols(&mut syms);
                for sym in syms {
                    if !self.symbols.get(sym).defined {
                        self.symbols.add_dependent(sym, idx);
                    }
                }
                return Ok(());
            }
            EvalValue::Value { section, value } => (section, value),
        };
        self.patches[idx].done = true;
        match self.patches[idx].target {
            PatchTarget::Bytes {
                section: sect_idx,
                offset,
                kind,
                instr_pos,
            } => {
                let bytes = &mut self.sections[sect_idx].bytes;
                match kind {
                    PatchKind::Literal32 => store_u32(bytes, offset, value as u32),
                    PatchKind::BranchSimm16 => {
                        if section != sect_idx as SectionId && section != ABS_SECTION {
                            return Err(Error::ParseError(ParseError::UnexpectedToken));
                        }
                        let simm = branch_simm16(value, instr_pos)?;
                        store_u16(bytes, offset, simm as u16);
                    }
                    PatchKind::Data(width) => {
                        let le = value.to_le_bytes();
                        bytes[offset..offset + width as usize]
                            .copy_from_slice(&le[..width as usize]);
                    }
                }
                Ok(())
            }
            PatchTarget::Symbol { index } => {
                let deps = self.symbols.define_at(index, section, value, true)?;
                for dep in deps {
                    self.try_apply_patch(dep, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    /// One more resolution round over everything still pending, then
    /// descriptor write-back. Idempotent: patches store absolute values
    /// and descriptors overwrite their reserved regions.
    fn finalize_pass(&mut self) {
        for idx in 0..self.patches.len() {
            if self.patches[idx].done {
                continue;
            }
            if let Err(e) = self.try_apply_patch(idx, 0) {
                let line = self.patches[idx].line;
                self.diag.record(Remark::error(line, 1, e));
                continue;
            }
            if self.patches[idx].done {
                continue;
            }
            // still deferred: external symbols become relocations,
            // anything else is an undefined-symbol error
            if !self.patch_to_relocation(idx) {
                let mut syms = Vec::new();
                self.patches[idx].expr.collect_symbols(&mut syms);
                let line = self.patches[idx].line;
                for sym in syms {
                    if !self.symbols.get(sym).defined {
                        let name = self.symbols.name(sym).to_string();
                        self.diag.record(Remark::error(
                            line,
                            1,
                            Error::SemanticError(SemanticError::UndefinedSymbol(name)),
                        ));
                    }
                }
            }
        }
        self.write_descriptors();
    }

    /// A pending patch whose expression is `extern_sym` or
    /// `extern_sym +- constant` becomes a relocation record.
    fn patch_to_relocation(&mut self, idx: usize) -> bool {
        let (sym, addend) = match symbol_plus_addend(&self.patches[idx].expr) {
            Some(x) => x,
            None => return false,
        };
        if !self.symbols.get(sym).external || self.symbols.get(sym).defined {
            return false;
        }
        let (section, offset, kind) = match self.patches[idx].target {
            PatchTarget::Bytes {
                section,
                offset,
                kind,
                ..
            } => {
                let reloc_kind = match kind {
                    PatchKind::Literal32 | PatchKind::Data(4) => RelocKind::Abs32Lo,
                    PatchKind::BranchSimm16 => RelocKind::PcRel32,
                    _ => return false,
                };
                (section, offset, reloc_kind)
            }
            PatchTarget::Symbol { .. } => return false,
        };
        self.sections[section].relocations.push(Reloc {
            offset: offset as u64,
            kind,
            symbol: sym,
            addend,
        });
        self.patches[idx].done = true;
        true
    }

    /// Write each kernel's 256-byte descriptor over the space reserved
    /// at its label in the text section.
    fn write_descriptors(&mut self) {
        let arch = self.arch();
        for k in 0..self.kernels.len() {
            let name = self.kernels[k].name.clone();
            let sym = match self.symbols.find(&name) {
                Some(idx) if self.symbols.get(idx).defined => self.symbols.get(idx).clone(),
                _ => {
                    self.diag.record(Remark::error(
                        self.line_no,
                        1,
                        Error::SemanticError(SemanticError::UndefinedSymbol(name)),
                    ));
                    continue;
                }
            };
            let sect_idx = sym.section as usize;
            if sect_idx >= self.sections.len()
                || self.sections[sect_idx].kind != SectKind::Text
            {
                continue;
            }
            let offset = sym.value as usize;
            let (sgprs, vgprs) = descriptor_reg_counts(
                self.kernels[k].usage.max_sgpr,
                self.kernels[k].usage.max_vgpr,
            );
            let descriptor = self.kernels[k].config.to_descriptor(
                arch,
                sgprs,
                vgprs,
                &self.kernels[k].control,
            );
            let bytes = &mut self.sections[sect_idx].bytes;
            if offset + descriptor.len() > bytes.len() {
                self.diag.record(Remark::error(
                    self.line_no,
                    1,
                    Error::ParseError(ParseError::UnexpectedToken),
                ));
                continue;
            }
            bytes[offset..offset + descriptor.len()].copy_from_slice(&descriptor);
        }
    }

    /// Finish the job. On success the collected sections, symbols, and
    /// kernel records are handed to the container codec; on failure no
    /// output is produced and only the diagnostics remain.
    pub fn finish(mut self) -> (Option<AsmOutput>, Vec<Remark>) {
        self.finalize_pass();
        for name in self.symbols.unresolved() {
            let name = name.to_string();
            self.diag.record(Remark::error(
                self.line_no,
                1,
                Error::SemanticError(SemanticError::UndefinedSymbol(name)),
            ));
        }
        let remarks = self.diag.remarks();
        if remarks
            .iter()
            .any(|r| r.severity() == crate::support::Severity::Error)
        {
            return (None, remarks);
        }
        let symbols = self
            .symbols
            .iter()
            .map(|(name, s)| OutSymbol {
                name: name.to_string(),
                section: s.section,
                value: s.value,
                defined: s.defined,
                external: s.external,
                global: self.globals.iter().any(|g| g == name),
            })
            .collect();
        let kernels = self
            .kernels
            .iter()
            .map(|k| {
                let offset = self
                    .symbols
                    .find(&k.name)
                    .map(|idx| self.symbols.get(idx).value)
                    .unwrap_or(0);
                let (sgprs, vgprs) =
                    descriptor_reg_counts(k.usage.max_sgpr, k.usage.max_vgpr);
                KernelRecord {
                    name: k.name.clone(),
                    offset,
                    fkernel: k.config.fkernel,
                    config: k.config.clone(),
                    sgprs,
                    vgprs,
                }
            })
            .collect();
        let output = AsmOutput {
            format: self.format,
            device: self.device,
            sections: self.sections,
            symbols,
            kernels,
        };
        (Some(output), remarks)
    }
}

/// `sym`, `sym + c`, or `sym - c`.
fn symbol_plus_addend(expr: &Expr) -> Option<(usize, i64)> {
    use crate::asm::expr::BinOp;
    match expr {
        Expr::Sym(idx) => Some((*idx, 0)),
        Expr::Binary(BinOp::Add, a, b) => match (a.as_ref(), b.as_ref()) {
            (Expr::Sym(idx), Expr::Int(c)) => Some((*idx, *c)),
            (Expr::Int(c), Expr::Sym(idx)) => Some((*idx, *c)),
            _ => None,
        },
        Expr::Binary(BinOp::Sub, a, b) => match (a.as_ref(), b.as_ref()) {
            (Expr::Sym(idx), Expr::Int(c)) => Some((*idx, -*c)),
            _ => None,
        },
        _ => None,
    }
}

fn parse_string(cur: &mut Cursor) -> Result<Vec<u8>> {
    cur.skip_spaces();
    if cur.bump() != Some(b'"') {
        return Err(Error::ParseError(ParseError::UnexpectedToken));
    }
    let mut out = Vec::new();
    loop {
        match cur.bump() {
            None => return Err(Error::ParseError(ParseError::UnexpectedToken)),
            Some(b'"') => return Ok(out),
            Some(b'\\') => match cur.bump() {
                Some(b'n') => out.push(b'\n'),
                Some(b't') => out.push(b'\t'),
                Some(b'r') => out.push(b'\r'),
                Some(b'0') => out.push(0),
                Some(b'\\') => out.push(b'\\'),
                Some(b'"') => out.push(b'"'),
                Some(b'x') => {
                    let mut v = 0u8;
                    let mut any = false;
                    while let Some(c) = cur.peek() {
                        let d = match (c as char).to_digit(16) {
                            Some(d) => d as u8,
                            None => break,
                        };
                        v = v.wrapping_mul(16).wrapping_add(d);
                        any = true;
                        cur.bump();
                    }
                    if !any {
                        return Err(Error::ParseError(ParseError::MissingNumber));
                    }
                    out.push(v);
                }
                _ => return Err(Error::ParseError(ParseError::UnexpectedToken)),
            },
            Some(c) => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::load_u32;
    use crate::support::Severity;

    fn run(source: &str) -> (Option<AsmOutput>, Vec<Remark>) {
        let mut asm = Assembler::new("test.s", GpuDevice::CapeVerde, BinaryFormat::Raw);
        asm.assemble(source);
        asm.finish()
    }

    fn run_ok(source: &str) -> AsmOutput {
        let (out, remarks) = run(source);
        let errors: Vec<String> = remarks
            .iter()
            .filter(|r| r.severity() == Severity::Error)
            .map(|r| r.to_string())
            .collect();
        assert!(errors.is_empty(), "diagnostics: {:?}", errors);
        out.unwrap()
    }

    #[test]
    fn test_simple_text_emission() {
        let out = run_ok(
            "        .text\n        s_mov_b32 s7, 0\n        s_endpgm\n",
        );
        let text = &out.sections[0];
        assert_eq!(
            text.bytes,
            vec![0x80, 0x00, 0x87, 0xbe, 0x00, 0x00, 0x81, 0xbf]
        );
    }

    #[test]
    fn test_forward_branch_patched() {
        let out = run_ok(
            "start:\n        s_branch done\n        s_nop 0\ndone:\n        s_endpgm\n",
        );
        let text = &out.sections[0];
        let w = load_u32(&text.bytes, 0);
        // branch over one word
        assert_eq!(w & 0xffff, 1);
    }

    #[test]
    fn test_forward_literal_patched() {
        let out = run_ok(
            "        s_mov_b32 s0, later+4\n        s_endpgm\n        .set later, 0x100\n",
        );
        let text = &out.sections[0];
        assert_eq!(load_u32(&text.bytes, 4), 0x104);
    }

    #[test]
    fn test_set_chain_resolves() {
        let out = run_ok(
            "        .set a, b+1\n        .set b, c+1\n        .set c, 40\n        .int a\n",
        );
        let text = &out.sections[0];
        assert_eq!(load_u32(&text.bytes, 0), 42);
    }

    #[test]
    fn test_undefined_symbol_reported() {
        let (out, remarks) = run("        s_mov_b32 s0, nowhere\n");
        assert!(out.is_none());
        assert!(remarks.iter().any(|r| matches!(
            r.kind(),
            Some(Error::SemanticError(SemanticError::UndefinedSymbol(n))) if n == "nowhere"
        )));
    }

    #[test]
    fn test_redefinition_reported() {
        let (out, remarks) = run("a:\na:\n        s_endpgm\n");
        assert!(out.is_none());
        assert!(remarks.iter().any(|r| matches!(
            r.kind(),
            Some(Error::SemanticError(SemanticError::RedefinedSymbol(_)))
        )));
    }

    #[test]
    fn test_error_recovery_continues() {
        // the bad line is reported, the good lines still assemble
        let (out, remarks) = run("        s_bogus s0\n        s_endpgm\n");
        assert!(out.is_none());
        assert_eq!(
            remarks
                .iter()
                .filter(|r| r.severity() == Severity::Error)
                .count(),
            1
        );
    }

    #[test]
    fn test_extern_literal_becomes_relocation() {
        let out = run_ok(
            "        .extern gdata\n        s_mov_b32 s0, gdata+16\n        s_endpgm\n",
        );
        let text = &out.sections[0];
        assert_eq!(text.relocations.len(), 1);
        let r = &text.relocations[0];
        assert_eq!(r.offset, 4);
        assert_eq!(r.kind, RelocKind::Abs32Lo);
        assert_eq!(r.addend, 16);
    }

    #[test]
    fn test_data_directives() {
        let out = run_ok(
            "        .data\n        .byte 1, 2\n        .short 0x1234\n        .int 0xdeadbeef\n        .quad 0x1122334455667788\n        .ascii \"ab\"\n        .asciz \"c\"\n",
        );
        let data = &out.sections[1];
        assert_eq!(data.name, ".data");
        let mut expect = vec![1u8, 2, 0x34, 0x12, 0xef, 0xbe, 0xad, 0xde];
        expect.extend_from_slice(&[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
        expect.extend_from_slice(b"ab");
        expect.extend_from_slice(b"c\0");
        assert_eq!(data.bytes, expect);
    }

    #[test]
    fn test_align_in_text_uses_nops() {
        let out = run_ok("        s_endpgm\n        .align 16\n        s_endpgm\n");
        let text = &out.sections[0];
        assert_eq!(text.bytes.len(), 20);
        assert_eq!(&text.bytes[4..8], &[0x00, 0x00, 0x80, 0xbf]);
    }

    #[test]
    fn test_truncation_warning_does_not_fail() {
        let (out, remarks) = run("        s_mov_b32 s0, 0x123456789\n        s_endpgm\n");
        assert!(out.is_some());
        assert!(remarks
            .iter()
            .any(|r| r.severity() == Severity::Warning));
    }

    #[test]
    fn test_finalization_idempotent() {
        let src = "start:\n        s_branch fin\n        s_nop 0\nfin:\n        s_endpgm\n        .set later, fin+4\n        .int later\n";
        let mut asm = Assembler::new("test.s", GpuDevice::CapeVerde, BinaryFormat::Raw);
        asm.assemble(src);
        asm.finalize_pass();
        let first: Vec<Vec<u8>> = asm.sections.iter().map(|s| s.bytes.clone()).collect();
        asm.finalize_pass();
        let second: Vec<Vec<u8>> = asm.sections.iter().map(|s| s.bytes.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rocm_two_kernel_fixture() {
        let src = r#"        .rocm
        .gpu Fiji
.kernel kxx1
    .fkernel
    .config
        .codeversion 1,0
        .call_convention 0x34dac
        .debug_private_segment_buffer_sgpr 123834
        .debug_wavefront_private_segment_offset_sgpr 129
        .gds_segment_size 100
        .kernarg_segment_align 32
        .workgroup_group_segment_size 22
        .workgroup_fbarrier_count 3324
        .dx10clamp
        .exceptions 10
        .private_segment_align 128
        .privmode
        .reserved_sgpr_first 10
        .reserved_sgpr_count 5
        .runtime_loader_kernel_symbol 0x4dc98b3a
        .scratchbuffer 77222
        .reserved_sgpr_count 4
        .reserved_sgpr_first 9
        .reserved_vgpr_count 11
        .reserved_vgpr_first 7
        .private_elem_size 16
    .control_directive
        .int 1,2,3
        .fill 116,1,0
.kernel kxx2
    .config
        .codeversion 1,0
        .call_convention 0x112223
.kernel kxx1
    .config
        .scratchbuffer 111
.text
kxx1:
        .skip 256
        s_mov_b32 s7, 0
        s_endpgm

.align 256
kxx2:
        .skip 256
        s_endpgm
.section .comment
        .ascii "some comment for you"
.kernel kxx2
    .control_directive
        .fill 124,1,0xde
    .config
        .use_kernarg_segment_ptr
    .control_directive
        .int 0xaadd66cc
    .config
.kernel kxx1
.kernel kxx2
        .call_convention 0x1112234
"#;
        let mut asm = Assembler::new("test.s", GpuDevice::CapeVerde, BinaryFormat::Raw);
        asm.assemble(src);
        let (out, remarks) = asm.finish();
        let errors: Vec<String> = remarks
            .iter()
            .filter(|r| r.severity() == Severity::Error)
            .map(|r| r.to_string())
            .collect();
        assert!(errors.is_empty(), "diagnostics: {:?}", errors);
        let out = out.unwrap();
        assert_eq!(out.format, BinaryFormat::Rocm);
        assert_eq!(out.device, GpuDevice::Fiji);

        let text = &out.sections[0];
        assert_eq!(text.bytes.len(), 772);
        // kxx1 descriptor at 0
        assert_eq!(load_u32(&text.bytes, 48), 0x3c0000);
        assert_eq!(load_u32(&text.bytes, 52) >> 24, 10);
        assert_eq!(load_u32(&text.bytes, 52) & 1, 1);
        assert_eq!(crate::support::load_u16(&text.bytes, 58), 0x6);
        assert_eq!(load_u32(&text.bytes, 60), 111, "last scratchbuffer wins");
        assert_eq!(crate::support::load_u16(&text.bytes, 84), 8);
        assert_eq!(crate::support::load_u16(&text.bytes, 86), 1);
        assert_eq!(load_u32(&text.bytes, 104), 0x34dac);
        assert_eq!(&text.bytes[128..132], &[1, 0, 0, 0]);
        // kxx1 code after its descriptor
        assert_eq!(&text.bytes[256..260], &[0x80, 0x00, 0x87, 0xbe]);
        assert_eq!(&text.bytes[260..264], &[0x00, 0x00, 0x81, 0xbf]);
        // the alignment gap is s_nop filled
        assert_eq!(&text.bytes[264..268], &[0x00, 0x00, 0x80, 0xbf]);
        assert_eq!(&text.bytes[508..512], &[0x00, 0x00, 0x80, 0xbf]);
        // kxx2 descriptor at 512: re-entering the kernel kept its
        // config section, so the last call_convention applies
        assert_eq!(load_u32(&text.bytes, 512 + 104), 0x1112234);
        assert_eq!(crate::support::load_u16(&text.bytes, 512 + 56), 0x8);
        assert_eq!(crate::support::load_u16(&text.bytes, 512 + 84), 2);
        // kxx2 control directive: 124 x 0xde then the int
        assert_eq!(&text.bytes[512 + 128..512 + 132], &[0xde; 4]);
        assert_eq!(
            &text.bytes[512 + 252..512 + 256],
            &[0xcc, 0x66, 0xdd, 0xaa]
        );
        // kxx2 code
        assert_eq!(&text.bytes[768..772], &[0x00, 0x00, 0x81, 0xbf]);

        let comment = out.sections.iter().find(|s| s.name == ".comment").unwrap();
        assert_eq!(comment.bytes, b"some comment for you");

        assert_eq!(out.kernels.len(), 2);
        assert_eq!(out.kernels[0].name, "kxx1");
        assert!(out.kernels[0].fkernel);
        assert_eq!(out.kernels[0].offset, 0);
        assert_eq!(out.kernels[1].name, "kxx2");
        assert_eq!(out.kernels[1].offset, 512);
        assert!(!out.kernels[1].fkernel);
    }
}
