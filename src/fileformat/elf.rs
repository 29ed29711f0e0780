use crate::error::{ContainerError, Error, Result};
use crate::support::{load_u16, load_u32, load_u64, push_u16, push_u32, push_u64};
use std::marker::PhantomData;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_NOTE: u32 = 7;
pub const SHT_DYNSYM: u32 = 11;

pub const SHN_UNDEF: u16 = 0;

pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STB_GLOBAL: u8 = 1;

fn err(kind: ContainerError) -> Error {
    Error::ContainerError(kind)
}

/// Word-width parameterization shared by the reader and the writer.
/// Inner binaries may sit at arbitrary offsets inside outer ones, so
/// every access goes through the unaligned little-endian helpers.
pub trait ElfClass {
    const CLASS: u8;
    const EHDR_SIZE: usize;
    const PHDR_SIZE: usize;
    const SHDR_SIZE: usize;
    const SYM_SIZE: usize;

    fn read_shdr(b: &[u8], off: usize) -> SectionHeader;
    fn read_phdr(b: &[u8], off: usize) -> ProgramHeader;
    fn read_sym(b: &[u8], off: usize) -> ElfSym;
    fn push_shdr(out: &mut Vec<u8>, h: &SectionHeader);
    fn push_phdr(out: &mut Vec<u8>, h: &ProgramHeader);
    fn push_sym(out: &mut Vec<u8>, s: &ElfSym);
    fn push_ehdr_tail(out: &mut Vec<u8>, e: &EhdrFields);
}

pub struct Elf32;
pub struct Elf64;

#[derive(Clone, Debug, Default)]
pub struct SectionHeader {
    pub name_idx: u32,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ElfSym {
    pub name_idx: u32,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
}

impl ElfSym {
    pub fn st_type(&self) -> u8 {
        self.info & 0xf
    }

    pub fn st_bind(&self) -> u8 {
        self.info >> 4
    }
}

/// Fields of the ELF header that the writer fills beyond the identity
/// bytes.
#[derive(Clone, Debug, Default)]
pub struct EhdrFields {
    pub e_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub phnum: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl ElfClass for Elf32 {
    const CLASS: u8 = 1;
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;
    const SHDR_SIZE: usize = 40;
    const SYM_SIZE: usize = 16;

    fn read_shdr(b: &[u8], off: usize) -> SectionHeader {
        SectionHeader {
            name_idx: load_u32(b, off),
            sh_type: load_u32(b, off + 4),
            flags: load_u32(b, off + 8) as u64,
            addr: load_u32(b, off + 12) as u64,
            offset: load_u32(b, off + 16) as u64,
            size: load_u32(b, off + 20) as u64,
            link: load_u32(b, off + 24),
            info: load_u32(b, off + 28),
            addralign: load_u32(b, off + 32) as u64,
            entsize: load_u32(b, off + 36) as u64,
        }
    }

    fn read_phdr(b: &[u8], off: usize) -> ProgramHeader {
        ProgramHeader {
            p_type: load_u32(b, off),
            offset: load_u32(b, off + 4) as u64,
            vaddr: load_u32(b, off + 8) as u64,
            paddr: load_u32(b, off + 12) as u64,
            filesz: load_u32(b, off + 16) as u64,
            memsz: load_u32(b, off + 20) as u64,
            flags: load_u32(b, off + 24),
            align: load_u32(b, off + 28) as u64,
        }
    }

    fn read_sym(b: &[u8], off: usize) -> ElfSym {
        ElfSym {
            name_idx: load_u32(b, off),
            value: load_u32(b, off + 4) as u64,
            size: load_u32(b, off + 8) as u64,
            info: b[off + 12],
            other: b[off + 13],
            shndx: load_u16(b, off + 14),
        }
    }

    fn push_shdr(out: &mut Vec<u8>, h: &SectionHeader) {
        push_u32(out, h.name_idx);
        push_u32(out, h.sh_type);
        push_u32(out, h.flags as u32);
        push_u32(out, h.addr as u32);
        push_u32(out, h.offset as u32);
        push_u32(out, h.size as u32);
        push_u32(out, h.link);
        push_u32(out, h.info);
        push_u32(out, h.addralign as u32);
        push_u32(out, h.entsize as u32);
    }

    fn push_phdr(out: &mut Vec<u8>, h: &ProgramHeader) {
        push_u32(out, h.p_type);
        push_u32(out, h.offset as u32);
        push_u32(out, h.vaddr as u32);
        push_u32(out, h.paddr as u32);
        push_u32(out, h.filesz as u32);
        push_u32(out, h.memsz as u32);
        push_u32(out, h.flags);
        push_u32(out, h.align as u32);
    }

    fn push_sym(out: &mut Vec<u8>, s: &ElfSym) {
        push_u32(out, s.name_idx);
        push_u32(out, s.value as u32);
        push_u32(out, s.size as u32);
        out.push(s.info);
        out.push(s.other);
        push_u16(out, s.shndx);
    }

    fn push_ehdr_tail(out: &mut Vec<u8>, e: &EhdrFields) {
        push_u16(out, e.e_type);
        push_u16(out, e.machine);
        push_u32(out, e.version);
        push_u32(out, e.entry as u32);
        push_u32(out, e.phoff as u32);
        push_u32(out, e.shoff as u32);
        push_u32(out, e.flags);
        push_u16(out, Self::EHDR_SIZE as u16);
        push_u16(out, if e.phnum != 0 { Self::PHDR_SIZE as u16 } else { 0 });
        push_u16(out, e.phnum);
        push_u16(out, Self::SHDR_SIZE as u16);
        push_u16(out, e.shnum);
        push_u16(out, e.shstrndx);
    }
}

impl ElfClass for Elf64 {
    const CLASS: u8 = 2;
    const EHDR_SIZE: usize = 64;
    const PHDR_SIZE: usize = 56;
    const SHDR_SIZE: usize = 64;
    const SYM_SIZE: usize = 24;

    fn read_shdr(b: &[u8], off: usize) -> SectionHeader {
        SectionHeader {
            name_idx: load_u32(b, off),
            sh_type: load_u32(b, off + 4),
            flags: load_u64(b, off + 8),
            addr: load_u64(b, off + 16),
            offset: load_u64(b, off + 24),
            size: load_u64(b, off + 32),
            link: load_u32(b, off + 40),
            info: load_u32(b, off + 44),
            addralign: load_u64(b, off + 48),
            entsize: load_u64(b, off + 56),
        }
    }

    fn read_phdr(b: &[u8], off: usize) -> ProgramHeader {
        ProgramHeader {
            p_type: load_u32(b, off),
            flags: load_u32(b, off + 4),
            offset: load_u64(b, off + 8),
            vaddr: load_u64(b, off + 16),
            paddr: load_u64(b, off + 24),
            filesz: load_u64(b, off + 32),
            memsz: load_u64(b, off + 40),
            align: load_u64(b, off + 48),
        }
    }

    fn read_sym(b: &[u8], off: usize) -> ElfSym {
        ElfSym {
            name_idx: load_u32(b, off),
            info: b[off + 4],
            other: b[off + 5],
            shndx: load_u16(b, off + 6),
            value: load_u64(b, off + 8),
            size: load_u64(b, off + 16),
        }
    }

    fn push_shdr(out: &mut Vec<u8>, h: &SectionHeader) {
        push_u32(out, h.name_idx);
        push_u32(out, h.sh_type);
        push_u64(out, h.flags);
        push_u64(out, h.addr);
        push_u64(out, h.offset);
        push_u64(out, h.size);
        push_u32(out, h.link);
        push_u32(out, h.info);
        push_u64(out, h.addralign);
        push_u64(out, h.entsize);
    }

    fn push_phdr(out: &mut Vec<u8>, h: &ProgramHeader) {
        push_u32(out, h.p_type);
        push_u32(out, h.flags);
        push_u64(out, h.offset);
        push_u64(out, h.vaddr);
        push_u64(out, h.paddr);
        push_u64(out, h.filesz);
        push_u64(out, h.memsz);
        push_u64(out, h.align);
    }

    fn push_sym(out: &mut Vec<u8>, s: &ElfSym) {
        push_u32(out, s.name_idx);
        out.push(s.info);
        out.push(s.other);
        push_u16(out, s.shndx);
        push_u64(out, s.value);
        push_u64(out, s.size);
    }

    fn push_ehdr_tail(out: &mut Vec<u8>, e: &EhdrFields) {
        push_u16(out, e.e_type);
        push_u16(out, e.machine);
        push_u32(out, e.version);
        push_u64(out, e.entry);
        push_u64(out, e.phoff);
        push_u64(out, e.shoff);
        push_u32(out, e.flags);
        push_u16(out, Self::EHDR_SIZE as u16);
        push_u16(out, if e.phnum != 0 { Self::PHDR_SIZE as u16 } else { 0 });
        push_u16(out, e.phnum);
        push_u16(out, Self::SHDR_SIZE as u16);
        push_u16(out, e.shnum);
        push_u16(out, e.shstrndx);
    }
}

/// End of the region of a string table that is properly terminated.
/// Name indices at or past this point would run off the table.
fn unfinished_region(table: &[u8]) -> usize {
    if table.is_empty() {
        return 0;
    }
    match table.iter().rposition(|&b| b == 0) {
        Some(k) => k + 1,
        None => 0,
    }
}

/// Parsed ELF image borrowing the input bytes. Validation happens
/// entirely in `parse`; accessors afterwards cannot fail structurally.
pub struct ElfBinary<'a, C: ElfClass> {
    pub data: &'a [u8],
    pub machine: u16,
    pub e_type: u16,
    pub flags: u32,
    pub entry: u64,
    pub prog_headers: Vec<ProgramHeader>,
    pub sections: Vec<SectionHeader>,
    shstr: (usize, usize),
    pub symbols: Vec<ElfSym>,
    sym_str: (usize, usize),
    pub dyn_symbols: Vec<ElfSym>,
    dyn_str: (usize, usize),
    _class: PhantomData<C>,
}

pub type ElfBinary32<'a> = ElfBinary<'a, Elf32>;
pub type ElfBinary64<'a> = ElfBinary<'a, Elf64>;

impl<'a, C: ElfClass> ElfBinary<'a, C> {
    pub fn parse(data: &'a [u8]) -> Result<ElfBinary<'a, C>> {
        if data.len() < C::EHDR_SIZE {
            return Err(err(ContainerError::TruncatedHeader));
        }
        if data[0..4] != [0x7f, b'E', b'L', b'F'] {
            return Err(err(ContainerError::BadMagic));
        }
        if data[4] != C::CLASS || data[5] != 1 {
            return Err(err(ContainerError::BadMagic));
        }
        let e_type = load_u16(data, 16);
        let machine = load_u16(data, 18);
        let (entry, phoff, shoff, flags_off) = if C::CLASS == 1 {
            (
                load_u32(data, 24) as u64,
                load_u32(data, 28) as u64,
                load_u32(data, 32) as u64,
                36,
            )
        } else {
            (load_u64(data, 24), load_u64(data, 32), load_u64(data, 40), 48)
        };
        let flags = load_u32(data, flags_off);
        let phnum = load_u16(data, flags_off + 8) as u64;
        let shnum = load_u16(data, flags_off + 12) as u64;
        let shstrndx = load_u16(data, flags_off + 14) as u64;

        if phoff
            .checked_add(phnum * C::PHDR_SIZE as u64)
            .map_or(true, |end| end > data.len() as u64)
        {
            return Err(err(ContainerError::TruncatedHeader));
        }
        if shoff
            .checked_add(shnum * C::SHDR_SIZE as u64)
            .map_or(true, |end| end > data.len() as u64)
        {
            return Err(err(ContainerError::TruncatedHeader));
        }

        let prog_headers: Vec<ProgramHeader> = (0..phnum)
            .map(|i| C::read_phdr(data, (phoff + i * C::PHDR_SIZE as u64) as usize))
            .collect();
        for ph in &prog_headers {
            if ph
                .offset
                .checked_add(ph.filesz)
                .map_or(true, |end| end > data.len() as u64)
            {
                return Err(err(ContainerError::SectionOutOfRange));
            }
        }

        let sections: Vec<SectionHeader> = (0..shnum)
            .map(|i| C::read_shdr(data, (shoff + i * C::SHDR_SIZE as u64) as usize))
            .collect();
        let mut shstr = (0, 0);
        if shnum != 0 {
            if shstrndx >= shnum {
                return Err(err(ContainerError::StringIndexOutOfRange));
            }
            let strhdr = &sections[shstrndx as usize];
            if strhdr
                .offset
                .checked_add(strhdr.size)
                .map_or(true, |end| end > data.len() as u64)
            {
                return Err(err(ContainerError::SectionOutOfRange));
            }
            shstr = (strhdr.offset as usize, strhdr.size as usize);
            let table = &data[shstr.0..shstr.0 + shstr.1];
            let unfinished = unfinished_region(table);

            for sh in &sections {
                if sh.sh_type != SHT_NOBITS
                    && sh
                        .offset
                        .checked_add(sh.size)
                        .map_or(true, |end| end > data.len() as u64)
                {
                    return Err(err(ContainerError::SectionOutOfRange));
                }
                if sh.link as u64 >= shnum {
                    return Err(err(ContainerError::BadLink));
                }
                if sh.name_idx as usize >= shstr.1 {
                    return Err(err(ContainerError::StringIndexOutOfRange));
                }
                if sh.name_idx as usize >= unfinished {
                    return Err(err(ContainerError::UnfinishedString));
                }
            }
        }

        let mut out = ElfBinary {
            data,
            machine,
            e_type,
            flags,
            entry,
            prog_headers,
            sections,
            shstr,
            symbols: Vec::new(),
            sym_str: (0, 0),
            dyn_symbols: Vec::new(),
            dyn_str: (0, 0),
            _class: PhantomData,
        };
        let (symbols, sym_str) = out.parse_symtab(SHT_SYMTAB)?;
        let (dyn_symbols, dyn_str) = out.parse_symtab(SHT_DYNSYM)?;
        out.symbols = symbols;
        out.sym_str = sym_str;
        out.dyn_symbols = dyn_symbols;
        out.dyn_str = dyn_str;
        Ok(out)
    }

    fn parse_symtab(&self, want: u32) -> Result<(Vec<ElfSym>, (usize, usize))> {
        let hdr = match self.sections.iter().find(|s| s.sh_type == want) {
            Some(h) => h,
            None => return Ok((Vec::new(), (0, 0))),
        };
        if (hdr.entsize as usize) < C::SYM_SIZE {
            return Err(err(ContainerError::EntrySizeTooSmall));
        }
        if hdr.link == SHN_UNDEF as u32 {
            return Err(err(ContainerError::BadLink));
        }
        let strhdr = &self.sections[hdr.link as usize];
        if strhdr.sh_type != SHT_STRTAB {
            return Err(err(ContainerError::BadLink));
        }
        let str_range = (strhdr.offset as usize, strhdr.size as usize);
        let table = &self.data[str_range.0..str_range.0 + str_range.1];
        let unfinished = unfinished_region(table);
        let count = (hdr.size / hdr.entsize) as usize;
        let mut syms = Vec::with_capacity(count);
        for i in 0..count {
            let sym = C::read_sym(self.data, (hdr.offset + i as u64 * hdr.entsize) as usize);
            if sym.name_idx as usize >= str_range.1 {
                return Err(err(ContainerError::StringIndexOutOfRange));
            }
            if sym.name_idx as usize >= unfinished {
                return Err(err(ContainerError::UnfinishedString));
            }
            syms.push(sym);
        }
        Ok((syms, str_range))
    }

    fn str_at(&self, range: (usize, usize), idx: u32) -> &'a str {
        let table = &self.data[range.0..range.0 + range.1];
        let start = idx as usize;
        let end = table[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(range.1);
        std::str::from_utf8(&table[start..end]).unwrap_or("")
    }

    pub fn section_name(&self, idx: usize) -> &'a str {
        self.str_at(self.shstr, self.sections[idx].name_idx)
    }

    pub fn symbol_name(&self, sym: &ElfSym) -> &'a str {
        self.str_at(self.sym_str, sym.name_idx)
    }

    pub fn dyn_symbol_name(&self, sym: &ElfSym) -> &'a str {
        self.str_at(self.dyn_str, sym.name_idx)
    }

    pub fn section_index(&self, name: &str) -> Option<usize> {
        (0..self.sections.len()).find(|&i| self.section_name(i) == name)
    }

    pub fn section_data(&self, idx: usize) -> &'a [u8] {
        let sh = &self.sections[idx];
        if sh.sh_type == SHT_NOBITS {
            return &[];
        }
        &self.data[sh.offset as usize..(sh.offset + sh.size) as usize]
    }
}

/// Declarative output regions, CLR-style: program-header table,
/// section-header table, raw user data, or a section with content.
pub enum ElfRegionKind {
    PhdrTable,
    ShdrTable,
    User(Vec<u8>),
    Section(ElfSectionDef),
}

pub struct ElfSectionDef {
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub link: u32,
    pub info: u32,
    pub entsize: u64,
    pub addr_base: u64,
    pub content: ElfSectionContent,
}

pub enum ElfSectionContent {
    Bytes(Vec<u8>),
    /// Generated from the writer's symbol list.
    SymTab,
    /// Generated from the symbol names.
    StrTab,
    /// Generated from the section names.
    ShStrTab,
}

pub struct ElfRegion {
    pub align: u64,
    pub kind: ElfRegionKind,
}

impl ElfRegion {
    pub fn user(data: Vec<u8>) -> ElfRegion {
        ElfRegion {
            align: 0,
            kind: ElfRegionKind::User(data),
        }
    }

    pub fn section(name: &str, sh_type: u32, flags: u64, data: Vec<u8>) -> ElfRegion {
        ElfRegion {
            align: 0,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: name.to_string(),
                sh_type,
                flags,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::Bytes(data),
            }),
        }
    }
}

pub struct ElfSymbolDef {
    pub name: String,
    pub section_index: u16,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub other: u8,
}

pub struct ElfProgHeaderDef {
    pub p_type: u32,
    pub flags: u32,
    pub region_start: usize,
    pub regions_num: usize,
    pub vaddr_base: u64,
    pub mem_size: u64,
}

pub struct ElfHeaderDef {
    pub e_type: u16,
    pub machine: u16,
    pub version: u32,
    pub flags: u32,
    pub os_abi: u8,
    pub abi_version: u8,
    pub entry_region: Option<usize>,
    pub entry: u64,
    pub vaddr_base: u64,
}

impl Default for ElfHeaderDef {
    fn default() -> ElfHeaderDef {
        ElfHeaderDef {
            e_type: 1, // ET_REL
            machine: 0,
            version: 1,
            flags: 0,
            os_abi: 0,
            abi_version: 0,
            entry_region: None,
            entry: 0,
            vaddr_base: 0,
        }
    }
}

/// Two-pass ELF emitter: `compute_size` fixes every region offset,
/// `build` writes and asserts the bytes land exactly where the headers
/// said they would.
pub struct ElfWriter<C: ElfClass> {
    pub header: ElfHeaderDef,
    regions: Vec<ElfRegion>,
    prog_headers: Vec<ElfProgHeaderDef>,
    symbols: Vec<ElfSymbolDef>,
    region_offsets: Vec<u64>,
    region_sizes: Vec<u64>,
    section_regions: Vec<usize>,
    shstrtab_index: u16,
    strtab_index: u16,
    total_size: u64,
    computed: bool,
    _class: PhantomData<C>,
}

pub type ElfWriter32 = ElfWriter<Elf32>;
pub type ElfWriter64 = ElfWriter<Elf64>;

impl<C: ElfClass> ElfWriter<C> {
    pub fn new(header: ElfHeaderDef) -> ElfWriter<C> {
        ElfWriter {
            header,
            regions: Vec::new(),
            prog_headers: Vec::new(),
            symbols: Vec::new(),
            region_offsets: Vec::new(),
            region_sizes: Vec::new(),
            section_regions: Vec::new(),
            shstrtab_index: 0,
            strtab_index: 0,
            total_size: 0,
            computed: false,
            _class: PhantomData,
        }
    }

    pub fn add_region(&mut self, region: ElfRegion) -> usize {
        self.regions.push(region);
        self.regions.len() - 1
    }

    pub fn add_prog_header(&mut self, ph: ElfProgHeaderDef) {
        self.prog_headers.push(ph);
    }

    pub fn add_symbol(&mut self, sym: ElfSymbolDef) {
        self.symbols.push(sym);
    }

    fn strtab_size(names: impl Iterator<Item = usize>) -> u64 {
        1 + names.map(|n| n as u64 + 1).sum::<u64>()
    }

    /// First pass: region offsets with alignment padding and
    /// cross-reference checks.
    pub fn compute_size(&mut self) -> Result<u64> {
        if self.computed {
            return Ok(self.total_size);
        }
        if let Some(entry) = self.header.entry_region {
            if entry >= self.regions.len() {
                return Err(err(ContainerError::BadLink));
            }
        }
        for ph in &self.prog_headers {
            if ph.region_start >= self.regions.len()
                || ph.region_start + ph.regions_num > self.regions.len()
                || ph.regions_num == 0
            {
                return Err(err(ContainerError::BadLink));
            }
        }
        let section_count = 1 + self
            .regions
            .iter()
            .filter(|r| matches!(r.kind, ElfRegionKind::Section(_)))
            .count() as u64;
        for sym in &self.symbols {
            if sym.section_index as u64 >= section_count {
                return Err(err(ContainerError::BadLink));
            }
        }

        self.region_offsets = vec![0; self.regions.len()];
        self.region_sizes = vec![0; self.regions.len()];
        self.section_regions = Vec::new();
        let mut size = C::EHDR_SIZE as u64;
        let mut section_no = 1u16;
        for i in 0..self.regions.len() {
            let align = match self.regions[i].align {
                0 => match self.regions[i].kind {
                    ElfRegionKind::PhdrTable | ElfRegionKind::ShdrTable => 8,
                    _ => 1,
                },
                a => a,
            };
            if align > 1 && size % align != 0 {
                size += align - size % align;
            }
            self.region_offsets[i] = size;
            let rsize = match &self.regions[i].kind {
                ElfRegionKind::PhdrTable => (self.prog_headers.len() * C::PHDR_SIZE) as u64,
                ElfRegionKind::ShdrTable => section_count * C::SHDR_SIZE as u64,
                ElfRegionKind::User(data) => data.len() as u64,
                ElfRegionKind::Section(def) => {
                    if def.link as u64 >= section_count {
                        return Err(err(ContainerError::BadLink));
                    }
                    match &def.content {
                        ElfSectionContent::Bytes(data) => {
                            let len = data.len() as u64;
                            if def.sh_type == SHT_NOBITS {
                                0
                            } else {
                                len
                            }
                        }
                        ElfSectionContent::SymTab => {
                            ((self.symbols.len() + 1) * C::SYM_SIZE) as u64
                        }
                        ElfSectionContent::StrTab => {
                            Self::strtab_size(self.symbols.iter().map(|s| s.name.len()))
                        }
                        ElfSectionContent::ShStrTab => {
                            Self::strtab_size(self.regions.iter().filter_map(|r| {
                                match &r.kind {
                                    ElfRegionKind::Section(d) => Some(d.name.len()),
                                    _ => None,
                                }
                            }))
                        }
                    }
                }
            };
            if let ElfRegionKind::Section(def) = &self.regions[i].kind {
                match def.name.as_str() {
                    ".shstrtab" => self.shstrtab_index = section_no,
                    ".strtab" => self.strtab_index = section_no,
                    _ => {}
                }
                self.section_regions.push(i);
                section_no += 1;
            }
            self.region_sizes[i] = rsize;
            size += rsize;
        }
        self.total_size = size;
        self.computed = true;
        Ok(size)
    }

    /// Second pass: emit. Every header offset written equals the offset
    /// at which the bytes are later emitted.
    pub fn build(mut self) -> Result<Vec<u8>> {
        self.compute_size()?;
        let mut out = Vec::with_capacity(self.total_size as usize);

        let section_count = 1 + self.section_regions.len() as u16;
        let phdr_region = self
            .regions
            .iter()
            .position(|r| matches!(r.kind, ElfRegionKind::PhdrTable));
        let shdr_region = self
            .regions
            .iter()
            .position(|r| matches!(r.kind, ElfRegionKind::ShdrTable));

        // identity
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        out.push(C::CLASS);
        out.push(1); // little-endian
        out.push(1); // EV_CURRENT
        out.push(self.header.os_abi);
        out.push(self.header.abi_version);
        out.resize(16, 0);
        let entry = match self.header.entry_region {
            Some(r) => self.header.vaddr_base + self.region_offsets[r] + self.header.entry,
            None => 0,
        };
        C::push_ehdr_tail(
            &mut out,
            &EhdrFields {
                e_type: self.header.e_type,
                machine: self.header.machine,
                version: self.header.version,
                entry,
                phoff: phdr_region.map_or(0, |r| self.region_offsets[r]),
                shoff: shdr_region.map_or(0, |r| self.region_offsets[r]),
                flags: self.header.flags,
                phnum: self.prog_headers.len() as u16,
                shnum: section_count,
                shstrndx: self.shstrtab_index,
            },
        );

        for i in 0..self.regions.len() {
            while (out.len() as u64) < self.region_offsets[i] {
                out.push(0);
            }
            assert_eq!(out.len() as u64, self.region_offsets[i]);
            match &self.regions[i].kind {
                ElfRegionKind::PhdrTable => {
                    for ph in &self.prog_headers {
                        let offset = self.region_offsets[ph.region_start];
                        let last = ph.region_start + ph.regions_num - 1;
                        let filesz =
                            self.region_offsets[last] + self.region_sizes[last] - offset;
                        C::push_phdr(
                            &mut out,
                            &ProgramHeader {
                                p_type: ph.p_type,
                                flags: ph.flags,
                                offset,
                                vaddr: ph.vaddr_base + offset,
                                paddr: 0,
                                filesz,
                                memsz: if ph.mem_size != 0 { ph.mem_size } else { filesz },
                                align: self.regions[ph.region_start].align.max(1),
                            },
                        );
                    }
                }
                ElfRegionKind::ShdrTable => {
                    // leading null entry
                    C::push_shdr(&mut out, &SectionHeader::default());
                    let mut name_offset = 1u32;
                    for &r in &self.section_regions {
                        let def = match &self.regions[r].kind {
                            ElfRegionKind::Section(d) => d,
                            _ => unreachable!(),
                        };
                        let link = if def.link == 0 {
                            match def.name.as_str() {
                                ".symtab" | ".dynsym" => self.strtab_index as u32,
                                _ => 0,
                            }
                        } else {
                            def.link
                        };
                        let entsize = match def.content {
                            ElfSectionContent::SymTab => C::SYM_SIZE as u64,
                            _ => def.entsize,
                        };
                        C::push_shdr(
                            &mut out,
                            &SectionHeader {
                                name_idx: name_offset,
                                sh_type: def.sh_type,
                                flags: def.flags,
                                addr: if def.addr_base != 0 {
                                    def.addr_base + self.region_offsets[r]
                                } else if self.header.vaddr_base != 0 {
                                    self.header.vaddr_base + self.region_offsets[r]
                                } else {
                                    0
                                },
                                offset: self.region_offsets[r],
                                size: match &def.content {
                                    ElfSectionContent::Bytes(d) => d.len() as u64,
                                    _ => self.region_sizes[r],
                                },
                                link,
                                info: def.info,
                                addralign: self.regions[r].align.max(1),
                                entsize,
                            },
                        );
                        name_offset += def.name.len() as u32 + 1;
                    }
                }
                ElfRegionKind::User(data) => out.extend_from_slice(data),
                ElfRegionKind::Section(def) => match &def.content {
                    ElfSectionContent::Bytes(data) => {
                        if def.sh_type != SHT_NOBITS {
                            out.extend_from_slice(data);
                        }
                    }
                    ElfSectionContent::SymTab => {
                        C::push_sym(&mut out, &ElfSym::default());
                        let mut name_offset = 1u32;
                        for sym in &self.symbols {
                            let value = if sym.section_index != SHN_UNDEF {
                                let region =
                                    self.section_regions[sym.section_index as usize - 1];
                                sym.value
                                    + self.region_offsets[region]
                                    + self.header.vaddr_base
                            } else {
                                sym.value
                            };
                            C::push_sym(
                                &mut out,
                                &ElfSym {
                                    name_idx: name_offset,
                                    value,
                                    size: sym.size,
                                    info: sym.info,
                                    other: sym.other,
                                    shndx: sym.section_index,
                                },
                            );
                            name_offset += sym.name.len() as u32 + 1;
                        }
                    }
                    ElfSectionContent::StrTab => {
                        out.push(0);
                        for sym in &self.symbols {
                            out.extend_from_slice(sym.name.as_bytes());
                            out.push(0);
                        }
                    }
                    ElfSectionContent::ShStrTab => {
                        out.push(0);
                        for r in &self.regions {
                            if let ElfRegionKind::Section(d) = &r.kind {
                                out.extend_from_slice(d.name.as_bytes());
                                out.push(0);
                            }
                        }
                    }
                },
            }
            assert_eq!(
                out.len() as u64,
                self.region_offsets[i] + self.region_sizes[i]
            );
        }
        assert_eq!(out.len() as u64, self.total_size);
        Ok(out)
    }

    /// File offset a region will land at; forces size computation.
    pub fn region_offset(&mut self, idx: usize) -> Result<u64> {
        self.compute_size()?;
        Ok(self.region_offsets[idx])
    }

    pub fn section_number(&self, name: &str) -> Option<u16> {
        let mut no = 1u16;
        for r in &self.regions {
            if let ElfRegionKind::Section(d) = &r.kind {
                if d.name == name {
                    return Some(no);
                }
                no += 1;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_elf64() -> Vec<u8> {
        let mut w: ElfWriter64 = ElfWriter::new(ElfHeaderDef {
            machine: 224, // EM_AMDGPU
            ..Default::default()
        });
        let mut text = ElfRegion::section(
            ".text",
            SHT_PROGBITS,
            0x6, // alloc + execinstr
            vec![0x00, 0x00, 0x81, 0xbf],
        );
        text.align = 256;
        w.add_region(text);
        w.add_region(ElfRegion {
            align: 8,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: ".symtab".to_string(),
                sh_type: SHT_SYMTAB,
                flags: 0,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::SymTab,
            }),
        });
        w.add_region(ElfRegion {
            align: 1,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: ".strtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::StrTab,
            }),
        });
        w.add_region(ElfRegion {
            align: 1,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: ".shstrtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::ShStrTab,
            }),
        });
        w.add_region(ElfRegion {
            align: 8,
            kind: ElfRegionKind::ShdrTable,
        });
        w.add_symbol(ElfSymbolDef {
            name: "krn".to_string(),
            section_index: 1,
            value: 0,
            size: 4,
            info: (STB_GLOBAL << 4) | STT_FUNC,
            other: 0,
        });
        w.build().unwrap()
    }

    #[test]
    fn test_writer_reader_round_trip() {
        let bytes = sample_elf64();
        let elf = ElfBinary64::parse(&bytes).unwrap();
        assert_eq!(elf.machine, 224);
        assert_eq!(elf.sections.len(), 5, "null + 4 sections");
        let text = elf.section_index(".text").unwrap();
        assert_eq!(elf.section_data(text), &[0x00, 0x00, 0x81, 0xbf]);
        assert_eq!(elf.sections[text].offset % 256, 0, "declared alignment");
        assert_eq!(elf.symbols.len(), 2, "null + krn");
        let krn = &elf.symbols[1];
        assert_eq!(elf.symbol_name(krn), "krn");
        assert_eq!(krn.st_type(), STT_FUNC);
        assert_eq!(krn.st_bind(), STB_GLOBAL);
        assert_eq!(krn.value, elf.sections[text].offset, "text-relative value");
    }

    #[test]
    fn test_reader_rejects_bad_magic() {
        let mut bytes = sample_elf64();
        bytes[0] = 0x7e;
        assert!(matches!(
            ElfBinary64::parse(&bytes),
            Err(Error::ContainerError(ContainerError::BadMagic))
        ));
        // wrong class for the reader flavor
        let bytes = sample_elf64();
        assert!(matches!(
            ElfBinary32::parse(&bytes),
            Err(Error::ContainerError(ContainerError::BadMagic))
        ));
    }

    #[test]
    fn test_reader_rejects_truncation() {
        let bytes = sample_elf64();
        assert!(matches!(
            ElfBinary64::parse(&bytes[..40]),
            Err(Error::ContainerError(ContainerError::TruncatedHeader))
        ));
        // section headers run off the end
        assert!(ElfBinary64::parse(&bytes[..bytes.len() - 8]).is_err());
    }

    #[test]
    fn test_reader_rejects_bad_link() {
        let mut bytes = sample_elf64();
        let elf = ElfBinary64::parse(&bytes).unwrap();
        let symtab_idx = elf
            .sections
            .iter()
            .position(|s| s.sh_type == SHT_SYMTAB)
            .unwrap();
        let shoff = {
            let v = load_u64(&bytes, 40);
            v as usize
        };
        // clear sh_link of the symtab header
        let link_off = shoff + symtab_idx * Elf64::SHDR_SIZE + 40;
        bytes[link_off..link_off + 4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            ElfBinary64::parse(&bytes),
            Err(Error::ContainerError(ContainerError::BadLink))
        ));
    }

    #[test]
    fn test_reader_rejects_small_sym_entsize() {
        let mut bytes = sample_elf64();
        let elf = ElfBinary64::parse(&bytes).unwrap();
        let symtab_idx = elf
            .sections
            .iter()
            .position(|s| s.sh_type == SHT_SYMTAB)
            .unwrap();
        let shoff = load_u64(&bytes, 40) as usize;
        let entsize_off = shoff + symtab_idx * Elf64::SHDR_SIZE + 56;
        bytes[entsize_off..entsize_off + 8].copy_from_slice(&8u64.to_le_bytes());
        assert!(matches!(
            ElfBinary64::parse(&bytes),
            Err(Error::ContainerError(ContainerError::EntrySizeTooSmall))
        ));
    }

    #[test]
    fn test_reader_rejects_unfinished_name() {
        let mut bytes = sample_elf64();
        let elf = ElfBinary64::parse(&bytes).unwrap();
        // point a section name into the unterminated tail of .shstrtab
        let shstr = elf.section_index(".shstrtab").unwrap();
        let str_end = (elf.sections[shstr].offset + elf.sections[shstr].size) as usize;
        bytes[str_end - 1] = b'x'; // remove the final terminator
        let res = ElfBinary64::parse(&bytes);
        assert!(matches!(
            res,
            Err(Error::ContainerError(ContainerError::UnfinishedString))
        ));
    }

    #[test]
    fn test_elf32_round_trip() {
        let mut w: ElfWriter32 = ElfWriter::new(ElfHeaderDef::default());
        w.add_region(ElfRegion::section(
            ".text",
            SHT_PROGBITS,
            0x6,
            vec![1, 2, 3, 4],
        ));
        w.add_region(ElfRegion {
            align: 1,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: ".shstrtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::ShStrTab,
            }),
        });
        w.add_region(ElfRegion {
            align: 4,
            kind: ElfRegionKind::ShdrTable,
        });
        let bytes = w.build().unwrap();
        assert_eq!(bytes[4], 1, "ELFCLASS32");
        let elf = ElfBinary32::parse(&bytes).unwrap();
        let text = elf.section_index(".text").unwrap();
        assert_eq!(elf.section_data(text), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_size_computation_matches_emission() {
        let mut w: ElfWriter64 = ElfWriter::new(ElfHeaderDef::default());
        w.add_region(ElfRegion {
            align: 128,
            kind: ElfRegionKind::User(vec![0xaa; 37]),
        });
        w.add_region(ElfRegion::section(".data", SHT_PROGBITS, 0x3, vec![0; 9]));
        w.add_region(ElfRegion {
            align: 1,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: ".shstrtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::ShStrTab,
            }),
        });
        w.add_region(ElfRegion {
            align: 8,
            kind: ElfRegionKind::ShdrTable,
        });
        let predicted = w.compute_size().unwrap();
        let bytes = w.build().unwrap();
        assert_eq!(bytes.len() as u64, predicted);
    }

    #[test]
    fn test_writer_rejects_bad_cross_references() {
        let mut w: ElfWriter64 = ElfWriter::new(ElfHeaderDef {
            entry_region: Some(9),
            ..Default::default()
        });
        w.add_region(ElfRegion::section(".text", SHT_PROGBITS, 0x6, vec![0; 4]));
        assert!(matches!(
            w.compute_size(),
            Err(Error::ContainerError(ContainerError::BadLink))
        ));
        let mut w: ElfWriter64 = ElfWriter::new(ElfHeaderDef::default());
        w.add_region(ElfRegion::section(".text", SHT_PROGBITS, 0x6, vec![0; 4]));
        w.add_symbol(ElfSymbolDef {
            name: "s".to_string(),
            section_index: 7,
            value: 0,
            size: 0,
            info: 0,
            other: 0,
        });
        assert!(w.compute_size().is_err());
    }
}
