use crate::error::{ContainerError, Error, Result};
use crate::fileformat::elf::ElfBinary32;
use crate::support::{load_u32, push_u32};

fn err(kind: ContainerError) -> Error {
    Error::ContainerError(kind)
}

fn malformed(what: &'static str) -> Error {
    err(ContainerError::Mismatch(what))
}

/// Label the Mesa3D loader ignores when walking kernel symbols.
const END_OF_TEXT_LABEL: &str = "EndOfTextLabel";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GalliumArgType {
    Scalar,
    Constant,
    Global,
    Local,
    Image2dRdOnly,
    Image2dWrOnly,
    Image3dRdOnly,
    Image3dWrOnly,
    Sampler,
}

impl GalliumArgType {
    fn from_u32(v: u32) -> Result<GalliumArgType> {
        use GalliumArgType::*;
        Ok(match v {
            0 => Scalar,
            1 => Constant,
            2 => Global,
            3 => Local,
            4 => Image2dRdOnly,
            5 => Image2dWrOnly,
            6 => Image3dRdOnly,
            7 => Image3dWrOnly,
            8 => Sampler,
            _ => return Err(malformed("wrong type of kernel argument")),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GalliumArgSemantic {
    General,
    GridDimension,
    GridOffset,
}

impl GalliumArgSemantic {
    fn from_u32(v: u32) -> Result<GalliumArgSemantic> {
        Ok(match v {
            0 => GalliumArgSemantic::General,
            1 => GalliumArgSemantic::GridDimension,
            2 => GalliumArgSemantic::GridOffset,
            _ => return Err(malformed("wrong semantic of kernel argument")),
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct GalliumArgInfo {
    pub arg_type: GalliumArgType,
    pub size: u32,
    pub target_size: u32,
    pub target_align: u32,
    pub sign_extended: bool,
    pub semantic: GalliumArgSemantic,
}

#[derive(Clone, Debug)]
pub struct GalliumKernel {
    pub name: String,
    pub section_id: u32,
    pub offset: u32,
    pub args: Vec<GalliumArgInfo>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GalliumSectionType {
    Text,
    DataConstant,
    DataGlobal,
    DataLocal,
    DataPrivate,
}

impl GalliumSectionType {
    fn from_u32(v: u32) -> Result<GalliumSectionType> {
        use GalliumSectionType::*;
        Ok(match v {
            0 => Text,
            1 => DataConstant,
            2 => DataGlobal,
            3 => DataLocal,
            4 => DataPrivate,
            _ => return Err(malformed("wrong type of section")),
        })
    }
}

#[derive(Clone, Debug)]
pub struct GalliumSection {
    pub section_id: u32,
    pub sec_type: GalliumSectionType,
    pub offset: usize,
    pub size: u32,
}

/// The Mesa3D compute container: a count-prefixed kernel table followed
/// by a count-prefixed section table, one section embedding a
/// standalone ELF32.
pub struct GalliumBinary<'a> {
    pub kernels: Vec<GalliumKernel>,
    pub sections: Vec<GalliumSection>,
    pub data: &'a [u8],
    text_section: usize,
}

impl<'a> GalliumBinary<'a> {
    pub fn parse(data: &'a [u8]) -> Result<GalliumBinary<'a>> {
        let take = |pos: &mut usize, n: usize| -> Result<usize> {
            if *pos + n > data.len() {
                return Err(err(ContainerError::TruncatedHeader));
            }
            let at = *pos;
            *pos += n;
            Ok(at)
        };
        let mut pos = 0usize;
        let kernels_num = load_u32(data, take(&mut pos, 4)?);
        if (data.len() as u64) < kernels_num as u64 * 16 {
            return Err(malformed("kernels number is too big"));
        }
        let mut kernels: Vec<GalliumKernel> = Vec::with_capacity(kernels_num as usize);
        for i in 0..kernels_num {
            let name_len = load_u32(data, take(&mut pos, 4)?) as usize;
            let name_at = take(&mut pos, name_len)?;
            let name = std::str::from_utf8(&data[name_at..name_at + name_len])
                .map_err(|_| malformed("kernel name is not valid text"))?
                .to_string();
            if i != 0 && kernels[i as usize - 1].name >= name {
                return Err(malformed("unsorted kernel table"));
            }
            let at = take(&mut pos, 12)?;
            let section_id = load_u32(data, at);
            let offset = load_u32(data, at + 4);
            let args_num = load_u32(data, at + 8);
            if args_num > u32::MAX / 24 {
                return Err(malformed("number of arguments is too high"));
            }
            let mut args = Vec::with_capacity(args_num as usize);
            for _ in 0..args_num {
                let at = take(&mut pos, 24)?;
                args.push(GalliumArgInfo {
                    arg_type: GalliumArgType::from_u32(load_u32(data, at))?,
                    size: load_u32(data, at + 4),
                    target_size: load_u32(data, at + 8),
                    target_align: load_u32(data, at + 12),
                    sign_extended: load_u32(data, at + 16) != 0,
                    semantic: GalliumArgSemantic::from_u32(load_u32(data, at + 20))?,
                });
            }
            kernels.push(GalliumKernel {
                name,
                section_id,
                offset,
                args,
            });
        }

        let sections_num = load_u32(data, take(&mut pos, 4)?);
        let mut sections = Vec::with_capacity(sections_num as usize);
        let mut text_section = None;
        for _ in 0..sections_num {
            let at = take(&mut pos, 20)?;
            let section_id = load_u32(data, at);
            let sec_type = GalliumSectionType::from_u32(load_u32(data, at + 4))?;
            let size = load_u32(data, at + 8);
            let size_of_data = load_u32(data, at + 12);
            let size_from_header = load_u32(data, at + 16);
            if size_of_data != size.wrapping_add(4) || size_from_header != size {
                return Err(malformed("section size fields do not match"));
            }
            let content_at = take(&mut pos, size as usize)?;
            if sec_type == GalliumSectionType::Text && text_section.is_none() {
                text_section = Some(sections.len());
            }
            sections.push(GalliumSection {
                section_id,
                sec_type,
                offset: content_at,
                size,
            });
        }
        let text_section =
            text_section.ok_or(malformed("no text section with the inner binary"))?;

        let out = GalliumBinary {
            kernels,
            sections,
            data,
            text_section,
        };
        out.verify_kernel_symbols()?;
        Ok(out)
    }

    pub fn text_elf_bytes(&self) -> &'a [u8] {
        let s = &self.sections[self.text_section];
        &self.data[s.offset..s.offset + s.size as usize]
    }

    /// Kernel records must target the text section and their offsets
    /// must match that section's function symbols, in order.
    fn verify_kernel_symbols(&self) -> Result<()> {
        let text_id = self.sections[self.text_section].section_id;
        for kernel in &self.kernels {
            if kernel.section_id != text_id {
                return Err(malformed("kernel is not in the text section"));
            }
        }
        let elf = ElfBinary32::parse(self.text_elf_bytes())?;
        let text_idx = match elf.section_index(".text") {
            Some(idx) => idx as u16,
            None => return Err(malformed("inner binary has no text section")),
        };
        let mut sym_iter = elf.symbols.iter().filter(|sym| {
            let name = elf.symbol_name(sym);
            !name.is_empty() && name != END_OF_TEXT_LABEL && sym.shndx == text_idx
        });
        for kernel in &self.kernels {
            let sym = sym_iter
                .next()
                .ok_or(malformed("kernel count does not match inner symbols"))?;
            if elf.symbol_name(sym) != kernel.name {
                return Err(malformed("kernel symbols out of order"));
            }
            if sym.value != kernel.offset as u64 {
                return Err(malformed("kernel symbol value does not match offset"));
            }
        }
        Ok(())
    }
}

/// Kernel as fed to the writer.
#[derive(Clone, Debug)]
pub struct GalliumKernelInput {
    pub name: String,
    pub offset: u32,
    pub args: Vec<GalliumArgInfo>,
}

/// Emit the outer container around a finished inner ELF32. Kernels are
/// sorted by name, which the Mesa3D loader requires.
pub fn write_gallium(kernels: &[GalliumKernelInput], inner_elf: &[u8]) -> Vec<u8> {
    let mut order: Vec<usize> = (0..kernels.len()).collect();
    order.sort_by(|&a, &b| kernels[a].name.cmp(&kernels[b].name));

    let mut out = Vec::new();
    push_u32(&mut out, kernels.len() as u32);
    for &i in &order {
        let kernel = &kernels[i];
        push_u32(&mut out, kernel.name.len() as u32);
        out.extend_from_slice(kernel.name.as_bytes());
        push_u32(&mut out, 0); // text section id
        push_u32(&mut out, kernel.offset);
        push_u32(&mut out, kernel.args.len() as u32);
        for arg in &kernel.args {
            push_u32(&mut out, arg.arg_type as u32);
            push_u32(&mut out, arg.size);
            push_u32(&mut out, arg.target_size);
            push_u32(&mut out, arg.target_align);
            push_u32(&mut out, arg.sign_extended as u32);
            push_u32(&mut out, arg.semantic as u32);
        }
    }
    push_u32(&mut out, 1); // section count
    push_u32(&mut out, 0); // section id
    push_u32(&mut out, GalliumSectionType::Text as u32);
    push_u32(&mut out, inner_elf.len() as u32);
    push_u32(&mut out, inner_elf.len() as u32 + 4);
    push_u32(&mut out, inner_elf.len() as u32);
    out.extend_from_slice(inner_elf);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileformat::elf::{
        ElfHeaderDef, ElfRegion, ElfRegionKind, ElfSectionContent, ElfSectionDef, ElfSymbolDef,
        ElfWriter32, SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB, STB_GLOBAL, STT_FUNC,
    };

    fn inner_elf(kernels: &[(&str, u64)], code_len: usize) -> Vec<u8> {
        let mut w: ElfWriter32 = ElfWriter32::new(ElfHeaderDef::default());
        w.add_region(ElfRegion {
            align: 4,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: ".text".to_string(),
                sh_type: SHT_PROGBITS,
                flags: 0x6,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::Bytes(vec![0u8; code_len]),
            }),
        });
        w.add_region(ElfRegion {
            align: 4,
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
            align: 4,
            kind: ElfRegionKind::ShdrTable,
        });
        for (name, value) in kernels {
            w.add_symbol(ElfSymbolDef {
                name: name.to_string(),
                section_index: 1,
                value: *value,
                size: 0,
                info: (STB_GLOBAL << 4) | STT_FUNC,
                other: 0,
            });
        }
        w.build().unwrap()
    }

    fn arg() -> GalliumArgInfo {
        GalliumArgInfo {
            arg_type: GalliumArgType::Global,
            size: 8,
            target_size: 8,
            target_align: 8,
            sign_extended: false,
            semantic: GalliumArgSemantic::General,
        }
    }

    #[test]
    fn test_write_parse_round_trip() {
        // the writer must deliver the symbol-value adjustment the
        // reader checks against, so mirror the inner text offset
        let elf = inner_elf(&[("add_k", 0), ("mul_k", 256)], 512);
        let inner = ElfBinary32::parse(&elf).unwrap();
        let text_off = inner.sections[inner.section_index(".text").unwrap()].offset as u32;
        let kernels = vec![
            GalliumKernelInput {
                name: "add_k".to_string(),
                offset: text_off,
                args: vec![arg()],
            },
            GalliumKernelInput {
                name: "mul_k".to_string(),
                offset: text_off + 256,
                args: vec![],
            },
        ];
        let bytes = write_gallium(&kernels, &elf);
        let bin = GalliumBinary::parse(&bytes).unwrap();
        assert_eq!(bin.kernels.len(), 2);
        assert_eq!(bin.kernels[0].name, "add_k");
        assert_eq!(bin.kernels[0].args.len(), 1);
        assert_eq!(bin.kernels[1].name, "mul_k");
        assert_eq!(bin.sections.len(), 1);
        assert_eq!(bin.text_elf_bytes(), elf.as_slice());
    }

    #[test]
    fn test_unsorted_kernels_rejected() {
        let elf = inner_elf(&[("b", 0), ("a", 4)], 8);
        // bypass the writer's sort by emitting in the wrong order
        let mut out = Vec::new();
        push_u32(&mut out, 2);
        for (name, offset) in [("b", 0u32), ("a", 4u32)] {
            push_u32(&mut out, name.len() as u32);
            out.extend_from_slice(name.as_bytes());
            push_u32(&mut out, 0);
            push_u32(&mut out, offset);
            push_u32(&mut out, 0);
        }
        push_u32(&mut out, 1);
        push_u32(&mut out, 0);
        push_u32(&mut out, 0);
        push_u32(&mut out, elf.len() as u32);
        push_u32(&mut out, elf.len() as u32 + 4);
        push_u32(&mut out, elf.len() as u32);
        out.extend_from_slice(&elf);
        assert!(matches!(
            GalliumBinary::parse(&out),
            Err(Error::ContainerError(ContainerError::Mismatch(_)))
        ));
    }

    #[test]
    fn test_size_field_mismatch_rejected() {
        let elf = inner_elf(&[("k", 0)], 4);
        let kernels = vec![GalliumKernelInput {
            name: "k".to_string(),
            offset: 0,
            args: vec![],
        }];
        let mut bytes = write_gallium(&kernels, &elf);
        // corrupt sizeOfData of the section record
        let section_table = 4 + (4 + 1 + 12) + 4;
        let size_of_data_off = section_table + 12;
        let v = load_u32(&bytes, size_of_data_off).wrapping_add(1);
        bytes[size_of_data_off..size_of_data_off + 4].copy_from_slice(&v.to_le_bytes());
        assert!(GalliumBinary::parse(&bytes).is_err());
    }

    #[test]
    fn test_offset_mismatch_rejected() {
        let elf = inner_elf(&[("k", 0)], 4);
        let kernels = vec![GalliumKernelInput {
            name: "k".to_string(),
            offset: 0xbeef,
            args: vec![],
        }];
        let bytes = write_gallium(&kernels, &elf);
        assert!(matches!(
            GalliumBinary::parse(&bytes),
            Err(Error::ContainerError(ContainerError::Mismatch(
                "kernel symbol value does not match offset"
            )))
        ));
    }

    #[test]
    fn test_truncated_rejected() {
        let elf = inner_elf(&[("k", 0)], 4);
        let kernels = vec![GalliumKernelInput {
            name: "k".to_string(),
            offset: 0,
            args: vec![],
        }];
        let bytes = write_gallium(&kernels, &elf);
        assert!(GalliumBinary::parse(&bytes[..10]).is_err());
    }
}
