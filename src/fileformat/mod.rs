pub mod amd;
pub mod elf;
pub mod gallium;
pub mod msgpack;
pub mod rocm;

use crate::asm::{AsmOutput, SectKind};
use crate::error::{ContainerError, Error, Result};
use crate::support::load_u32;

/// Output container family of one assembly job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryFormat {
    Amd,
    AmdCl2,
    Gallium,
    Rocm,
    Raw,
}

/// A loaded GPU binary, dispatched over the four payload families plus
/// raw code.
pub enum GpuBinary<'a> {
    Amd(amd::AmdCatalystBinary<'a>),
    AmdCl2(amd::AmdCatalystBinary<'a>),
    Gallium(gallium::GalliumBinary<'a>),
    Rocm(rocm::RocmBinary<'a>),
    Raw(&'a [u8]),
}

impl<'a> GpuBinary<'a> {
    /// Decide the inner codec from the outer layout: ELF64 binaries are
    /// ROCm code objects, ELF32 binaries Catalyst, a non-ELF file with
    /// a plausible leading kernel count is a Gallium container, and
    /// anything else is raw code.
    pub fn detect(data: &'a [u8]) -> Result<GpuBinary<'a>> {
        if data.len() >= 5 && data[0..4] == [0x7f, b'E', b'L', b'F'] {
            return match data[4] {
                2 => Ok(GpuBinary::Rocm(rocm::RocmBinary::parse(data)?)),
                1 => Ok(GpuBinary::Amd(amd::AmdCatalystBinary::parse(data)?)),
                _ => Err(Error::ContainerError(ContainerError::BadMagic)),
            };
        }
        if data.len() >= 4 {
            let kernels = load_u32(data, 0);
            if kernels != 0 && (kernels as u64) * 16 < data.len() as u64 {
                if let Ok(bin) = gallium::GalliumBinary::parse(data) {
                    return Ok(GpuBinary::Gallium(bin));
                }
            }
        }
        Ok(GpuBinary::Raw(data))
    }
}

/// Emit the output binary for a finished assembly job.
pub fn emit(output: &AsmOutput) -> Result<Vec<u8>> {
    match output.format {
        BinaryFormat::Raw => {
            let text = output
                .sections
                .iter()
                .find(|s| s.kind == SectKind::Text)
                .ok_or(Error::ContainerError(ContainerError::Mismatch(
                    "no text section",
                )))?;
            Ok(text.bytes.clone())
        }
        BinaryFormat::Rocm => rocm::write_rocm(output),
        BinaryFormat::Gallium => emit_gallium(output),
        BinaryFormat::Amd | BinaryFormat::AmdCl2 => amd::write_amd(output),
    }
}

fn emit_gallium(output: &AsmOutput) -> Result<Vec<u8>> {
    use elf::{
        ElfHeaderDef, ElfRegion, ElfRegionKind, ElfSectionContent, ElfSectionDef, ElfSymbolDef,
        ElfWriter32, SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB, STB_GLOBAL, STT_FUNC,
    };
    let text = output
        .sections
        .iter()
        .find(|s| s.kind == SectKind::Text)
        .ok_or(Error::ContainerError(ContainerError::Mismatch(
            "no text section",
        )))?;
    let mut w: ElfWriter32 = ElfWriter32::new(ElfHeaderDef::default());
    let text_region = w.add_region(ElfRegion {
        align: 4,
        kind: ElfRegionKind::Section(ElfSectionDef {
            name: ".text".to_string(),
            sh_type: SHT_PROGBITS,
            flags: 0x6,
            link: 0,
            info: 0,
            entsize: 0,
            addr_base: 0,
            content: ElfSectionContent::Bytes(text.bytes.clone()),
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
    // kernels in name order to match the outer table the loader checks
    let mut kernels: Vec<&crate::asm::KernelRecord> = output.kernels.iter().collect();
    kernels.sort_by(|a, b| a.name.cmp(&b.name));
    for k in &kernels {
        w.add_symbol(ElfSymbolDef {
            name: k.name.clone(),
            section_index: 1,
            value: k.offset,
            size: 0,
            info: (STB_GLOBAL << 4) | STT_FUNC,
            other: 0,
        });
    }
    let text_offset = w.region_offset(text_region)?;
    let inner = w.build()?;
    let inputs: Vec<gallium::GalliumKernelInput> = kernels
        .iter()
        .map(|k| gallium::GalliumKernelInput {
            name: k.name.clone(),
            offset: (text_offset + k.offset) as u32,
            args: Vec::new(),
        })
        .collect();
    Ok(gallium::write_gallium(&inputs, &inner))
}
