use crate::asm::{AsmOutput, SectKind};
use crate::error::{ContainerError, Error, Result};
use crate::fileformat::elf::{
    ElfBinary32, ElfHeaderDef, ElfRegion, ElfRegionKind, ElfSectionContent, ElfSectionDef,
    ElfSymbolDef, ElfWriter32, SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB, STB_GLOBAL, STT_FUNC,
};
use crate::support::{load_u32, push_u32};

fn err(kind: ContainerError) -> Error {
    Error::ContainerError(kind)
}

/// Per-kernel metadata records of the Catalyst driver: a fixed header
/// naming "ATI CAL" plus a typed blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CalNoteType {
    ProgInfo,
    Inputs,
    Outputs,
    CondOut,
    Float32Consts,
    Int32Consts,
    Bool32Consts,
    EarlyExit,
    GlobalBuffers,
    ConstantBuffers,
    InputSamplers,
    PersistentBuffers,
    ScratchBuffers,
    SubConstantBuffers,
    UavMailboxSize,
    Uav,
    UavOpMask,
}

impl CalNoteType {
    fn from_u32(v: u32) -> Result<CalNoteType> {
        use CalNoteType::*;
        Ok(match v {
            1 => ProgInfo,
            2 => Inputs,
            3 => Outputs,
            4 => CondOut,
            5 => Float32Consts,
            6 => Int32Consts,
            7 => Bool32Consts,
            8 => EarlyExit,
            9 => GlobalBuffers,
            10 => ConstantBuffers,
            11 => InputSamplers,
            12 => PersistentBuffers,
            13 => ScratchBuffers,
            14 => SubConstantBuffers,
            15 => UavMailboxSize,
            16 => Uav,
            17 => UavOpMask,
            _ => return Err(err(ContainerError::Mismatch("unknown CAL note type"))),
        })
    }

    fn as_u32(self) -> u32 {
        use CalNoteType::*;
        match self {
            ProgInfo => 1,
            Inputs => 2,
            Outputs => 3,
            CondOut => 4,
            Float32Consts => 5,
            Int32Consts => 6,
            Bool32Consts => 7,
            EarlyExit => 8,
            GlobalBuffers => 9,
            ConstantBuffers => 10,
            InputSamplers => 11,
            PersistentBuffers => 12,
            ScratchBuffers => 13,
            SubConstantBuffers => 14,
            UavMailboxSize => 15,
            Uav => 16,
            UavOpMask => 17,
        }
    }
}

const CAL_NOTE_NAME: &[u8; 8] = b"ATI CAL\0";

#[derive(Clone, Debug)]
pub struct CalNote {
    pub note_type: CalNoteType,
    pub data: Vec<u8>,
}

pub fn parse_cal_notes(mut data: &[u8]) -> Result<Vec<CalNote>> {
    let mut notes = Vec::new();
    while !data.is_empty() {
        if data.len() < 20 {
            return Err(err(ContainerError::TruncatedHeader));
        }
        let name_size = load_u32(data, 0) as usize;
        let desc_size = load_u32(data, 4) as usize;
        let note_type = CalNoteType::from_u32(load_u32(data, 8))?;
        if name_size != 8 || &data[12..20] != CAL_NOTE_NAME {
            return Err(err(ContainerError::Mismatch("bad CAL note name")));
        }
        if 20 + desc_size > data.len() {
            return Err(err(ContainerError::SectionOutOfRange));
        }
        notes.push(CalNote {
            note_type,
            data: data[20..20 + desc_size].to_vec(),
        });
        data = &data[20 + desc_size..];
    }
    Ok(notes)
}

pub fn write_cal_notes(notes: &[CalNote]) -> Vec<u8> {
    let mut out = Vec::new();
    for note in notes {
        push_u32(&mut out, 8);
        push_u32(&mut out, note.data.len() as u32);
        push_u32(&mut out, note.note_type.as_u32());
        out.extend_from_slice(CAL_NOTE_NAME);
        out.extend_from_slice(&note.data);
    }
    out
}

/// Catalyst main binary: ELF32 whose text section carries the kernel
/// code and whose function symbols name the kernels.
pub struct AmdCatalystBinary<'a> {
    pub elf: ElfBinary32<'a>,
    pub kernels: Vec<(String, u64)>,
    text_index: usize,
}

impl<'a> AmdCatalystBinary<'a> {
    pub fn parse(data: &'a [u8]) -> Result<AmdCatalystBinary<'a>> {
        let elf = ElfBinary32::parse(data)?;
        let text_index = elf
            .section_index(".text")
            .ok_or(err(ContainerError::Mismatch("no text section")))?;
        let kernels = elf
            .symbols
            .iter()
            .filter(|s| {
                s.st_type() == STT_FUNC && s.shndx as usize == text_index
            })
            .map(|s| (elf.symbol_name(s).to_string(), s.value))
            .collect();
        Ok(AmdCatalystBinary {
            elf,
            kernels,
            text_index,
        })
    }

    pub fn code(&self) -> &'a [u8] {
        self.elf.section_data(self.text_index)
    }
}

pub fn write_amd(output: &AsmOutput) -> Result<Vec<u8>> {
    let text = output
        .sections
        .iter()
        .find(|s| s.kind == SectKind::Text)
        .ok_or(err(ContainerError::Mismatch("no text section")))?;
    let mut w: ElfWriter32 = ElfWriter32::new(ElfHeaderDef {
        e_type: 2, // ET_EXEC, as the Catalyst driver emits
        machine: 0x7d,
        ..Default::default()
    });
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
            content: ElfSectionContent::Bytes(text.bytes.clone()),
        }),
    });
    for section in &output.sections {
        if section.kind == SectKind::Text || section.bytes.is_empty() {
            continue;
        }
        w.add_region(ElfRegion {
            align: section.alignment.max(1) as u64,
            kind: ElfRegionKind::Section(ElfSectionDef {
                name: section.name.clone(),
                sh_type: SHT_PROGBITS,
                flags: 0,
                link: 0,
                info: 0,
                entsize: 0,
                addr_base: 0,
                content: ElfSectionContent::Bytes(section.bytes.clone()),
            }),
        });
    }
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
    for k in &output.kernels {
        w.add_symbol(ElfSymbolDef {
            name: k.name.clone(),
            section_index: 1,
            value: k.offset,
            size: 0,
            info: (STB_GLOBAL << 4) | STT_FUNC,
            other: 0,
        });
    }
    w.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cal_note_round_trip() {
        let notes = vec![
            CalNote {
                note_type: CalNoteType::ProgInfo,
                data: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
            CalNote {
                note_type: CalNoteType::Uav,
                data: Vec::new(),
            },
        ];
        let bytes = write_cal_notes(&notes);
        let parsed = parse_cal_notes(&bytes).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].note_type, CalNoteType::ProgInfo);
        assert_eq!(parsed[0].data, notes[0].data);
        assert_eq!(parsed[1].note_type, CalNoteType::Uav);
        assert!(parsed[1].data.is_empty());
    }

    #[test]
    fn test_cal_note_bad_name_rejected() {
        let notes = vec![CalNote {
            note_type: CalNoteType::Inputs,
            data: vec![0; 4],
        }];
        let mut bytes = write_cal_notes(&notes);
        bytes[12] = b'X';
        assert!(matches!(
            parse_cal_notes(&bytes),
            Err(Error::ContainerError(ContainerError::Mismatch(_)))
        ));
    }

    #[test]
    fn test_cal_note_truncation_rejected() {
        let notes = vec![CalNote {
            note_type: CalNoteType::Inputs,
            data: vec![0; 16],
        }];
        let bytes = write_cal_notes(&notes);
        assert!(parse_cal_notes(&bytes[..bytes.len() - 4]).is_err());
    }
}
