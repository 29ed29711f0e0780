use crate::asm::{AsmOutput, SectKind, KERNEL_DESCRIPTOR_SIZE};
use crate::error::{ContainerError, Error, MsgPackError, Result};
use crate::fileformat::elf::{
    ElfBinary64, ElfHeaderDef, ElfRegion, ElfRegionKind, ElfSectionContent, ElfSectionDef,
    ElfSymbolDef, ElfWriter64, SHT_NOTE, SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB, STB_GLOBAL,
    STT_FUNC, STT_OBJECT,
};
use crate::fileformat::msgpack::{MapWriter, Signedness, StreamParser};
use crate::support::{load_u32, push_u32};
use std::str::FromStr;

pub const ELF_NOTE_NAME: &str = "AMDGPU";
pub const NT_AMDGPU_METADATA: u32 = 32;
const EM_AMDGPU: u16 = 224;

fn wrong_kind() -> Error {
    Error::MsgPackError(MsgPackError::WrongValueKind)
}

/// Kernel-argument value kinds of the metadata map; the string set is
/// closed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RocmValueKind {
    ByValue,
    GlobalBuffer,
    DynSharedPointer,
    Sampler,
    Image,
    Pipe,
    Queue,
    HiddenGlobalOffsetX,
    HiddenGlobalOffsetY,
    HiddenGlobalOffsetZ,
    HiddenNone,
    HiddenPrintfBuffer,
    HiddenDefaultQueue,
    HiddenCompletionAction,
    HiddenMultiGridSyncArg,
}

const VALUE_KIND_NAMES: [(&str, RocmValueKind); 15] = [
    ("by_value", RocmValueKind::ByValue),
    ("dynamic_shared_pointer", RocmValueKind::DynSharedPointer),
    ("global_buffer", RocmValueKind::GlobalBuffer),
    ("hidden_completion_action", RocmValueKind::HiddenCompletionAction),
    ("hidden_default_queue", RocmValueKind::HiddenDefaultQueue),
    ("hidden_global_offset_x", RocmValueKind::HiddenGlobalOffsetX),
    ("hidden_global_offset_y", RocmValueKind::HiddenGlobalOffsetY),
    ("hidden_global_offset_z", RocmValueKind::HiddenGlobalOffsetZ),
    ("hidden_multigrid_sync_arg", RocmValueKind::HiddenMultiGridSyncArg),
    ("hidden_none", RocmValueKind::HiddenNone),
    ("hidden_printf_buffer", RocmValueKind::HiddenPrintfBuffer),
    ("image", RocmValueKind::Image),
    ("pipe", RocmValueKind::Pipe),
    ("queue", RocmValueKind::Queue),
    ("sampler", RocmValueKind::Sampler),
];

impl FromStr for RocmValueKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<RocmValueKind> {
        VALUE_KIND_NAMES
            .iter()
            .find(|(n, _)| *n == s)
            .map(|(_, v)| *v)
            .ok_or_else(wrong_kind)
    }
}

impl RocmValueKind {
    fn name(self) -> &'static str {
        VALUE_KIND_NAMES
            .iter()
            .find(|(_, v)| *v == self)
            .map(|(n, _)| *n)
            .unwrap_or("by_value")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RocmValueType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float16,
    Float32,
    Float64,
    Structure,
}

const VALUE_TYPE_NAMES: [(&str, RocmValueType); 12] = [
    ("F16", RocmValueType::Float16),
    ("F32", RocmValueType::Float32),
    ("F64", RocmValueType::Float64),
    ("I16", RocmValueType::Int16),
    ("I32", RocmValueType::Int32),
    ("I64", RocmValueType::Int64),
    ("I8", RocmValueType::Int8),
    ("Struct", RocmValueType::Structure),
    ("U16", RocmValueType::Uint16),
    ("U32", RocmValueType::Uint32),
    ("U64", RocmValueType::Uint64),
    ("U8", RocmValueType::Uint8),
];

impl FromStr for RocmValueType {
    type Err = Error;
    fn from_str(s: &str) -> Result<RocmValueType> {
        VALUE_TYPE_NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(s))
            .map(|(_, v)| *v)
            .ok_or_else(wrong_kind)
    }
}

impl RocmValueType {
    fn name(self) -> &'static str {
        VALUE_TYPE_NAMES
            .iter()
            .find(|(_, v)| *v == self)
            .map(|(n, _)| *n)
            .unwrap_or("I32")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum RocmAccessQual {
    #[default]
    None,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl RocmAccessQual {
    fn from_text(s: &str) -> Result<RocmAccessQual> {
        Ok(match s.trim() {
            "read_only" => RocmAccessQual::ReadOnly,
            "write_only" => RocmAccessQual::WriteOnly,
            "read_write" => RocmAccessQual::ReadWrite,
            _ => return Err(wrong_kind()),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum RocmAddressSpace {
    #[default]
    None,
    Private,
    Global,
    Constant,
    Local,
    Generic,
    Region,
}

impl RocmAddressSpace {
    fn from_text(s: &str) -> Result<RocmAddressSpace> {
        let names = [
            ("private", RocmAddressSpace::Private),
            ("global", RocmAddressSpace::Global),
            ("constant", RocmAddressSpace::Constant),
            ("local", RocmAddressSpace::Local),
            ("generic", RocmAddressSpace::Generic),
            ("region", RocmAddressSpace::Region),
        ];
        names
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(s.trim()))
            .map(|(_, v)| *v)
            .ok_or_else(wrong_kind)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RocmKernelArg {
    pub name: String,
    pub type_name: String,
    pub size: u64,
    pub offset: u64,
    pub value_kind: Option<RocmValueKind>,
    pub value_type: Option<RocmValueType>,
    pub pointee_align: u64,
    pub address_space: RocmAddressSpace,
    pub access: RocmAccessQual,
    pub actual_access: RocmAccessQual,
    pub is_const: bool,
    pub is_restrict: bool,
    pub is_volatile: bool,
    pub is_pipe: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RocmKernelMetadata {
    pub name: String,
    pub symbol: String,
    pub language: String,
    pub language_version: [u64; 2],
    pub kernarg_segment_size: u64,
    pub group_segment_fixed_size: u64,
    pub private_segment_fixed_size: u64,
    pub kernarg_segment_align: u64,
    pub wavefront_size: u64,
    pub sgprs_num: u64,
    pub vgprs_num: u64,
    pub spilled_sgprs: u64,
    pub spilled_vgprs: u64,
    pub max_flat_workgroup_size: u64,
    pub reqd_workgroup_size: [u64; 3],
    pub workgroup_size_hint: [u64; 3],
    pub vec_type_hint: String,
    pub device_enqueue_symbol: String,
    pub args: Vec<RocmKernelArg>,
}

#[derive(Clone, Debug, Default)]
pub struct RocmMetadata {
    pub version: [u64; 2],
    pub printf_infos: Vec<String>,
    pub kernels: Vec<RocmKernelMetadata>,
}

fn parse_typed_array<const N: usize>(
    map: &mut crate::fileformat::msgpack::MapParser,
    p: &mut StreamParser,
) -> Result<[u64; N]> {
    let mut arr = map.parse_value_array(p)?;
    if arr.len() != N {
        return Err(wrong_kind());
    }
    let mut out = [0u64; N];
    for v in out.iter_mut() {
        *v = arr.parse_integer(p, Signedness::Unsigned)?;
    }
    Ok(out)
}

fn parse_kernel_arg(p: &mut StreamParser) -> Result<RocmKernelArg> {
    let mut map = p.parse_map()?;
    let mut arg = RocmKernelArg::default();
    while map.have_elements() {
        let key = map.parse_key_string(p)?.to_string();
        match key.as_str() {
            ".access" => arg.access = RocmAccessQual::from_text(map.parse_value_string(p)?)?,
            ".actual_access" => {
                arg.actual_access = RocmAccessQual::from_text(map.parse_value_string(p)?)?
            }
            ".address_space" => {
                arg.address_space = RocmAddressSpace::from_text(map.parse_value_string(p)?)?
            }
            ".is_const" => arg.is_const = map.parse_value_bool(p)?,
            ".is_pipe" => arg.is_pipe = map.parse_value_bool(p)?,
            ".is_restrict" => arg.is_restrict = map.parse_value_bool(p)?,
            ".is_volatile" => arg.is_volatile = map.parse_value_bool(p)?,
            ".name" => arg.name = map.parse_value_string(p)?.to_string(),
            ".offset" => arg.offset = map.parse_value_integer(p, Signedness::Unsigned)?,
            ".pointee_align" => {
                arg.pointee_align = map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".size" => arg.size = map.parse_value_integer(p, Signedness::Unsigned)?,
            ".type_name" => arg.type_name = map.parse_value_string(p)?.to_string(),
            ".value_kind" => {
                arg.value_kind = Some(RocmValueKind::from_str(map.parse_value_string(p)?.trim())?)
            }
            ".value_type" => {
                arg.value_type = Some(RocmValueType::from_str(map.parse_value_string(p)?)?)
            }
            _ => map.skip_value(p)?,
        }
    }
    Ok(arg)
}

fn parse_kernel(p: &mut StreamParser) -> Result<RocmKernelMetadata> {
    let mut map = p.parse_map()?;
    let mut kernel = RocmKernelMetadata::default();
    while map.have_elements() {
        let key = map.parse_key_string(p)?.to_string();
        match key.as_str() {
            ".args" => {
                let mut arr = map.parse_value_array(p)?;
                while arr.have_elements() {
                    arr.parse_element_with(p, |p| {
                        kernel.args.push(parse_kernel_arg(p)?);
                        Ok(())
                    })?;
                }
            }
            ".device_enqueue_symbol" => {
                kernel.device_enqueue_symbol = map.parse_value_string(p)?.to_string()
            }
            ".group_segment_fixed_size" => {
                kernel.group_segment_fixed_size =
                    map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".kernarg_segment_align" => {
                kernel.kernarg_segment_align = map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".kernarg_segment_size" => {
                kernel.kernarg_segment_size = map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".language" => kernel.language = map.parse_value_string(p)?.to_string(),
            ".language_version" => {
                kernel.language_version = parse_typed_array::<2>(&mut map, p)?
            }
            ".max_flat_workgroup_size" => {
                kernel.max_flat_workgroup_size =
                    map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".name" => kernel.name = map.parse_value_string(p)?.to_string(),
            ".private_segment_fixed_size" => {
                kernel.private_segment_fixed_size =
                    map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".reqd_workgroup_size" => {
                kernel.reqd_workgroup_size = parse_typed_array::<3>(&mut map, p)?
            }
            ".sgpr_count" => kernel.sgprs_num = map.parse_value_integer(p, Signedness::Unsigned)?,
            ".sgpr_spill_count" => {
                kernel.spilled_sgprs = map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".symbol" => kernel.symbol = map.parse_value_string(p)?.to_string(),
            ".vec_type_hint" => kernel.vec_type_hint = map.parse_value_string(p)?.to_string(),
            ".vgpr_count" => kernel.vgprs_num = map.parse_value_integer(p, Signedness::Unsigned)?,
            ".vgpr_spill_count" => {
                kernel.spilled_vgprs = map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".wavefront_size" => {
                kernel.wavefront_size = map.parse_value_integer(p, Signedness::Unsigned)?
            }
            ".workgroup_size_hint" => {
                kernel.workgroup_size_hint = parse_typed_array::<3>(&mut map, p)?
            }
            _ => map.skip_value(p)?,
        }
    }
    Ok(kernel)
}

/// One MsgPack map at the top level; unknown keys are skipped so newer
/// producers stay readable.
pub fn parse_metadata(bytes: &[u8]) -> Result<RocmMetadata> {
    let p = &mut StreamParser::new(bytes);
    let mut map = p.parse_map()?;
    let mut meta = RocmMetadata::default();
    while map.have_elements() {
        let key = map.parse_key_string(p)?.to_string();
        match key.as_str() {
            "amdhsa.version" => meta.version = parse_typed_array::<2>(&mut map, p)?,
            "amdhsa.kernels" => {
                let mut arr = map.parse_value_array(p)?;
                while arr.have_elements() {
                    arr.parse_element_with(p, |p| {
                        meta.kernels.push(parse_kernel(p)?);
                        Ok(())
                    })?;
                }
            }
            "amdhsa.printf" => {
                let mut arr = map.parse_value_array(p)?;
                while arr.have_elements() {
                    let s = arr.parse_string(p)?;
                    meta.printf_infos.push(s.to_string());
                }
            }
            _ => map.skip_value(p)?,
        }
    }
    Ok(meta)
}

fn write_kernel_arg(arg: &RocmKernelArg) -> Result<Vec<u8>> {
    let mut map = MapWriter::new();
    if !arg.name.is_empty() {
        map.put_key_string(".name")?;
        map.put_value_string(&arg.name)?;
    }
    map.put_key_string(".offset")?;
    map.put_value_uint(arg.offset)?;
    map.put_key_string(".size")?;
    map.put_value_uint(arg.size)?;
    if !arg.type_name.is_empty() {
        map.put_key_string(".type_name")?;
        map.put_value_string(&arg.type_name)?;
    }
    if let Some(kind) = arg.value_kind {
        map.put_key_string(".value_kind")?;
        map.put_value_string(kind.name())?;
    }
    if let Some(ty) = arg.value_type {
        map.put_key_string(".value_type")?;
        map.put_value_string(ty.name())?;
    }
    if arg.is_const {
        map.put_key_string(".is_const")?;
        map.put_value_bool(true)?;
    }
    Ok(map.into_bytes())
}

fn write_kernel(kernel: &RocmKernelMetadata) -> Result<Vec<u8>> {
    let mut map = MapWriter::new();
    if !kernel.args.is_empty() {
        map.put_key_string(".args")?;
        let mut body = Vec::new();
        crate::fileformat::msgpack::write_array_of_raw(
            &mut body,
            kernel
                .args
                .iter()
                .map(write_kernel_arg)
                .collect::<Result<Vec<_>>>()?,
        );
        map.put_value_raw(&body)?;
    }
    map.put_key_string(".group_segment_fixed_size")?;
    map.put_value_uint(kernel.group_segment_fixed_size)?;
    map.put_key_string(".kernarg_segment_align")?;
    map.put_value_uint(kernel.kernarg_segment_align)?;
    map.put_key_string(".kernarg_segment_size")?;
    map.put_value_uint(kernel.kernarg_segment_size)?;
    map.put_key_string(".name")?;
    map.put_value_string(&kernel.name)?;
    map.put_key_string(".private_segment_fixed_size")?;
    map.put_value_uint(kernel.private_segment_fixed_size)?;
    map.put_key_string(".sgpr_count")?;
    map.put_value_uint(kernel.sgprs_num)?;
    map.put_key_string(".symbol")?;
    map.put_value_string(&kernel.symbol)?;
    map.put_key_string(".vgpr_count")?;
    map.put_value_uint(kernel.vgprs_num)?;
    map.put_key_string(".wavefront_size")?;
    map.put_value_uint(kernel.wavefront_size)?;
    Ok(map.into_bytes())
}

pub fn write_metadata(meta: &RocmMetadata) -> Result<Vec<u8>> {
    let mut map = MapWriter::new();
    map.put_key_string("amdhsa.kernels")?;
    let mut kernels_body = Vec::new();
    crate::fileformat::msgpack::write_array_of_raw(
        &mut kernels_body,
        meta.kernels
            .iter()
            .map(write_kernel)
            .collect::<Result<Vec<_>>>()?,
    );
    map.put_value_raw(&kernels_body)?;
    map.put_key_string("amdhsa.version")?;
    let mut arr = map.put_value_array(2)?;
    arr.put_uint(meta.version[0])?;
    arr.put_uint(meta.version[1])?;
    drop(arr);
    Ok(map.into_bytes())
}

/// Wrap the metadata blob into one ELF note record.
pub fn build_note(metadata: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(metadata.len() + 20);
    push_u32(&mut out, ELF_NOTE_NAME.len() as u32 + 1);
    push_u32(&mut out, metadata.len() as u32);
    push_u32(&mut out, NT_AMDGPU_METADATA);
    out.extend_from_slice(ELF_NOTE_NAME.as_bytes());
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out.extend_from_slice(metadata);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// Parsed ROCm code object: ELF64 with the MsgPack metadata note.
pub struct RocmBinary<'a> {
    pub elf: ElfBinary64<'a>,
    pub metadata: RocmMetadata,
    pub code_index: usize,
}

impl<'a> RocmBinary<'a> {
    pub fn parse(data: &'a [u8]) -> Result<RocmBinary<'a>> {
        let elf = ElfBinary64::parse(data)?;
        let code_index = elf
            .section_index(".text")
            .ok_or(Error::ContainerError(ContainerError::Mismatch(
                "no text section",
            )))?;
        let mut metadata = None;
        for idx in 0..elf.sections.len() {
            if elf.sections[idx].sh_type != SHT_NOTE {
                continue;
            }
            let note = elf.section_data(idx);
            let mut pos = 0usize;
            while pos + 12 <= note.len() {
                let namesz = load_u32(note, pos) as usize;
                let descsz = load_u32(note, pos + 4) as usize;
                let n_type = load_u32(note, pos + 8);
                pos += 12;
                let name_end = pos + namesz;
                if name_end > note.len() {
                    return Err(Error::ContainerError(ContainerError::SectionOutOfRange));
                }
                let name = if namesz == 0 {
                    &note[pos..pos]
                } else {
                    &note[pos..name_end - 1]
                };
                pos = (name_end + 3) & !3;
                if pos + descsz > note.len() {
                    return Err(Error::ContainerError(ContainerError::SectionOutOfRange));
                }
                if name == ELF_NOTE_NAME.as_bytes() && n_type == NT_AMDGPU_METADATA {
                    metadata = Some(parse_metadata(&note[pos..pos + descsz])?);
                }
                pos = (pos + descsz + 3) & !3;
            }
        }
        let metadata = metadata.ok_or(Error::ContainerError(ContainerError::Mismatch(
            "no metadata note",
        )))?;
        Ok(RocmBinary {
            elf,
            metadata,
            code_index,
        })
    }

    pub fn code(&self) -> &'a [u8] {
        self.elf.section_data(self.code_index)
    }
}

/// Emit the ROCm container for a finished assembly job.
pub fn write_rocm(output: &AsmOutput) -> Result<Vec<u8>> {
    let text = output
        .sections
        .iter()
        .find(|s| s.kind == SectKind::Text)
        .ok_or(Error::ContainerError(ContainerError::Mismatch(
            "no text section",
        )))?;
    let mut meta = RocmMetadata {
        version: [1, 0],
        ..Default::default()
    };
    for k in &output.kernels {
        meta.kernels.push(RocmKernelMetadata {
            name: k.name.clone(),
            symbol: k.name.clone(),
            kernarg_segment_align: k.config.kernarg_segment_align,
            group_segment_fixed_size: k.config.workgroup_group_segment_size as u64,
            private_segment_fixed_size: k.config.scratch_buffer_size as u64,
            wavefront_size: 64,
            sgprs_num: k.sgprs as u64,
            vgprs_num: k.vgprs as u64,
            ..Default::default()
        });
    }
    let note = build_note(&write_metadata(&meta)?);

    let mut w: ElfWriter64 = ElfWriter64::new(ElfHeaderDef {
        e_type: 1,
        machine: EM_AMDGPU,
        ..Default::default()
    });
    w.add_region(ElfRegion {
        align: 256,
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
            name: ".note".to_string(),
            sh_type: SHT_NOTE,
            flags: 0,
            link: 0,
            info: 0,
            entsize: 0,
            addr_base: 0,
            content: ElfSectionContent::Bytes(note),
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
    for k in &output.kernels {
        let info = if k.fkernel {
            (STB_GLOBAL << 4) | STT_OBJECT
        } else {
            (STB_GLOBAL << 4) | STT_FUNC
        };
        w.add_symbol(ElfSymbolDef {
            name: k.name.clone(),
            section_index: 1,
            value: k.offset,
            size: KERNEL_DESCRIPTOR_SIZE as u64,
            info,
            other: 0,
        });
    }
    w.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> RocmMetadata {
        RocmMetadata {
            version: [1, 0],
            printf_infos: Vec::new(),
            kernels: vec![
                RocmKernelMetadata {
                    name: "kxx1".to_string(),
                    symbol: "kxx1".to_string(),
                    kernarg_segment_align: 32,
                    kernarg_segment_size: 16,
                    group_segment_fixed_size: 22,
                    private_segment_fixed_size: 111,
                    wavefront_size: 64,
                    sgprs_num: 8,
                    vgprs_num: 1,
                    args: vec![RocmKernelArg {
                        name: "in".to_string(),
                        type_name: "float*".to_string(),
                        size: 8,
                        offset: 0,
                        value_kind: Some(RocmValueKind::GlobalBuffer),
                        value_type: Some(RocmValueType::Float32),
                        is_const: true,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                RocmKernelMetadata {
                    name: "kxx2".to_string(),
                    symbol: "kxx2".to_string(),
                    wavefront_size: 64,
                    sgprs_num: 2,
                    vgprs_num: 1,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_metadata_round_trip() {
        let meta = sample_metadata();
        let bytes = write_metadata(&meta).unwrap();
        let parsed = parse_metadata(&bytes).unwrap();
        assert_eq!(parsed.version, [1, 0]);
        assert_eq!(parsed.kernels.len(), 2);
        let k = &parsed.kernels[0];
        assert_eq!(k.name, "kxx1");
        assert_eq!(k.kernarg_segment_align, 32);
        assert_eq!(k.private_segment_fixed_size, 111);
        assert_eq!(k.sgprs_num, 8);
        assert_eq!(k.args.len(), 1);
        assert_eq!(k.args[0].value_kind, Some(RocmValueKind::GlobalBuffer));
        assert_eq!(k.args[0].value_type, Some(RocmValueType::Float32));
        assert!(k.args[0].is_const);
        assert_eq!(parsed.kernels[1].sgprs_num, 2);
    }

    #[test]
    fn test_unknown_keys_skipped() {
        let mut map = MapWriter::new();
        map.put_key_string("amdhsa.future_extension").unwrap();
        map.put_value_string("ignored").unwrap();
        map.put_key_string("amdhsa.version").unwrap();
        let mut arr = map.put_value_array(2).unwrap();
        arr.put_uint(1).unwrap();
        arr.put_uint(2).unwrap();
        drop(arr);
        let bytes = map.into_bytes();
        let parsed = parse_metadata(&bytes).unwrap();
        assert_eq!(parsed.version, [1, 2]);
    }

    #[test]
    fn test_bad_value_kind_rejected() {
        let mut inner = MapWriter::new();
        inner.put_key_string(".value_kind").unwrap();
        inner.put_value_string("not_a_kind").unwrap();
        let mut args = Vec::new();
        crate::fileformat::msgpack::write_array_of_raw(&mut args, vec![inner.into_bytes()]);
        let mut kmap = MapWriter::new();
        kmap.put_key_string(".args").unwrap();
        kmap.put_value_raw(&args).unwrap();
        let mut kernels = Vec::new();
        crate::fileformat::msgpack::write_array_of_raw(&mut kernels, vec![kmap.into_bytes()]);
        let mut root = MapWriter::new();
        root.put_key_string("amdhsa.kernels").unwrap();
        root.put_value_raw(&kernels).unwrap();
        let bytes = root.into_bytes();
        assert!(matches!(
            parse_metadata(&bytes),
            Err(Error::MsgPackError(MsgPackError::WrongValueKind))
        ));
    }

    #[test]
    fn test_note_wrapping() {
        let note = build_note(&[1, 2, 3]);
        assert_eq!(load_u32(&note, 0), 7, "namesz includes terminator");
        assert_eq!(load_u32(&note, 4), 3);
        assert_eq!(load_u32(&note, 8), NT_AMDGPU_METADATA);
        assert_eq!(&note[12..18], b"AMDGPU");
        assert_eq!(note.len() % 4, 0);
    }
}
