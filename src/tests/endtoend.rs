use crate::asm::Assembler;
use crate::error::{Error, SemanticError};
use crate::fileformat::{emit, BinaryFormat, GpuBinary};
use crate::isa::gcn::{Arch, GcnDecoder, GpuDevice, IsaTable};
use crate::support::Severity;
use std::fmt::Write;

fn run(source: &str, device: GpuDevice) -> Vec<u8> {
    let mut asm = Assembler::new("test.s", device, BinaryFormat::Raw);
    asm.assemble(source);
    let (out, remarks) = asm.finish();
    assert!(
        !remarks.iter().any(|r| r.severity() == Severity::Error),
        "diagnostics: {:?}",
        remarks.iter().map(|r| r.to_string()).collect::<Vec<_>>()
    );
    emit(&out.unwrap()).unwrap()
}

#[test]
fn test_assemble_then_disassemble_line() {
    let bytes = run("        s_mov_b32 s7, 0\n", GpuDevice::CapeVerde);
    assert_eq!(bytes, vec![0x80, 0x00, 0x87, 0xbe]);
    let mut decoder = GcnDecoder::new(IsaTable::global(), Arch::Gcn1_0, &bytes);
    decoder.before_disassemble();
    let text = decoder.disassemble().unwrap();
    let line = text.trim();
    assert!(line.starts_with("s_mov_b32"));
    assert!(line.contains("s7"));
    assert!(line.ends_with('0'));
}

#[test]
fn test_rocm_container_full_cycle() {
    let source = "\
        .rocm
        .gpu Fiji
.kernel vector_add
    .config
        .codeversion 1,0
        .kernarg_segment_align 16
        .scratchbuffer 64
.text
vector_add:
        .skip 256
        s_mov_b32 s4, 0
        v_add_f32 v1, v2, v3
        s_endpgm
";
    let bytes = run(source, GpuDevice::CapeVerde);
    let bin = match GpuBinary::detect(&bytes).unwrap() {
        GpuBinary::Rocm(bin) => bin,
        _ => panic!("expected a ROCm code object"),
    };
    assert_eq!(bin.metadata.version, [1, 0]);
    assert_eq!(bin.metadata.kernels.len(), 1);
    let meta = &bin.metadata.kernels[0];
    assert_eq!(meta.name, "vector_add");
    assert_eq!(meta.private_segment_fixed_size, 64);
    assert_eq!(meta.sgprs_num, 5);
    assert_eq!(meta.vgprs_num, 4);

    // decode the code region after the descriptor
    let code = &bin.code()[256..];
    let mut decoder = GcnDecoder::new(IsaTable::global(), Arch::Gcn1_2, code);
    decoder.add_named_label(0, "vector_add");
    decoder.before_disassemble();
    let text = decoder.disassemble().unwrap();
    let mut expect = String::new();
    let _ = writeln!(expect, "vector_add:");
    assert!(text.starts_with(&expect), "got: {}", text);
    assert!(text.contains("s_mov_b32 s4, 0"));
    assert!(text.contains("v_add_f32 v1, v2, v3"));
    assert!(text.contains("s_endpgm"));
}

#[test]
fn test_gallium_container_full_cycle() {
    let source = "\
        .gallium
.kernel scale
.text
scale:
        v_mul_f32 v0, v1, v2
        s_endpgm
";
    let bytes = run(source, GpuDevice::Pitcairn);
    let bin = match GpuBinary::detect(&bytes).unwrap() {
        GpuBinary::Gallium(bin) => bin,
        _ => panic!("expected a Gallium container"),
    };
    assert_eq!(bin.kernels.len(), 1);
    assert_eq!(bin.kernels[0].name, "scale");
    // the embedded ELF32 is standalone readable
    let inner = crate::fileformat::elf::ElfBinary32::parse(bin.text_elf_bytes()).unwrap();
    let text = inner.section_index(".text").unwrap();
    assert_eq!(inner.section_data(text).len(), 8);
}

#[test]
fn test_deep_set_chain_is_circular() {
    let mut source = String::new();
    for i in 0..300 {
        let _ = writeln!(source, ".set a{}, a{}+1", i, i + 1);
    }
    let _ = writeln!(source, ".set a300, 0");
    let mut asm = Assembler::new("test.s", GpuDevice::CapeVerde, BinaryFormat::Raw);
    asm.assemble(&source);
    let (out, remarks) = asm.finish();
    assert!(out.is_none());
    assert!(remarks.iter().any(|r| matches!(
        r.kind(),
        Some(Error::SemanticError(SemanticError::CircularDependency))
    )));
}

#[test]
fn test_shallow_set_chain_resolves() {
    let mut source = String::new();
    for i in 0..50 {
        let _ = writeln!(source, ".set b{}, b{}+1", i, i + 1);
    }
    let _ = writeln!(source, ".set b50, 0");
    let _ = writeln!(source, "        .int b0");
    let mut asm = Assembler::new("test.s", GpuDevice::CapeVerde, BinaryFormat::Raw);
    asm.assemble(&source);
    let (out, remarks) = asm.finish();
    assert!(
        !remarks.iter().any(|r| r.severity() == Severity::Error),
        "diagnostics: {:?}",
        remarks.iter().map(|r| r.to_string()).collect::<Vec<_>>()
    );
    let out = out.unwrap();
    assert_eq!(crate::support::load_u32(&out.sections[0].bytes, 0), 50);
}
