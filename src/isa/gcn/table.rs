use crate::error::{Error, ParseError, Result};
use crate::isa::gcn::arch::ArchMask;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Encoding families of the GCN ISA.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncKind {
    Sop2,
    Sop1,
    Sopk,
    Sopc,
    Sopp,
    Smrd,
    Vop2,
    Vop1,
    Vopc,
    Vop3A,
    Vop3B,
    Vintrp,
    Ds,
    Mubuf,
    Mtbuf,
    Mimg,
    Exp,
    Flat,
}

/// Per-instruction operand shape, packed into one word so the static
/// table stays flat. Bits 24..30 carry the data-register count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InstrMode(pub u32);

impl InstrMode {
    pub const NONE: u32 = 0;
    pub const DST_64: u32 = 1;
    pub const SRC0_64: u32 = 1 << 1;
    pub const SRC1_64: u32 = 1 << 2;
    pub const SRC2_64: u32 = 1 << 3;
    pub const NO_DST: u32 = 1 << 4;
    pub const NO_SRC: u32 = 1 << 5;
    pub const TYPE_F32: u32 = 1 << 6;
    pub const TYPE_F16: u32 = 1 << 7;
    /// SOPP immediate is a branch displacement in code words.
    pub const IMM_REL: u32 = 1 << 8;
    /// Carry-out through VCC: explicit `vcc` operand after the
    /// destination (SDST field in the extended form).
    pub const VCC_SDST: u32 = 1 << 9;
    /// Carry-in through VCC: trailing `vcc` operand (v_cndmask_b32).
    pub const VCC_READ: u32 = 1 << 10;
    /// Three source operands (extended encodings only).
    pub const HAS_SRC2: u32 = 1 << 11;
    /// SMRD base is a 4-register group instead of a pair.
    pub const SMRD_BASE4: u32 = 1 << 12;
    /// Memory store: the data operand is a source and there is no
    /// destination.
    pub const MEM_STORE: u32 = 1 << 13;
    pub const DS_DATA0: u32 = 1 << 14;
    pub const DS_DATA1: u32 = 1 << 15;
    pub const DS_TWO_OFFSETS: u32 = 1 << 16;
    /// SMRD without the offset operand (s_memtime).
    pub const SMRD_NO_OFFSET: u32 = 1 << 17;

    pub const fn dregs_field(n: u32) -> u32 {
        n << 24
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Data-register count of the memory data operand (1 when the
    /// field is unset).
    pub fn dregs(self) -> u16 {
        let n = (self.0 >> 24) & 0x3f;
        if n == 0 {
            1
        } else {
            n as u16
        }
    }
}

/// One row of the instruction table. `opcode2`/`encoding2` describe the
/// extended (VOP3) form when a compact-form row was fused with it.
#[derive(Clone, Debug)]
pub struct IsaEntry {
    pub mnemonic: &'static str,
    pub encoding1: EncKind,
    pub encoding2: Option<EncKind>,
    pub mode: InstrMode,
    pub opcode1: u16,
    pub opcode2: u16,
    pub arch_mask: ArchMask,
}

pub const NO_OPCODE2: u16 = 0xffff;

struct RawInstr(&'static str, EncKind, u32, u16, u32);

const A_ALL: u32 = 0b111;
const A_10: u32 = 0b001;
const A_11_12: u32 = 0b110;
const A_12: u32 = 0b100;

const M_NONE: u32 = InstrMode::NONE;
const M_D64: u32 = InstrMode::DST_64;
const M_S064: u32 = InstrMode::SRC0_64;
const M_S164: u32 = InstrMode::SRC1_64;
const M_ALL64: u32 = InstrMode::DST_64 | InstrMode::SRC0_64 | InstrMode::SRC1_64;
const M_F32: u32 = InstrMode::TYPE_F32;
const M_F16: u32 = InstrMode::TYPE_F16;
const M_REL: u32 = InstrMode::IMM_REL;
const M_NOOPS: u32 = InstrMode::NO_DST | InstrMode::NO_SRC;
const M_STORE: u32 = InstrMode::MEM_STORE;
const M_SRC2: u32 = InstrMode::HAS_SRC2;

const fn dregs(n: u32) -> u32 {
    InstrMode::dregs_field(n)
}

/// The unsorted instruction table. VOP3 rows carrying the extended
/// opcode of a compact instruction share its mnemonic; the load step
/// fuses them into the compact row's second opcode slot.
#[rustfmt::skip]
static GCN_INSTRS: &[RawInstr] = &[
    // SOP2
    RawInstr("s_add_u32", EncKind::Sop2, M_NONE, 0, A_ALL),
    RawInstr("s_sub_u32", EncKind::Sop2, M_NONE, 1, A_ALL),
    RawInstr("s_add_i32", EncKind::Sop2, M_NONE, 2, A_ALL),
    RawInstr("s_sub_i32", EncKind::Sop2, M_NONE, 3, A_ALL),
    RawInstr("s_addc_u32", EncKind::Sop2, M_NONE, 4, A_ALL),
    RawInstr("s_subb_u32", EncKind::Sop2, M_NONE, 5, A_ALL),
    RawInstr("s_min_i32", EncKind::Sop2, M_NONE, 6, A_ALL),
    RawInstr("s_min_u32", EncKind::Sop2, M_NONE, 7, A_ALL),
    RawInstr("s_max_i32", EncKind::Sop2, M_NONE, 8, A_ALL),
    RawInstr("s_max_u32", EncKind::Sop2, M_NONE, 9, A_ALL),
    RawInstr("s_cselect_b32", EncKind::Sop2, M_NONE, 10, A_ALL),
    RawInstr("s_cselect_b64", EncKind::Sop2, M_ALL64, 11, A_ALL),
    RawInstr("s_and_b32", EncKind::Sop2, M_NONE, 14, A_ALL),
    RawInstr("s_and_b64", EncKind::Sop2, M_ALL64, 15, A_ALL),
    RawInstr("s_or_b32", EncKind::Sop2, M_NONE, 16, A_ALL),
    RawInstr("s_or_b64", EncKind::Sop2, M_ALL64, 17, A_ALL),
    RawInstr("s_xor_b32", EncKind::Sop2, M_NONE, 18, A_ALL),
    RawInstr("s_xor_b64", EncKind::Sop2, M_ALL64, 19, A_ALL),
    RawInstr("s_andn2_b32", EncKind::Sop2, M_NONE, 20, A_ALL),
    RawInstr("s_andn2_b64", EncKind::Sop2, M_ALL64, 21, A_ALL),
    RawInstr("s_orn2_b32", EncKind::Sop2, M_NONE, 22, A_ALL),
    RawInstr("s_orn2_b64", EncKind::Sop2, M_ALL64, 23, A_ALL),
    RawInstr("s_nand_b32", EncKind::Sop2, M_NONE, 24, A_ALL),
    RawInstr("s_nand_b64", EncKind::Sop2, M_ALL64, 25, A_ALL),
    RawInstr("s_nor_b32", EncKind::Sop2, M_NONE, 26, A_ALL),
    RawInstr("s_nor_b64", EncKind::Sop2, M_ALL64, 27, A_ALL),
    RawInstr("s_xnor_b32", EncKind::Sop2, M_NONE, 28, A_ALL),
    RawInstr("s_xnor_b64", EncKind::Sop2, M_ALL64, 29, A_ALL),
    RawInstr("s_lshl_b32", EncKind::Sop2, M_NONE, 30, A_ALL),
    RawInstr("s_lshl_b64", EncKind::Sop2, M_D64 | M_S064, 31, A_ALL),
    RawInstr("s_lshr_b32", EncKind::Sop2, M_NONE, 32, A_ALL),
    RawInstr("s_lshr_b64", EncKind::Sop2, M_D64 | M_S064, 33, A_ALL),
    RawInstr("s_ashr_i32", EncKind::Sop2, M_NONE, 34, A_ALL),
    RawInstr("s_ashr_i64", EncKind::Sop2, M_D64 | M_S064, 35, A_ALL),
    RawInstr("s_bfm_b32", EncKind::Sop2, M_NONE, 36, A_ALL),
    RawInstr("s_mul_i32", EncKind::Sop2, M_NONE, 38, A_ALL),
    RawInstr("s_bfe_u32", EncKind::Sop2, M_NONE, 39, A_ALL),
    RawInstr("s_bfe_i32", EncKind::Sop2, M_NONE, 40, A_ALL),
    RawInstr("s_absdiff_i32", EncKind::Sop2, M_NONE, 44, A_ALL),
    // SOP1
    RawInstr("s_mov_b32", EncKind::Sop1, M_NONE, 0, A_ALL),
    RawInstr("s_mov_b64", EncKind::Sop1, M_D64 | M_S064, 1, A_ALL),
    RawInstr("s_cmov_b32", EncKind::Sop1, M_NONE, 2, A_ALL),
    RawInstr("s_cmov_b64", EncKind::Sop1, M_D64 | M_S064, 3, A_ALL),
    RawInstr("s_not_b32", EncKind::Sop1, M_NONE, 4, A_ALL),
    RawInstr("s_not_b64", EncKind::Sop1, M_D64 | M_S064, 5, A_ALL),
    RawInstr("s_wqm_b32", EncKind::Sop1, M_NONE, 6, A_ALL),
    RawInstr("s_wqm_b64", EncKind::Sop1, M_D64 | M_S064, 7, A_ALL),
    RawInstr("s_brev_b32", EncKind::Sop1, M_NONE, 8, A_ALL),
    RawInstr("s_brev_b64", EncKind::Sop1, M_D64 | M_S064, 9, A_ALL),
    RawInstr("s_bcnt0_i32_b32", EncKind::Sop1, M_NONE, 10, A_ALL),
    RawInstr("s_bcnt0_i32_b64", EncKind::Sop1, M_S064, 11, A_ALL),
    RawInstr("s_bcnt1_i32_b32", EncKind::Sop1, M_NONE, 12, A_ALL),
    RawInstr("s_bcnt1_i32_b64", EncKind::Sop1, M_S064, 13, A_ALL),
    RawInstr("s_ff0_i32_b32", EncKind::Sop1, M_NONE, 14, A_ALL),
    RawInstr("s_ff1_i32_b32", EncKind::Sop1, M_NONE, 16, A_ALL),
    RawInstr("s_flbit_i32_b32", EncKind::Sop1, M_NONE, 18, A_ALL),
    RawInstr("s_sext_i32_i8", EncKind::Sop1, M_NONE, 22, A_ALL),
    RawInstr("s_sext_i32_i16", EncKind::Sop1, M_NONE, 23, A_ALL),
    RawInstr("s_bitset0_b32", EncKind::Sop1, M_NONE, 24, A_ALL),
    RawInstr("s_bitset1_b32", EncKind::Sop1, M_NONE, 26, A_ALL),
    RawInstr("s_getpc_b64", EncKind::Sop1, M_D64 | InstrMode::NO_SRC, 28, A_ALL),
    RawInstr("s_setpc_b64", EncKind::Sop1, M_S064 | InstrMode::NO_DST, 29, A_ALL),
    RawInstr("s_swappc_b64", EncKind::Sop1, M_D64 | M_S064, 30, A_ALL),
    RawInstr("s_rfe_b64", EncKind::Sop1, M_S064 | InstrMode::NO_DST, 31, A_ALL),
    RawInstr("s_and_saveexec_b64", EncKind::Sop1, M_D64 | M_S064, 32, A_ALL),
    RawInstr("s_or_saveexec_b64", EncKind::Sop1, M_D64 | M_S064, 33, A_ALL),
    RawInstr("s_xor_saveexec_b64", EncKind::Sop1, M_D64 | M_S064, 34, A_ALL),
    RawInstr("s_movreld_b32", EncKind::Sop1, M_NONE, 42, A_ALL),
    RawInstr("s_movrels_b32", EncKind::Sop1, M_NONE, 44, A_ALL),
    RawInstr("s_abs_i32", EncKind::Sop1, M_NONE, 48, A_ALL),
    // SOPK
    RawInstr("s_movk_i32", EncKind::Sopk, M_NONE, 0, A_ALL),
    RawInstr("s_cmovk_i32", EncKind::Sopk, M_NONE, 2, A_ALL),
    RawInstr("s_cmpk_eq_i32", EncKind::Sopk, M_NONE, 3, A_ALL),
    RawInstr("s_cmpk_lg_i32", EncKind::Sopk, M_NONE, 4, A_ALL),
    RawInstr("s_cmpk_gt_i32", EncKind::Sopk, M_NONE, 5, A_ALL),
    RawInstr("s_cmpk_ge_i32", EncKind::Sopk, M_NONE, 6, A_ALL),
    RawInstr("s_cmpk_lt_i32", EncKind::Sopk, M_NONE, 7, A_ALL),
    RawInstr("s_cmpk_le_i32", EncKind::Sopk, M_NONE, 8, A_ALL),
    RawInstr("s_cmpk_eq_u32", EncKind::Sopk, M_NONE, 9, A_ALL),
    RawInstr("s_cmpk_lg_u32", EncKind::Sopk, M_NONE, 10, A_ALL),
    RawInstr("s_cmpk_gt_u32", EncKind::Sopk, M_NONE, 11, A_ALL),
    RawInstr("s_cmpk_ge_u32", EncKind::Sopk, M_NONE, 12, A_ALL),
    RawInstr("s_cmpk_lt_u32", EncKind::Sopk, M_NONE, 13, A_ALL),
    RawInstr("s_cmpk_le_u32", EncKind::Sopk, M_NONE, 14, A_ALL),
    RawInstr("s_addk_i32", EncKind::Sopk, M_NONE, 15, A_ALL),
    RawInstr("s_mulk_i32", EncKind::Sopk, M_NONE, 16, A_ALL),
    // SOPC
    RawInstr("s_cmp_eq_i32", EncKind::Sopc, M_NONE, 0, A_ALL),
    RawInstr("s_cmp_lg_i32", EncKind::Sopc, M_NONE, 1, A_ALL),
    RawInstr("s_cmp_gt_i32", EncKind::Sopc, M_NONE, 2, A_ALL),
    RawInstr("s_cmp_ge_i32", EncKind::Sopc, M_NONE, 3, A_ALL),
    RawInstr("s_cmp_lt_i32", EncKind::Sopc, M_NONE, 4, A_ALL),
    RawInstr("s_cmp_le_i32", EncKind::Sopc, M_NONE, 5, A_ALL),
    RawInstr("s_cmp_eq_u32", EncKind::Sopc, M_NONE, 6, A_ALL),
    RawInstr("s_cmp_lg_u32", EncKind::Sopc, M_NONE, 7, A_ALL),
    RawInstr("s_cmp_gt_u32", EncKind::Sopc, M_NONE, 8, A_ALL),
    RawInstr("s_cmp_ge_u32", EncKind::Sopc, M_NONE, 9, A_ALL),
    RawInstr("s_cmp_lt_u32", EncKind::Sopc, M_NONE, 10, A_ALL),
    RawInstr("s_cmp_le_u32", EncKind::Sopc, M_NONE, 11, A_ALL),
    RawInstr("s_bitcmp0_b32", EncKind::Sopc, M_NONE, 12, A_ALL),
    RawInstr("s_bitcmp1_b32", EncKind::Sopc, M_NONE, 13, A_ALL),
    // SOPP
    RawInstr("s_nop", EncKind::Sopp, M_NONE, 0, A_ALL),
    RawInstr("s_endpgm", EncKind::Sopp, M_NOOPS, 1, A_ALL),
    RawInstr("s_branch", EncKind::Sopp, M_REL, 2, A_ALL),
    RawInstr("s_cbranch_scc0", EncKind::Sopp, M_REL, 4, A_ALL),
    RawInstr("s_cbranch_scc1", EncKind::Sopp, M_REL, 5, A_ALL),
    RawInstr("s_cbranch_vccz", EncKind::Sopp, M_REL, 6, A_ALL),
    RawInstr("s_cbranch_vccnz", EncKind::Sopp, M_REL, 7, A_ALL),
    RawInstr("s_cbranch_execz", EncKind::Sopp, M_REL, 8, A_ALL),
    RawInstr("s_cbranch_execnz", EncKind::Sopp, M_REL, 9, A_ALL),
    RawInstr("s_barrier", EncKind::Sopp, M_NOOPS, 10, A_ALL),
    RawInstr("s_waitcnt", EncKind::Sopp, M_NONE, 12, A_ALL),
    RawInstr("s_sethalt", EncKind::Sopp, M_NONE, 13, A_ALL),
    RawInstr("s_sleep", EncKind::Sopp, M_NONE, 14, A_ALL),
    RawInstr("s_setprio", EncKind::Sopp, M_NONE, 15, A_ALL),
    RawInstr("s_trap", EncKind::Sopp, M_NONE, 18, A_ALL),
    RawInstr("s_icache_inv", EncKind::Sopp, M_NOOPS, 19, A_ALL),
    RawInstr("s_incperflevel", EncKind::Sopp, M_NONE, 20, A_ALL),
    RawInstr("s_decperflevel", EncKind::Sopp, M_NONE, 21, A_ALL),
    RawInstr("s_ttracedata", EncKind::Sopp, M_NOOPS, 22, A_ALL),
    // SMRD
    RawInstr("s_load_dword", EncKind::Smrd, M_NONE, 0, A_ALL),
    RawInstr("s_load_dwordx2", EncKind::Smrd, dregs(2), 1, A_ALL),
    RawInstr("s_load_dwordx4", EncKind::Smrd, dregs(4), 2, A_ALL),
    RawInstr("s_load_dwordx8", EncKind::Smrd, dregs(8), 3, A_ALL),
    RawInstr("s_load_dwordx16", EncKind::Smrd, dregs(16), 4, A_ALL),
    RawInstr("s_buffer_load_dword", EncKind::Smrd, InstrMode::SMRD_BASE4, 8, A_ALL),
    RawInstr("s_buffer_load_dwordx2", EncKind::Smrd, InstrMode::SMRD_BASE4 | dregs(2), 9, A_ALL),
    RawInstr("s_buffer_load_dwordx4", EncKind::Smrd, InstrMode::SMRD_BASE4 | dregs(4), 10, A_ALL),
    RawInstr("s_buffer_load_dwordx8", EncKind::Smrd, InstrMode::SMRD_BASE4 | dregs(8), 11, A_ALL),
    RawInstr("s_buffer_load_dwordx16", EncKind::Smrd, InstrMode::SMRD_BASE4 | dregs(16), 12, A_ALL),
    RawInstr("s_memtime", EncKind::Smrd, dregs(2) | InstrMode::SMRD_NO_OFFSET, 30, A_ALL),
    RawInstr("s_dcache_inv", EncKind::Smrd, M_NOOPS, 31, A_ALL),
    // VOP2 and their VOP3 forms
    RawInstr("v_cndmask_b32", EncKind::Vop2, InstrMode::VCC_READ, 0, A_ALL),
    RawInstr("v_cndmask_b32", EncKind::Vop3A, InstrMode::VCC_READ, 0x100, A_ALL),
    RawInstr("v_add_f32", EncKind::Vop2, M_F32, 3, A_ALL),
    RawInstr("v_add_f32", EncKind::Vop3A, M_F32, 0x103, A_ALL),
    RawInstr("v_sub_f32", EncKind::Vop2, M_F32, 4, A_ALL),
    RawInstr("v_sub_f32", EncKind::Vop3A, M_F32, 0x104, A_ALL),
    RawInstr("v_subrev_f32", EncKind::Vop2, M_F32, 5, A_ALL),
    RawInstr("v_subrev_f32", EncKind::Vop3A, M_F32, 0x105, A_ALL),
    RawInstr("v_mul_f32", EncKind::Vop2, M_F32, 8, A_ALL),
    RawInstr("v_mul_f32", EncKind::Vop3A, M_F32, 0x108, A_ALL),
    RawInstr("v_mul_i32_i24", EncKind::Vop2, M_NONE, 9, A_ALL),
    RawInstr("v_mul_i32_i24", EncKind::Vop3A, M_NONE, 0x109, A_ALL),
    RawInstr("v_min_f32", EncKind::Vop2, M_F32, 15, A_ALL),
    RawInstr("v_min_f32", EncKind::Vop3A, M_F32, 0x10f, A_ALL),
    RawInstr("v_max_f32", EncKind::Vop2, M_F32, 16, A_ALL),
    RawInstr("v_max_f32", EncKind::Vop3A, M_F32, 0x110, A_ALL),
    RawInstr("v_min_i32", EncKind::Vop2, M_NONE, 17, A_ALL),
    RawInstr("v_min_i32", EncKind::Vop3A, M_NONE, 0x111, A_ALL),
    RawInstr("v_max_i32", EncKind::Vop2, M_NONE, 18, A_ALL),
    RawInstr("v_max_i32", EncKind::Vop3A, M_NONE, 0x112, A_ALL),
    RawInstr("v_min_u32", EncKind::Vop2, M_NONE, 19, A_ALL),
    RawInstr("v_min_u32", EncKind::Vop3A, M_NONE, 0x113, A_ALL),
    RawInstr("v_max_u32", EncKind::Vop2, M_NONE, 20, A_ALL),
    RawInstr("v_max_u32", EncKind::Vop3A, M_NONE, 0x114, A_ALL),
    RawInstr("v_lshrrev_b32", EncKind::Vop2, M_NONE, 22, A_ALL),
    RawInstr("v_lshrrev_b32", EncKind::Vop3A, M_NONE, 0x116, A_ALL),
    RawInstr("v_ashrrev_i32", EncKind::Vop2, M_NONE, 24, A_ALL),
    RawInstr("v_ashrrev_i32", EncKind::Vop3A, M_NONE, 0x118, A_ALL),
    RawInstr("v_lshlrev_b32", EncKind::Vop2, M_NONE, 26, A_ALL),
    RawInstr("v_lshlrev_b32", EncKind::Vop3A, M_NONE, 0x11a, A_ALL),
    RawInstr("v_and_b32", EncKind::Vop2, M_NONE, 27, A_ALL),
    RawInstr("v_and_b32", EncKind::Vop3A, M_NONE, 0x11b, A_ALL),
    RawInstr("v_or_b32", EncKind::Vop2, M_NONE, 28, A_ALL),
    RawInstr("v_or_b32", EncKind::Vop3A, M_NONE, 0x11c, A_ALL),
    RawInstr("v_xor_b32", EncKind::Vop2, M_NONE, 29, A_ALL),
    RawInstr("v_xor_b32", EncKind::Vop3A, M_NONE, 0x11d, A_ALL),
    RawInstr("v_mac_f32", EncKind::Vop2, M_F32, 31, A_ALL),
    RawInstr("v_mac_f32", EncKind::Vop3A, M_F32, 0x11f, A_ALL),
    RawInstr("v_add_i32", EncKind::Vop2, InstrMode::VCC_SDST, 37, A_ALL),
    RawInstr("v_add_i32", EncKind::Vop3B, InstrMode::VCC_SDST, 0x125, A_ALL),
    RawInstr("v_sub_i32", EncKind::Vop2, InstrMode::VCC_SDST, 38, A_ALL),
    RawInstr("v_sub_i32", EncKind::Vop3B, InstrMode::VCC_SDST, 0x126, A_ALL),
    RawInstr("v_subrev_i32", EncKind::Vop2, InstrMode::VCC_SDST, 39, A_ALL),
    RawInstr("v_subrev_i32", EncKind::Vop3B, InstrMode::VCC_SDST, 0x127, A_ALL),
    RawInstr("v_add_f16", EncKind::Vop2, M_F16, 0x1f, A_12),
    RawInstr("v_mul_f16", EncKind::Vop2, M_F16, 0x22, A_12),
    // VOP1 and their VOP3 forms
    RawInstr("v_nop", EncKind::Vop1, M_NOOPS, 0, A_ALL),
    RawInstr("v_mov_b32", EncKind::Vop1, M_NONE, 1, A_ALL),
    RawInstr("v_mov_b32", EncKind::Vop3A, M_NONE, 0x181, A_ALL),
    RawInstr("v_cvt_f32_i32", EncKind::Vop1, M_NONE, 5, A_ALL),
    RawInstr("v_cvt_f32_i32", EncKind::Vop3A, M_NONE, 0x185, A_ALL),
    RawInstr("v_cvt_f32_u32", EncKind::Vop1, M_NONE, 6, A_ALL),
    RawInstr("v_cvt_f32_u32", EncKind::Vop3A, M_NONE, 0x186, A_ALL),
    RawInstr("v_cvt_u32_f32", EncKind::Vop1, M_F32, 7, A_ALL),
    RawInstr("v_cvt_u32_f32", EncKind::Vop3A, M_F32, 0x187, A_ALL),
    RawInstr("v_cvt_i32_f32", EncKind::Vop1, M_F32, 8, A_ALL),
    RawInstr("v_cvt_i32_f32", EncKind::Vop3A, M_F32, 0x188, A_ALL),
    RawInstr("v_cvt_f16_f32", EncKind::Vop1, M_F32, 10, A_ALL),
    RawInstr("v_cvt_f32_f16", EncKind::Vop1, M_F16, 11, A_ALL),
    RawInstr("v_cvt_f32_f64", EncKind::Vop1, M_S064, 15, A_ALL),
    RawInstr("v_cvt_f64_f32", EncKind::Vop1, M_D64 | M_F32, 16, A_ALL),
    RawInstr("v_fract_f32", EncKind::Vop1, M_F32, 32, A_ALL),
    RawInstr("v_fract_f32", EncKind::Vop3A, M_F32, 0x1a0, A_ALL),
    RawInstr("v_trunc_f32", EncKind::Vop1, M_F32, 33, A_ALL),
    RawInstr("v_trunc_f32", EncKind::Vop3A, M_F32, 0x1a1, A_ALL),
    RawInstr("v_ceil_f32", EncKind::Vop1, M_F32, 34, A_ALL),
    RawInstr("v_rndne_f32", EncKind::Vop1, M_F32, 35, A_ALL),
    RawInstr("v_floor_f32", EncKind::Vop1, M_F32, 36, A_ALL),
    RawInstr("v_exp_f32", EncKind::Vop1, M_F32, 37, A_ALL),
    RawInstr("v_log_f32", EncKind::Vop1, M_F32, 39, A_ALL),
    RawInstr("v_rcp_f32", EncKind::Vop1, M_F32, 42, A_ALL),
    RawInstr("v_rsq_f32", EncKind::Vop1, M_F32, 46, A_ALL),
    RawInstr("v_sqrt_f32", EncKind::Vop1, M_F32, 51, A_ALL),
    RawInstr("v_sin_f32", EncKind::Vop1, M_F32, 53, A_ALL),
    RawInstr("v_cos_f32", EncKind::Vop1, M_F32, 54, A_ALL),
    RawInstr("v_not_b32", EncKind::Vop1, M_NONE, 55, A_ALL),
    RawInstr("v_bfrev_b32", EncKind::Vop1, M_NONE, 56, A_ALL),
    RawInstr("v_ffbh_u32", EncKind::Vop1, M_NONE, 57, A_ALL),
    // VOPC and their VOP3 forms (same opcode value)
    RawInstr("v_cmp_f_f32", EncKind::Vopc, M_F32, 0x00, A_ALL),
    RawInstr("v_cmp_f_f32", EncKind::Vop3A, M_F32, 0x00, A_ALL),
    RawInstr("v_cmp_lt_f32", EncKind::Vopc, M_F32, 0x01, A_ALL),
    RawInstr("v_cmp_lt_f32", EncKind::Vop3A, M_F32, 0x01, A_ALL),
    RawInstr("v_cmp_eq_f32", EncKind::Vopc, M_F32, 0x02, A_ALL),
    RawInstr("v_cmp_eq_f32", EncKind::Vop3A, M_F32, 0x02, A_ALL),
    RawInstr("v_cmp_le_f32", EncKind::Vopc, M_F32, 0x03, A_ALL),
    RawInstr("v_cmp_le_f32", EncKind::Vop3A, M_F32, 0x03, A_ALL),
    RawInstr("v_cmp_gt_f32", EncKind::Vopc, M_F32, 0x04, A_ALL),
    RawInstr("v_cmp_gt_f32", EncKind::Vop3A, M_F32, 0x04, A_ALL),
    RawInstr("v_cmp_lg_f32", EncKind::Vopc, M_F32, 0x05, A_ALL),
    RawInstr("v_cmp_lg_f32", EncKind::Vop3A, M_F32, 0x05, A_ALL),
    RawInstr("v_cmp_ge_f32", EncKind::Vopc, M_F32, 0x06, A_ALL),
    RawInstr("v_cmp_ge_f32", EncKind::Vop3A, M_F32, 0x06, A_ALL),
    RawInstr("v_cmp_f_i32", EncKind::Vopc, M_NONE, 0x80, A_ALL),
    RawInstr("v_cmp_f_i32", EncKind::Vop3A, M_NONE, 0x80, A_ALL),
    RawInstr("v_cmp_lt_i32", EncKind::Vopc, M_NONE, 0x81, A_ALL),
    RawInstr("v_cmp_lt_i32", EncKind::Vop3A, M_NONE, 0x81, A_ALL),
    RawInstr("v_cmp_eq_i32", EncKind::Vopc, M_NONE, 0x82, A_ALL),
    RawInstr("v_cmp_eq_i32", EncKind::Vop3A, M_NONE, 0x82, A_ALL),
    RawInstr("v_cmp_le_i32", EncKind::Vopc, M_NONE, 0x83, A_ALL),
    RawInstr("v_cmp_le_i32", EncKind::Vop3A, M_NONE, 0x83, A_ALL),
    RawInstr("v_cmp_gt_i32", EncKind::Vopc, M_NONE, 0x84, A_ALL),
    RawInstr("v_cmp_gt_i32", EncKind::Vop3A, M_NONE, 0x84, A_ALL),
    RawInstr("v_cmp_ne_i32", EncKind::Vopc, M_NONE, 0x85, A_ALL),
    RawInstr("v_cmp_ne_i32", EncKind::Vop3A, M_NONE, 0x85, A_ALL),
    RawInstr("v_cmp_ge_i32", EncKind::Vopc, M_NONE, 0x86, A_ALL),
    RawInstr("v_cmp_ge_i32", EncKind::Vop3A, M_NONE, 0x86, A_ALL),
    RawInstr("v_cmp_lt_u32", EncKind::Vopc, M_NONE, 0xc1, A_ALL),
    RawInstr("v_cmp_lt_u32", EncKind::Vop3A, M_NONE, 0xc1, A_ALL),
    RawInstr("v_cmp_eq_u32", EncKind::Vopc, M_NONE, 0xc2, A_ALL),
    RawInstr("v_cmp_eq_u32", EncKind::Vop3A, M_NONE, 0xc2, A_ALL),
    RawInstr("v_cmp_ne_u32", EncKind::Vopc, M_NONE, 0xc5, A_ALL),
    RawInstr("v_cmp_ne_u32", EncKind::Vop3A, M_NONE, 0xc5, A_ALL),
    RawInstr("v_cmp_ge_u32", EncKind::Vopc, M_NONE, 0xc6, A_ALL),
    RawInstr("v_cmp_ge_u32", EncKind::Vop3A, M_NONE, 0xc6, A_ALL),
    // VOP3-only
    RawInstr("v_mad_f32", EncKind::Vop3A, M_F32 | M_SRC2, 0x141, A_ALL),
    RawInstr("v_fma_f32", EncKind::Vop3A, M_F32 | M_SRC2, 0x14b, A_ALL),
    RawInstr("v_min3_f32", EncKind::Vop3A, M_F32 | M_SRC2, 0x151, A_ALL),
    RawInstr("v_max3_f32", EncKind::Vop3A, M_F32 | M_SRC2, 0x152, A_ALL),
    RawInstr("v_med3_f32", EncKind::Vop3A, M_F32 | M_SRC2, 0x153, A_ALL),
    RawInstr("v_lshl_b64", EncKind::Vop3A, M_D64 | M_S064, 0x161, A_ALL),
    RawInstr("v_lshr_b64", EncKind::Vop3A, M_D64 | M_S064, 0x162, A_ALL),
    RawInstr("v_ashr_i64", EncKind::Vop3A, M_D64 | M_S064, 0x163, A_ALL),
    RawInstr("v_add_f64", EncKind::Vop3A, M_ALL64, 0x164, A_ALL),
    RawInstr("v_mul_f64", EncKind::Vop3A, M_ALL64, 0x165, A_ALL),
    RawInstr("v_min_f64", EncKind::Vop3A, M_ALL64, 0x166, A_ALL),
    RawInstr("v_max_f64", EncKind::Vop3A, M_ALL64, 0x167, A_ALL),
    RawInstr("v_mul_lo_u32", EncKind::Vop3A, M_NONE, 0x169, A_ALL),
    RawInstr("v_mul_hi_u32", EncKind::Vop3A, M_NONE, 0x16a, A_ALL),
    RawInstr("v_mul_lo_i32", EncKind::Vop3A, M_NONE, 0x16b, A_ALL),
    RawInstr("v_div_scale_f32", EncKind::Vop3B, M_F32 | M_SRC2 | InstrMode::VCC_SDST, 0x16d, A_ALL),
    // VINTRP
    RawInstr("v_interp_p1_f32", EncKind::Vintrp, M_NONE, 0, A_ALL),
    RawInstr("v_interp_p2_f32", EncKind::Vintrp, M_NONE, 1, A_ALL),
    RawInstr("v_interp_mov_f32", EncKind::Vintrp, M_NONE, 2, A_ALL),
    // DS
    RawInstr("ds_add_u32", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 0, A_ALL),
    RawInstr("ds_sub_u32", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 1, A_ALL),
    RawInstr("ds_min_u32", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 6, A_ALL),
    RawInstr("ds_max_u32", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 7, A_ALL),
    RawInstr("ds_write_b32", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 13, A_ALL),
    RawInstr("ds_write2_b32", EncKind::Ds,
        InstrMode::DS_DATA0 | InstrMode::DS_DATA1 | InstrMode::DS_TWO_OFFSETS | M_STORE, 14, A_ALL),
    RawInstr("ds_write_b8", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 30, A_ALL),
    RawInstr("ds_write_b16", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE, 31, A_ALL),
    RawInstr("ds_read_b32", EncKind::Ds, M_NONE, 54, A_ALL),
    RawInstr("ds_read2_b32", EncKind::Ds, InstrMode::DS_TWO_OFFSETS | dregs(2), 55, A_ALL),
    RawInstr("ds_read_i8", EncKind::Ds, M_NONE, 57, A_ALL),
    RawInstr("ds_read_u8", EncKind::Ds, M_NONE, 58, A_ALL),
    RawInstr("ds_read_i16", EncKind::Ds, M_NONE, 59, A_ALL),
    RawInstr("ds_read_u16", EncKind::Ds, M_NONE, 60, A_ALL),
    RawInstr("ds_write_b64", EncKind::Ds, InstrMode::DS_DATA0 | M_STORE | dregs(2), 77, A_ALL),
    RawInstr("ds_read_b64", EncKind::Ds, dregs(2), 118, A_ALL),
    // MUBUF
    RawInstr("buffer_load_format_x", EncKind::Mubuf, M_NONE, 0, A_ALL),
    RawInstr("buffer_load_ubyte", EncKind::Mubuf, M_NONE, 8, A_ALL),
    RawInstr("buffer_load_sbyte", EncKind::Mubuf, M_NONE, 9, A_ALL),
    RawInstr("buffer_load_ushort", EncKind::Mubuf, M_NONE, 10, A_ALL),
    RawInstr("buffer_load_sshort", EncKind::Mubuf, M_NONE, 11, A_ALL),
    RawInstr("buffer_load_dword", EncKind::Mubuf, M_NONE, 12, A_ALL),
    RawInstr("buffer_load_dwordx2", EncKind::Mubuf, dregs(2), 13, A_ALL),
    RawInstr("buffer_load_dwordx4", EncKind::Mubuf, dregs(4), 14, A_ALL),
    RawInstr("buffer_store_byte", EncKind::Mubuf, M_STORE, 24, A_ALL),
    RawInstr("buffer_store_short", EncKind::Mubuf, M_STORE, 26, A_ALL),
    RawInstr("buffer_store_dword", EncKind::Mubuf, M_STORE, 28, A_ALL),
    RawInstr("buffer_store_dwordx2", EncKind::Mubuf, M_STORE | dregs(2), 29, A_ALL),
    RawInstr("buffer_store_dwordx4", EncKind::Mubuf, M_STORE | dregs(4), 30, A_ALL),
    RawInstr("buffer_atomic_swap", EncKind::Mubuf, M_STORE, 48, A_ALL),
    RawInstr("buffer_atomic_add", EncKind::Mubuf, M_STORE, 50, A_ALL),
    // MTBUF
    RawInstr("tbuffer_load_format_x", EncKind::Mtbuf, M_NONE, 0, A_ALL),
    RawInstr("tbuffer_load_format_xy", EncKind::Mtbuf, dregs(2), 1, A_ALL),
    RawInstr("tbuffer_load_format_xyz", EncKind::Mtbuf, dregs(3), 2, A_ALL),
    RawInstr("tbuffer_load_format_xyzw", EncKind::Mtbuf, dregs(4), 3, A_ALL),
    RawInstr("tbuffer_store_format_x", EncKind::Mtbuf, M_STORE, 4, A_ALL),
    RawInstr("tbuffer_store_format_xy", EncKind::Mtbuf, M_STORE | dregs(2), 5, A_ALL),
    RawInstr("tbuffer_store_format_xyzw", EncKind::Mtbuf, M_STORE | dregs(4), 7, A_ALL),
    // MIMG
    RawInstr("image_load", EncKind::Mimg, M_NONE, 0, A_ALL),
    RawInstr("image_store", EncKind::Mimg, M_STORE, 8, A_ALL),
    RawInstr("image_get_resinfo", EncKind::Mimg, M_NONE, 14, A_ALL),
    RawInstr("image_sample", EncKind::Mimg, M_NONE, 32, A_ALL),
    // EXP
    RawInstr("exp", EncKind::Exp, M_NONE, 0, A_ALL),
    // FLAT (no flat addressing on GCN 1.0)
    RawInstr("flat_load_ubyte", EncKind::Flat, M_NONE, 8, A_11_12),
    RawInstr("flat_load_sbyte", EncKind::Flat, M_NONE, 9, A_11_12),
    RawInstr("flat_load_ushort", EncKind::Flat, M_NONE, 10, A_11_12),
    RawInstr("flat_load_sshort", EncKind::Flat, M_NONE, 11, A_11_12),
    RawInstr("flat_load_dword", EncKind::Flat, M_NONE, 12, A_11_12),
    RawInstr("flat_load_dwordx2", EncKind::Flat, dregs(2), 13, A_11_12),
    RawInstr("flat_load_dwordx4", EncKind::Flat, dregs(4), 14, A_11_12),
    RawInstr("flat_store_byte", EncKind::Flat, M_STORE, 24, A_11_12),
    RawInstr("flat_store_short", EncKind::Flat, M_STORE, 26, A_11_12),
    RawInstr("flat_store_dword", EncKind::Flat, M_STORE, 28, A_11_12),
    RawInstr("flat_store_dwordx2", EncKind::Flat, M_STORE | dregs(2), 29, A_11_12),
    RawInstr("flat_store_dwordx4", EncKind::Flat, M_STORE | dregs(4), 30, A_11_12),
    RawInstr("flat_atomic_swap", EncKind::Flat, M_STORE, 48, A_11_12),
    RawInstr("flat_atomic_add", EncKind::Flat, M_STORE, 50, A_11_12),
    // arch-split example: s_cmp_eq_u64 exists from GCN 1.2 on
    RawInstr("s_cmp_eq_u64", EncKind::Sopc, M_S064 | M_S164, 18, A_12),
    RawInstr("s_cmp_lg_u64", EncKind::Sopc, M_S064 | M_S164, 19, A_12),
];

/// Sorted, fused instruction table. One per process for the built-in
/// ISA; tests build private tables to cover rare architectures.
pub struct IsaTable {
    entries: Vec<IsaEntry>,
}

static GLOBAL_TABLE: OnceLock<IsaTable> = OnceLock::new();

impl IsaTable {
    pub fn global() -> &'static IsaTable {
        GLOBAL_TABLE.get_or_init(|| IsaTable::build(GCN_INSTRS))
    }

    fn build(raw: &[RawInstr]) -> IsaTable {
        let mut entries: Vec<IsaEntry> = raw
            .iter()
            .map(|r| IsaEntry {
                mnemonic: r.0,
                encoding1: r.1,
                encoding2: None,
                mode: InstrMode(r.2),
                opcode1: r.3,
                opcode2: NO_OPCODE2,
                arch_mask: ArchMask::from_bits_truncate(r.4),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.mnemonic
                .cmp(b.mnemonic)
                .then(a.encoding1.cmp(&b.encoding1))
                .then(a.arch_mask.bits().cmp(&b.arch_mask.bits()))
        });

        // Join VOP3 rows with their VOP2/VOPC/VOP1 partner so one lookup
        // yields both encodings of a mnemonic.
        let mut fused: Vec<IsaEntry> = Vec::with_capacity(entries.len());
        for insn in entries.into_iter() {
            if matches!(insn.encoding1, EncKind::Vop3A | EncKind::Vop3B) {
                let partner = fused.iter().rposition(|prev| {
                    prev.mnemonic == insn.mnemonic
                        && !matches!(prev.encoding1, EncKind::Vop3A | EncKind::Vop3B)
                        && prev.arch_mask & insn.arch_mask == insn.arch_mask
                });
                match partner {
                    Some(i) if fused[i].opcode2 == NO_OPCODE2 => {
                        fused[i].opcode2 = insn.opcode1;
                        fused[i].encoding2 = Some(insn.encoding1);
                        fused[i].arch_mask &= insn.arch_mask;
                    }
                    Some(i) => {
                        // both slots busy: append a duplicate row with
                        // the same compact opcode and the new extended one
                        let mut dup = fused[i].clone();
                        dup.arch_mask &= insn.arch_mask;
                        dup.encoding2 = Some(insn.encoding1);
                        dup.opcode2 = insn.opcode1;
                        fused.push(dup);
                    }
                    None => fused.push(insn),
                }
            } else {
                fused.push(insn);
            }
        }
        IsaTable { entries: fused }
    }

    /// Build a table from explicit rows. The assembler normally runs on
    /// [`IsaTable::global`]; tests inject alternate tables through here.
    pub fn from_entries(mut entries: Vec<IsaEntry>) -> IsaTable {
        entries.sort_by(|a, b| {
            a.mnemonic
                .cmp(b.mnemonic)
                .then(a.encoding1.cmp(&b.encoding1))
                .then(a.arch_mask.bits().cmp(&b.arch_mask.bits()))
        });
        IsaTable { entries }
    }

    pub fn entries(&self) -> &[IsaEntry] {
        self.entries.as_slice()
    }

    /// Binary search by mnemonic, then a forward scan over the
    /// equal-mnemonic run skipping rows foreign to the current
    /// architecture.
    pub fn lookup(&self, mnemonic: &str, arch_bit: ArchMask) -> Result<&IsaEntry> {
        let start = self
            .entries
            .partition_point(|e| e.mnemonic < mnemonic);
        self.entries[start..]
            .iter()
            .take_while(|e| e.mnemonic == mnemonic)
            .find(|e| e.arch_mask.intersects(arch_bit))
            .ok_or(Error::ParseError(ParseError::UnknownMnemonic))
    }

    pub fn has_mnemonic(&self, mnemonic: &str) -> bool {
        let start = self.entries.partition_point(|e| e.mnemonic < mnemonic);
        self.entries
            .get(start)
            .map(|e| e.mnemonic == mnemonic)
            .unwrap_or(false)
    }

    /// Reverse index for the decoder: (family, opcode) to table row,
    /// filtered to one architecture. Extended opcode slots are indexed
    /// under their own family.
    pub fn decode_index(&self, arch_bit: ArchMask) -> HashMap<(EncKind, u16), &IsaEntry> {
        let mut map = HashMap::new();
        for e in self.entries.iter().filter(|e| e.arch_mask.intersects(arch_bit)) {
            map.entry((e.encoding1, e.opcode1)).or_insert(e);
            if let Some(enc2) = e.encoding2 {
                map.entry((enc2, e.opcode2)).or_insert(e);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_fused() {
        let table = IsaTable::global();
        let entries = table.entries();
        for w in entries.windows(2) {
            assert!(w[0].mnemonic <= w[1].mnemonic);
        }
        // v_add_f32 has its VOP3A opcode fused into the VOP2 row
        let e = table.lookup("v_add_f32", ArchMask::GCN1_0).unwrap();
        assert_eq!(e.encoding1, EncKind::Vop2);
        assert_eq!(e.opcode1, 3);
        assert_eq!(e.encoding2, Some(EncKind::Vop3A));
        assert_eq!(e.opcode2, 0x103);
        // VOP3-only rows stay standalone
        let e = table.lookup("v_mad_f32", ArchMask::GCN1_0).unwrap();
        assert_eq!(e.encoding1, EncKind::Vop3A);
        assert_eq!(e.opcode2, NO_OPCODE2);
    }

    #[test]
    fn test_lookup_filters_by_arch() {
        let table = IsaTable::global();
        assert!(table.lookup("flat_load_dword", ArchMask::GCN1_0).is_err());
        let e = table.lookup("flat_load_dword", ArchMask::GCN1_1).unwrap();
        assert_eq!(e.encoding1, EncKind::Flat);
        assert!(table.lookup("s_cmp_eq_u64", ArchMask::GCN1_1).is_err());
        assert!(table.lookup("s_cmp_eq_u64", ArchMask::GCN1_2).is_ok());
        assert!(matches!(
            table.lookup("s_bogus_op", ArchMask::GCN1_0),
            Err(Error::ParseError(ParseError::UnknownMnemonic))
        ));
    }

    #[test]
    fn test_fixture_opcodes() {
        let table = IsaTable::global();
        assert_eq!(table.lookup("s_mov_b32", ArchMask::GCN1_0).unwrap().opcode1, 0);
        assert_eq!(table.lookup("s_endpgm", ArchMask::GCN1_0).unwrap().opcode1, 1);
        assert_eq!(table.lookup("s_nop", ArchMask::GCN1_2).unwrap().opcode1, 0);
    }

    #[test]
    fn test_decode_index_covers_both_slots() {
        let table = IsaTable::global();
        let idx = table.decode_index(ArchMask::GCN1_0);
        let compact = idx.get(&(EncKind::Vop2, 3)).unwrap();
        let extended = idx.get(&(EncKind::Vop3A, 0x103)).unwrap();
        assert_eq!(compact.mnemonic, "v_add_f32");
        assert_eq!(extended.mnemonic, "v_add_f32");
        assert!(!idx.contains_key(&(EncKind::Flat, 12)));
    }
}
