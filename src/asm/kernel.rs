use crate::error::{Error, ParseError, Result};
use crate::isa::gcn::Arch;
use crate::support::{store_u16, store_u32, store_u64};
use bitfield::bitfield;

pub const KERNEL_DESCRIPTOR_SIZE: usize = 256;
pub const CONTROL_DIRECTIVE_SIZE: usize = 128;

static_assertions::const_assert_eq!(128 + CONTROL_DIRECTIVE_SIZE, KERNEL_DESCRIPTOR_SIZE);

bitfield! {
    struct PgmRsrc1(u32);
    _, set_vgpr_blocks: 5, 0;
    _, set_sgpr_blocks: 9, 6;
    _, set_float_mode: 19, 12;
    _, set_priv_mode: 20, 20;
    _, set_dx10_clamp: 21, 21;
}

bitfield! {
    struct PgmRsrc2(u32);
    _, set_scratch_en: 0, 0;
    _, set_user_sgpr_count: 5, 1;
    _, set_tgid_x_en: 7, 7;
    _, set_excp_en: 30, 24;
}

/// Offset of the kernel's machine code from the start of its
/// descriptor.
const CODE_ENTRY_OFFSET: u64 = 256;

/// Raw configuration accumulated from `.config` keys. Unset fields keep
/// the format defaults; the 256-byte descriptor is derived at
/// finalization when the register usage is known.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub code_version: (u32, u32),
    pub call_convention: u32,
    pub debug_private_segment_buffer_sgpr: u16,
    pub debug_wavefront_private_segment_offset_sgpr: u16,
    pub gds_segment_size: u32,
    pub kernarg_segment_align: u64,
    pub workgroup_group_segment_size: u32,
    pub workgroup_fbarrier_count: u32,
    pub dx10_clamp: bool,
    pub exceptions: u8,
    pub private_segment_align: u64,
    pub priv_mode: bool,
    pub reserved_sgpr_first: u16,
    pub reserved_sgpr_count: u16,
    pub reserved_vgpr_first: u16,
    pub reserved_vgpr_count: u16,
    pub runtime_loader_kernel_symbol: u64,
    pub scratch_buffer_size: u32,
    pub use_kernarg_segment_ptr: bool,
    pub private_elem_size: Option<u8>,
    pub fkernel: bool,
}

impl Default for KernelConfig {
    fn default() -> KernelConfig {
        KernelConfig {
            code_version: (1, 0),
            call_convention: 0,
            debug_private_segment_buffer_sgpr: 0,
            debug_wavefront_private_segment_offset_sgpr: 0,
            gds_segment_size: 0,
            kernarg_segment_align: 16,
            workgroup_group_segment_size: 0,
            workgroup_fbarrier_count: 0,
            dx10_clamp: false,
            exceptions: 0,
            private_segment_align: 16,
            priv_mode: false,
            reserved_sgpr_first: 0,
            reserved_sgpr_count: 0,
            reserved_vgpr_first: 0,
            reserved_vgpr_count: 0,
            runtime_loader_kernel_symbol: 0,
            scratch_buffer_size: 0,
            use_kernarg_segment_ptr: false,
            private_elem_size: None,
            fkernel: false,
        }
    }
}

fn log2_align(v: u64) -> u8 {
    if v <= 16 {
        4
    } else {
        63 - v.leading_zeros() as u8
    }
}

impl KernelConfig {
    /// Apply one `.config` key. `values` holds the evaluated numeric
    /// arguments (flag keys take none). Returns a note when a value was
    /// truncated to its field width.
    pub fn set(&mut self, key: &str, values: &[u64]) -> Result<Option<&'static str>> {
        let one = || -> Result<u64> {
            values
                .first()
                .copied()
                .ok_or(Error::ParseError(ParseError::MissingNumber))
        };
        let mut note = None;
        match key {
            "codeversion" => {
                if values.len() != 2 {
                    return Err(Error::ParseError(ParseError::MissingNumber));
                }
                self.code_version = (values[0] as u32, values[1] as u32);
            }
            "call_convention" => self.call_convention = one()? as u32,
            "debug_private_segment_buffer_sgpr" => {
                let v = one()?;
                if v > u16::MAX as u64 {
                    note = Some("value truncated to 16 bits");
                }
                self.debug_private_segment_buffer_sgpr = v as u16;
            }
            "debug_wavefront_private_segment_offset_sgpr" => {
                let v = one()?;
                if v > u16::MAX as u64 {
                    note = Some("value truncated to 16 bits");
                }
                self.debug_wavefront_private_segment_offset_sgpr = v as u16;
            }
            "gds_segment_size" => self.gds_segment_size = one()? as u32,
            "kernarg_segment_align" => {
                let v = one()?;
                if !v.is_power_of_two() {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                self.kernarg_segment_align = v;
            }
            "workgroup_group_segment_size" => self.workgroup_group_segment_size = one()? as u32,
            "workgroup_fbarrier_count" => self.workgroup_fbarrier_count = one()? as u32,
            "dx10clamp" => self.dx10_clamp = true,
            "exceptions" => self.exceptions = one()? as u8,
            "private_segment_align" => {
                let v = one()?;
                if !v.is_power_of_two() {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                self.private_segment_align = v;
            }
            "privmode" => self.priv_mode = true,
            "reserved_sgpr_first" => self.reserved_sgpr_first = one()? as u16,
            "reserved_sgpr_count" => self.reserved_sgpr_count = one()? as u16,
            "reserved_vgpr_first" => self.reserved_vgpr_first = one()? as u16,
            "reserved_vgpr_count" => self.reserved_vgpr_count = one()? as u16,
            "runtime_loader_kernel_symbol" => self.runtime_loader_kernel_symbol = one()?,
            "scratchbuffer" => self.scratch_buffer_size = one()? as u32,
            "use_kernarg_segment_ptr" => self.use_kernarg_segment_ptr = true,
            "private_elem_size" => {
                let v = one()?;
                if !matches!(v, 2 | 4 | 8 | 16) {
                    return Err(Error::ParseError(ParseError::UnexpectedToken));
                }
                self.private_elem_size = Some(v as u8);
            }
            "fkernel" => self.fkernel = true,
            _ => return Err(Error::ParseError(ParseError::BadDirective)),
        }
        Ok(note)
    }

    fn compute_pgm_rsrc1(&self, sgprs: u16, vgprs: u16) -> u32 {
        const DEFAULT_FLOAT_MODE: u32 = 0xc0;
        let mut r = PgmRsrc1(0);
        r.set_vgpr_blocks((vgprs.max(1) as u32 + 3) / 4 - 1);
        r.set_sgpr_blocks((sgprs.max(1) as u32 + 7) / 8 - 1);
        r.set_float_mode(DEFAULT_FLOAT_MODE);
        r.set_priv_mode(self.priv_mode as u32);
        r.set_dx10_clamp(self.dx10_clamp as u32);
        r.0
    }

    fn compute_pgm_rsrc2(&self) -> u32 {
        let mut r = PgmRsrc2(0);
        r.set_scratch_en((self.scratch_buffer_size != 0) as u32);
        r.set_user_sgpr_count(if self.use_kernarg_segment_ptr { 2 } else { 0 });
        r.set_tgid_x_en(1);
        r.set_excp_en(self.exceptions as u32);
        r.0
    }

    fn enable_sgpr_flags(&self) -> u16 {
        u16::from(self.use_kernarg_segment_ptr) << 3
    }

    fn enable_feature_flags(&self) -> u16 {
        match self.private_elem_size {
            Some(v) => ((v.trailing_zeros() as u16) - 1) << 1,
            None => 0,
        }
    }

    /// Derive the 256-byte descriptor. Register counts come from the
    /// encoder's usage tracking.
    pub fn to_descriptor(
        &self,
        arch: Arch,
        sgprs: u16,
        vgprs: u16,
        control_directive: &[u8],
    ) -> [u8; KERNEL_DESCRIPTOR_SIZE] {
        let mut d = [0u8; KERNEL_DESCRIPTOR_SIZE];
        let (kind, major, minor, stepping) = arch.machine();
        store_u32(&mut d, 0, self.code_version.0);
        store_u32(&mut d, 4, self.code_version.1);
        store_u16(&mut d, 8, kind);
        store_u16(&mut d, 10, major);
        store_u16(&mut d, 12, minor);
        store_u16(&mut d, 14, stepping);
        store_u64(&mut d, 16, CODE_ENTRY_OFFSET);
        // prefetch offset/size and max scratch backing stay zero
        store_u32(&mut d, 48, self.compute_pgm_rsrc1(sgprs, vgprs));
        store_u32(&mut d, 52, self.compute_pgm_rsrc2());
        store_u16(&mut d, 56, self.enable_sgpr_flags());
        store_u16(&mut d, 58, self.enable_feature_flags());
        store_u32(&mut d, 60, self.scratch_buffer_size);
        store_u32(&mut d, 64, self.workgroup_group_segment_size);
        store_u32(&mut d, 68, self.gds_segment_size);
        store_u64(&mut d, 72, 0); // kernarg segment size
        store_u32(&mut d, 80, self.workgroup_fbarrier_count);
        store_u16(&mut d, 84, sgprs);
        store_u16(&mut d, 86, vgprs);
        store_u16(&mut d, 88, self.reserved_vgpr_first);
        store_u16(&mut d, 90, self.reserved_vgpr_count);
        store_u16(&mut d, 92, self.reserved_sgpr_first);
        store_u16(&mut d, 94, self.reserved_sgpr_count);
        store_u16(&mut d, 96, self.debug_wavefront_private_segment_offset_sgpr);
        store_u16(&mut d, 98, self.debug_private_segment_buffer_sgpr);
        d[100] = log2_align(self.kernarg_segment_align);
        d[101] = 4;
        d[102] = log2_align(self.private_segment_align);
        d[103] = 6; // log2 of the 64-lane wavefront
        store_u32(&mut d, 104, self.call_convention);
        store_u64(&mut d, 120, self.runtime_loader_kernel_symbol);
        let n = control_directive.len().min(CONTROL_DIRECTIVE_SIZE);
        d[128..128 + n].copy_from_slice(&control_directive[..n]);
        d
    }
}

/// SGPR/VGPR counts for the descriptor: the wavefront always owns VCC,
/// and at least one VGPR is allocated.
pub fn descriptor_reg_counts(max_sgpr: Option<u16>, max_vgpr: Option<u16>) -> (u16, u16) {
    let sgprs = max_sgpr.map_or(0, |m| m + 1).max(2);
    let vgprs = max_vgpr.map_or(0, |m| m + 1).max(1);
    (sgprs, vgprs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{load_u16, load_u32, load_u64};

    #[test]
    fn test_codeversion_bytes() {
        let mut cfg = KernelConfig::default();
        cfg.set("codeversion", &[1, 0]).unwrap();
        let d = cfg.to_descriptor(Arch::Gcn1_0, 2, 1, &[]);
        assert_eq!(&d[0..4], &[1, 0, 0, 0]);
        assert_eq!(&d[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_fixture_kernel_fields() {
        // first kernel of the two-kernel fixture
        let mut cfg = KernelConfig::default();
        cfg.set("codeversion", &[1, 0]).unwrap();
        cfg.set("call_convention", &[0x34dac]).unwrap();
        assert_eq!(
            cfg.set("debug_private_segment_buffer_sgpr", &[123834])
                .unwrap(),
            Some("value truncated to 16 bits")
        );
        cfg.set("debug_wavefront_private_segment_offset_sgpr", &[129])
            .unwrap();
        cfg.set("gds_segment_size", &[100]).unwrap();
        cfg.set("kernarg_segment_align", &[32]).unwrap();
        cfg.set("workgroup_group_segment_size", &[22]).unwrap();
        cfg.set("workgroup_fbarrier_count", &[3324]).unwrap();
        cfg.set("dx10clamp", &[]).unwrap();
        cfg.set("exceptions", &[10]).unwrap();
        cfg.set("private_segment_align", &[128]).unwrap();
        cfg.set("privmode", &[]).unwrap();
        cfg.set("runtime_loader_kernel_symbol", &[0x4dc98b3a]).unwrap();
        cfg.set("scratchbuffer", &[111]).unwrap();
        cfg.set("reserved_sgpr_count", &[4]).unwrap();
        cfg.set("reserved_sgpr_first", &[9]).unwrap();
        cfg.set("reserved_vgpr_count", &[11]).unwrap();
        cfg.set("reserved_vgpr_first", &[7]).unwrap();
        cfg.set("private_elem_size", &[16]).unwrap();
        cfg.set("fkernel", &[]).unwrap();

        let control: Vec<u8> = {
            let mut c = vec![0u8; 128];
            c[0] = 1;
            c[4] = 2;
            c[8] = 3;
            c
        };
        let d = cfg.to_descriptor(Arch::Gcn1_2, 8, 1, &control);

        assert_eq!(load_u16(&d, 8), 1);
        assert_eq!(load_u16(&d, 10), 8, "Fiji is GFX8");
        assert_eq!(load_u64(&d, 16), 256);
        assert_eq!(load_u32(&d, 48), 0x3c0000);
        let rsrc2 = load_u32(&d, 52);
        assert_eq!(rsrc2 >> 24, 10, "exceptions");
        assert_eq!(rsrc2 & 1, 1, "scratch enable");
        assert_eq!(load_u16(&d, 58), 0x6, "private_elem_size 16");
        assert_eq!(load_u32(&d, 60), 111);
        assert_eq!(load_u32(&d, 64), 22);
        assert_eq!(load_u32(&d, 68), 100);
        assert_eq!(load_u32(&d, 80), 3324);
        assert_eq!(load_u16(&d, 84), 8);
        assert_eq!(load_u16(&d, 86), 1);
        assert_eq!(load_u16(&d, 88), 7);
        assert_eq!(load_u16(&d, 90), 11);
        assert_eq!(load_u16(&d, 92), 9);
        assert_eq!(load_u16(&d, 94), 4);
        assert_eq!(load_u16(&d, 96), 129);
        assert_eq!(load_u16(&d, 98), 58298, "truncated from 123834");
        assert_eq!(d[100], 5);
        assert_eq!(d[101], 4);
        assert_eq!(d[102], 7);
        assert_eq!(d[103], 6);
        assert_eq!(load_u32(&d, 104), 0x34dac);
        assert_eq!(load_u64(&d, 120), 0x4dc98b3a);
        assert_eq!(&d[128..132], &[1, 0, 0, 0]);
        assert_eq!(&d[132..136], &[2, 0, 0, 0]);
    }

    #[test]
    fn test_second_fixture_kernel_defaults() {
        let mut cfg = KernelConfig::default();
        cfg.set("codeversion", &[1, 0]).unwrap();
        cfg.set("call_convention", &[0x1112234]).unwrap();
        cfg.set("use_kernarg_segment_ptr", &[]).unwrap();
        let d = cfg.to_descriptor(Arch::Gcn1_2, 2, 1, &[0xde; 128]);
        assert_eq!(load_u32(&d, 48), 0xc0000);
        assert_eq!(load_u16(&d, 56), 0x8);
        assert_eq!(load_u16(&d, 58), 0, "no private_elem_size key");
        assert_eq!(load_u16(&d, 84), 2);
        assert_eq!(load_u16(&d, 86), 1);
        assert_eq!(d[100], 4);
        assert_eq!(d[102], 4);
        assert_eq!(load_u32(&d, 104), 0x1112234);
        assert_eq!(&d[128..256], &[0xde; 128]);
    }

    #[test]
    fn test_reg_count_floors() {
        assert_eq!(descriptor_reg_counts(None, None), (2, 1));
        assert_eq!(descriptor_reg_counts(Some(7), None), (8, 1));
        assert_eq!(descriptor_reg_counts(Some(0), Some(5)), (2, 6));
    }

    #[test]
    fn test_unknown_key_fails() {
        let mut cfg = KernelConfig::default();
        assert!(matches!(
            cfg.set("wibble", &[1]),
            Err(Error::ParseError(ParseError::BadDirective))
        ));
    }
}
