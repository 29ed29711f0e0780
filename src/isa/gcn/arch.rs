use bitflags::bitflags;

bitflags! {
    /// Bitset of GCN architecture revisions an instruction is valid on.
    pub struct ArchMask: u32 {
        const GCN1_0 = 1;
        const GCN1_1 = 1 << 1;
        const GCN1_2 = 1 << 2;
    }
}

impl ArchMask {
    pub const ALL: ArchMask = ArchMask::all();
    pub const GCN1_1_2: ArchMask =
        ArchMask::from_bits_truncate(ArchMask::GCN1_1.bits() | ArchMask::GCN1_2.bits());
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Arch {
    Gcn1_0,
    Gcn1_1,
    Gcn1_2,
}

impl Arch {
    pub fn mask(self) -> ArchMask {
        match self {
            Arch::Gcn1_0 => ArchMask::GCN1_0,
            Arch::Gcn1_1 => ArchMask::GCN1_1,
            Arch::Gcn1_2 => ArchMask::GCN1_2,
        }
    }

    /// `amdMachine` tuple of the kernel descriptor: kind, major, minor,
    /// stepping.
    pub fn machine(self) -> (u16, u16, u16, u16) {
        match self {
            Arch::Gcn1_0 => (1, 6, 0, 0),
            Arch::Gcn1_1 => (1, 7, 0, 0),
            Arch::Gcn1_2 => (1, 8, 0, 0),
        }
    }

    /// Highest addressable SGPR + 1. The two uppermost pairs are stolen
    /// for flat_scratch/xnack on GCN 1.2.
    pub fn max_sgprs(self) -> u16 {
        match self {
            Arch::Gcn1_2 => 102,
            _ => 104,
        }
    }

    pub fn flat_scratch_reg(self) -> u16 {
        match self {
            Arch::Gcn1_2 => 102,
            _ => 104,
        }
    }

    pub fn has_flat(self) -> bool {
        !matches!(self, Arch::Gcn1_0)
    }

    pub fn has_xnack(self) -> bool {
        matches!(self, Arch::Gcn1_2)
    }

    /// Whether the 1/(2*PI) inline float constant (code 248) exists.
    pub fn has_inv_2pi_const(self) -> bool {
        matches!(self, Arch::Gcn1_2)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GpuDevice {
    CapeVerde,
    Pitcairn,
    Tahiti,
    Oland,
    Bonaire,
    Curacao,
    Hawaii,
    Iceland,
    Tonga,
    Fiji,
    Carrizo,
}

const DEVICE_NAMES: [(&str, GpuDevice); 11] = [
    ("bonaire", GpuDevice::Bonaire),
    ("capeverde", GpuDevice::CapeVerde),
    ("carrizo", GpuDevice::Carrizo),
    ("curacao", GpuDevice::Curacao),
    ("fiji", GpuDevice::Fiji),
    ("hawaii", GpuDevice::Hawaii),
    ("iceland", GpuDevice::Iceland),
    ("oland", GpuDevice::Oland),
    ("pitcairn", GpuDevice::Pitcairn),
    ("tahiti", GpuDevice::Tahiti),
    ("tonga", GpuDevice::Tonga),
];

impl GpuDevice {
    pub fn arch(self) -> Arch {
        use GpuDevice::*;
        match self {
            CapeVerde | Pitcairn | Tahiti | Oland => Arch::Gcn1_0,
            Bonaire | Curacao | Hawaii => Arch::Gcn1_1,
            Iceland | Tonga | Fiji | Carrizo => Arch::Gcn1_2,
        }
    }

    pub fn from_name(name: &str) -> Option<GpuDevice> {
        let lower = name.to_ascii_lowercase();
        DEVICE_NAMES
            .iter()
            .find(|(n, _)| *n == lower.as_str())
            .map(|(_, d)| *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_arch() {
        assert_eq!(GpuDevice::CapeVerde.arch(), Arch::Gcn1_0);
        assert_eq!(GpuDevice::Hawaii.arch(), Arch::Gcn1_1);
        assert_eq!(GpuDevice::Fiji.arch(), Arch::Gcn1_2);
        assert_eq!(GpuDevice::from_name("Fiji"), Some(GpuDevice::Fiji));
        assert_eq!(GpuDevice::from_name("FIJI"), Some(GpuDevice::Fiji));
        assert_eq!(GpuDevice::from_name("vega"), None);
    }

    #[test]
    fn test_machine_tuples() {
        assert_eq!(Arch::Gcn1_0.machine(), (1, 6, 0, 0));
        assert_eq!(Arch::Gcn1_2.machine(), (1, 8, 0, 0));
        assert!(Arch::Gcn1_1.has_flat());
        assert!(!Arch::Gcn1_0.has_flat());
        assert_eq!(Arch::Gcn1_2.max_sgprs(), 102);
        assert_eq!(Arch::Gcn1_0.max_sgprs(), 104);
    }
}
