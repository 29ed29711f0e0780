pub(crate) mod arch;
pub(crate) mod decoder;
pub(crate) mod encoder;
pub(crate) mod operand;
pub mod table;

pub use arch::{Arch, ArchMask, GpuDevice};
pub use decoder::GcnDecoder;
pub use encoder::{EncodedInstr, GcnEncoder, PendingPatch, RegUsage};
pub use operand::{GcnOperand, OperandFlags, OperandType, RegPair};
pub use table::{EncKind, InstrMode, IsaEntry, IsaTable};
