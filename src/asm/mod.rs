mod driver;
mod expr;
mod kernel;
mod scan;
mod section;
mod symbol;

pub use driver::{AsmOutput, Assembler, KernelRecord, OutSymbol};
pub use expr::{BinOp, EvalValue, Expr, UnOp};
pub use kernel::{KernelConfig, CONTROL_DIRECTIVE_SIZE, KERNEL_DESCRIPTOR_SIZE};
pub use scan::Cursor;
pub use section::{PatchKind, Reloc, RelocKind, SectKind, Section, SectionId, ABS_SECTION};
pub use symbol::{Sym, SymbolTable};
