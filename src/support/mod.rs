mod byteorder;
mod diagnostic;

pub(crate) use byteorder::{
    load_u16, load_u32, load_u64, push_u16, push_u32, push_u64, store_u16, store_u32, store_u64,
};
pub use diagnostic::{DiagnosticContext, Remark, Severity};
