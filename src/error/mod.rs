use std::fmt::{Display, Formatter};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(#[from] ParseError),
    #[error("semantic error: {0}")]
    SemanticError(#[from] SemanticError),
    #[error("container error: {0}")]
    ContainerError(#[from] ContainerError),
    #[error("msgpack error: {0}")]
    MsgPackError(#[from] MsgPackError),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("internal error: {0}")]
    InternalError(&'static str),
}

/// Source text was malformed. Recovery point is the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnexpectedToken,
    MissingNumber,
    UnterminatedRange,
    UnalignedRange,
    RegisterOutOfRange,
    UnknownMnemonic,
    BadDirective,
}

/// Source text was well-formed but meaningless. Recovery point is the
/// next symbol or statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticError {
    RedefinedSymbol(String),
    UndefinedSymbol(String),
    CircularDependency,
    LiteralNotAllowedHere,
    TooManyLiterals,
    ArchFeatureUnavailable,
}

/// A container binary violated its structure. Fatal to the codec call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    BadMagic,
    TruncatedHeader,
    SectionOutOfRange,
    StringIndexOutOfRange,
    UnfinishedString,
    BadLink,
    EntrySizeTooSmall,
    Mismatch(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgPackError {
    BadTag,
    Truncated,
    NegativeForUnsigned,
    PositiveOutOfRange,
    WrongValueKind,
}

impl std::error::Error for ParseError {}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnexpectedToken => f.pad("unexpected token"),
            ParseError::MissingNumber => f.pad("missing number"),
            ParseError::UnterminatedRange => f.pad("unterminated register range"),
            ParseError::UnalignedRange => f.pad("unaligned register range"),
            ParseError::RegisterOutOfRange => f.pad("register out of range"),
            ParseError::UnknownMnemonic => f.pad("unrecognized instruction"),
            ParseError::BadDirective => f.pad("unknown directive"),
        }
    }
}

impl std::error::Error for SemanticError {}

impl Display for SemanticError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticError::RedefinedSymbol(name) => {
                write!(f, "symbol '{}' is already defined", name)
            }
            SemanticError::UndefinedSymbol(name) => write!(f, "undefined symbol '{}'", name),
            SemanticError::CircularDependency => f.pad("circular dependency between symbols"),
            SemanticError::LiteralNotAllowedHere => {
                f.pad("literal constant is illegal in this place")
            }
            SemanticError::TooManyLiterals => f.pad("only one literal constant is allowed"),
            SemanticError::ArchFeatureUnavailable => {
                f.pad("not available on this architecture")
            }
        }
    }
}

impl std::error::Error for ContainerError {}

impl Display for ContainerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::BadMagic => f.pad("bad magic bytes"),
            ContainerError::TruncatedHeader => f.pad("truncated header"),
            ContainerError::SectionOutOfRange => f.pad("section out of range"),
            ContainerError::StringIndexOutOfRange => f.pad("string index out of range"),
            ContainerError::UnfinishedString => f.pad("unfinished string"),
            ContainerError::BadLink => f.pad("bad section link"),
            ContainerError::EntrySizeTooSmall => f.pad("entry size is too small"),
            ContainerError::Mismatch(what) => write!(f, "{}", what),
        }
    }
}

impl std::error::Error for MsgPackError {}

impl Display for MsgPackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgPackError::BadTag => f.pad("unexpected type tag"),
            MsgPackError::Truncated => f.pad("truncated object"),
            MsgPackError::NegativeForUnsigned => {
                f.pad("negative value for unsigned integer")
            }
            MsgPackError::PositiveOutOfRange => {
                f.pad("positive value out of range for signed integer")
            }
            MsgPackError::WrongValueKind => f.pad("wrong value kind"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
