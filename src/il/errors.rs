use super::{OpCode, OperandKind};
use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    /// Numeric code is not part of the instruction catalog
    UnsupportedInstruction(u16),

    /// Operand supplied does not have the kind the instruction expects
    OperandKindMismatch {
        opcode: OpCode,
        expected: OperandKind,
        found: OperandKind,
    },

    /// Skeleton is not in a state where the operation makes sense (eg. emitting after baking)
    InvalidState(&'static str),

    /// Stack depth at `ret` does not match the method return
    UnbalancedStack { expected: usize, found: usize },

    /// Body does not end with a terminal instruction (`ret` or `throw`)
    MethodCodeNotFinished { instructions: usize },

    /// Error trying to verify an instruction as it is emitted
    VerifierError {
        opcode: OpCode,
        offset: usize,
        kind: VerifierErrorKind,
    },

    /// Fault raised while running baked code
    Fault(Fault),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    EmptyStack,
    UnreachableCode,
    InvalidArgument(u32),
    UndeclaredLocal(u16),
    OperandOutOfRange(u32),
    NotAField,
    NotAMethod,
    NotAConstructor,
    StaticReceiver,
    AbstractType(String),
}

/// Runtime failure inside baked or native code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    NullReference,
    InvalidCast { from: String, to: String },
    IndexOutOfRange { index: i64, length: usize },
    ArgumentCount {
        method: String,
        expected: usize,
        found: usize,
    },
    AbstractMethod(String),
    MissingImplementation(String),

    /// Body pops more than it pushed (only possible for bodies that skipped verification)
    StackUnderflow,
    InvalidArgumentIndex(usize),
    InvalidLocalIndex(usize),

    /// Value passed to `throw`, rendered
    Thrown(String),

    /// Raised by an interceptor
    Interceptor(String),
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Error {
        Error::Fault(fault)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedInstruction(code) => {
                write!(f, "unsupported instruction 0x{:02X}", code)
            }
            Error::OperandKindMismatch {
                opcode,
                expected,
                found,
            } => write!(
                f,
                "{} expects a {:?} operand but got {:?}",
                opcode.name, expected, found
            ),
            Error::InvalidState(what) => write!(f, "invalid skeleton state: {}", what),
            Error::UnbalancedStack { expected, found } => write!(
                f,
                "unbalanced stack at return: expected {} value(s), found {}",
                expected, found
            ),
            Error::MethodCodeNotFinished { instructions } => write!(
                f,
                "method body of {} instruction(s) does not end in ret or throw",
                instructions
            ),
            Error::VerifierError {
                opcode,
                offset,
                kind,
            } => write!(f, "IL_{:04x}: {}: {:?}", offset, opcode.name, kind),
            Error::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::NullReference => f.write_str("null reference"),
            Fault::InvalidCast { from, to } => write!(f, "cannot cast {} to {}", from, to),
            Fault::IndexOutOfRange { index, length } => {
                write!(f, "index {} out of range for length {}", index, length)
            }
            Fault::ArgumentCount {
                method,
                expected,
                found,
            } => write!(
                f,
                "{} takes {} argument(s) but got {}",
                method, expected, found
            ),
            Fault::AbstractMethod(method) => write!(f, "{} is abstract", method),
            Fault::MissingImplementation(method) => write!(f, "{} has no body", method),
            Fault::StackUnderflow => f.write_str("operand stack underflow"),
            Fault::InvalidArgumentIndex(index) => write!(f, "no argument {}", index),
            Fault::InvalidLocalIndex(index) => write!(f, "no local {}", index),
            Fault::Thrown(value) => write!(f, "thrown: {}", value),
            Fault::Interceptor(message) => write!(f, "interceptor failed: {}", message),
        }
    }
}

impl std::error::Error for Error {}
