use super::OperandKind;
use crate::types::{FieldId, MethodId, RenderDescriptor, TypeRef};
use std::fmt;
use std::sync::Arc;

/// Reference to a member (method or field) from an instruction
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Method(MethodId),
    Field(FieldId),
}

impl fmt::Debug for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRef::Method(method) => write!(f, "{:?}", method),
            MemberRef::Field(field) => write!(f, "{:?}", field),
        }
    }
}

impl From<&MethodId> for MemberRef {
    fn from(method: &MethodId) -> MemberRef {
        MemberRef::Method(method.clone())
    }
}

impl From<&FieldId> for MemberRef {
    fn from(field: &FieldId) -> MemberRef {
        MemberRef::Field(field.clone())
    }
}

/// Local variable declared on a method skeleton
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct LocalSlot {
    pub index: u16,
    pub ty: TypeRef,
}

/// Value accompanying an instruction
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    None,
    SmallInt(i8),
    WordInt(i32),
    String(Arc<str>),
    Type(TypeRef),
    Member(MemberRef),
    Local(LocalSlot),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::SmallInt(_) => OperandKind::SmallInt,
            Operand::WordInt(_) => OperandKind::WordInt,
            Operand::String(_) => OperandKind::String,
            Operand::Type(_) => OperandKind::TypeRef,
            Operand::Member(_) => OperandKind::MemberRef,
            Operand::Local(_) => OperandKind::LocalRef,
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::SmallInt(i) => write!(f, "{}", i),
            Operand::WordInt(i) => write!(f, "{}", i),
            Operand::String(s) => write!(f, "{:?}", s),
            Operand::Type(ty) => f.write_str(&ty.render()),
            Operand::Member(member) => write!(f, "{:?}", member),
            Operand::Local(local) => write!(f, "V_{}", local.index),
        }
    }
}
