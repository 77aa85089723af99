use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of operand an instruction expects
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    /// Signed 8-bit integer
    SmallInt,
    /// Signed 32-bit integer
    WordInt,
    String,
    TypeRef,
    MemberRef,
    LocalRef,
}

/// How many operand stack slots an instruction pops or pushes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackCount {
    Fixed(u8),

    /// Depends on the member operand (eg. `call`) or on the method (eg. `ret`)
    Variable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: StackCount,
    pub pushes: StackCount,
}

/// What happens to control flow after the instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowKind {
    Next,
    Call,
    Return,
    Throw,
}

/// One operation in the instruction set
///
/// Only the numeric code is used for equality and hashing. The rest is metadata describing how to
/// validate operands and track the operand stack.
#[derive(Copy, Clone)]
pub struct OpCode {
    /// Numeric code (two-byte opcodes carry the `0xFE` prefix in the high byte)
    pub code: u16,
    pub name: &'static str,
    pub operand: OperandKind,
    pub stack: StackEffect,
    pub flow: FlowKind,
}

/// Raw numeric codes, for matching on
pub(crate) mod codes {
    pub const NOP: u16 = 0x00;
    pub const LDARG_0: u16 = 0x02;
    pub const LDARG_1: u16 = 0x03;
    pub const LDARG_2: u16 = 0x04;
    pub const LDARG_3: u16 = 0x05;
    pub const LDLOC_0: u16 = 0x06;
    pub const LDLOC_1: u16 = 0x07;
    pub const LDLOC_2: u16 = 0x08;
    pub const LDLOC_3: u16 = 0x09;
    pub const STLOC_0: u16 = 0x0A;
    pub const STLOC_1: u16 = 0x0B;
    pub const STLOC_2: u16 = 0x0C;
    pub const STLOC_3: u16 = 0x0D;
    pub const LDARG_S: u16 = 0x0E;
    pub const LDLOC_S: u16 = 0x11;
    pub const STLOC_S: u16 = 0x13;
    pub const LDNULL: u16 = 0x14;
    pub const LDC_I4_M1: u16 = 0x15;
    pub const LDC_I4_0: u16 = 0x16;
    pub const LDC_I4_8: u16 = 0x1E;
    pub const LDC_I4_S: u16 = 0x1F;
    pub const LDC_I4: u16 = 0x20;
    pub const DUP: u16 = 0x25;
    pub const POP: u16 = 0x26;
    pub const CALL: u16 = 0x28;
    pub const RET: u16 = 0x2A;
    pub const CALLVIRT: u16 = 0x6F;
    pub const LDSTR: u16 = 0x72;
    pub const NEWOBJ: u16 = 0x73;
    pub const CASTCLASS: u16 = 0x74;
    pub const THROW: u16 = 0x7A;
    pub const LDFLD: u16 = 0x7B;
    pub const STFLD: u16 = 0x7D;
    pub const BOX: u16 = 0x8C;
    pub const NEWARR: u16 = 0x8D;
    pub const LDLEN: u16 = 0x8E;
    pub const LDELEM_REF: u16 = 0x9A;
    pub const STELEM_REF: u16 = 0xA2;
    pub const UNBOX_ANY: u16 = 0xA5;
    pub const LDTOKEN: u16 = 0xD0;
    pub const LDARG: u16 = 0xFE09;
    pub const LDLOC: u16 = 0xFE0C;
    pub const STLOC: u16 = 0xFE0E;

    /// Prefix byte of two-byte opcodes
    pub const PREFIX: u16 = 0xFE00;
}

const fn op(
    code: u16,
    name: &'static str,
    operand: OperandKind,
    pops: StackCount,
    pushes: StackCount,
    flow: FlowKind,
) -> OpCode {
    OpCode {
        code,
        name,
        operand,
        stack: StackEffect { pops, pushes },
        flow,
    }
}

const fn push(code: u16, name: &'static str, operand: OperandKind) -> OpCode {
    op(
        code,
        name,
        operand,
        StackCount::Fixed(0),
        StackCount::Fixed(1),
        FlowKind::Next,
    )
}

const fn store(code: u16, name: &'static str, operand: OperandKind) -> OpCode {
    op(
        code,
        name,
        operand,
        StackCount::Fixed(1),
        StackCount::Fixed(0),
        FlowKind::Next,
    )
}

const fn unary(code: u16, name: &'static str, operand: OperandKind) -> OpCode {
    op(
        code,
        name,
        operand,
        StackCount::Fixed(1),
        StackCount::Fixed(1),
        FlowKind::Next,
    )
}

use OperandKind as K;
use StackCount::{Fixed, Variable};

impl OpCode {
    pub const NOP: OpCode = op(codes::NOP, "nop", K::None, Fixed(0), Fixed(0), FlowKind::Next);
    pub const LDARG_0: OpCode = push(codes::LDARG_0, "ldarg.0", K::None);
    pub const LDARG_1: OpCode = push(codes::LDARG_1, "ldarg.1", K::None);
    pub const LDARG_2: OpCode = push(codes::LDARG_2, "ldarg.2", K::None);
    pub const LDARG_3: OpCode = push(codes::LDARG_3, "ldarg.3", K::None);
    pub const LDLOC_0: OpCode = push(codes::LDLOC_0, "ldloc.0", K::None);
    pub const LDLOC_1: OpCode = push(codes::LDLOC_1, "ldloc.1", K::None);
    pub const LDLOC_2: OpCode = push(codes::LDLOC_2, "ldloc.2", K::None);
    pub const LDLOC_3: OpCode = push(codes::LDLOC_3, "ldloc.3", K::None);
    pub const STLOC_0: OpCode = store(codes::STLOC_0, "stloc.0", K::None);
    pub const STLOC_1: OpCode = store(codes::STLOC_1, "stloc.1", K::None);
    pub const STLOC_2: OpCode = store(codes::STLOC_2, "stloc.2", K::None);
    pub const STLOC_3: OpCode = store(codes::STLOC_3, "stloc.3", K::None);
    pub const LDARG_S: OpCode = push(codes::LDARG_S, "ldarg.s", K::SmallInt);
    pub const LDLOC_S: OpCode = push(codes::LDLOC_S, "ldloc.s", K::LocalRef);
    pub const STLOC_S: OpCode = store(codes::STLOC_S, "stloc.s", K::LocalRef);
    pub const LDNULL: OpCode = push(codes::LDNULL, "ldnull", K::None);
    pub const LDC_I4_M1: OpCode = push(codes::LDC_I4_M1, "ldc.i4.m1", K::None);
    pub const LDC_I4_0: OpCode = push(0x16, "ldc.i4.0", K::None);
    pub const LDC_I4_1: OpCode = push(0x17, "ldc.i4.1", K::None);
    pub const LDC_I4_2: OpCode = push(0x18, "ldc.i4.2", K::None);
    pub const LDC_I4_3: OpCode = push(0x19, "ldc.i4.3", K::None);
    pub const LDC_I4_4: OpCode = push(0x1A, "ldc.i4.4", K::None);
    pub const LDC_I4_5: OpCode = push(0x1B, "ldc.i4.5", K::None);
    pub const LDC_I4_6: OpCode = push(0x1C, "ldc.i4.6", K::None);
    pub const LDC_I4_7: OpCode = push(0x1D, "ldc.i4.7", K::None);
    pub const LDC_I4_8: OpCode = push(0x1E, "ldc.i4.8", K::None);
    pub const LDC_I4_S: OpCode = push(codes::LDC_I4_S, "ldc.i4.s", K::SmallInt);
    pub const LDC_I4: OpCode = push(codes::LDC_I4, "ldc.i4", K::WordInt);
    pub const DUP: OpCode = op(codes::DUP, "dup", K::None, Fixed(1), Fixed(2), FlowKind::Next);
    pub const POP: OpCode = store(codes::POP, "pop", K::None);
    pub const CALL: OpCode = op(codes::CALL, "call", K::MemberRef, Variable, Variable, FlowKind::Call);
    pub const RET: OpCode = op(codes::RET, "ret", K::None, Variable, Fixed(0), FlowKind::Return);
    pub const CALLVIRT: OpCode = op(
        codes::CALLVIRT,
        "callvirt",
        K::MemberRef,
        Variable,
        Variable,
        FlowKind::Call,
    );
    pub const LDSTR: OpCode = push(codes::LDSTR, "ldstr", K::String);
    pub const NEWOBJ: OpCode = op(
        codes::NEWOBJ,
        "newobj",
        K::MemberRef,
        Variable,
        Fixed(1),
        FlowKind::Call,
    );
    pub const CASTCLASS: OpCode = unary(codes::CASTCLASS, "castclass", K::TypeRef);
    pub const THROW: OpCode = op(codes::THROW, "throw", K::None, Fixed(1), Fixed(0), FlowKind::Throw);
    pub const LDFLD: OpCode = unary(codes::LDFLD, "ldfld", K::MemberRef);
    pub const STFLD: OpCode = op(codes::STFLD, "stfld", K::MemberRef, Fixed(2), Fixed(0), FlowKind::Next);
    pub const BOX: OpCode = unary(codes::BOX, "box", K::TypeRef);
    pub const NEWARR: OpCode = unary(codes::NEWARR, "newarr", K::TypeRef);
    pub const LDLEN: OpCode = unary(codes::LDLEN, "ldlen", K::None);
    pub const LDELEM_REF: OpCode = op(
        codes::LDELEM_REF,
        "ldelem.ref",
        K::None,
        Fixed(2),
        Fixed(1),
        FlowKind::Next,
    );
    pub const STELEM_REF: OpCode = op(
        codes::STELEM_REF,
        "stelem.ref",
        K::None,
        Fixed(3),
        Fixed(0),
        FlowKind::Next,
    );
    pub const UNBOX_ANY: OpCode = unary(codes::UNBOX_ANY, "unbox.any", K::TypeRef);
    pub const LDTOKEN: OpCode = push(codes::LDTOKEN, "ldtoken", K::MemberRef);
    pub const LDARG: OpCode = push(codes::LDARG, "ldarg", K::WordInt);
    pub const LDLOC: OpCode = push(codes::LDLOC, "ldloc", K::LocalRef);
    pub const STLOC: OpCode = store(codes::STLOC, "stloc", K::LocalRef);

    /// Every supported instruction, sorted by code
    pub const CATALOG: &'static [OpCode] = &[
        OpCode::NOP,
        OpCode::LDARG_0,
        OpCode::LDARG_1,
        OpCode::LDARG_2,
        OpCode::LDARG_3,
        OpCode::LDLOC_0,
        OpCode::LDLOC_1,
        OpCode::LDLOC_2,
        OpCode::LDLOC_3,
        OpCode::STLOC_0,
        OpCode::STLOC_1,
        OpCode::STLOC_2,
        OpCode::STLOC_3,
        OpCode::LDARG_S,
        OpCode::LDLOC_S,
        OpCode::STLOC_S,
        OpCode::LDNULL,
        OpCode::LDC_I4_M1,
        OpCode::LDC_I4_0,
        OpCode::LDC_I4_1,
        OpCode::LDC_I4_2,
        OpCode::LDC_I4_3,
        OpCode::LDC_I4_4,
        OpCode::LDC_I4_5,
        OpCode::LDC_I4_6,
        OpCode::LDC_I4_7,
        OpCode::LDC_I4_8,
        OpCode::LDC_I4_S,
        OpCode::LDC_I4,
        OpCode::DUP,
        OpCode::POP,
        OpCode::CALL,
        OpCode::RET,
        OpCode::CALLVIRT,
        OpCode::LDSTR,
        OpCode::NEWOBJ,
        OpCode::CASTCLASS,
        OpCode::THROW,
        OpCode::LDFLD,
        OpCode::STFLD,
        OpCode::BOX,
        OpCode::NEWARR,
        OpCode::LDLEN,
        OpCode::LDELEM_REF,
        OpCode::STELEM_REF,
        OpCode::UNBOX_ANY,
        OpCode::LDTOKEN,
        OpCode::LDARG,
        OpCode::LDLOC,
        OpCode::STLOC,
    ];

    /// Construct an instruction outside of the catalog
    ///
    /// This is only useful for probing failure handling: the encoder always validates against
    /// the catalog, so an instruction built this way with an unknown code is rejected.
    pub const fn new(code: u16, name: &'static str, operand: OperandKind) -> OpCode {
        op(code, name, operand, Fixed(0), Fixed(0), FlowKind::Next)
    }

    /// Find the catalog entry for a numeric code
    pub fn lookup(code: u16) -> Option<&'static OpCode> {
        OpCode::CATALOG
            .binary_search_by_key(&code, |opcode| opcode.code)
            .ok()
            .map(|idx| &OpCode::CATALOG[idx])
    }

    /// Does the opcode use the two-byte (`0xFE` prefixed) encoding?
    pub fn is_two_byte(&self) -> bool {
        self.code & 0xFF00 == codes::PREFIX
    }

    /// Number of bytes the operand takes up in the encoded body
    pub fn operand_width(&self) -> usize {
        match self.operand {
            OperandKind::None => 0,
            OperandKind::SmallInt => 1,
            OperandKind::LocalRef if self.is_two_byte() => 2,
            OperandKind::LocalRef => 1,
            OperandKind::WordInt if self.is_two_byte() => 2,
            OperandKind::WordInt
            | OperandKind::String
            | OperandKind::TypeRef
            | OperandKind::MemberRef => 4,
        }
    }

    /// Total number of bytes the instruction takes up in the encoded body
    pub fn width(&self) -> usize {
        let opcode_width = if self.is_two_byte() { 2 } else { 1 };
        opcode_width + self.operand_width()
    }

    /// Does control never fall through to the next instruction?
    pub fn is_terminal(&self) -> bool {
        matches!(self.flow, FlowKind::Return | FlowKind::Throw)
    }
}

impl PartialEq for OpCode {
    fn eq(&self, other: &OpCode) -> bool {
        self.code == other.code
    }
}

impl Eq for OpCode {}

impl Hash for OpCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state)
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name, self.code)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(opcode: &OpCode) -> u64 {
        let mut hasher = DefaultHasher::new();
        opcode.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn catalog_is_sorted_and_unique() {
        for pair in OpCode::CATALOG.windows(2) {
            assert!(pair[0].code < pair[1].code, "{:?} >= {:?}", pair[0], pair[1]);
        }
        let names: HashSet<&str> = OpCode::CATALOG.iter().map(|op| op.name).collect();
        assert_eq!(names.len(), OpCode::CATALOG.len());
    }

    #[test]
    fn equality_is_by_code() {
        let looked_up = *OpCode::lookup(0x02).unwrap();
        assert_eq!(looked_up, OpCode::LDARG_0);
        assert_eq!(hash_of(&looked_up), hash_of(&OpCode::LDARG_0));
        assert_ne!(OpCode::LDARG_0, OpCode::LDC_I4);

        // Metadata is irrelevant
        let lookalike = OpCode::new(0x02, "something else", OperandKind::String);
        assert_eq!(lookalike, OpCode::LDARG_0);
        assert_eq!(hash_of(&lookalike), hash_of(&OpCode::LDARG_0));
    }

    #[test]
    fn lookup() {
        for opcode in OpCode::CATALOG {
            assert_eq!(OpCode::lookup(opcode.code).map(|op| op.name), Some(opcode.name));
        }
        assert!(OpCode::lookup(0xFFFF).is_none());
        assert!(OpCode::lookup(0x01).is_none());
        assert_eq!(OpCode::lookup(0xFE0C).map(|op| op.name), Some("ldloc"));
    }

    #[test]
    fn widths() {
        assert_eq!(OpCode::RET.width(), 1);
        assert_eq!(OpCode::LDC_I4_S.width(), 2);
        assert_eq!(OpCode::LDC_I4.width(), 5);
        assert_eq!(OpCode::CALLVIRT.width(), 5);
        assert_eq!(OpCode::LDARG.width(), 4);
        assert_eq!(OpCode::STLOC_S.width(), 2);
        assert!(OpCode::THROW.is_terminal());
        assert!(!OpCode::CALL.is_terminal());
    }
}
