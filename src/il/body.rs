use super::binary_format::{Serialize, Token};
use super::{codes, MemberRef, OpCode, Operand, OperandKind};
use crate::types::{MethodSignature, RenderDescriptor, TypeRef};
use byteorder::WriteBytesExt;
use std::fmt;
use std::sync::Arc;

/// One instruction in a method body
#[derive(Clone, Debug)]
pub struct EncodedInstruction {
    /// Byte offset from the start of the body
    pub offset: usize,
    pub opcode: OpCode,
    pub operand: Operand,
}

/// Encoded code and header of a method
///
/// While the method is under construction, this is owned by exactly one skeleton. Once the
/// skeleton is baked, the body is frozen behind an `Arc`.
#[derive(Clone, Debug)]
pub struct MethodBody {
    /// Name of the method (for diagnostics only)
    pub name: String,
    pub signature: MethodSignature,

    /// Static methods have no `this` argument
    pub is_static: bool,

    /// Types of the declared local variables
    pub locals: Vec<TypeRef>,

    pub instructions: Vec<EncodedInstruction>,

    /// Maximum operand stack depth reached
    pub max_stack: usize,

    /// Size of the encoded instructions in bytes
    pub code_size: usize,
}

impl MethodBody {
    pub fn new(name: impl Into<String>, signature: MethodSignature, is_static: bool) -> MethodBody {
        MethodBody {
            name: name.into(),
            signature,
            is_static,
            locals: vec![],
            instructions: vec![],
            max_stack: 0,
            code_size: 0,
        }
    }

    /// Number of arguments, including the receiver of instance methods
    pub fn argument_count(&self) -> usize {
        self.signature.parameters.len() + if self.is_static { 0 } else { 1 }
    }

    /// Type of an argument (`None` means the receiver, or out of range)
    pub fn argument_type(&self, index: usize) -> Option<&TypeRef> {
        let index = if self.is_static {
            index
        } else {
            index.checked_sub(1)?
        };
        self.signature.parameters.get(index)
    }

    /// Encode the instruction stream
    ///
    /// Strings, types and members are replaced by tokens that index into tables local to this
    /// body (in order of first use), so the bytes are stable for a given instruction sequence.
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut tokens = TokenTables::default();
        let mut bytes = Vec::with_capacity(self.code_size);
        for instruction in &self.instructions {
            instruction.opcode.serialize(&mut bytes)?;
            self.serialize_operand(&instruction.opcode, &instruction.operand, &mut tokens, &mut bytes)?;
        }
        Ok(bytes)
    }

    fn serialize_operand<W: WriteBytesExt>(
        &self,
        opcode: &OpCode,
        operand: &Operand,
        tokens: &mut TokenTables,
        writer: &mut W,
    ) -> std::io::Result<()> {
        match operand {
            Operand::None => Ok(()),
            Operand::SmallInt(i) => i.serialize(writer),
            Operand::WordInt(i) if opcode.is_two_byte() => (*i as u16).serialize(writer),
            Operand::WordInt(i) => i.serialize(writer),
            Operand::Local(local) if opcode.is_two_byte() => local.index.serialize(writer),
            Operand::Local(local) => (local.index as u8).serialize(writer),
            Operand::String(string) => tokens.string(string).serialize(writer),
            Operand::Type(ty) => tokens.type_spec(ty).serialize(writer),
            Operand::Member(member) => tokens.member(member).serialize(writer),
        }
    }
}

impl Serialize for OpCode {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        if self.is_two_byte() {
            ((codes::PREFIX >> 8) as u8).serialize(writer)?;
        }
        ((self.code & 0xFF) as u8).serialize(writer)
    }
}

#[derive(Default)]
struct TokenTables {
    strings: Vec<Arc<str>>,
    types: Vec<TypeRef>,
    members: Vec<MemberRef>,
}

impl TokenTables {
    fn row<T: PartialEq + Clone>(table: &mut Vec<T>, value: &T) -> usize {
        match table.iter().position(|existing| existing == value) {
            Some(idx) => idx + 1,
            None => {
                table.push(value.clone());
                table.len()
            }
        }
    }

    fn string(&mut self, string: &Arc<str>) -> Token {
        Token::new(Token::STRING, Self::row(&mut self.strings, string))
    }

    fn type_spec(&mut self, ty: &TypeRef) -> Token {
        Token::new(Token::TYPE_SPEC, Self::row(&mut self.types, ty))
    }

    fn member(&mut self, member: &MemberRef) -> Token {
        let row = Self::row(&mut self.members, member);
        match member {
            MemberRef::Method(_) => Token::new(Token::MEMBER_REF, row),
            MemberRef::Field(_) => Token::new(Token::FIELD_DEF, row),
        }
    }
}

/// Disassembly listing
impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modifier = if self.is_static { "static " } else { "" };
        writeln!(
            f,
            ".method {}{} {}",
            modifier,
            self.name,
            self.signature.render()
        )?;
        writeln!(f, "  .maxstack {}", self.max_stack)?;
        if !self.locals.is_empty() {
            let locals: Vec<String> = self.locals.iter().map(|l| l.render()).collect();
            writeln!(f, "  .locals ({})", locals.join(", "))?;
        }
        for instruction in &self.instructions {
            write!(f, "  IL_{:04x}: {}", instruction.offset, instruction.opcode.name)?;
            if instruction.opcode.operand != OperandKind::None {
                write!(f, " {:?}", instruction.operand)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
