use super::{
    codes, EncodedInstruction, Error, MemberRef, MethodBody, OpCode, Operand, StackCount,
    VerifierErrorKind,
};
use crate::types::{MethodSignature, TypeRef};

/// Appends instructions to a method body, checking each one as it goes
///
/// Every instruction is validated against the catalog entry for its numeric code (never against
/// metadata on the caller's copy of the opcode) and against the operand stack state so far. If
/// anything is wrong, nothing is appended and the stack tracking is untouched.
///
/// There are no branches in the supported instruction set, so the whole body is one basic block:
/// after `ret` or `throw`, nothing more can be emitted.
pub struct Encoder {
    body: MethodBody,

    /// Current depth of the operand stack
    depth: usize,

    /// Depth of the stack when `ret` was emitted
    return_depth: Option<usize>,

    /// Has a terminal instruction been emitted?
    terminated: bool,
}

impl Encoder {
    pub fn new(name: impl Into<String>, signature: MethodSignature, is_static: bool) -> Encoder {
        Encoder {
            body: MethodBody::new(name, signature, is_static),
            depth: 0,
            return_depth: None,
            terminated: false,
        }
    }

    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Current depth of the operand stack
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Register a new local variable, returning its index
    pub fn push_local(&mut self, ty: TypeRef) -> Result<u16, Error> {
        let index = u16::try_from(self.body.locals.len())
            .map_err(|_| Error::InvalidState("too many locals"))?;
        self.body.locals.push(ty);
        Ok(index)
    }

    /// Validate and append one instruction
    pub fn encode(&mut self, opcode: &OpCode, operand: Operand) -> Result<(), Error> {
        let opcode: &'static OpCode =
            OpCode::lookup(opcode.code).ok_or(Error::UnsupportedInstruction(opcode.code))?;

        let found = operand.kind();
        if found != opcode.operand {
            return Err(Error::OperandKindMismatch {
                opcode: *opcode,
                expected: opcode.operand,
                found,
            });
        }

        let (pops, pushes) = self
            .stack_effect(opcode, &operand)
            .map_err(|kind| Error::VerifierError {
                opcode: *opcode,
                offset: self.body.code_size,
                kind,
            })?;

        // Everything checks out: commit
        log::trace!(
            "{} IL_{:04x}: {} {:?}",
            self.body.name,
            self.body.code_size,
            opcode.name,
            operand
        );
        if opcode.code == codes::RET {
            self.return_depth = Some(self.depth);
        }
        self.depth = self.depth - pops + pushes;
        self.body.max_stack = self.body.max_stack.max(self.depth);
        self.terminated = opcode.is_terminal();
        self.body.instructions.push(EncodedInstruction {
            offset: self.body.code_size,
            opcode: *opcode,
            operand,
        });
        self.body.code_size += opcode.width();
        Ok(())
    }

    /// Figure out how many values the instruction pops and pushes, checking that it makes sense
    /// in the current state
    fn stack_effect(
        &self,
        opcode: &OpCode,
        operand: &Operand,
    ) -> Result<(usize, usize), VerifierErrorKind> {
        if self.terminated {
            return Err(VerifierErrorKind::UnreachableCode);
        }

        let (pops, pushes) = match (opcode.code, operand) {
            (codes::LDARG_0..=codes::LDARG_3, _) => {
                self.check_argument((opcode.code - codes::LDARG_0) as u32)?;
                (0, 1)
            }
            (codes::LDARG_S, Operand::SmallInt(idx)) => {
                self.check_argument(*idx as u8 as u32)?;
                (0, 1)
            }
            (codes::LDARG, Operand::WordInt(idx)) => {
                let idx = u32::try_from(*idx).map_err(|_| VerifierErrorKind::InvalidArgument(0))?;
                self.check_argument(idx)?;
                (0, 1)
            }
            (codes::LDLOC_0..=codes::LDLOC_3, _) => {
                self.check_local((opcode.code - codes::LDLOC_0) as u16, None)?;
                (0, 1)
            }
            (codes::STLOC_0..=codes::STLOC_3, _) => {
                self.check_local((opcode.code - codes::STLOC_0) as u16, None)?;
                (1, 0)
            }
            (_, Operand::Local(local)) => {
                self.check_local(local.index, Some(&local.ty))?;
                // Short forms only have one byte for the index
                if !opcode.is_two_byte() && local.index > u8::MAX as u16 {
                    return Err(VerifierErrorKind::OperandOutOfRange(local.index as u32));
                }
                if opcode.code == codes::STLOC_S || opcode.code == codes::STLOC {
                    (1, 0)
                } else {
                    (0, 1)
                }
            }
            (codes::CALL, Operand::Member(member)) | (codes::CALLVIRT, Operand::Member(member)) => {
                let method = match member {
                    MemberRef::Method(method) => method,
                    MemberRef::Field(_) => return Err(VerifierErrorKind::NotAMethod),
                };
                if opcode.code == codes::CALLVIRT && method.is_static() {
                    return Err(VerifierErrorKind::StaticReceiver);
                }
                let pushes = if method.signature.returns_value() { 1 } else { 0 };
                (method.argument_count(), pushes)
            }
            (codes::NEWOBJ, Operand::Member(member)) => {
                let constructor = match member {
                    MemberRef::Method(method) if method.is_constructor() => method,
                    _ => return Err(VerifierErrorKind::NotAConstructor),
                };
                if let Some(class) = constructor.declaring_type() {
                    if class.is_abstract() {
                        return Err(VerifierErrorKind::AbstractType(class.name.clone()));
                    }
                }
                (constructor.signature.parameters.len(), 1)
            }
            (codes::LDFLD, Operand::Member(member)) | (codes::STFLD, Operand::Member(member)) => {
                if !matches!(member, MemberRef::Field(_)) {
                    return Err(VerifierErrorKind::NotAField);
                }
                fixed(opcode)
            }
            (codes::LDTOKEN, Operand::Member(member)) => {
                if !matches!(member, MemberRef::Method(_)) {
                    return Err(VerifierErrorKind::NotAMethod);
                }
                fixed(opcode)
            }
            (codes::RET, _) => (0, 0),
            _ => fixed(opcode),
        };

        if self.depth < pops {
            return Err(VerifierErrorKind::EmptyStack);
        }
        Ok((pops, pushes))
    }

    fn check_argument(&self, index: u32) -> Result<(), VerifierErrorKind> {
        if (index as usize) < self.body.argument_count() {
            Ok(())
        } else {
            Err(VerifierErrorKind::InvalidArgument(index))
        }
    }

    fn check_local(&self, index: u16, ty: Option<&TypeRef>) -> Result<(), VerifierErrorKind> {
        match self.body.locals.get(index as usize) {
            Some(declared) if ty.map_or(true, |ty| ty == declared) => Ok(()),
            _ => Err(VerifierErrorKind::UndeclaredLocal(index)),
        }
    }

    /// Check that the body is complete and that the stack at `ret` matches the method return
    pub fn check_finished(&self) -> Result<(), Error> {
        if !self.terminated {
            return Err(Error::MethodCodeNotFinished {
                instructions: self.body.instructions.len(),
            });
        }
        if let Some(found) = self.return_depth {
            let expected = if self.body.signature.returns_value() { 1 } else { 0 };
            if found != expected {
                return Err(Error::UnbalancedStack { expected, found });
            }
        }
        Ok(())
    }
}

/// Stack effect of instructions that don't depend on the operand
fn fixed(opcode: &OpCode) -> (usize, usize) {
    let count = |count: StackCount| match count {
        StackCount::Fixed(n) => n as usize,
        StackCount::Variable => 0,
    };
    (count(opcode.stack.pops), count(opcode.stack.pushes))
}
