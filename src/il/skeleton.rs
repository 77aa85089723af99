use super::{
    Backend, Encoder, Error, Interpreter, Invocable, LocalSlot, MemberRef, MethodBody, OpCode,
    Operand,
};
use crate::types::{MethodData, MethodSignature, TypeRef};
use std::sync::Arc;

/// Lifecycle of a [`MethodSkeleton`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkeletonState {
    /// Accepting local declarations and instructions
    Open,

    /// Finalized: the body is frozen and nothing more can be added
    Baked,
}

/// Builder for one method, from declaration through emission to finalization
///
/// A skeleton is owned by whichever thread is building the method. Once baked, it only serves
/// to expose the frozen body; building another method means making another skeleton.
///
/// ```
/// use ilproxy::il::{MethodSkeleton, OpCode, Value};
/// use ilproxy::types::{MethodSignature, TypeRef};
///
/// let signature = MethodSignature::new(vec![TypeRef::INT32], Some(TypeRef::INT32));
/// let mut skeleton = MethodSkeleton::new("identity", signature, true);
/// skeleton.emit(&OpCode::LDARG_0).unwrap();
/// skeleton.emit(&OpCode::RET).unwrap();
///
/// let identity = skeleton.bake().unwrap();
/// assert_eq!(identity.invoke(&Value::Null, &[Value::Int32(42)]).unwrap(), Value::Int32(42));
/// ```
pub struct MethodSkeleton {
    /// Encoder holding the body under construction (`None` once baked)
    encoder: Option<Encoder>,

    /// Frozen body (`Some` once baked)
    baked: Option<Arc<MethodBody>>,

    signature: MethodSignature,
}

impl MethodSkeleton {
    pub fn new(name: impl Into<String>, signature: MethodSignature, is_static: bool) -> Self {
        MethodSkeleton {
            encoder: Some(Encoder::new(name, signature.clone(), is_static)),
            baked: None,
            signature,
        }
    }

    /// Skeleton with the same name, signature and staticness as an existing method
    pub fn for_method(method: &MethodData) -> Self {
        MethodSkeleton::new(
            method.name.clone(),
            method.signature.clone(),
            method.is_static(),
        )
    }

    pub fn state(&self) -> SkeletonState {
        if self.baked.is_some() {
            SkeletonState::Baked
        } else {
            SkeletonState::Open
        }
    }

    fn open(&mut self) -> Result<&mut Encoder, Error> {
        self.encoder
            .as_mut()
            .ok_or(Error::InvalidState("skeleton is already baked"))
    }

    /// Signature of the method being built
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Current operand stack depth (zero once baked)
    pub fn stack_depth(&self) -> usize {
        self.encoder.as_ref().map_or(0, |encoder| encoder.depth())
    }

    /// Declare a new local variable
    pub fn declare_local(&mut self, ty: TypeRef) -> Result<LocalSlot, Error> {
        let index = self.open()?.push_local(ty.clone())?;
        Ok(LocalSlot { index, ty })
    }

    /// Emit an instruction with an arbitrary operand
    pub fn emit_operand(&mut self, opcode: &OpCode, operand: Operand) -> Result<(), Error> {
        self.open()?.encode(opcode, operand)
    }

    /// Emit an instruction taking no operand
    pub fn emit(&mut self, opcode: &OpCode) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::None)
    }

    pub fn emit_i8(&mut self, opcode: &OpCode, value: i8) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::SmallInt(value))
    }

    pub fn emit_i32(&mut self, opcode: &OpCode, value: i32) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::WordInt(value))
    }

    pub fn emit_str(&mut self, opcode: &OpCode, value: &str) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::String(Arc::from(value)))
    }

    pub fn emit_type(&mut self, opcode: &OpCode, ty: TypeRef) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::Type(ty))
    }

    pub fn emit_member(
        &mut self,
        opcode: &OpCode,
        member: impl Into<MemberRef>,
    ) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::Member(member.into()))
    }

    pub fn emit_local(&mut self, opcode: &OpCode, local: &LocalSlot) -> Result<(), Error> {
        self.emit_operand(opcode, Operand::Local(local.clone()))
    }

    /// Finalize the method using the interpreter
    pub fn bake(&mut self) -> Result<Arc<dyn Invocable>, Error> {
        self.bake_with(&Interpreter)
    }

    /// Finalize the method
    ///
    /// If this fails, the skeleton stays open and unchanged.
    pub fn bake_with(&mut self, backend: &dyn Backend) -> Result<Arc<dyn Invocable>, Error> {
        let encoder = self
            .encoder
            .as_ref()
            .ok_or(Error::InvalidState("skeleton is already baked"))?;
        encoder.check_finished()?;

        let body = Arc::new(encoder.body().clone());
        let invocable = backend.compile(body.clone())?;
        log::debug!(
            "Baked {} ({} instructions, {} bytes)",
            body.name,
            body.instructions.len(),
            body.code_size
        );

        self.encoder = None;
        self.baked = Some(body);
        Ok(invocable)
    }

    /// Frozen body, once baked
    pub fn body(&self) -> Option<&Arc<MethodBody>> {
        self.baked.as_ref()
    }

    /// Body so far, while still open
    pub fn pending_body(&self) -> Option<&MethodBody> {
        self.encoder.as_ref().map(|encoder| encoder.body())
    }
}
