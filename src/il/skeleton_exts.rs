use super::{Error, LocalSlot, MethodSkeleton, OpCode};
use crate::types::{FieldId, MethodId, TypeRef};

/// Helpers that pick the shortest encoding for common operations
pub trait SkeletonExts {
    /// Push an argument (`0` is the receiver of instance methods)
    fn load_arg(&mut self, index: u16) -> Result<(), Error>;

    /// Push an integer constant onto the stack
    fn const_int(&mut self, integer: i32) -> Result<(), Error>;

    /// Push a constant string onto the stack
    fn const_string(&mut self, string: &str) -> Result<(), Error>;

    /// Get a local variable
    fn get_local(&mut self, local: &LocalSlot) -> Result<(), Error>;

    /// Set a local variable
    fn set_local(&mut self, local: &LocalSlot) -> Result<(), Error>;

    /// Box the top of the stack if it is a value type
    fn box_if_needed(&mut self, ty: &TypeRef) -> Result<(), Error>;

    /// Turn an object on top of the stack into a `ty`, or discard it if there is no type
    fn unbox_or_cast(&mut self, ty: Option<&TypeRef>) -> Result<(), Error>;

    /// Invoke a method directly
    fn invoke(&mut self, method: &MethodId) -> Result<(), Error>;

    /// Invoke an instance method with virtual dispatch
    fn invoke_virtual(&mut self, method: &MethodId) -> Result<(), Error>;

    /// Allocate an object and run its constructor
    fn new_object(&mut self, constructor: &MethodId) -> Result<(), Error>;

    /// Get a field from the object on top of the stack
    fn get_field(&mut self, field: &FieldId) -> Result<(), Error>;

    /// Set a field (stack has the object then the value)
    fn set_field(&mut self, field: &FieldId) -> Result<(), Error>;

    /// Return from the method
    fn return_(&mut self) -> Result<(), Error>;
}

impl SkeletonExts for MethodSkeleton {
    fn load_arg(&mut self, index: u16) -> Result<(), Error> {
        match index {
            0 => self.emit(&OpCode::LDARG_0),
            1 => self.emit(&OpCode::LDARG_1),
            2 => self.emit(&OpCode::LDARG_2),
            3 => self.emit(&OpCode::LDARG_3),
            4..=127 => self.emit_i8(&OpCode::LDARG_S, index as i8),
            _ => self.emit_i32(&OpCode::LDARG, index as i32),
        }
    }

    fn const_int(&mut self, integer: i32) -> Result<(), Error> {
        let short = match integer {
            -1 => Some(OpCode::LDC_I4_M1),
            0 => Some(OpCode::LDC_I4_0),
            1 => Some(OpCode::LDC_I4_1),
            2 => Some(OpCode::LDC_I4_2),
            3 => Some(OpCode::LDC_I4_3),
            4 => Some(OpCode::LDC_I4_4),
            5 => Some(OpCode::LDC_I4_5),
            6 => Some(OpCode::LDC_I4_6),
            7 => Some(OpCode::LDC_I4_7),
            8 => Some(OpCode::LDC_I4_8),
            _ => None,
        };
        match short {
            Some(opcode) => self.emit(&opcode),
            None => match i8::try_from(integer) {
                Ok(small) => self.emit_i8(&OpCode::LDC_I4_S, small),
                Err(_) => self.emit_i32(&OpCode::LDC_I4, integer),
            },
        }
    }

    fn const_string(&mut self, string: &str) -> Result<(), Error> {
        self.emit_str(&OpCode::LDSTR, string)
    }

    fn get_local(&mut self, local: &LocalSlot) -> Result<(), Error> {
        match local.index {
            0 => self.emit(&OpCode::LDLOC_0),
            1 => self.emit(&OpCode::LDLOC_1),
            2 => self.emit(&OpCode::LDLOC_2),
            3 => self.emit(&OpCode::LDLOC_3),
            4..=255 => self.emit_local(&OpCode::LDLOC_S, local),
            _ => self.emit_local(&OpCode::LDLOC, local),
        }
    }

    fn set_local(&mut self, local: &LocalSlot) -> Result<(), Error> {
        match local.index {
            0 => self.emit(&OpCode::STLOC_0),
            1 => self.emit(&OpCode::STLOC_1),
            2 => self.emit(&OpCode::STLOC_2),
            3 => self.emit(&OpCode::STLOC_3),
            4..=255 => self.emit_local(&OpCode::STLOC_S, local),
            _ => self.emit_local(&OpCode::STLOC, local),
        }
    }

    fn box_if_needed(&mut self, ty: &TypeRef) -> Result<(), Error> {
        if ty.is_value_type() {
            self.emit_type(&OpCode::BOX, ty.clone())?;
        }
        Ok(())
    }

    fn unbox_or_cast(&mut self, ty: Option<&TypeRef>) -> Result<(), Error> {
        match ty {
            None => self.emit(&OpCode::POP),
            Some(ty) if ty.is_value_type() => self.emit_type(&OpCode::UNBOX_ANY, ty.clone()),
            Some(ty) if ty.is_root_object() => Ok(()),
            Some(ty) => self.emit_type(&OpCode::CASTCLASS, ty.clone()),
        }
    }

    fn invoke(&mut self, method: &MethodId) -> Result<(), Error> {
        self.emit_member(&OpCode::CALL, method)
    }

    fn invoke_virtual(&mut self, method: &MethodId) -> Result<(), Error> {
        self.emit_member(&OpCode::CALLVIRT, method)
    }

    fn new_object(&mut self, constructor: &MethodId) -> Result<(), Error> {
        self.emit_member(&OpCode::NEWOBJ, constructor)
    }

    fn get_field(&mut self, field: &FieldId) -> Result<(), Error> {
        self.emit_member(&OpCode::LDFLD, field)
    }

    fn set_field(&mut self, field: &FieldId) -> Result<(), Error> {
        self.emit_member(&OpCode::STFLD, field)
    }

    fn return_(&mut self) -> Result<(), Error> {
        self.emit(&OpCode::RET)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::Value;
    use crate::types::MethodSignature;

    #[test]
    fn short_forms() -> Result<(), Error> {
        let signature = MethodSignature::new(vec![], Some(TypeRef::INT32));
        let mut skeleton = MethodSkeleton::new("constants", signature, true);
        skeleton.const_int(3)?;
        skeleton.const_int(-100)?;
        skeleton.const_int(100_000)?;
        let local = skeleton.declare_local(TypeRef::INT32)?;
        skeleton.set_local(&local)?;
        skeleton.set_local(&local)?;
        skeleton.emit(&OpCode::POP)?;
        skeleton.get_local(&local)?;
        skeleton.return_()?;
        let invocable = skeleton.bake()?;

        let body = skeleton.body().unwrap();
        let names: Vec<&str> = body.instructions.iter().map(|i| i.opcode.name).collect();
        assert_eq!(
            names,
            vec![
                "ldc.i4.3", "ldc.i4.s", "ldc.i4", "stloc.0", "stloc.0", "pop", "ldloc.0", "ret"
            ]
        );
        assert_eq!(body.max_stack, 3);

        // Last store wins: -100 was stored after 100000
        assert_eq!(invocable.invoke(&Value::Null, &[])?, Value::Int32(-100));
        Ok(())
    }
}
