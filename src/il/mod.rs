//! Assemble and run method bodies for a small stack-based instruction set
//!
//! The instruction set is a closed subset of CIL: enough to marshal arguments, box and unbox
//! values, call members, and return. Bodies are built up with a [`MethodSkeleton`], which checks
//! every instruction as it is emitted, then baked into an [`Invocable`] by a [`Backend`].
//!
//! ### Simple example
//!
//! A static method that wraps its argument in a one-element `string[]`:
//!
//! ```
//! use ilproxy::il::*;
//! use ilproxy::types::{MethodSignature, TypeRef};
//!
//! # fn generate() -> Result<(), Error> {
//! let string_array = TypeRef::array_of(TypeRef::String);
//! let signature = MethodSignature::new(vec![TypeRef::String], Some(string_array));
//!
//! let mut skeleton = MethodSkeleton::new("wrap", signature, true);
//! skeleton.const_int(1)?;
//! skeleton.emit_type(&OpCode::NEWARR, TypeRef::String)?;
//! skeleton.emit(&OpCode::DUP)?;
//! skeleton.const_int(0)?;
//! skeleton.load_arg(0)?;
//! skeleton.emit(&OpCode::STELEM_REF)?;
//! skeleton.return_()?;
//! let wrap = skeleton.bake()?;
//!
//! let wrapped = wrap.invoke(&Value::Null, &[Value::from("hi")])?;
//! assert_eq!(wrapped.as_array().map(|array| array.to_vec()), Some(vec![Value::from("hi")]));
//!
//! let body = skeleton.body().unwrap();
//! assert_eq!(body.max_stack, 4);
//! assert!(body.to_string().contains("IL_0007: ldc.i4.0"));
//! # Ok(())
//! # }
//! # generate().unwrap();
//! ```

mod binary_format;
mod body;
mod encoder;
mod errors;
mod interpreter;
mod invocable;
mod opcodes;
mod operand;
mod skeleton;
mod skeleton_exts;
mod value;

pub use binary_format::{Serialize, Token};
pub use body::*;
pub use encoder::*;
pub use errors::*;
pub use interpreter::*;
pub use invocable::*;
pub use opcodes::*;
pub use operand::*;
pub use skeleton::*;
pub use skeleton_exts::*;
pub use value::*;

pub(crate) use opcodes::codes;

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{MethodSignature, TypeRef};

    #[test]
    fn body_bytes() -> Result<(), Error> {
        let signature = MethodSignature::new(vec![TypeRef::INT32], Some(TypeRef::INT32));
        let mut skeleton = MethodSkeleton::new("first", signature, true);
        skeleton.emit(&OpCode::LDARG_0)?;
        skeleton.emit_i8(&OpCode::LDC_I4_S, 5)?;
        skeleton.emit(&OpCode::POP)?;
        skeleton.emit(&OpCode::RET)?;
        skeleton.bake()?;

        let body = skeleton.body().unwrap();
        assert_eq!(body.code_size, 5);
        assert_eq!(body.to_bytes().unwrap(), vec![0x02, 0x1F, 0x05, 0x26, 0x2A]);
        Ok(())
    }

    #[test]
    fn body_bytes_with_tokens() -> Result<(), Error> {
        let signature = MethodSignature::new(vec![TypeRef::INT32], Some(TypeRef::String));
        let mut skeleton = MethodSkeleton::new("strings", signature, true);
        let local = skeleton.declare_local(TypeRef::String)?;
        skeleton.emit_i32(&OpCode::LDARG, 0)?;
        skeleton.emit(&OpCode::POP)?;
        skeleton.emit_str(&OpCode::LDSTR, "a")?;
        skeleton.emit(&OpCode::POP)?;
        skeleton.emit_str(&OpCode::LDSTR, "b")?;
        skeleton.emit_local(&OpCode::STLOC, &local)?;
        skeleton.emit_str(&OpCode::LDSTR, "a")?;
        skeleton.emit(&OpCode::POP)?;
        skeleton.emit_local(&OpCode::LDLOC, &local)?;
        skeleton.emit(&OpCode::RET)?;
        let strings = skeleton.bake()?;
        assert_eq!(strings.invoke(&Value::Null, &[Value::Int32(0)])?, Value::from("b"));

        let body = skeleton.body().unwrap();
        assert_eq!(
            body.to_bytes().unwrap(),
            vec![
                0xFE, 0x09, 0x00, 0x00, // ldarg 0
                0x26, // pop
                0x72, 0x01, 0x00, 0x00, 0x70, // ldstr "a"
                0x26, // pop
                0x72, 0x02, 0x00, 0x00, 0x70, // ldstr "b"
                0xFE, 0x0E, 0x00, 0x00, // stloc 0
                0x72, 0x01, 0x00, 0x00, 0x70, // ldstr "a" (same token)
                0x26, // pop
                0xFE, 0x0C, 0x00, 0x00, // ldloc 0
                0x2A, // ret
            ]
        );
        assert_eq!(body.code_size, body.to_bytes().unwrap().len());

        let listing = body.to_string();
        assert!(listing.contains(".locals (string)"));
        assert!(listing.contains("IL_0005: ldstr \"a\""));
        assert!(listing.contains("IL_0010: stloc V_0"));
        Ok(())
    }
}
