use ilproxy::il::*;
use ilproxy::types::{MethodSignature, TypeRef};
use std::collections::HashSet;

#[test]
fn instructions_are_identified_by_code() {
    let copy = OpCode::new(OpCode::LDARG_0.code, "renamed", OperandKind::String);
    assert_eq!(copy, OpCode::LDARG_0);
    assert_ne!(OpCode::LDARG_0, OpCode::LDC_I4);

    let set: HashSet<OpCode> = vec![OpCode::LDARG_0, copy, OpCode::LDC_I4].into_iter().collect();
    assert_eq!(set.len(), 2);

    for opcode in OpCode::CATALOG {
        assert_eq!(OpCode::lookup(opcode.code), Some(opcode));
    }
    assert!(OpCode::lookup(0xFFFF).is_none());
}

#[test]
fn baked_identity_method() -> Result<(), Error> {
    let signature = MethodSignature::new(vec![TypeRef::INT32], Some(TypeRef::INT32));
    let mut skeleton = MethodSkeleton::new("identity", signature, true);
    skeleton.emit(&OpCode::LDARG_0)?;
    skeleton.emit(&OpCode::RET)?;
    let identity = skeleton.bake()?;

    assert_eq!(identity.invoke(&Value::Null, &[Value::Int32(42)])?, Value::Int32(42));
    assert!(matches!(skeleton.emit(&OpCode::RET), Err(Error::InvalidState(_))));
    assert!(matches!(skeleton.bake(), Err(Error::InvalidState(_))));

    let body = skeleton.body().unwrap();
    assert_eq!(body.to_bytes().unwrap(), vec![0x02, 0x2A]);
    assert_eq!(body.to_string(), ".method static identity int32 (int32)\n  .maxstack 1\n  IL_0000: ldarg.0\n  IL_0001: ret\n");
    Ok(())
}

#[test]
fn interpreter_and_custom_backends_share_bodies() -> Result<(), Error> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Backend that counts compilations and defers to the interpreter
    #[derive(Default)]
    struct CountingBackend(AtomicUsize);

    impl Backend for CountingBackend {
        fn compile(&self, body: Arc<MethodBody>) -> Result<Arc<dyn Invocable>, Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Interpreter.compile(body)
        }
    }

    let backend = CountingBackend::default();
    let signature = MethodSignature::new(vec![], Some(TypeRef::String));
    let mut skeleton = MethodSkeleton::new("hello", signature, true);
    skeleton.const_string("hello")?;
    skeleton.return_()?;
    let hello = skeleton.bake_with(&backend)?;

    assert_eq!(backend.0.load(Ordering::SeqCst), 1);
    assert_eq!(hello.invoke(&Value::Null, &[])?, Value::from("hello"));
    Ok(())
}
