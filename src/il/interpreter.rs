use super::{
    codes, Array, Backend, Error, Fault, Invocable, MemberRef, MethodBody, Object, Operand, Value,
};
use crate::types::{FieldData, MethodData};
use std::sync::Arc;

/// Portable backend: runs method bodies by walking the encoded instructions
///
/// Bodies were fully verified while being encoded, so the interpreter only has to deal with
/// faults that depend on runtime values (null receivers, bad casts, array bounds, etc.).
#[derive(Copy, Clone, Debug, Default)]
pub struct Interpreter;

impl Backend for Interpreter {
    fn compile(&self, body: Arc<MethodBody>) -> Result<Arc<dyn Invocable>, Error> {
        Ok(Arc::new(InterpretedMethod { body }))
    }
}

/// Baked method body executed by the [`Interpreter`]
pub struct InterpretedMethod {
    body: Arc<MethodBody>,
}

impl InterpretedMethod {
    pub fn body(&self) -> &Arc<MethodBody> {
        &self.body
    }
}

impl Invocable for InterpretedMethod {
    fn invoke(&self, receiver: &Value, arguments: &[Value]) -> Result<Value, Error> {
        let body: &MethodBody = &self.body;
        if arguments.len() != body.signature.parameters.len() {
            return Err(Error::Fault(Fault::ArgumentCount {
                method: body.name.clone(),
                expected: body.signature.parameters.len(),
                found: arguments.len(),
            }));
        }

        let mut frame_args: Vec<Value> = Vec::with_capacity(body.argument_count());
        if !body.is_static {
            frame_args.push(receiver.clone());
        }
        frame_args.extend(arguments.iter().cloned());

        log::trace!("Interpreting {} with {:?}", body.name, frame_args);
        Frame {
            body,
            arguments: frame_args,
            locals: body.locals.iter().map(Value::default_for).collect(),
            stack: Vec::with_capacity(body.max_stack),
        }
        .run()
    }
}

/// Call a method with virtual dispatch on the runtime type of the receiver
///
/// If the receiver has no class (strings, boxed values, etc.) or no override is found, the
/// method itself runs.
pub fn invoke_virtual(
    receiver: &Value,
    method: &MethodData,
    arguments: &[Value],
) -> Result<Value, Error> {
    if receiver.is_null() {
        return Err(Error::Fault(Fault::NullReference));
    }
    let target = receiver
        .runtime_class()
        .and_then(|class| class.resolve_override(method));
    match target {
        Some(target) => target.invoke(receiver, arguments),
        None => method.invoke(receiver, arguments),
    }
}

/// State of one activation
struct Frame<'a> {
    body: &'a MethodBody,
    arguments: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl<'a> Frame<'a> {
    fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or(Error::Fault(Fault::StackUnderflow))
    }

    /// Pop the last `count` values, in the order they were pushed
    fn pop_many(&mut self, count: usize) -> Result<Vec<Value>, Error> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or(Error::Fault(Fault::StackUnderflow))?;
        Ok(self.stack.split_off(start))
    }

    fn argument(&self, index: usize) -> Result<Value, Error> {
        self.arguments
            .get(index)
            .cloned()
            .ok_or(Error::Fault(Fault::InvalidArgumentIndex(index)))
    }

    fn local(&mut self, index: usize) -> Result<&mut Value, Error> {
        self.locals
            .get_mut(index)
            .ok_or(Error::Fault(Fault::InvalidLocalIndex(index)))
    }

    fn run(mut self) -> Result<Value, Error> {
        let body = self.body;
        for instruction in &body.instructions {
            let code = instruction.opcode.code;
            match (code, &instruction.operand) {
                (codes::NOP, _) => (),

                (codes::LDARG_0..=codes::LDARG_3, _) => {
                    let value = self.argument((code - codes::LDARG_0) as usize)?;
                    self.stack.push(value);
                }
                (codes::LDARG_S, Operand::SmallInt(idx)) => {
                    let value = self.argument(*idx as u8 as usize)?;
                    self.stack.push(value);
                }
                (codes::LDARG, Operand::WordInt(idx)) => {
                    let value = self.argument(*idx as usize)?;
                    self.stack.push(value);
                }

                (codes::LDLOC_0..=codes::LDLOC_3, _) => {
                    let value = self.local((code - codes::LDLOC_0) as usize)?.clone();
                    self.stack.push(value);
                }
                (codes::STLOC_0..=codes::STLOC_3, _) => {
                    let value = self.pop()?;
                    *self.local((code - codes::STLOC_0) as usize)? = value;
                }
                (codes::LDLOC_S, Operand::Local(local)) | (codes::LDLOC, Operand::Local(local)) => {
                    let value = self.local(local.index as usize)?.clone();
                    self.stack.push(value);
                }
                (codes::STLOC_S, Operand::Local(local)) | (codes::STLOC, Operand::Local(local)) => {
                    let value = self.pop()?;
                    *self.local(local.index as usize)? = value;
                }

                (codes::LDNULL, _) => self.stack.push(Value::Null),
                (codes::LDC_I4_M1..=codes::LDC_I4_8, _) => {
                    let value = code as i32 - codes::LDC_I4_0 as i32;
                    self.stack.push(Value::Int32(value));
                }
                (codes::LDC_I4_S, Operand::SmallInt(value)) => {
                    self.stack.push(Value::Int32(*value as i32))
                }
                (codes::LDC_I4, Operand::WordInt(value)) => self.stack.push(Value::Int32(*value)),
                (codes::LDSTR, Operand::String(string)) => {
                    self.stack.push(Value::String(string.clone()))
                }

                (codes::DUP, _) => {
                    let value = self.pop()?;
                    self.stack.push(value.clone());
                    self.stack.push(value);
                }
                (codes::POP, _) => {
                    self.pop()?;
                }

                (codes::CALL, Operand::Member(MemberRef::Method(method))) => {
                    let (receiver, arguments) = self.pop_call(method)?;
                    let result = method.invoke(&receiver, &arguments)?;
                    if method.signature.returns_value() {
                        self.stack.push(result);
                    }
                }
                (codes::CALLVIRT, Operand::Member(MemberRef::Method(method))) => {
                    let (receiver, arguments) = self.pop_call(method)?;
                    let result = invoke_virtual(&receiver, method, &arguments)?;
                    if method.signature.returns_value() {
                        self.stack.push(result);
                    }
                }
                (codes::NEWOBJ, Operand::Member(MemberRef::Method(constructor))) => {
                    let arguments = self.pop_many(constructor.signature.parameters.len())?;
                    let object = construct(constructor, &arguments)?;
                    self.stack.push(object);
                }

                (codes::RET, _) => {
                    return if body.signature.returns_value() {
                        self.pop()
                    } else {
                        Ok(Value::Null)
                    };
                }
                (codes::THROW, _) => {
                    let thrown = match self.pop()? {
                        Value::Null => return Err(Error::Fault(Fault::NullReference)),
                        Value::String(message) => message.to_string(),
                        other => format!("{:?}", other),
                    };
                    return Err(Error::Fault(Fault::Thrown(thrown)));
                }

                (codes::LDFLD, Operand::Member(MemberRef::Field(field))) => {
                    let object = self.pop()?;
                    let value = load_field(&object, field)?;
                    self.stack.push(value);
                }
                (codes::STFLD, Operand::Member(MemberRef::Field(field))) => {
                    let value = self.pop()?;
                    let object = self.pop()?;
                    store_field(&object, field, value)?;
                }

                (codes::CASTCLASS, Operand::Type(ty)) => {
                    let value = self.pop()?.cast_class(ty)?;
                    self.stack.push(value);
                }
                (codes::BOX, Operand::Type(ty)) => {
                    let value = self.pop()?.box_as(ty)?;
                    self.stack.push(value);
                }
                (codes::UNBOX_ANY, Operand::Type(ty)) => {
                    let value = self.pop()?.unbox_any(ty)?;
                    self.stack.push(value);
                }

                (codes::NEWARR, Operand::Type(element)) => {
                    let length = self.pop_int()?;
                    let length = usize::try_from(length).map_err(|_| {
                        Error::Fault(Fault::IndexOutOfRange {
                            index: length,
                            length: 0,
                        })
                    })?;
                    self.stack.push(Value::Array(Array::new(element.clone(), length)));
                }
                (codes::LDLEN, _) => {
                    let array = self.pop_array()?;
                    self.stack.push(Value::Int32(array.len() as i32));
                }
                (codes::LDELEM_REF, _) => {
                    let index = self.pop_int()?;
                    let array = self.pop_array()?;
                    self.stack.push(array.get(index)?);
                }
                (codes::STELEM_REF, _) => {
                    let value = self.pop()?;
                    let index = self.pop_int()?;
                    let array = self.pop_array()?;
                    array.set(index, value)?;
                }

                (codes::LDTOKEN, Operand::Member(MemberRef::Method(method))) => {
                    self.stack.push(Value::Member(method.clone()))
                }

                _ => return Err(Error::UnsupportedInstruction(code)),
            }
        }

        Err(Error::MethodCodeNotFinished {
            instructions: body.instructions.len(),
        })
    }

    /// Pop the arguments (and receiver, for instance methods) of a call
    fn pop_call(&mut self, method: &MethodData) -> Result<(Value, Vec<Value>), Error> {
        let arguments = self.pop_many(method.signature.parameters.len())?;
        let receiver = if method.is_static() {
            Value::Null
        } else {
            self.pop()?
        };
        Ok((receiver, arguments))
    }

    fn pop_int(&mut self) -> Result<i64, Error> {
        let value = self.pop()?;
        value.as_i64().ok_or_else(|| {
            Error::Fault(Fault::InvalidCast {
                from: value.type_name(),
                to: String::from("int32"),
            })
        })
    }

    fn pop_array(&mut self) -> Result<Arc<Array>, Error> {
        match self.pop()? {
            Value::Array(array) => Ok(array),
            Value::Null => Err(Error::Fault(Fault::NullReference)),
            other => Err(Error::Fault(Fault::InvalidCast {
                from: other.type_name(),
                to: String::from("array"),
            })),
        }
    }
}

/// Allocate and initialize an object (host types construct their own instances)
fn construct(constructor: &MethodData, arguments: &[Value]) -> Result<Value, Error> {
    let class = constructor.declaring_type().ok_or_else(|| {
        Error::Fault(Fault::MissingImplementation(format!("{:?}", constructor)))
    })?;
    if class.is_host() {
        return constructor.invoke(&Value::Null, arguments);
    }
    let object = Value::Object(Object::new(&class));
    constructor.invoke(&object, arguments)?;
    Ok(object)
}

fn load_field(object: &Value, field: &FieldData) -> Result<Value, Error> {
    match object {
        Value::Object(object) => object.get_field(field),
        Value::Null => Err(Error::Fault(Fault::NullReference)),
        other => Err(Error::Fault(Fault::InvalidCast {
            from: other.type_name(),
            to: field.declaring_type_name().to_owned(),
        })),
    }
}

fn store_field(object: &Value, field: &FieldData, value: Value) -> Result<(), Error> {
    match object {
        Value::Object(object) => object.set_field(field, value),
        Value::Null => Err(Error::Fault(Fault::NullReference)),
        other => Err(Error::Fault(Fault::InvalidCast {
            from: other.type_name(),
            to: field.declaring_type_name().to_owned(),
        })),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{EncodedInstruction, MethodSkeleton, NativeMethod, OpCode, SkeletonExts};
    use crate::types::{
        MethodFlags, MethodSignature, MethodSpec, TypeBuilder, TypeFlags, TypeRef,
    };

    #[test]
    fn objects_fields_and_virtual_calls() -> Result<(), Error> {
        let object = TypeBuilder::new("System.Object", None, TypeFlags::PUBLIC).build();
        let object_ctor = {
            let mut builder = TypeBuilder::new("Empty", Some(&object), TypeFlags::PUBLIC);
            builder.add_method(MethodSpec::constructor(
                vec![],
                NativeMethod::new(|_, _| Ok(Value::Null)),
            ));
            builder.build()
        };

        // class Counter { int count; virtual int Describe() => 1; }
        let mut counter = TypeBuilder::new("Counter", Some(&object_ctor), TypeFlags::PUBLIC);
        let count = counter.add_field("count", TypeRef::INT32);
        counter.add_method(MethodSpec {
            name: String::from("Describe"),
            signature: MethodSignature::new(vec![], Some(TypeRef::INT32)),
            flags: MethodFlags::public_virtual(),
            implementation: Some(NativeMethod::new(|_, _| Ok(Value::Int32(1)))),
        });

        // .ctor(int32 start) { base::.ctor(); this.count = start; }
        let base_ctor = object_ctor.constructors().next().unwrap().clone();
        let mut ctor = MethodSkeleton::new(
            ".ctor",
            MethodSignature::new(vec![TypeRef::INT32], None),
            false,
        );
        ctor.load_arg(0)?;
        ctor.invoke(&base_ctor)?;
        ctor.load_arg(0)?;
        ctor.load_arg(1)?;
        ctor.set_field(&count)?;
        ctor.return_()?;
        counter.add_method(MethodSpec::constructor(vec![TypeRef::INT32], ctor.bake()?));
        let counter = counter.build();

        // class Loud : Counter { override int Describe() => 2; }
        let mut loud = TypeBuilder::new("Loud", Some(&counter), TypeFlags::PUBLIC);
        loud.add_method(MethodSpec {
            name: String::from("Describe"),
            signature: MethodSignature::new(vec![], Some(TypeRef::INT32)),
            flags: MethodFlags::public_virtual(),
            implementation: Some(NativeMethod::new(|_, _| Ok(Value::Int32(2)))),
        });
        let loud = loud.build();

        let describe = counter.find_method("Describe").unwrap();
        let constructor = counter.constructors().next().unwrap().clone();

        // static Counter make() => new Counter(9)
        let mut make = MethodSkeleton::new(
            "make",
            MethodSignature::new(vec![], Some(TypeRef::class(&counter))),
            true,
        );
        make.const_int(9)?;
        make.new_object(&constructor)?;
        make.return_()?;
        let made = make.bake()?.invoke(&Value::Null, &[])?;
        let made_object = made.as_object().unwrap();
        assert_eq!(made_object.class, counter);
        assert_eq!(made_object.get_field(&count)?, Value::Int32(9));

        // static int32 run(Counter c) => c.Describe()
        let mut run = MethodSkeleton::new(
            "run",
            MethodSignature::new(vec![TypeRef::class(&counter)], Some(TypeRef::INT32)),
            true,
        );
        run.load_arg(0)?;
        run.invoke_virtual(&describe)?;
        run.return_()?;
        let run = run.bake()?;

        let plain = Value::Object(Object::new(&counter));
        let louder = Value::Object(Object::new(&loud));
        assert_eq!(run.invoke(&Value::Null, &[plain])?, Value::Int32(1));
        assert_eq!(run.invoke(&Value::Null, &[louder])?, Value::Int32(2));
        assert!(matches!(
            run.invoke(&Value::Null, &[Value::Null]),
            Err(Error::Fault(Fault::NullReference))
        ));
        Ok(())
    }

    #[test]
    fn arrays_and_boxing() -> Result<(), Error> {
        let object = TypeBuilder::new("System.Object", None, TypeFlags::PUBLIC).build();
        let object_array = TypeRef::array_of(TypeRef::class(&object));

        // static object[] pack(int32 a, string b) => new object[] { a, b }
        let mut pack = MethodSkeleton::new(
            "pack",
            MethodSignature::new(
                vec![TypeRef::INT32, TypeRef::String],
                Some(object_array.clone()),
            ),
            true,
        );
        pack.const_int(2)?;
        pack.emit_type(&OpCode::NEWARR, TypeRef::class(&object))?;
        pack.emit(&OpCode::DUP)?;
        pack.const_int(0)?;
        pack.load_arg(0)?;
        pack.box_if_needed(&TypeRef::INT32)?;
        pack.emit(&OpCode::STELEM_REF)?;
        pack.emit(&OpCode::DUP)?;
        pack.const_int(1)?;
        pack.load_arg(1)?;
        pack.emit(&OpCode::STELEM_REF)?;
        pack.return_()?;
        let packed = pack
            .bake()?
            .invoke(&Value::Null, &[Value::Int32(5), Value::from("five")])?;
        let items = packed.as_array().unwrap().to_vec();
        assert_eq!(
            items,
            vec![Value::Boxed(Arc::new(Value::Int32(5))), Value::from("five")]
        );

        // static int32 first(object[] items) => (int32) items[0]
        let mut first = MethodSkeleton::new(
            "first",
            MethodSignature::new(vec![object_array], Some(TypeRef::INT32)),
            true,
        );
        first.load_arg(0)?;
        first.const_int(0)?;
        first.emit(&OpCode::LDELEM_REF)?;
        first.unbox_or_cast(Some(&TypeRef::INT32))?;
        first.return_()?;
        let first = first.bake()?;
        assert_eq!(first.invoke(&Value::Null, &[packed])?, Value::Int32(5));

        let empty = Value::Array(Array::new(TypeRef::class(&object), 0));
        assert!(matches!(
            first.invoke(&Value::Null, &[empty]),
            Err(Error::Fault(Fault::IndexOutOfRange { index: 0, length: 0 }))
        ));
        Ok(())
    }

    #[test]
    fn argument_count_is_checked() -> Result<(), Error> {
        let mut skeleton = MethodSkeleton::new("noop", MethodSignature::void(), true);
        skeleton.return_()?;
        let noop = skeleton.bake()?;
        assert_eq!(noop.invoke(&Value::Null, &[])?, Value::Null);
        assert!(matches!(
            noop.invoke(&Value::Null, &[Value::Int32(1)]),
            Err(Error::Fault(Fault::ArgumentCount { .. }))
        ));
        Ok(())
    }

    #[test]
    fn unverified_bodies_fault() -> Result<(), Error> {
        fn unverified(opcodes: &[OpCode]) -> Arc<MethodBody> {
            let signature = MethodSignature::new(vec![TypeRef::INT32], Some(TypeRef::INT32));
            let mut body = MethodBody::new("unverified", signature, true);
            for opcode in opcodes {
                body.instructions.push(EncodedInstruction {
                    offset: body.code_size,
                    opcode: *opcode,
                    operand: Operand::None,
                });
                body.code_size += opcode.width();
            }
            Arc::new(body)
        }

        let cases = vec![
            (vec![OpCode::POP, OpCode::RET], Fault::StackUnderflow),
            (vec![OpCode::LDARG_2, OpCode::RET], Fault::InvalidArgumentIndex(2)),
            (vec![OpCode::LDLOC_0, OpCode::RET], Fault::InvalidLocalIndex(0)),
        ];
        for (opcodes, expected) in cases {
            let method = Interpreter.compile(unverified(&opcodes))?;
            match method.invoke(&Value::Null, &[Value::Int32(1)]) {
                Err(Error::Fault(fault)) => assert_eq!(fault, expected),
                other => panic!("expected {:?}, got {:?}", expected, other),
            }
        }
        Ok(())
    }
}
