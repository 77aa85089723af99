use super::{InterceptorPipeline, Invocation};
use crate::il::{Error, Fault, HostObject, NativeMethod, Value};
use crate::types::*;
use crate::util::ArcId;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Types that generated proxy code links against
///
/// This is the root `System.Object` (which user types should derive from), plus two host types:
/// the invocation descriptor that carries one intercepted call and the interceptor pipeline that
/// processes it.
pub struct RuntimeLibrary {
    /// `System.Object`
    pub object: ClassId,

    /// `System.Object::.ctor()`
    pub object_constructor: MethodId,

    /// `virtual string System.Object::ToString()`
    pub object_to_string: MethodId,

    /// `ILProxy.Invocation`
    pub invocation: ClassId,

    /// `ILProxy.Invocation::.ctor(object proxy, object target, object method, object[] args)`
    pub invocation_constructor: MethodId,

    /// `object ILProxy.Invocation::get_ReturnValue()`
    pub invocation_return_value: MethodId,

    /// `ILProxy.InterceptorPipeline`
    pub pipeline: ClassId,

    /// `void ILProxy.InterceptorPipeline::Run(ILProxy.Invocation)`
    pub pipeline_run: MethodId,
}

/// Class handle that native members need before the class exists
///
/// Only a weak pointer is kept, so this does not keep the class alive.
#[derive(Clone, Default)]
struct LateClass(Arc<Mutex<Weak<TypeData>>>);

impl LateClass {
    fn set(&self, class: &ClassId) {
        *self.0.lock() = Arc::downgrade(&class.0);
    }

    fn get(&self) -> Result<ClassId, Error> {
        self.0
            .lock()
            .upgrade()
            .map(ArcId)
            .ok_or(Error::InvalidState("runtime type is no longer alive"))
    }
}

impl RuntimeLibrary {
    pub const OBJECT: &'static str = "System.Object";
    pub const INVOCATION: &'static str = "ILProxy.Invocation";
    pub const PIPELINE: &'static str = "ILProxy.InterceptorPipeline";

    pub fn new() -> Result<RuntimeLibrary, Error> {
        let object = Self::object_class();
        let object_ref = TypeRef::class(&object);

        let invocation = Self::invocation_class(&object, &object_ref);
        let invocation_ref = TypeRef::class(&invocation);

        let mut pipeline = TypeBuilder::new(
            Self::PIPELINE,
            None,
            TypeFlags::PUBLIC | TypeFlags::SEALED | TypeFlags::HOST,
        );
        pipeline.add_method(MethodSpec {
            name: String::from("Run"),
            signature: MethodSignature::new(vec![invocation_ref], None),
            flags: MethodFlags::PUBLIC,
            implementation: Some(NativeMethod::new(run_pipeline)),
        });
        let pipeline = pipeline.build();

        Ok(RuntimeLibrary {
            object_constructor: method_of(&object, MethodData::CONSTRUCTOR_NAME)?,
            object_to_string: method_of(&object, "ToString")?,
            invocation_constructor: method_of(&invocation, MethodData::CONSTRUCTOR_NAME)?,
            invocation_return_value: method_of(&invocation, "get_ReturnValue")?,
            pipeline_run: method_of(&pipeline, "Run")?,
            object,
            invocation,
            pipeline,
        })
    }

    fn object_class() -> ClassId {
        let mut object = TypeBuilder::new(Self::OBJECT, None, TypeFlags::PUBLIC);
        object.add_method(MethodSpec::constructor(
            vec![],
            NativeMethod::new(|_, _| Ok(Value::Null)),
        ));
        object.add_method(MethodSpec {
            name: String::from("ToString"),
            signature: MethodSignature::new(vec![], Some(TypeRef::String)),
            flags: MethodFlags::public_virtual(),
            implementation: Some(NativeMethod::new(|this, _| {
                Ok(Value::from(this.type_name()))
            })),
        });
        object.build()
    }

    fn invocation_class(object: &ClassId, object_ref: &TypeRef) -> ClassId {
        let late_class = LateClass::default();

        let mut invocation = TypeBuilder::new(
            Self::INVOCATION,
            None,
            TypeFlags::PUBLIC | TypeFlags::SEALED | TypeFlags::HOST,
        );
        let ctor_class = late_class.clone();
        invocation.add_method(MethodSpec::constructor(
            vec![
                object_ref.clone(),
                object_ref.clone(),
                object_ref.clone(),
                TypeRef::array_of(TypeRef::class(object)),
            ],
            NativeMethod::new(move |_, arguments| {
                let class = ctor_class.get()?;
                let invocation = new_invocation(arguments)?;
                Ok(Value::Host(HostObject::new(&class, invocation)))
            }),
        ));
        invocation.add_method(MethodSpec {
            name: String::from("get_ReturnValue"),
            signature: MethodSignature::new(vec![], Some(object_ref.clone())),
            flags: MethodFlags::PUBLIC | MethodFlags::SPECIAL_NAME,
            implementation: Some(NativeMethod::new(|this, _| {
                Ok(as_invocation(this)?.return_value())
            })),
        });
        let invocation = invocation.build();
        late_class.set(&invocation);
        invocation
    }

    /// Wrap a pipeline so that it can be stored in a generated type
    pub fn pipeline_value(&self, pipeline: &Arc<InterceptorPipeline>) -> Value {
        let data: Arc<InterceptorPipeline> = pipeline.clone();
        Value::Host(HostObject::from_arc(&self.pipeline, data))
    }

    /// Type references used in generated signatures
    pub fn object_ref(&self) -> TypeRef {
        TypeRef::class(&self.object)
    }

    pub fn object_array_ref(&self) -> TypeRef {
        TypeRef::array_of(self.object_ref())
    }

    pub fn pipeline_ref(&self) -> TypeRef {
        TypeRef::class(&self.pipeline)
    }
}

fn method_of(class: &ClassId, name: &str) -> Result<MethodId, Error> {
    class
        .find_method(name)
        .ok_or(Error::InvalidState("runtime library member is missing"))
}

fn new_invocation(arguments: &[Value]) -> Result<Invocation, Error> {
    let (proxy, target, token, values) = match arguments {
        [proxy, target, token, values] => (proxy, target, token, values),
        _ => {
            return Err(Error::Fault(Fault::ArgumentCount {
                method: format!("{}::.ctor", RuntimeLibrary::INVOCATION),
                expected: 4,
                found: arguments.len(),
            }))
        }
    };
    let method = token.as_method().cloned().ok_or_else(|| {
        Error::Fault(Fault::InvalidCast {
            from: token.type_name(),
            to: String::from("method handle"),
        })
    })?;
    let values = match values {
        Value::Array(array) => array.to_vec(),
        Value::Null => return Err(Error::Fault(Fault::NullReference)),
        other => {
            return Err(Error::Fault(Fault::InvalidCast {
                from: other.type_name(),
                to: String::from("object[]"),
            }))
        }
    };
    Ok(Invocation::new(
        proxy.clone(),
        target.clone(),
        method,
        values,
    ))
}

fn as_invocation(value: &Value) -> Result<&Invocation, Error> {
    match value {
        Value::Null => Err(Error::Fault(Fault::NullReference)),
        other => other.as_host::<Invocation>().ok_or_else(|| {
            Error::Fault(Fault::InvalidCast {
                from: other.type_name(),
                to: String::from(RuntimeLibrary::INVOCATION),
            })
        }),
    }
}

fn run_pipeline(this: &Value, arguments: &[Value]) -> Result<Value, Error> {
    let pipeline = match this {
        Value::Host(host) => host.data.clone().downcast::<InterceptorPipeline>().ok(),
        Value::Null => return Err(Error::Fault(Fault::NullReference)),
        _ => None,
    };
    let pipeline = pipeline.ok_or_else(|| {
        Error::Fault(Fault::InvalidCast {
            from: this.type_name(),
            to: String::from(RuntimeLibrary::PIPELINE),
        })
    })?;
    let invocation = match arguments.first() {
        Some(invocation) => as_invocation(invocation)?,
        None => {
            return Err(Error::Fault(Fault::ArgumentCount {
                method: format!("{}::Run", RuntimeLibrary::PIPELINE),
                expected: 1,
                found: 0,
            }))
        }
    };
    pipeline.run(invocation)?;
    Ok(Value::Null)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::Array;
    use crate::proxy::Interceptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl Interceptor for Counting {
        fn intercept(&self, invocation: &Invocation) -> Result<(), Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            invocation.proceed()
        }
    }

    #[test]
    fn host_members() -> Result<(), Error> {
        let runtime = RuntimeLibrary::new()?;
        assert!(runtime.object.is_root());
        assert!(runtime.invocation.is_host());

        // A target with one method to invoke through the descriptor
        let mut class = TypeBuilder::new("Doubler", Some(&runtime.object), TypeFlags::PUBLIC);
        class.add_method(MethodSpec {
            name: String::from("Double"),
            signature: MethodSignature::new(vec![TypeRef::INT32], Some(TypeRef::INT32)),
            flags: MethodFlags::public_virtual(),
            implementation: Some(NativeMethod::new(|_, args| {
                Ok(Value::Int32(args[0].as_i32().unwrap_or(0) * 2))
            })),
        });
        let class = class.build();
        let double = class.find_method("Double").unwrap();
        let instance = Value::Object(crate::il::Object::new(&class));

        let arguments = Array::from_values(
            runtime.object_ref(),
            vec![Value::Int32(21).box_as(&TypeRef::INT32)?],
        );
        let invocation = runtime.invocation_constructor.invoke(
            &Value::Null,
            &[
                instance.clone(),
                instance,
                Value::Member(double),
                Value::Array(arguments),
            ],
        )?;

        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let pipeline = InterceptorPipeline::new(vec![counting.clone() as Arc<dyn Interceptor>]);
        let pipeline = runtime.pipeline_value(&pipeline);
        runtime.pipeline_run.invoke(&pipeline, &[invocation.clone()])?;
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);

        let result = runtime.invocation_return_value.invoke(&invocation, &[])?;
        assert_eq!(result.unbox_any(&TypeRef::INT32)?, Value::Int32(42));

        let to_string = runtime.object_to_string.invoke(&invocation, &[])?;
        assert_eq!(to_string, Value::from(RuntimeLibrary::INVOCATION));
        Ok(())
    }

    #[test]
    fn bad_receivers() -> Result<(), Error> {
        let runtime = RuntimeLibrary::new()?;
        assert!(matches!(
            runtime.invocation_return_value.invoke(&Value::Null, &[]),
            Err(Error::Fault(Fault::NullReference))
        ));
        assert!(matches!(
            runtime
                .pipeline_run
                .invoke(&Value::from("nope"), &[Value::Null]),
            Err(Error::Fault(Fault::InvalidCast { .. }))
        ));
        Ok(())
    }
}
