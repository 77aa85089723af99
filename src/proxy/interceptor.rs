use crate::il::{self, Error, Fault, Value};
use crate::types::{MethodData, MethodId, TypeRef};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Handler that sees every intercepted call
///
/// An interceptor must call [`Invocation::proceed`] for the call to reach the next interceptor
/// (and eventually the original member). It can inspect or replace the arguments before that,
/// and the return value after.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, invocation: &Invocation) -> Result<(), Error>;
}

/// Ordered chain of interceptors
///
/// Pipelines are compared by identity: proxy types built for one pipeline are not reused for
/// another, even if both contain the same interceptors.
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorPipeline {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Arc<InterceptorPipeline> {
        Arc::new(InterceptorPipeline { interceptors })
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Send an invocation through the chain
    pub fn run(self: &Arc<Self>, invocation: &Invocation) -> Result<(), Error> {
        {
            let mut state = invocation.state.lock();
            state.pipeline = Some(self.clone());
            state.next = 0;
        }
        invocation.proceed()
    }
}

impl fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterceptorPipeline({} interceptors)", self.interceptors.len())
    }
}

/// Description of one intercepted call
///
/// Arguments and the return value are stored as objects (value types boxed).
pub struct Invocation {
    proxy: Value,
    target: Value,
    method: MethodId,
    state: Mutex<InvocationState>,
}

struct InvocationState {
    arguments: Vec<Value>,
    return_value: Value,
    pipeline: Option<Arc<InterceptorPipeline>>,

    /// Index of the next interceptor to run
    next: usize,
}

impl Invocation {
    pub fn new(proxy: Value, target: Value, method: MethodId, arguments: Vec<Value>) -> Invocation {
        Invocation {
            proxy,
            target,
            method,
            state: Mutex::new(InvocationState {
                arguments,
                return_value: Value::Null,
                pipeline: None,
                next: 0,
            }),
        }
    }

    /// Proxy instance the call was made on
    pub fn proxy(&self) -> &Value {
        &self.proxy
    }

    /// Instance that will run the original member (the proxy itself, for class proxies)
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// Member that was called
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    pub fn arguments(&self) -> Vec<Value> {
        self.state.lock().arguments.clone()
    }

    pub fn argument(&self, index: usize) -> Option<Value> {
        self.state.lock().arguments.get(index).cloned()
    }

    /// Replace an argument before the call proceeds
    ///
    /// Value type arguments are boxed to match how the proxy passes them.
    pub fn set_argument(&self, index: usize, value: Value) -> Result<(), Error> {
        let ty = self
            .method
            .signature
            .parameters
            .get(index)
            .ok_or(Error::Fault(Fault::IndexOutOfRange {
                index: index as i64,
                length: self.method.signature.parameters.len(),
            }))?;
        let value = box_as_object(value, ty)?;
        let mut state = self.state.lock();
        if let Some(slot) = state.arguments.get_mut(index) {
            *slot = value;
        }
        Ok(())
    }

    pub fn return_value(&self) -> Value {
        self.state.lock().return_value.clone()
    }

    /// Replace the return value (for instance to short-circuit the call)
    pub fn set_return_value(&self, value: Value) -> Result<(), Error> {
        let value = match &self.method.signature.return_type {
            Some(ty) => box_as_object(value, ty)?,
            None => Value::Null,
        };
        self.state.lock().return_value = value;
        Ok(())
    }

    /// Run the next interceptor in the pipeline or, after the last one, the original member
    pub fn proceed(&self) -> Result<(), Error> {
        let next: Option<Arc<dyn Interceptor>> = {
            let mut state = self.state.lock();
            let next = state
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.interceptors.get(state.next).cloned());
            if next.is_some() {
                state.next += 1;
            }
            next
        };

        match next {
            Some(interceptor) => interceptor.intercept(self),
            None => self.invoke_original(),
        }
    }

    /// Call the original member with the current arguments and record what it returns
    fn invoke_original(&self) -> Result<(), Error> {
        let method: &MethodData = &self.method;
        let arguments = self
            .arguments()
            .into_iter()
            .zip(&method.signature.parameters)
            .map(|(argument, ty)| argument.coerce(ty))
            .collect::<Result<Vec<Value>, Error>>()?;

        // Interface members dispatch on the wrapped instance, class members run the overridden
        // implementation directly
        let declared_on_interface = method
            .declaring_type()
            .map_or(false, |class| class.is_interface());
        let result = if declared_on_interface {
            il::invoke_virtual(&self.target, method, &arguments)?
        } else {
            method.invoke(&self.target, &arguments)?
        };

        self.set_return_value(result)
    }
}

fn box_as_object(value: Value, ty: &TypeRef) -> Result<Value, Error> {
    match value {
        Value::Boxed(_) => Ok(value),
        value => value.box_as(ty),
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method)
            .field("arguments", &self.arguments())
            .field("return_value", &self.return_value())
            .finish()
    }
}
