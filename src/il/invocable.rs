use super::{Error, MethodBody, Value};
use std::sync::Arc;

/// Something that can be called with a receiver and arguments
///
/// Baked method skeletons and host-implemented members both look like this. Static methods get
/// `Value::Null` as their receiver and void methods return `Value::Null`.
pub trait Invocable: Send + Sync {
    fn invoke(&self, receiver: &Value, arguments: &[Value]) -> Result<Value, Error>;
}

/// Host-implemented member
pub struct NativeMethod<F>(F);

impl<F> NativeMethod<F> {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(function: F) -> Arc<dyn Invocable>
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Arc::new(NativeMethod(function))
    }
}

impl<F> Invocable for NativeMethod<F>
where
    F: Fn(&Value, &[Value]) -> Result<Value, Error> + Send + Sync,
{
    fn invoke(&self, receiver: &Value, arguments: &[Value]) -> Result<Value, Error> {
        (self.0)(receiver, arguments)
    }
}

/// Turns finalized method bodies into something executable
///
/// The interpreter is the portable implementation. Other implementations could compile bodies to
/// closures or native trampolines; the encoded body is the same either way.
pub trait Backend: Send + Sync {
    fn compile(&self, body: Arc<MethodBody>) -> Result<Arc<dyn Invocable>, Error>;
}
