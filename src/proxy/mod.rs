//! Proxy types synthesized at runtime
//!
//! A proxy is requested for a [`ProxyContract`] (the target type and the members to intercept)
//! and an [`InterceptorPipeline`]. The [`ProxyGenerator`] emits a new type whose intercepted
//! members marshal their arguments into an [`Invocation`], run it through the pipeline, and
//! return whatever the pipeline left as the return value. Everything else behaves exactly like
//! the target.
//!
//! ```
//! use ilproxy::il::{Error as IlError, NativeMethod, Value};
//! use ilproxy::proxy::*;
//! use ilproxy::types::*;
//! use std::sync::Arc;
//!
//! struct Doubling;
//!
//! impl Interceptor for Doubling {
//!     fn intercept(&self, invocation: &Invocation) -> Result<(), IlError> {
//!         invocation.proceed()?;
//!         let result = invocation.return_value().as_i32().unwrap_or(0);
//!         invocation.set_return_value(Value::Int32(result * 2))
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let generator = ProxyGenerator::new(Settings::new())?;
//!
//! let mut calculator = TypeBuilder::new(
//!     "Demo.Calculator",
//!     Some(&generator.runtime().object),
//!     TypeFlags::PUBLIC,
//! );
//! calculator.add_method(MethodSpec::constructor(
//!     vec![],
//!     NativeMethod::new(|_, _| Ok(Value::Null)),
//! ));
//! calculator.add_method(MethodSpec {
//!     name: String::from("Add"),
//!     signature: MethodSignature::new(vec![TypeRef::INT32, TypeRef::INT32], Some(TypeRef::INT32)),
//!     flags: MethodFlags::public_virtual(),
//!     implementation: Some(NativeMethod::new(|_, args| {
//!         Ok(Value::Int32(args[0].as_i32().unwrap_or(0) + args[1].as_i32().unwrap_or(0)))
//!     })),
//! });
//! let calculator = calculator.build();
//! let add = calculator.find_method("Add").unwrap();
//!
//! let contract = ProxyContract::new(&calculator, vec![add.clone()]);
//! let pipeline = InterceptorPipeline::new(vec![Arc::new(Doubling) as Arc<dyn Interceptor>]);
//! let proxy_type = generator.get_or_build(&contract, &pipeline)?;
//!
//! let proxy = proxy_type.instantiate(&[])?;
//! let sum = ilproxy::il::invoke_virtual(&proxy, &add, &[Value::Int32(2), Value::Int32(3)])?;
//! assert_eq!(sum, Value::Int32(10));
//! # Ok(())
//! # }
//! ```

mod contract;
mod errors;
mod factory;
mod generator;
mod interceptor;
mod proxy_type;
mod runtime;
mod settings;

pub use contract::*;
pub use errors::*;
pub use factory::*;
pub use generator::*;
pub use interceptor::*;
pub use proxy_type::*;
pub use runtime::*;
pub use settings::*;
