use super::{Error, InterceptorPipeline, ProxyContract};
use crate::il::{MethodBody, Object, Value};
use crate::types::{ClassId, MethodId};
use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProxyKind {
    /// Derives from the target class and overrides intercepted members
    Class,

    /// Implements the target interface and wraps an instance of it
    Interface,
}

/// Finished proxy type
///
/// The type is immutable and can be instantiated any number of times, from any thread. Every
/// instance shares the pipeline the type was built for.
pub struct ProxyType {
    class: ClassId,
    contract: ProxyContract,
    kind: ProxyKind,
    pipeline: Arc<InterceptorPipeline>,

    /// Pipeline as it is passed to generated constructors
    pipeline_value: Value,

    constructors: Vec<MethodId>,

    /// Bodies of every generated member, for diagnostics
    bodies: Vec<Arc<MethodBody>>,
}

impl ProxyType {
    pub(crate) fn new(
        class: ClassId,
        contract: ProxyContract,
        kind: ProxyKind,
        pipeline: Arc<InterceptorPipeline>,
        pipeline_value: Value,
        bodies: Vec<Arc<MethodBody>>,
    ) -> ProxyType {
        let constructors = class.constructors().cloned().collect();
        ProxyType {
            class,
            contract,
            kind,
            pipeline,
            pipeline_value,
            constructors,
            bodies,
        }
    }

    pub fn class(&self) -> &ClassId {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.class.name
    }

    pub fn contract(&self) -> &ProxyContract {
        &self.contract
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> {
        &self.pipeline
    }

    /// Generated constructors (their first parameter is always the pipeline)
    pub fn constructors(&self) -> &[MethodId] {
        &self.constructors
    }

    pub fn bodies(&self) -> &[Arc<MethodBody>] {
        &self.bodies
    }

    /// Create an instance
    ///
    /// For class proxies, `arguments` are the arguments of one of the target's constructors. For
    /// interface proxies, the only argument is the instance to wrap.
    pub fn instantiate(&self, arguments: &[Value]) -> Result<Value, Error> {
        let constructor = self
            .constructors
            .iter()
            .find(|constructor| {
                let parameters = constructor
                    .signature
                    .parameters
                    .split_first()
                    .map_or(&[][..], |(_, rest)| rest);
                parameters.len() == arguments.len()
                    && parameters
                        .iter()
                        .zip(arguments)
                        .all(|(ty, argument)| argument.is_instance_of(ty))
            })
            .ok_or_else(|| Error::NoMatchingConstructor {
                proxy: self.class.name.clone(),
                arguments: arguments.len(),
            })?;

        let mut constructor_arguments = Vec::with_capacity(arguments.len() + 1);
        constructor_arguments.push(self.pipeline_value.clone());
        constructor_arguments.extend(arguments.iter().cloned());

        let instance = Value::Object(Object::new(&self.class));
        constructor.invoke(&instance, &constructor_arguments)?;
        Ok(instance)
    }
}

impl fmt::Debug for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyType")
            .field("class", &self.class)
            .field("kind", &self.kind)
            .field("members", &self.contract.members())
            .finish()
    }
}
