use super::{Error, InterceptorPipeline, ProxyContract, ProxyKind, ProxyType, RuntimeLibrary, Settings};
use crate::il::{Backend, Invocable, MethodBody, MethodSkeleton, OpCode, SkeletonExts};
use crate::types::*;
use std::sync::Arc;

/// Emits proxy types
///
/// Every contract member gets an override whose body packs the call into an invocation
/// descriptor, sends it through the pipeline stored on the proxy, and unpacks the return value:
///
/// ```text
/// .method virtual int32 Add (int32, int32)
///   .locals (ILProxy.Invocation)
///   ldarg.0                                    // proxy
///   ldarg.0                                    // target (interface proxies: ldfld __target)
///   ldtoken Calculator::Add
///   ldc.i4.2
///   newarr System.Object
///   dup, ldc.i4.0, ldarg.1, box int32, stelem.ref
///   dup, ldc.i4.1, ldarg.2, box int32, stelem.ref
///   newobj ILProxy.Invocation::.ctor
///   stloc.0
///   ldarg.0, ldfld __interceptors, ldloc.0, callvirt ILProxy.InterceptorPipeline::Run
///   ldloc.0, callvirt ILProxy.Invocation::get_ReturnValue, unbox.any int32
///   ret
/// ```
///
/// Nothing is registered anywhere until every body has been baked, so a failed build leaves no
/// trace.
pub struct ProxyFactory<'a> {
    settings: &'a Settings,
    runtime: &'a RuntimeLibrary,
    backend: &'a dyn Backend,
}

/// Contract member to generate an override for
struct Interception {
    /// Member as declared (gives the override its name and signature)
    declared: MethodId,

    /// Member the invocation proceeds to
    implementation: MethodId,
}

/// Baked member waiting for its type to be built
struct PendingMethod {
    spec: MethodSpec,
    body: Option<Arc<MethodBody>>,
}

impl<'a> ProxyFactory<'a> {
    pub fn new(
        settings: &'a Settings,
        runtime: &'a RuntimeLibrary,
        backend: &'a dyn Backend,
    ) -> ProxyFactory<'a> {
        ProxyFactory {
            settings,
            runtime,
            backend,
        }
    }

    /// Build a proxy type named `name` for a contract and pipeline
    pub fn build_proxy(
        &self,
        name: &str,
        contract: &ProxyContract,
        pipeline: &Arc<InterceptorPipeline>,
    ) -> Result<ProxyType, Error> {
        let target = contract.target();
        check_target(target)?;
        for member in contract.members() {
            check_member(target, member)?;
        }
        let kind = if target.is_interface() {
            ProxyKind::Interface
        } else {
            check_abstract_members(contract)?;
            ProxyKind::Class
        };
        log::debug!(
            "Building {:?} proxy {} for {} ({} intercepted members)",
            kind,
            name,
            target.name,
            contract.members().len()
        );

        let flags = TypeFlags::PUBLIC | TypeFlags::SEALED | TypeFlags::SYNTHETIC;
        let mut builder = match kind {
            ProxyKind::Class => TypeBuilder::new(name, Some(target), flags),
            ProxyKind::Interface => {
                let mut builder = TypeBuilder::new(name, Some(&self.runtime.object), flags);
                builder.implements(target);
                builder
            }
        };
        let pipeline_field =
            builder.add_field(&self.settings.pipeline_field_name, self.runtime.pipeline_ref());
        let target_field = match kind {
            ProxyKind::Class => None,
            ProxyKind::Interface => Some(
                builder.add_field(&self.settings.target_field_name, TypeRef::class(target)),
            ),
        };

        let mut pending: Vec<PendingMethod> = vec![];

        // Constructors
        match &target_field {
            Some(target_field) => {
                pending.push(self.interface_constructor(target, &pipeline_field, target_field)?);
            }
            None => {
                let base_constructors: Vec<&MethodId> = target.constructors().collect();
                if base_constructors.is_empty() {
                    pending.push(self.class_constructor(None, &pipeline_field)?);
                }
                for base_constructor in base_constructors {
                    pending.push(self.class_constructor(Some(base_constructor), &pipeline_field)?);
                }
            }
        }

        // Intercepted members
        let interceptions = interceptions(contract);
        for interception in &interceptions {
            let skeleton = self.intercept(interception, &pipeline_field, target_field.as_ref())?;
            pending.push(self.bake(skeleton, &interception.declared)?);
        }

        // Interface members outside the contract go straight to the target
        if let Some(target_field) = &target_field {
            for method in target.interface_methods() {
                let intercepted = interceptions.iter().any(|interception| {
                    interception.declared.name == method.name
                        && interception.declared.signature == method.signature
                });
                if !intercepted {
                    let skeleton = forward(&method, target_field)?;
                    pending.push(self.bake(skeleton, &method)?);
                }
            }
        }

        let mut bodies: Vec<Arc<MethodBody>> = vec![];
        for method in pending {
            bodies.extend(method.body);
            builder.add_method(method.spec);
        }
        let class = builder.build();

        Ok(ProxyType::new(
            class,
            contract.clone(),
            kind,
            pipeline.clone(),
            self.runtime.pipeline_value(pipeline),
            bodies,
        ))
    }

    fn bake(&self, mut skeleton: MethodSkeleton, like: &MethodData) -> Result<PendingMethod, Error> {
        let implementation: Arc<dyn Invocable> = skeleton.bake_with(self.backend)?;
        log::trace!("Baked {:?}", like);
        Ok(PendingMethod {
            spec: MethodSpec {
                name: like.name.clone(),
                signature: like.signature.clone(),
                flags: MethodFlags::public_virtual() | MethodFlags::FINAL,
                implementation: Some(implementation),
            },
            body: skeleton.body().cloned(),
        })
    }

    fn bake_constructor(&self, mut skeleton: MethodSkeleton) -> Result<PendingMethod, Error> {
        let implementation = skeleton.bake_with(self.backend)?;
        let parameters = skeleton.signature().parameters.clone();
        Ok(PendingMethod {
            spec: MethodSpec::constructor(parameters, implementation),
            body: skeleton.body().cloned(),
        })
    }

    /// `.ctor(pipeline, base parameters...)`: store the pipeline, then chain to the base
    fn class_constructor(
        &self,
        base_constructor: Option<&MethodId>,
        pipeline_field: &FieldId,
    ) -> Result<PendingMethod, Error> {
        let mut parameters = vec![self.runtime.pipeline_ref()];
        if let Some(base_constructor) = base_constructor {
            parameters.extend(base_constructor.signature.parameters.iter().cloned());
        }
        let signature = MethodSignature::new(parameters, None);
        let mut skeleton = MethodSkeleton::new(MethodData::CONSTRUCTOR_NAME, signature, false);

        skeleton.load_arg(0)?;
        skeleton.load_arg(1)?;
        skeleton.set_field(pipeline_field)?;

        if let Some(base_constructor) = base_constructor {
            skeleton.load_arg(0)?;
            for idx in 0..base_constructor.signature.parameters.len() {
                skeleton.load_arg(idx as u16 + 2)?;
            }
            skeleton.invoke(base_constructor)?;
        }
        skeleton.return_()?;
        self.bake_constructor(skeleton)
    }

    /// `.ctor(pipeline, target)`
    fn interface_constructor(
        &self,
        target: &ClassId,
        pipeline_field: &FieldId,
        target_field: &FieldId,
    ) -> Result<PendingMethod, Error> {
        let signature =
            MethodSignature::new(vec![self.runtime.pipeline_ref(), TypeRef::class(target)], None);
        let mut skeleton = MethodSkeleton::new(MethodData::CONSTRUCTOR_NAME, signature, false);

        skeleton.load_arg(0)?;
        skeleton.invoke(&self.runtime.object_constructor)?;
        skeleton.load_arg(0)?;
        skeleton.load_arg(1)?;
        skeleton.set_field(pipeline_field)?;
        skeleton.load_arg(0)?;
        skeleton.load_arg(2)?;
        skeleton.set_field(target_field)?;
        skeleton.return_()?;
        self.bake_constructor(skeleton)
    }

    /// Override that routes the call through the pipeline
    fn intercept(
        &self,
        interception: &Interception,
        pipeline_field: &FieldId,
        target_field: Option<&FieldId>,
    ) -> Result<MethodSkeleton, Error> {
        let declared = &interception.declared;
        let mut skeleton = MethodSkeleton::for_method(declared);
        let invocation = skeleton.declare_local(TypeRef::class(&self.runtime.invocation))?;

        // new Invocation(this, target, token, new object[] { args... })
        skeleton.load_arg(0)?;
        skeleton.load_arg(0)?;
        if let Some(target_field) = target_field {
            skeleton.get_field(target_field)?;
        }
        skeleton.emit_member(&OpCode::LDTOKEN, &interception.implementation)?;
        let parameters = &declared.signature.parameters;
        skeleton.const_int(parameters.len() as i32)?;
        skeleton.emit_type(&OpCode::NEWARR, self.runtime.object_ref())?;
        for (idx, parameter) in parameters.iter().enumerate() {
            skeleton.emit(&OpCode::DUP)?;
            skeleton.const_int(idx as i32)?;
            skeleton.load_arg(idx as u16 + 1)?;
            skeleton.box_if_needed(parameter)?;
            skeleton.emit(&OpCode::STELEM_REF)?;
        }
        skeleton.new_object(&self.runtime.invocation_constructor)?;
        skeleton.set_local(&invocation)?;

        // this.pipeline.Run(invocation)
        skeleton.load_arg(0)?;
        skeleton.get_field(pipeline_field)?;
        skeleton.get_local(&invocation)?;
        skeleton.invoke_virtual(&self.runtime.pipeline_run)?;

        // return (T) invocation.ReturnValue
        if let Some(return_type) = &declared.signature.return_type {
            skeleton.get_local(&invocation)?;
            skeleton.invoke_virtual(&self.runtime.invocation_return_value)?;
            skeleton.unbox_or_cast(Some(return_type))?;
        }
        skeleton.return_()?;
        Ok(skeleton)
    }
}

/// Stub that calls the wrapped instance directly
fn forward(method: &MethodId, target_field: &FieldId) -> Result<MethodSkeleton, Error> {
    let mut skeleton = MethodSkeleton::for_method(method);
    skeleton.load_arg(0)?;
    skeleton.get_field(target_field)?;
    for idx in 0..method.signature.parameters.len() {
        skeleton.load_arg(idx as u16 + 1)?;
    }
    skeleton.invoke_virtual(method)?;
    skeleton.return_()?;
    Ok(skeleton)
}

/// One interception per distinct name and signature
///
/// Class proxies proceed to the most derived implementation visible on the target, so that
/// intercepting a base member does not skip the target's own override.
fn interceptions(contract: &ProxyContract) -> Vec<Interception> {
    let target = contract.target();
    let mut interceptions: Vec<Interception> = vec![];
    for member in contract.members() {
        let duplicate = interceptions.iter().any(|interception| {
            interception.declared.name == member.name
                && interception.declared.signature == member.signature
        });
        if duplicate {
            continue;
        }
        let implementation = if target.is_interface() {
            member.clone()
        } else {
            target
                .resolve_override(member)
                .unwrap_or_else(|| member.clone())
        };
        interceptions.push(Interception {
            declared: member.clone(),
            implementation,
        });
    }
    interceptions
}

fn check_target(target: &ClassId) -> Result<(), Error> {
    let unsupported = |reason: &str| Error::UnsupportedTarget {
        target: target.name.clone(),
        reason: String::from(reason),
    };
    if target.is_host() {
        return Err(unsupported("host types cannot be extended"));
    }
    if target.is_sealed() && !target.is_interface() {
        return Err(unsupported("sealed classes cannot be extended"));
    }
    Ok(())
}

fn check_member(target: &ClassId, member: &MethodId) -> Result<(), Error> {
    let unsupported = |reason: String| Error::UnsupportedMember {
        member: format!("{:?}", member),
        reason,
    };
    if member.is_static() {
        return Err(unsupported(String::from("static members cannot be intercepted")));
    }
    if member.is_constructor() {
        return Err(unsupported(String::from("constructors cannot be intercepted")));
    }
    if member.is_generic() {
        return Err(unsupported(String::from(
            "generic methods cannot be intercepted",
        )));
    }

    let belongs = member.declaring_type().map_or(false, |declaring| {
        declaring.is_interface() == target.is_interface() && target.is_assignable_to(&declaring)
    });
    if !belongs {
        return Err(unsupported(format!("not a member of {}", target.name)));
    }
    if !target.is_interface() && !member.is_overridable() {
        return Err(unsupported(String::from(
            "non-virtual and final members cannot be overridden",
        )));
    }

    for (idx, parameter) in member.signature.parameters.iter().enumerate() {
        if !parameter.is_marshallable() {
            return Err(unsupported(format!(
                "parameter {} of type {} cannot be passed as an object",
                idx,
                parameter.render()
            )));
        }
    }
    if let Some(return_type) = &member.signature.return_type {
        if !return_type.is_marshallable() {
            return Err(unsupported(format!(
                "return type {} cannot be passed as an object",
                return_type.render()
            )));
        }
    }
    Ok(())
}

/// Abstract members left unimplemented would make the proxy abstract too, so they must be part of
/// the contract
fn check_abstract_members(contract: &ProxyContract) -> Result<(), Error> {
    let target = contract.target();
    let mut next = Some(target);
    while let Some(class) = next {
        for method in class.methods.iter().filter(|m| m.is_abstract()) {
            let implemented = target.resolve_override(method).is_some();
            let intercepted = contract
                .members()
                .iter()
                .any(|m| m.name == method.name && m.signature == method.signature);
            if !implemented && !intercepted {
                return Err(Error::UnsupportedMember {
                    member: format!("{:?}", method),
                    reason: String::from("abstract members of the target must be intercepted"),
                });
            }
        }
        next = class.base.as_ref();
    }
    Ok(())
}
