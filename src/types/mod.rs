//! Types, methods, and fields that generated code can refer to
//!
//! Every type is immutable once built and shared behind an [`ArcId`], so that handles can cross
//! threads freely and compare by identity. Methods point back to their declaring type weakly
//! (the type owns its methods).
//!
//! Types are declared with a [`TypeBuilder`]:
//!
//! ```
//! use ilproxy::types::*;
//! use ilproxy::il::{NativeMethod, Value};
//!
//! let object = TypeBuilder::new("System.Object", None, TypeFlags::PUBLIC).build();
//!
//! let mut greeter = TypeBuilder::new("Greeter", Some(&object), TypeFlags::PUBLIC);
//! greeter.add_method(MethodSpec {
//!     name: String::from("Greet"),
//!     signature: MethodSignature::new(vec![], Some(TypeRef::String)),
//!     flags: MethodFlags::public_virtual(),
//!     implementation: Some(NativeMethod::new(|_this, _args| Ok(Value::from("hello")))),
//! });
//! let greeter = greeter.build();
//!
//! let greet = greeter.find_method("Greet").unwrap();
//! assert_eq!(greet.declaring_type().unwrap(), greeter);
//! ```

mod descriptors;
mod flags;

pub use descriptors::*;
pub use flags::*;

use crate::il::{Error, Fault, Invocable, Value};
use crate::util::ArcId;
use std::fmt;
use std::sync::{Arc, Weak};

/// Handle to a type (class, interface, or host type)
pub type ClassId = ArcId<TypeData>;

/// Handle to a method
pub type MethodId = ArcId<MethodData>;

/// Handle to an instance field
pub type FieldId = ArcId<FieldData>;

pub struct TypeData {
    /// Fully qualified name of the type
    pub name: String,

    pub flags: TypeFlags,

    /// Base class is missing for the root object type and for interfaces
    pub base: Option<ClassId>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: Vec<ClassId>,

    /// Fields declared on this type
    pub fields: Vec<FieldId>,

    /// Methods declared on this type
    pub methods: Vec<MethodId>,

    /// All instance fields, inherited ones first (indexed by `FieldData::index`)
    instance_fields: Vec<FieldId>,
}

impl TypeData {
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeFlags::SEALED)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags
            .intersects(TypeFlags::ABSTRACT | TypeFlags::INTERFACE)
    }

    pub fn is_host(&self) -> bool {
        self.flags.contains(TypeFlags::HOST)
    }

    /// Is this the root of the class hierarchy (`System.Object`)?
    pub fn is_root(&self) -> bool {
        self.base.is_none() && !self.is_interface() && !self.is_host()
    }

    /// Every instance field, including inherited ones
    pub fn instance_fields(&self) -> &[FieldId] {
        &self.instance_fields
    }

    /// Find a method declared directly on this type by name
    pub fn find_method(&self, name: &str) -> Option<MethodId> {
        self.methods.iter().find(|m| m.name == name).cloned()
    }

    /// Find a field declared on this type or a base type by name
    pub fn find_field(&self, name: &str) -> Option<FieldId> {
        self.instance_fields
            .iter()
            .rev()
            .find(|f| f.name == name)
            .cloned()
    }

    /// Constructors declared directly on this type
    pub fn constructors(&self) -> impl Iterator<Item = &MethodId> + '_ {
        self.methods.iter().filter(|m| m.is_constructor())
    }

    /// Find the implementation that a virtual call to `method` on an instance of this type should
    /// run.
    ///
    /// This walks up the base class chain looking for the most derived non-abstract method with
    /// the same name and signature (interface methods are implemented implicitly by name).
    pub fn resolve_override(&self, method: &MethodData) -> Option<MethodId> {
        let mut next: Option<&TypeData> = Some(self);
        while let Some(class) = next {
            let found = class.methods.iter().find(|candidate| {
                !candidate.is_static()
                    && !candidate.is_constructor()
                    && !candidate.is_abstract()
                    && candidate.name == method.name
                    && candidate.signature == method.signature
            });
            if let Some(found) = found {
                return Some(found.clone());
            }
            next = class.base.as_deref();
        }
        None
    }

    /// Object to object assignability
    ///
    /// This does a search up the base classes and interfaces looking for the super type. Every
    /// type is assignable to the root object type.
    pub fn is_assignable_to(&self, super_type: &TypeData) -> bool {
        if super_type.is_root() {
            return true;
        }

        let mut to_visit: Vec<&TypeData> = vec![self];
        let mut visited: Vec<*const TypeData> = vec![];
        while let Some(class) = to_visit.pop() {
            if std::ptr::eq(class, super_type) {
                return true;
            }
            if visited.contains(&(class as *const TypeData)) {
                continue;
            }
            visited.push(class);

            if let Some(base) = &class.base {
                to_visit.push(base);
            }
            if super_type.is_interface() {
                to_visit.extend(class.interfaces.iter().map(|i| &**i));
            }
        }
        false
    }

    /// Instance methods an implementation of this interface must provide, including methods
    /// inherited from super-interfaces (de-duplicated by name and signature)
    pub fn interface_methods(&self) -> Vec<MethodId> {
        let mut methods: Vec<MethodId> = vec![];
        let mut to_visit: Vec<&TypeData> = vec![self];
        while let Some(interface) = to_visit.pop() {
            for method in &interface.methods {
                let duplicate = methods
                    .iter()
                    .any(|m| m.name == method.name && m.signature == method.signature);
                if !method.is_static() && !duplicate {
                    methods.push(method.clone());
                }
            }
            to_visit.extend(interface.interfaces.iter().map(|i| &**i));
        }
        methods
    }
}

impl fmt::Debug for TypeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub struct MethodData {
    /// Name of the method (`.ctor` for constructors)
    pub name: String,

    /// Type of the method
    pub signature: MethodSignature,

    pub flags: MethodFlags,

    /// Code that runs when the method is invoked (missing for abstract methods)
    pub implementation: Option<Arc<dyn Invocable>>,

    /// Type declaring the method
    ///
    /// Note: this is a pointer back to the type (so don't derive `Debug`)
    declaring_type: Weak<TypeData>,

    declaring_type_name: String,
}

impl MethodData {
    /// Name of constructors
    pub const CONSTRUCTOR_NAME: &'static str = ".ctor";

    pub fn declaring_type(&self) -> Option<ClassId> {
        self.declaring_type.upgrade().map(ArcId)
    }

    pub fn declaring_type_name(&self) -> &str {
        &self.declaring_type_name
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }

    pub fn is_final(&self) -> bool {
        self.flags.contains(MethodFlags::FINAL)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    pub fn is_generic(&self) -> bool {
        self.flags.contains(MethodFlags::GENERIC)
    }

    /// Can a derived type replace this method?
    pub fn is_overridable(&self) -> bool {
        self.is_virtual() && !self.is_final() && !self.is_static() && !self.is_constructor()
    }

    /// Number of stack slots a call consumes (parameters, plus the receiver if there is one)
    pub fn argument_count(&self) -> usize {
        self.signature.parameters.len() + if self.is_static() { 0 } else { 1 }
    }

    /// Run exactly this method's implementation (no virtual dispatch)
    ///
    /// The receiver is ignored by static methods and should be `Value::Null` for them.
    pub fn invoke(&self, receiver: &Value, arguments: &[Value]) -> Result<Value, Error> {
        if arguments.len() != self.signature.parameters.len() {
            return Err(Error::Fault(Fault::ArgumentCount {
                method: format!("{:?}", self),
                expected: self.signature.parameters.len(),
                found: arguments.len(),
            }));
        }
        match &self.implementation {
            Some(implementation) => implementation.invoke(receiver, arguments),
            None if self.is_abstract() => {
                Err(Error::Fault(Fault::AbstractMethod(format!("{:?}", self))))
            }
            None => Err(Error::Fault(Fault::MissingImplementation(format!(
                "{:?}",
                self
            )))),
        }
    }
}

impl fmt::Debug for MethodData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}::{}:{}",
            self.declaring_type_name,
            self.name,
            self.signature.render(),
        ))
    }
}

pub struct FieldData {
    /// Name of the field
    pub name: String,

    /// Type of the field
    pub ty: TypeRef,

    /// Slot in the instance field storage of objects
    pub index: usize,

    declaring_type_name: String,
}

impl FieldData {
    pub fn declaring_type_name(&self) -> &str {
        &self.declaring_type_name
    }
}

impl fmt::Debug for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}::{}:{}",
            self.declaring_type_name,
            self.name,
            self.ty.render(),
        ))
    }
}

/// Method about to be added to a type
pub struct MethodSpec {
    pub name: String,
    pub signature: MethodSignature,
    pub flags: MethodFlags,
    pub implementation: Option<Arc<dyn Invocable>>,
}

impl MethodSpec {
    /// Instance constructor with the given parameters
    pub fn constructor(
        parameters: Vec<TypeRef>,
        implementation: Arc<dyn Invocable>,
    ) -> MethodSpec {
        MethodSpec {
            name: String::from(MethodData::CONSTRUCTOR_NAME),
            signature: MethodSignature::new(parameters, None),
            flags: MethodFlags::constructor(),
            implementation: Some(implementation),
        }
    }

    /// Abstract interface method
    pub fn interface_method(name: impl Into<String>, signature: MethodSignature) -> MethodSpec {
        MethodSpec {
            name: name.into(),
            signature,
            flags: MethodFlags::interface_method(),
            implementation: None,
        }
    }
}

/// Collects the members of a type before it is frozen into a [`ClassId`]
pub struct TypeBuilder {
    name: String,
    flags: TypeFlags,
    base: Option<ClassId>,
    interfaces: Vec<ClassId>,
    fields: Vec<FieldId>,
    methods: Vec<MethodSpec>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>, base: Option<&ClassId>, flags: TypeFlags) -> TypeBuilder {
        TypeBuilder {
            name: name.into(),
            flags,
            base: base.cloned(),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implements(&mut self, interface: &ClassId) {
        if !self.interfaces.contains(interface) {
            self.interfaces.push(interface.clone());
        }
    }

    /// Add an instance field
    ///
    /// The field handle can be referenced by code before the type itself is built (this is how
    /// constructors of generated types store into their own fields).
    pub fn add_field(&mut self, name: impl Into<String>, ty: TypeRef) -> FieldId {
        let inherited = self
            .base
            .as_ref()
            .map_or(0, |base| base.instance_fields.len());
        let field = ArcId::new(FieldData {
            name: name.into(),
            ty,
            index: inherited + self.fields.len(),
            declaring_type_name: self.name.clone(),
        });
        self.fields.push(field.clone());
        field
    }

    /// Add a method
    ///
    /// Returns `false` (and drops the method) if a method with the same name, signature, and
    /// staticness was already added.
    pub fn add_method(&mut self, method: MethodSpec) -> bool {
        let is_static = method.flags.contains(MethodFlags::STATIC);
        let duplicate = self.methods.iter().any(|m| {
            m.name == method.name
                && m.signature == method.signature
                && m.flags.contains(MethodFlags::STATIC) == is_static
        });
        if duplicate {
            log::debug!(
                "Ignoring duplicate method {}::{} {}",
                self.name,
                method.name,
                method.signature.render()
            );
            return false;
        }
        self.methods.push(method);
        true
    }

    /// Freeze the type
    pub fn build(self) -> ClassId {
        let TypeBuilder {
            name,
            flags,
            base,
            interfaces,
            fields,
            methods,
        } = self;

        let mut instance_fields: Vec<FieldId> = base
            .as_ref()
            .map_or_else(Vec::new, |base| base.instance_fields.clone());
        instance_fields.extend(fields.iter().cloned());

        let data = Arc::new_cyclic(|declaring_type: &Weak<TypeData>| {
            let methods = methods
                .into_iter()
                .map(|spec| {
                    ArcId::new(MethodData {
                        name: spec.name,
                        signature: spec.signature,
                        flags: spec.flags,
                        implementation: spec.implementation,
                        declaring_type: declaring_type.clone(),
                        declaring_type_name: name.clone(),
                    })
                })
                .collect();

            TypeData {
                name,
                flags,
                base,
                interfaces,
                fields,
                methods,
                instance_fields,
            }
        });
        ArcId(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::NativeMethod;

    fn root() -> ClassId {
        TypeBuilder::new("System.Object", None, TypeFlags::PUBLIC).build()
    }

    fn constant(value: i32) -> MethodSpec {
        MethodSpec {
            name: String::from("Value"),
            signature: MethodSignature::new(vec![], Some(TypeRef::INT32)),
            flags: MethodFlags::public_virtual(),
            implementation: Some(NativeMethod::new(move |_, _| Ok(Value::Int32(value)))),
        }
    }

    #[test]
    fn overrides_resolve_to_most_derived() -> Result<(), Error> {
        let object = root();

        let mut base = TypeBuilder::new("Base", Some(&object), TypeFlags::PUBLIC);
        base.add_method(constant(1));
        let base = base.build();

        let mut derived = TypeBuilder::new("Derived", Some(&base), TypeFlags::PUBLIC);
        derived.add_method(constant(2));
        let derived = derived.build();

        let unrelated = TypeBuilder::new("Unrelated", Some(&base), TypeFlags::PUBLIC).build();

        let method = base.find_method("Value").unwrap();
        let resolved = derived.resolve_override(&method).unwrap();
        assert_eq!(resolved.invoke(&Value::Null, &[])?, Value::Int32(2));

        let inherited = unrelated.resolve_override(&method).unwrap();
        assert_eq!(inherited, method);
        Ok(())
    }

    #[test]
    fn assignability() {
        let object = root();
        let mut interface = TypeBuilder::new("IThing", None, TypeFlags::INTERFACE);
        interface.add_method(MethodSpec::interface_method("Run", MethodSignature::void()));
        let interface = interface.build();

        let mut class = TypeBuilder::new("Thing", Some(&object), TypeFlags::PUBLIC);
        class.implements(&interface);
        let class = class.build();
        let sub = TypeBuilder::new("SubThing", Some(&class), TypeFlags::PUBLIC).build();

        assert!(sub.is_assignable_to(&class));
        assert!(sub.is_assignable_to(&interface));
        assert!(sub.is_assignable_to(&object));
        assert!(interface.is_assignable_to(&object));
        assert!(!class.is_assignable_to(&sub));
        assert_eq!(interface.interface_methods().len(), 1);
    }

    #[test]
    fn fields_are_laid_out_after_inherited_ones() {
        let object = root();
        let mut base = TypeBuilder::new("Base", Some(&object), TypeFlags::PUBLIC);
        let a = base.add_field("a", TypeRef::INT32);
        let base = base.build();

        let mut derived = TypeBuilder::new("Derived", Some(&base), TypeFlags::PUBLIC);
        let b = derived.add_field("b", TypeRef::String);
        let derived = derived.build();

        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(derived.instance_fields().len(), 2);
        assert_eq!(derived.find_field("a"), Some(a));
    }

    #[test]
    fn duplicate_methods_are_dropped() {
        let object = root();
        let mut builder = TypeBuilder::new("Dup", Some(&object), TypeFlags::PUBLIC);
        assert!(builder.add_method(constant(1)));
        assert!(!builder.add_method(constant(2)));
        assert_eq!(builder.build().methods.len(), 1);
    }
}
