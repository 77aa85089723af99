use super::ClassId;
use std::fmt;

/// Utility trait for rendering types and signatures in their textual (IL assembler) form
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Boolean,
    Int32,
    Int64,
    Float64,
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let name = match self {
            BaseType::Boolean => "bool",
            BaseType::Int32 => "int32",
            BaseType::Int64 => "int64",
            BaseType::Float64 => "float64",
        };
        write_to.push_str(name);
    }
}

/// Type of a parameter, return value, field, or local variable
///
/// Only some of these can be marshalled through an invocation descriptor: by-reference, pointer,
/// and generic parameter types are representable (so that contracts mentioning them can be
/// rejected with a useful message) but are never valid in generated code.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Base(BaseType),
    String,
    Class(ClassId),
    Array(Box<TypeRef>),
    ByRef(Box<TypeRef>),
    Pointer(Box<TypeRef>),
    GenericParameter(u16),
}

impl TypeRef {
    pub const BOOLEAN: TypeRef = TypeRef::Base(BaseType::Boolean);
    pub const INT32: TypeRef = TypeRef::Base(BaseType::Int32);
    pub const INT64: TypeRef = TypeRef::Base(BaseType::Int64);
    pub const FLOAT64: TypeRef = TypeRef::Base(BaseType::Float64);

    pub fn class(class: &ClassId) -> TypeRef {
        TypeRef::Class(class.clone())
    }

    pub fn array_of(element: TypeRef) -> TypeRef {
        TypeRef::Array(Box::new(element))
    }

    /// Is this a value type (needs boxing to be seen as an object)?
    pub fn is_value_type(&self) -> bool {
        matches!(self, TypeRef::Base(_))
    }

    /// Is this the root of the class hierarchy?
    pub fn is_root_object(&self) -> bool {
        match self {
            TypeRef::Class(class) => class.is_root(),
            _ => false,
        }
    }

    /// Can a value of this type be packed into an `object` and back?
    pub fn is_marshallable(&self) -> bool {
        match self {
            TypeRef::Base(_) | TypeRef::String | TypeRef::Class(_) => true,
            TypeRef::Array(element) => element.is_marshallable(),
            TypeRef::ByRef(_) | TypeRef::Pointer(_) | TypeRef::GenericParameter(_) => false,
        }
    }
}

impl RenderDescriptor for TypeRef {
    fn render_to(&self, write_to: &mut String) {
        match self {
            TypeRef::Base(base) => base.render_to(write_to),
            TypeRef::String => write_to.push_str("string"),
            TypeRef::Class(class) => write_to.push_str(&class.name),
            TypeRef::Array(element) => {
                element.render_to(write_to);
                write_to.push_str("[]");
            }
            TypeRef::ByRef(element) => {
                element.render_to(write_to);
                write_to.push('&');
            }
            TypeRef::Pointer(element) => {
                element.render_to(write_to);
                write_to.push('*');
            }
            TypeRef::GenericParameter(idx) => {
                write_to.push('!');
                write_to.push_str(&idx.to_string());
            }
        }
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parameters and return type of a method (`None` return type means `void`)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub parameters: Vec<TypeRef>,
    pub return_type: Option<TypeRef>,
}

impl MethodSignature {
    pub fn new(parameters: Vec<TypeRef>, return_type: Option<TypeRef>) -> MethodSignature {
        MethodSignature {
            parameters,
            return_type,
        }
    }

    /// `void ()`
    pub fn void() -> MethodSignature {
        MethodSignature::new(vec![], None)
    }

    pub fn returns_value(&self) -> bool {
        self.return_type.is_some()
    }
}

impl RenderDescriptor for MethodSignature {
    fn render_to(&self, write_to: &mut String) {
        match &self.return_type {
            None => write_to.push_str("void"),
            Some(return_type) => return_type.render_to(write_to),
        }
        write_to.push_str(" (");
        for (idx, parameter) in self.parameters.iter().enumerate() {
            if idx > 0 {
                write_to.push_str(", ");
            }
            parameter.render_to(write_to);
        }
        write_to.push(')');
    }
}

impl fmt::Debug for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn render_signatures() {
        let signature = MethodSignature::new(
            vec![TypeRef::INT32, TypeRef::array_of(TypeRef::String)],
            Some(TypeRef::BOOLEAN),
        );
        assert_eq!(signature.render(), "bool (int32, string[])");
        assert_eq!(MethodSignature::void().render(), "void ()");
        assert_eq!(
            TypeRef::ByRef(Box::new(TypeRef::INT64)).render(),
            String::from("int64&")
        );
    }

    #[test]
    fn marshallable_types() {
        assert!(TypeRef::FLOAT64.is_marshallable());
        assert!(TypeRef::array_of(TypeRef::INT32).is_marshallable());
        assert!(!TypeRef::ByRef(Box::new(TypeRef::INT32)).is_marshallable());
        assert!(!TypeRef::array_of(TypeRef::Pointer(Box::new(TypeRef::INT32))).is_marshallable());
        assert!(!TypeRef::GenericParameter(0).is_marshallable());
    }
}
