use super::{Error, Fault};
use crate::types::{BaseType, ClassId, FieldData, MethodId, RenderDescriptor, TypeRef};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub type ObjectRef = Arc<Object>;
pub type ArrayRef = Arc<Array>;
pub type HostRef = Arc<HostObject>;

/// Value on the operand stack, in a local, in a field, or passed across an invocation
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(Arc<str>),
    Object(ObjectRef),
    Array(ArrayRef),

    /// Value type boxed into an object
    Boxed(Arc<Value>),

    /// Runtime handle to a method (result of `ldtoken`)
    Member(MethodId),

    /// Instance of a host type
    Host(HostRef),
}

/// Instance of a (non-host) class
pub struct Object {
    pub class: ClassId,

    /// Instance field storage, indexed by `FieldData::index`
    fields: Mutex<Vec<Value>>,
}

impl Object {
    /// Allocate an instance with every field set to its default
    pub fn new(class: &ClassId) -> ObjectRef {
        let fields = class
            .instance_fields()
            .iter()
            .map(|field| Value::default_for(&field.ty))
            .collect();
        Arc::new(Object {
            class: class.clone(),
            fields: Mutex::new(fields),
        })
    }

    pub fn get_field(&self, field: &FieldData) -> Result<Value, Error> {
        self.fields
            .lock()
            .get(field.index)
            .cloned()
            .ok_or_else(|| self.not_a_field(field))
    }

    pub fn set_field(&self, field: &FieldData, value: Value) -> Result<(), Error> {
        let mut fields = self.fields.lock();
        match fields.get_mut(field.index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.not_a_field(field)),
        }
    }

    fn not_a_field(&self, field: &FieldData) -> Error {
        Error::Fault(Fault::InvalidCast {
            from: self.class.name.clone(),
            to: field.declaring_type_name().to_owned(),
        })
    }
}

/// Single dimensional, zero-based array
pub struct Array {
    pub element: TypeRef,
    items: Mutex<Vec<Value>>,
}

impl Array {
    pub fn new(element: TypeRef, length: usize) -> ArrayRef {
        let items = vec![Value::default_for(&element); length];
        Arc::new(Array {
            element,
            items: Mutex::new(items),
        })
    }

    pub fn from_values(element: TypeRef, items: Vec<Value>) -> ArrayRef {
        Arc::new(Array {
            element,
            items: Mutex::new(items),
        })
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: i64) -> Result<Value, Error> {
        let items = self.items.lock();
        usize::try_from(index)
            .ok()
            .and_then(|idx| items.get(idx).cloned())
            .ok_or(Error::Fault(Fault::IndexOutOfRange {
                index,
                length: items.len(),
            }))
    }

    pub fn set(&self, index: i64, value: Value) -> Result<(), Error> {
        let mut items = self.items.lock();
        let length = items.len();
        match usize::try_from(index).ok().and_then(|idx| items.get_mut(idx)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::Fault(Fault::IndexOutOfRange { index, length })),
        }
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.lock().clone()
    }
}

/// Opaque host data wearing a host type
pub struct HostObject {
    pub class: ClassId,
    pub data: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T: Any + Send + Sync>(class: &ClassId, data: T) -> HostRef {
        HostObject::from_arc(class, Arc::new(data))
    }

    pub fn from_arc(class: &ClassId, data: Arc<dyn Any + Send + Sync>) -> HostRef {
        Arc::new(HostObject {
            class: class.clone(),
            data,
        })
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl Value {
    /// Initial value of a field, local, or array element
    pub fn default_for(ty: &TypeRef) -> Value {
        match ty {
            TypeRef::Base(BaseType::Boolean) => Value::Boolean(false),
            TypeRef::Base(BaseType::Int32) => Value::Int32(0),
            TypeRef::Base(BaseType::Int64) => Value::Int64(0),
            TypeRef::Base(BaseType::Float64) => Value::Float64(0.0),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Class of an object or host instance
    pub fn runtime_class(&self) -> Option<&ClassId> {
        match self {
            Value::Object(object) => Some(&object.class),
            Value::Host(host) => Some(&host.class),
            _ => None,
        }
    }

    /// Name of the dynamic type of the value (for error messages)
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => String::from("null"),
            Value::Boolean(_) => TypeRef::BOOLEAN.render(),
            Value::Int32(_) => TypeRef::INT32.render(),
            Value::Int64(_) => TypeRef::INT64.render(),
            Value::Float64(_) => TypeRef::FLOAT64.render(),
            Value::String(_) => TypeRef::String.render(),
            Value::Object(object) => object.class.name.clone(),
            Value::Array(array) => TypeRef::array_of(array.element.clone()).render(),
            Value::Boxed(inner) => format!("boxed {}", inner.type_name()),
            Value::Member(_) => String::from("method handle"),
            Value::Host(host) => host.class.name.clone(),
        }
    }

    /// Is the value an unboxed primitive of exactly this base type?
    fn is_base(&self, base: BaseType) -> bool {
        matches!(
            (self, base),
            (Value::Boolean(_), BaseType::Boolean)
                | (Value::Int32(_), BaseType::Int32)
                | (Value::Int64(_), BaseType::Int64)
                | (Value::Float64(_), BaseType::Float64)
        )
    }

    /// Could the value be stored in a location of type `ty` without conversion?
    ///
    /// `null` is an instance of every reference type.
    pub fn is_instance_of(&self, ty: &TypeRef) -> bool {
        match (self, ty) {
            (_, TypeRef::Base(base)) => self.is_base(*base),
            (Value::Null, _) => true,
            (_, TypeRef::Class(class)) if class.is_root() => true,
            (Value::String(_), TypeRef::String) => true,
            (Value::Array(array), TypeRef::Array(element)) => {
                array.element == **element || element.is_root_object()
            }
            (Value::Object(_), TypeRef::Class(class)) | (Value::Host(_), TypeRef::Class(class)) => {
                self.runtime_class()
                    .map_or(false, |runtime| runtime.is_assignable_to(class))
            }
            _ => false,
        }
    }

    fn invalid_cast(&self, ty: &TypeRef) -> Error {
        Error::Fault(Fault::InvalidCast {
            from: self.type_name(),
            to: ty.render(),
        })
    }

    /// `castclass`: check that a reference is an instance of `ty`
    pub fn cast_class(self, ty: &TypeRef) -> Result<Value, Error> {
        if !ty.is_value_type() && self.is_instance_of(ty) {
            Ok(self)
        } else {
            Err(self.invalid_cast(ty))
        }
    }

    /// `box`: turn a value of type `ty` into an object (no-op for reference types)
    pub fn box_as(self, ty: &TypeRef) -> Result<Value, Error> {
        match ty {
            TypeRef::Base(base) if self.is_base(*base) => Ok(Value::Boxed(Arc::new(self))),
            TypeRef::Base(_) => Err(self.invalid_cast(ty)),
            _ => Ok(self),
        }
    }

    /// `unbox.any`: recover a value of type `ty` from an object
    ///
    /// For reference types this behaves like `castclass`. Primitives that were never boxed (for
    /// instance return values set from host code) are accepted as is.
    pub fn unbox_any(self, ty: &TypeRef) -> Result<Value, Error> {
        match ty {
            TypeRef::Base(base) => {
                let unboxed = match &self {
                    Value::Boxed(inner) => (**inner).clone(),
                    Value::Null => return Err(Error::Fault(Fault::NullReference)),
                    other => other.clone(),
                };
                if unboxed.is_base(*base) {
                    Ok(unboxed)
                } else {
                    Err(self.invalid_cast(ty))
                }
            }
            _ => self.cast_class(ty),
        }
    }

    /// Coerce a value to fit a location of type `ty`
    ///
    /// This is the conversion applied to values crossing the host boundary: primitives get
    /// unboxed, references get checked.
    pub fn coerce(self, ty: &TypeRef) -> Result<Value, Error> {
        match ty {
            TypeRef::Base(_) => self.unbox_any(ty),
            _ if self.is_instance_of(ty) => Ok(self),
            _ => Err(self.invalid_cast(ty)),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            Value::Boxed(inner) => inner.as_i32(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Int64(i) => Some(*i),
            Value::Boxed(inner) => inner.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Boxed(inner) => inner.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&MethodId> {
        match self {
            Value::Member(method) => Some(method),
            _ => None,
        }
    }

    /// Downcast the data of a host instance
    pub fn as_host<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Host(host) => host.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Boxed(a), Value::Boxed(b)) => a == b,
            (Value::Member(a), Value::Member(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}L", i),
            Value::Float64(d) => write!(f, "{:?}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(object) => write!(f, "{}@{:p}", object.class.name, Arc::as_ptr(object)),
            Value::Array(array) => write!(f, "{:?}", array.to_vec()),
            Value::Boxed(inner) => write!(f, "box({:?})", inner),
            Value::Member(method) => write!(f, "token({:?})", method),
            Value::Host(host) => write!(f, "{}@{:p}", host.class.name, Arc::as_ptr(host)),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Value {
        Value::Float64(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(Arc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Value {
        Value::Object(object)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{TypeBuilder, TypeFlags};

    #[test]
    fn boxing() -> Result<(), Error> {
        let boxed = Value::Int32(7).box_as(&TypeRef::INT32)?;
        assert!(matches!(boxed, Value::Boxed(_)));
        assert_eq!(boxed.clone().unbox_any(&TypeRef::INT32)?, Value::Int32(7));
        assert!(boxed.clone().unbox_any(&TypeRef::INT64).is_err());
        assert_eq!(
            Value::Null.unbox_any(&TypeRef::BOOLEAN).unwrap_err().to_string(),
            "null reference"
        );

        // Reference types are not boxed
        let s = Value::from("hi").box_as(&TypeRef::String)?;
        assert_eq!(s, Value::from("hi"));
        Ok(())
    }

    #[test]
    fn casts() {
        let object = TypeBuilder::new("System.Object", None, TypeFlags::PUBLIC).build();
        let animal = TypeBuilder::new("Animal", Some(&object), TypeFlags::PUBLIC).build();
        let dog = TypeBuilder::new("Dog", Some(&animal), TypeFlags::PUBLIC).build();

        let rex = Value::Object(Object::new(&dog));
        assert!(rex.clone().cast_class(&TypeRef::class(&animal)).is_ok());
        assert!(rex.clone().cast_class(&TypeRef::class(&object)).is_ok());
        assert!(Value::Object(Object::new(&animal))
            .cast_class(&TypeRef::class(&dog))
            .is_err());
        assert!(Value::Null.cast_class(&TypeRef::class(&dog)).is_ok());
        assert!(Value::from("x").cast_class(&TypeRef::class(&object)).is_ok());
        assert!(Value::from(1).cast_class(&TypeRef::String).is_err());
    }

    #[test]
    fn arrays() -> Result<(), Error> {
        let array = Array::new(TypeRef::String, 2);
        array.set(1, Value::from("b"))?;
        assert_eq!(array.get(0)?, Value::Null);
        assert_eq!(array.get(1)?, Value::from("b"));
        assert!(matches!(
            array.get(2),
            Err(Error::Fault(Fault::IndexOutOfRange { index: 2, length: 2 }))
        ));
        assert!(array.set(-1, Value::Null).is_err());
        Ok(())
    }
}
