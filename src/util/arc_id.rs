use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Shared handle whose "identity" for equality, ordering and hashing is determined from the
/// allocation itself (ie. the pointer) and not from the underlying data.
///
/// Types, methods and fields are all compared this way: two structurally identical types built
/// separately are still different types.
pub struct ArcId<T: ?Sized>(pub Arc<T>);

impl<T> ArcId<T> {
    pub fn new(value: T) -> ArcId<T> {
        ArcId(Arc::new(value))
    }
}

impl<T: ?Sized> ArcId<T> {
    /// Raw address used for identity
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ArcId<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Clone for ArcId<T> {
    fn clone(&self) -> Self {
        ArcId(self.0.clone())
    }
}

impl<T: ?Sized> Hash for ArcId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl<T: ?Sized> PartialEq for ArcId<T> {
    fn eq(&self, other: &ArcId<T>) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized> Eq for ArcId<T> {}

impl<T: ?Sized> PartialOrd for ArcId<T> {
    fn partial_cmp(&self, other: &ArcId<T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for ArcId<T> {
    fn cmp(&self, other: &ArcId<T>) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: ?Sized> Deref for ArcId<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> From<Arc<T>> for ArcId<T> {
    fn from(arc: Arc<T>) -> ArcId<T> {
        ArcId(arc)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ArcId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_not_structure() {
        let a = ArcId::new(String::from("same"));
        let b = ArcId::new(String::from("same"));
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b);

        let set: HashSet<ArcId<String>> = vec![a, a2, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
