use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

type CloneFn = fn(&Any) -> Any;

/// A type-erased, move-only value with a runtime type tag.
///
/// Values are recoverable only by exact-type extraction. Cloning is opt-in:
/// values created through [`Any::cloneable`] carry a clone function, values
/// created through [`Any::new`] do not and can only be moved.
pub struct Any {
    value: Box<dyn std::any::Any + Send + Sync>,
    clone_fn: Option<CloneFn>,
}

impl Any {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            clone_fn: None,
        }
    }

    pub fn cloneable<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            clone_fn: Some(clone_impl::<T>),
        }
    }

    pub fn type_id(&self) -> TypeId {
        (*self.value).type_id()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        let clone_fn = self.clone_fn;
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(Self { value, clone_fn }),
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn try_clone(&self) -> Option<Self> {
        self.clone_fn.map(|f| f(self))
    }
}

fn clone_impl<T: Clone + Send + Sync + 'static>(any: &Any) -> Any {
    let value = any
        .downcast_ref::<T>()
        .expect("clone fn invoked on mismatched type");
    Any::cloneable(value.clone())
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Any")
            .field("type", &self.type_id())
            .field("cloneable", &self.clone_fn.is_some())
            .finish()
    }
}

/// Stable displayable identity for unnamed native types.
pub fn type_id_hash(id: TypeId) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_exact_type() {
        let any = Any::new(7i32);
        assert_eq!(TypeId::of::<i32>(), any.type_id());
        assert!(any.is::<i32>());
        assert_eq!(7, any.downcast::<i32>().ok().unwrap());
    }

    #[test]
    fn downcast_wrong_type_returns_value() {
        let any = Any::new(7i32);
        let any = any.downcast::<String>().unwrap_err();
        assert_eq!(7, any.downcast::<i32>().ok().unwrap());
    }

    #[test]
    fn cloneable_values_clone() {
        let any = Any::cloneable(String::from("abc"));
        let copy = any.try_clone().unwrap();
        assert_eq!("abc", copy.downcast::<String>().ok().unwrap());
        assert_eq!("abc", any.downcast::<String>().ok().unwrap());
    }

    #[test]
    fn move_only_values_do_not_clone() {
        let any = Any::new(std::sync::Arc::new(5i32));
        assert!(any.try_clone().is_none());
    }
}
