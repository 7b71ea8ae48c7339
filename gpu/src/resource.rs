use std::{
    any::{Any, TypeId},
    fmt::Debug,
    marker::PhantomData,
    sync::Arc,
};

pub trait ResourceTrait: Sized {
    /// Resource info.
    type Info: Clone + Debug + Send + Sync + 'static;

    fn from_handle(handle: Handle<Self>) -> Self;

    fn handle(&self) -> &Handle<Self>;
}

/// Backend payload of a resource.
/// Dropping the payload releases the backend object.
pub trait Specific<R>: Debug + Send + Sync + 'static {}

struct ResourceData<R: ResourceTrait, S: ?Sized> {
    marker: PhantomData<fn() -> R>,
    info: R::Info,
    specific: S,
}

trait AnyResource: Any + Debug + Send + Sync {
    fn specific_type_id(&self) -> TypeId;
}

impl<T> AnyResource for T
where
    T: Any + Debug + Send + Sync,
{
    fn specific_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }
}

impl dyn AnyResource {
    fn is<T: 'static>(&self) -> bool {
        self.specific_type_id() == TypeId::of::<T>()
    }

    fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if self.is::<T>() {
            Some(unsafe { &*(self as *const Self as *const T) })
        } else {
            None
        }
    }
}

/// Shared handle to a resource.
/// Resource is released when the last handle is dropped.
#[repr(transparent)]
pub struct Handle<R: ResourceTrait>(Arc<ResourceData<R, dyn AnyResource>>);

impl<R> Handle<R>
where
    R: ResourceTrait,
{
    /// Wraps backend payload and backend-agnostic info.
    pub fn new<S: Specific<R>>(specific: S, info: R::Info) -> Self {
        Handle(Arc::new(ResourceData {
            marker: PhantomData,
            info,
            specific,
        }))
    }

    /// Returns backend payload if it is of type `S`.
    pub fn specific_ref<S: Specific<R>>(&self) -> Option<&S> {
        self.0.specific.downcast_ref()
    }

    /// Returns the info supplied to `Handle::new`.
    pub fn info(&self) -> &R::Info {
        &self.0.info
    }

    /// Number of live clones of this handle.
    pub fn clones(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<R: ResourceTrait> PartialEq for Handle<R> {
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.0, &rhs.0)
    }
}

impl<R: ResourceTrait> Eq for Handle<R> {}

impl<R: ResourceTrait> std::hash::Hash for Handle<R> {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        (Arc::as_ptr(&self.0) as *const u8).hash(state)
    }
}

impl<R: ResourceTrait> Debug for Handle<R> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Handle")
                .field("ptr", &Arc::as_ptr(&self.0))
                .field("info", self.info())
                .field("specific", &&self.0.specific)
                .finish()
        } else {
            Debug::fmt(&(Arc::as_ptr(&self.0) as *const u8), fmt)
        }
    }
}

impl<R: ResourceTrait> Clone for Handle<R> {
    fn clone(&self) -> Self {
        Handle(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Payload(u32);

    #[derive(Debug)]
    struct Other;

    define_handle! {
        pub struct Dummy(&'static str);
    }

    impl Specific<Dummy> for Payload {}
    impl Specific<Dummy> for Other {}

    #[test]
    fn handle_downcasts_to_payload_type() {
        let dummy = Dummy::from_handle(Handle::new(Payload(7), "dummy"));
        assert_eq!(dummy.handle().specific_ref::<Payload>().unwrap().0, 7);
        assert!(dummy.handle().specific_ref::<Other>().is_none());
        assert_eq!(*dummy.info(), "dummy");
    }

    #[test]
    fn handles_compare_by_identity() {
        let a = Dummy::from_handle(Handle::new(Payload(1), "a"));
        let b = Dummy::from_handle(Handle::new(Payload(1), "a"));
        let c = a.clone();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a.handle().clones(), 2);
    }
}
