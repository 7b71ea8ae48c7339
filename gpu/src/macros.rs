/// Defines a resource type wrapping `Handle` with the given info type.
macro_rules! define_handle {
    ($(#[$meta:meta])* pub struct $resource:ident($info:ty);) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $resource {
            handle: $crate::resource::Handle<Self>,
        }

        impl $crate::resource::ResourceTrait for $resource {
            type Info = $info;

            fn from_handle(handle: $crate::resource::Handle<Self>) -> Self {
                Self { handle }
            }

            fn handle(&self) -> &$crate::resource::Handle<Self> {
                &self.handle
            }
        }

        impl $resource {
            pub fn info(&self) -> &$info {
                self.handle.info()
            }
        }
    };
}
