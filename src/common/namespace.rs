//! Runtime namespace identifiers.

crate::impl_bytes!(Namespace, 32, "Chain namespace identifying a runtime.");
