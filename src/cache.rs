pub(crate) mod chain;
pub(crate) mod disk;
pub(crate) mod key;
pub(crate) mod memory;
pub(crate) mod prefetch;
pub(crate) mod recycle;
pub(crate) mod store;
