pub(crate) mod approve;
pub(crate) mod meta;
pub(crate) mod pull;
pub(crate) mod push;
pub(crate) mod shared;
