pub mod backend;
pub mod codec;
pub mod engine_delegate;
pub mod transform;
