pub mod gc;
pub mod identity;
pub mod request;
