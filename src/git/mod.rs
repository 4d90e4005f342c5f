// Git operations: shallow clone/checkout.

mod clone;

pub use clone::{clone_or_update, CloneAuth};
