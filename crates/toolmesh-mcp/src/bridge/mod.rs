//! Schema bridge: upstream tool schemas become local validators, and each
//! upstream tool becomes a [`ToolProxy`].

mod proxy;
mod validator;

pub use proxy::ToolProxy;
pub use validator::{ValidationError, Validator, compile};
