//! # Templates
//!
//! Channel-based resolution of module templates.

mod error;
mod lookup;

pub use error::TemplateError;
pub use lookup::{
    desired_channel, parse_version, resolve_module, resolve_modules, ResolvedModule, ResolvedTemplate,
};
