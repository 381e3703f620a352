use thiserror::Error;

/// Why no template could be used for a module
///
/// Attached to the module it concerns; never aborts resolution of the others.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no unique template could be identified for module {module}: candidates {}", candidates.join(", "))]
    Ambiguous {
        module: String,
        candidates: Vec<String>,
    },

    #[error("no templates were found for module {module} in channel {channel}")]
    NoTemplateInChannel { module: String, channel: String },

    #[error("no channel found on template {template} for module {module}")]
    EmptyChannel { module: String, template: String },

    #[error("module template {template} not allowed: {reason}")]
    NotAllowed {
        template: String,
        reason: &'static str,
    },

    #[error("module template update not allowed: {message}")]
    UpdateNotAllowed { message: String },
}

impl TemplateError {
    pub fn is_update_not_allowed(&self) -> bool {
        matches!(self, TemplateError::UpdateNotAllowed { .. })
    }

    /// Errors that leave the module in `Warning` instead of `Error`
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            TemplateError::UpdateNotAllowed { .. } | TemplateError::NoTemplateInChannel { .. }
        )
    }
}
