use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("authorization failed")]
    AuthorizationFailure,
    #[error("sampler {sampler} unavailable: {reason}")]
    SamplerUnavailable {
        sampler: &'static str,
        reason: String,
    },
    #[error("unsupported platform family '{0}'")]
    PlatformUnsupported(String),
}

impl ProbeError {
    pub fn unavailable(sampler: &'static str, reason: impl Into<String>) -> Self {
        Self::SamplerUnavailable {
            sampler,
            reason: reason.into(),
        }
    }

    /// Short label for server-side logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationFailure => "authorization",
            Self::SamplerUnavailable { .. } => "sampler",
            Self::PlatformUnsupported(_) => "platform",
        }
    }
}
