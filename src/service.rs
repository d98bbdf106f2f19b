use crate::auth::AccessGuard;
use crate::error::ProbeError;
use crate::snapshot::Assembler;
use crate::wire;
use std::sync::Arc;

/// Token in, record out. Shared by the HTTP route and the TCP daemon.
#[derive(Clone)]
pub struct PulseService {
    guard: Arc<AccessGuard>,
    assembler: Arc<Assembler>,
    delimiter: Arc<str>,
}

impl PulseService {
    pub fn new(guard: AccessGuard, assembler: Assembler, delimiter: &str) -> Self {
        Self {
            guard: Arc::new(guard),
            assembler: Arc::new(assembler),
            delimiter: Arc::from(delimiter),
        }
    }

    /// Samplers only run once the token has been accepted.
    pub async fn respond(&self, token: &str) -> Result<String, ProbeError> {
        self.guard.authorize(token)?;
        self.sample().await
    }

    /// Samples without authorization; for local use only.
    pub async fn sample(&self) -> Result<String, ProbeError> {
        let snapshot = self.assembler.assemble().await?;
        Ok(wire::encode(&snapshot, &self.delimiter))
    }
}
