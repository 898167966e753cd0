/// Who is calling. Resolved from the bearer token by the API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A customer account; may only see and create its own scans.
    Owner(String),
    /// Trusted internal caller allowed to report scan status.
    Service,
}

impl Identity {
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Self::Owner(id) => Some(id),
            Self::Service => None,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service)
    }
}
