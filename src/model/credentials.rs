use crate::error::{Error, Result};
use std::fmt;

/// Service principal used to authenticate against the registry.
///
/// Built from `TENANT_ID`, `CLIENT_ID` and `CLIENT_SECRET`. Missing values are
/// kept as `None` and only reported when a session is opened.
#[derive(Clone, Default)]
pub struct ServicePrincipal {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ServicePrincipal {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            tenant_id: var("TENANT_ID"),
            client_id: var("CLIENT_ID"),
            client_secret: var("CLIENT_SECRET"),
        }
    }

    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            client_id: Some(client_id.to_string()),
            client_secret: Some(client_secret.to_string()),
        }
    }

    pub fn tenant_id(&self) -> Result<&str> {
        required(&self.tenant_id, "TENANT_ID")
    }

    pub fn client_id(&self) -> Result<&str> {
        required(&self.client_id, "CLIENT_ID")
    }

    pub fn client_secret(&self) -> Result<&str> {
        required(&self.client_secret, "CLIENT_SECRET")
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::AuthenticationFailed(format!("{} is not set", name)))
}

impl fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
