use anyhow::{Context, Result};
use keyring::Entry;

/// Keychain service the console files its passwords under
const DEFAULT_SERVICE: &str = "shiftguard";

/// Passwords saved in the OS keychain, keyed by account email.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::for_service(DEFAULT_SERVICE)
    }

    /// Use a different keychain service, e.g. one per API environment
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, email: &str) -> Result<Entry> {
        Entry::new(&self.service, email)
            .with_context(|| format!("Failed to open keychain entry for {}", email))
    }

    pub fn store(&self, email: &str, password: &str) -> Result<()> {
        self.entry(email)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    pub fn password(&self, email: &str) -> Result<String> {
        self.entry(email)?
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    pub fn forget(&self, email: &str) -> Result<()> {
        self.entry(email)?
            .delete_credential()
            .context("Failed to delete password from keychain")
    }

    pub fn has_password(&self, email: &str) -> bool {
        self.password(email).is_ok()
    }
}
