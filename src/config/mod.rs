use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// What to do with a Transfer row whose file commit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Leave the incomplete Transfer in place (visible in the feed).
    Retain,
    /// Roll the transfer back immediately and sweep stale ones in the
    /// background.
    Purge,
}

impl OrphanPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "retain" => Some(Self::Retain),
            "purge" => Some(Self::Purge),
            _ => None,
        }
    }
}

/// Deposit service configuration
#[derive(Debug, Clone)]
pub struct DepositConfig {
    /// Root directory for stored packages (default: "./deposit-storage")
    pub storage_root: PathBuf,

    /// Global maximum upload size in bytes (default: 256 MB).
    /// Projects may override this downward or upward per row.
    pub max_upload_size: u64,

    /// Basic auth realm presented in 401 challenges (default: "deposit")
    pub realm: String,

    /// How long a single upload may take before it is aborted
    /// (default: 3600 s)
    pub upload_timeout: Duration,

    /// Fate of Transfer rows left behind by failed commits (default: retain)
    pub orphan_policy: OrphanPolicy,

    /// Age after which the background sweeper purges incomplete transfers,
    /// only applied when the policy is `Purge` (default: 24 h)
    pub orphan_max_age: Duration,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./deposit-storage"),
            max_upload_size: 256 * 1024 * 1024,
            realm: "deposit".to_string(),
            upload_timeout: Duration::from_secs(3600),
            orphan_policy: OrphanPolicy::Retain,
            orphan_max_age: Duration::from_secs(24 * 3600),
        }
    }
}

impl DepositConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.storage_root),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            realm: env::var("DEPOSIT_REALM").unwrap_or(default.realm),

            upload_timeout: env::var("UPLOAD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.upload_timeout),

            orphan_policy: env::var("ORPHAN_POLICY")
                .ok()
                .and_then(|v| OrphanPolicy::parse(&v))
                .unwrap_or(default.orphan_policy),

            orphan_max_age: env::var("ORPHAN_MAX_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|h: u64| Duration::from_secs(h * 3600))
                .unwrap_or(default.orphan_max_age),
        }
    }

    /// Effective upload cap for a project, honoring its override.
    pub fn effective_max_upload_size(&self, project_override: Option<i64>) -> u64 {
        match project_override {
            Some(n) if n >= 0 => n as u64,
            _ => self.max_upload_size,
        }
    }
}
