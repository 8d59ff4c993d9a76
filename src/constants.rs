//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Label and annotation keys are fixed at compile time. Timing values are
//! defaults that can be overridden through [`crate::config::ControllerConfig`].

/// Label placed on every target secret written by the controller
pub const SYNCED_LABEL_KEY: &str = "cache.weavelab.xyz/synced-from-cache";

/// Value of [`SYNCED_LABEL_KEY`] on secrets the controller owns
pub const SYNCED_LABEL_VALUE: &str = "true";

/// Annotation holding `<namespace>/<name>` of the request a target secret came from
pub const SOURCE_ANNOTATION_KEY: &str = "cache.weavelab.xyz/source";

/// Annotation cert-manager sets on issued secrets to name their Certificate
pub const CERTIFICATE_NAME_ANNOTATION_KEY: &str = "cert-manager.io/certificate-name";

/// Secret data key holding the certificate chain
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret data key holding the private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// Prefix of every derived upstream certificate name
pub const UPSTREAM_NAME_PREFIX: &str = "cc-";

/// Maximum length of a Kubernetes object name
pub const MAX_OBJECT_NAME_LENGTH: usize = 253;

/// Characters of the joined DNS names kept before the hash suffix
/// `UPSTREAM_NAME_PREFIX` + this + a 20 digit hash stays under [`MAX_OBJECT_NAME_LENGTH`]
pub const HASHED_NAME_PREFIX_LENGTH: usize = 125;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "cached-certificate-controller";

/// Default namespace holding the shared upstream certificates and secrets
pub const DEFAULT_CACHE_NAMESPACE: &str = "cached-certificates";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default deadline for a single store call (seconds)
pub const DEFAULT_STORE_CALL_TIMEOUT_SECS: u64 = 10;

/// Fixed wait while the upstream secret has not been issued yet (seconds)
pub const DEFAULT_UPSTREAM_SECRET_RETRY_SECS: u64 = 2;

/// Fixed wait after an upstream secret failed validation (seconds)
pub const DEFAULT_INVALID_SECRET_RETRY_SECS: u64 = 3;

/// Fixed wait before retrying a failed fan-out status write (seconds)
pub const DEFAULT_FANOUT_RETRY_SECS: u64 = 3;

/// Attempts per dependent before the fan-out gives up on a single change
pub const DEFAULT_FANOUT_MAX_ATTEMPTS: u32 = 5;

/// Error policy backoff floor (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;

/// Error policy backoff ceiling (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 30;

/// Default delay before restarting a watch stream after it ends or fails (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Watcher timeout (seconds) - must be less than the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Maximum time to wait for the HTTP server to bind at startup (seconds)
pub const SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Poll interval while waiting for the HTTP server to bind (milliseconds)
pub const SERVER_POLL_INTERVAL_MS: u64 = 50;
