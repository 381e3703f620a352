//! # Constants
//!
//! Well-known names (labels, annotations, finalizers, field managers) and
//! default values for the lifecycle manager.

// API group of all operator resources
pub const OPERATOR_GROUP: &str = "operator.kyma-project.io";
pub const OPERATOR_VERSION: &str = "v1beta2";
pub const OPERATOR_NAME: &str = "lifecycle-manager";

// Labels
pub const KYMA_NAME_LABEL: &str = "operator.kyma-project.io/kyma-name";
pub const MANAGED_BY_LABEL: &str = "operator.kyma-project.io/managed-by";
pub const WATCHED_BY_LABEL: &str = "operator.kyma-project.io/watched-by";
pub const MODULE_NAME_LABEL: &str = "operator.kyma-project.io/module-name";
pub const INTERNAL_LABEL: &str = "operator.kyma-project.io/internal";
pub const BETA_LABEL: &str = "operator.kyma-project.io/beta";
pub const MANDATORY_MODULE_LABEL: &str = "operator.kyma-project.io/mandatory-module";
pub const SYNC_LABEL: &str = "operator.kyma-project.io/sync";
pub const SKIP_RECONCILIATION_LABEL: &str = "operator.kyma-project.io/skip-reconciliation";
pub const ENABLE_LABEL_VALUE: &str = "true";
pub const DISABLE_LABEL_VALUE: &str = "false";

// Annotations
pub const OWNED_BY_ANNOTATION: &str = "operator.kyma-project.io/owned-by";
pub const SYNC_STRATEGY_ANNOTATION: &str = "sync-strategy";
pub const MODULE_VERSION_ANNOTATION: &str = "operator.kyma-project.io/module-version";

// Finalizers
pub const KYMA_FINALIZER: &str = "operator.kyma-project.io/Kyma";
pub const FOREGROUND_DELETION_FINALIZER: &str = "foregroundDeletion";

// Field managers for server-side apply
pub const CATALOG_SYNC_FIELD_MANAGER: &str = "catalog-sync";
pub const SYNC_CONTEXT_FIELD_MANAGER: &str = "kyma-sync-context";
pub const STATUS_FIELD_MANAGER: &str = "lifecycle-manager";

// Channels
pub const DEFAULT_CHANNEL: &str = "regular";

// Sync
pub const DEFAULT_REMOTE_SYNC_NAMESPACE: &str = "kyma-system";
pub const DEFAULT_REMOTE_KYMA_NAME: &str = "default";
pub const KUBECONFIG_SECRET_KEY: &str = "config";
pub const CRD_NAME_SUFFIX: &str = "operator.kyma-project.io";

// Requeue intervals (seconds)
pub const DEFAULT_REQUEUE_SUCCESS_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEUE_BUSY_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REQUEUE_ERROR_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_REQUEUE_WARNING_INTERVAL_SECS: u64 = 30;

// Grace period after the deletion timestamp before child finalizers are stripped
pub const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 300;

// Error backoff (minutes) applied by the error policy
pub const DEFAULT_ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_ERROR_BACKOFF_MAX_MINUTES: u64 = 10;
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

// Client flow control
pub const DEFAULT_CLIENT_QPS: u64 = 300;
pub const DEFAULT_CLIENT_BURST: usize = 600;

// Concurrency
pub const DEFAULT_CATALOG_SYNC_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 1;

// Runtime
pub const DEFAULT_IN_KCP_MODE: bool = false;
pub const DEFAULT_WEBHOOK_ENABLED: bool = false;

// HTTP server
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

// Watch stream
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
pub const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;
