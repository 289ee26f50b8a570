//! Canonical default values shared by the agent and its tests.

use std::time::Duration;

/// Service endpoint used when no `--url` override is given.
pub const BASE_URL_TEMPLATE: &str =
    "https://api.opsani.com/accounts/{account}/applications/{app_id}/servo";

/// Delay between retries of a failed service post.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(20);

/// The very first `WHATS_NEXT` retry of a run happens sooner, so a freshly
/// restarted agent picks up its pending command quickly.
pub const FIRST_POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long to wait for a driver to exit after both of its output pipes
/// reached EOF before killing it.
pub const DRIVER_EXIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on a single write to the driver's stdin pipe.
pub const STDIN_CHUNK_SIZE: usize = 512;

/// Cap on driver stderr appended to a failure message.
pub const MAX_STDERR_BYTES: usize = 2 * 1024 * 1024 - 16;

/// Marker appended to stderr output cut at [`MAX_STDERR_BYTES`].
pub const STDERR_TRUNCATION_MARKER: &str = "...(truncated)";

/// Sleep applied when a SLEEP command carries no usable duration.
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(120);

/// Retry budget for the GOODBYE event.
pub const GOODBYE_RETRIES: u32 = 3;

/// Retry budget for progress posts. Progress is best-effort and must not
/// stall the driver behind it.
pub const PROGRESS_RETRIES: u32 = 1;

/// Where the bearer token is mounted unless `--auth-token` overrides it.
pub const DEFAULT_AUTH_TOKEN_PATH: &str = "/run/secrets/optune_auth_token";

/// Driver executables, resolved relative to the working directory.
pub const ADJUST_DRIVER: &str = "./adjust";
pub const MEASURE_DRIVER: &str = "./measure";
pub const ENVIRONMENT_DRIVER: &str = "./environment";

/// Legacy metric alias: servers that predate `perf` expect the agent to
/// mirror `requests throughput` under that name.
pub const PERF_METRIC: &str = "perf";
pub const REQUESTS_THROUGHPUT_METRIC: &str = "requests throughput";

// Environment variables.
pub const ENV_ACCOUNT: &str = "OPTUNE_ACCOUNT";
pub const ENV_PERF: &str = "OPTUNE_PERF";
pub const ENV_VERBOSE_STDERR: &str = "OPTUNE_VERBOSE_STDERR";
pub const ENV_IO_TIMEOUT: &str = "OPTUNE_IO_TIMEOUT";
pub const ENV_RETRY_DELAY: &str = "SERVO_RETRY_DELAY_SEC";
