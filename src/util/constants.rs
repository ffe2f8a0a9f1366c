//! Centralized constants for flowline runtime configuration
//!
//! All timeout and limit values in one place for easy tuning.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
// Execution Timeouts
// ═══════════════════════════════════════════════════════════════

/// Per-step timeout when neither the step nor `config.execution` sets one
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for establishing HTTP connections to providers
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════════════════════════
// Retry Defaults
// ═══════════════════════════════════════════════════════════════

/// Retries after the first provider attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Backoff ceiling
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_millis(10_000);

// ═══════════════════════════════════════════════════════════════
// Limits
// ═══════════════════════════════════════════════════════════════

/// Maximum tool-call round trips inside a single generation
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Maximum edit distance for "did you mean" suggestions
pub const SUGGESTION_DISTANCE: usize = 2;

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════
