//! Run configuration: exploration budgets and timeouts, merged from CLI
//! flags and environment variables per SPEC_FULL.md §10.

use std::time::Duration;

/// Tunables for the state-graph explorer and the adapter's default
/// timeouts. Defaults mirror spec.md §4.7/§5.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Global cap on distinct recorded states (spec.md §4.7 "Budget").
    pub max_states: u32,
    /// Per-gate-control cap on sampled non-default options during BFS and
    /// the select-sampling sweep.
    pub max_options_per_select: u32,
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Visibility-wait timeout used by locator tiers 1-5 (spec.md §5: 2s).
    pub visibility_timeout: Duration,
    /// Timeout waiting for the initial service card to render (spec.md
    /// §5: 8s per attempt).
    pub card_timeout: Duration,
    /// Aggregate timeout across the card-render retry budget (spec.md §5:
    /// 24s across 3 retries).
    pub card_timeout_aggregate: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_states: 30,
            max_options_per_select: 5,
            headless: false,
            visibility_timeout: Duration::from_secs(2),
            card_timeout: Duration::from_secs(8),
            card_timeout_aggregate: Duration::from_secs(24),
        }
    }
}

impl RunConfig {
    /// Merge environment overrides onto a base config built from parsed
    /// CLI flags. Env vars take the `AUTOPILOT_` prefix so CI can override
    /// exploration budgets without touching invocation flags.
    pub fn from_env_and_args(mut base: RunConfig) -> RunConfig {
        if let Ok(v) = std::env::var("AUTOPILOT_MAX_STATES") {
            if let Ok(n) = v.parse() {
                base.max_states = n;
            }
        }
        if let Ok(v) = std::env::var("AUTOPILOT_MAX_OPTIONS_PER_SELECT") {
            if let Ok(n) = v.parse() {
                base.max_options_per_select = n;
            }
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.max_states, 30);
        assert_eq!(cfg.max_options_per_select, 5);
    }
}
