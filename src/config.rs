// src/config.rs

use std::collections::HashMap;
use std::env;

use dotenvy::dotenv;
use url::Url;

use crate::engine::IntegrityPolicy;
use crate::models::integrity::{EventKind, Severity};

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When unset the service runs on the
    /// in-memory store (state does not survive restart).
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    /// Grading service endpoint; unset routes every session to the manual
    /// grading queue.
    pub grading_endpoint: Option<Url>,
    pub plagiarism_endpoint: Option<Url>,
    pub policy: IntegrityPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let grading_endpoint = parse_endpoint("GRADING_ENDPOINT");
        let plagiarism_endpoint = parse_endpoint("PLAGIARISM_ENDPOINT");

        Self {
            database_url,
            bind_addr,
            jwt_secret,
            jwt_expiration,
            rust_log,
            grading_endpoint,
            plagiarism_endpoint,
            policy: policy_from_env(),
        }
    }
}

fn parse_endpoint(var: &str) -> Option<Url> {
    let raw = env::var(var).ok()?;
    match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(e) => panic!("{} is not a valid URL ({}): {}", var, raw, e),
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Integrity policy from the environment, falling back to product defaults.
/// Penalty and floor values are whole points, converted to centipoints here.
fn policy_from_env() -> IntegrityPolicy {
    let defaults = IntegrityPolicy::default();
    IntegrityPolicy {
        penalty_low_centi: env_parse("INTEGRITY_PENALTY_LOW", defaults.penalty_low_centi / 100)
            * 100,
        penalty_medium_centi: env_parse(
            "INTEGRITY_PENALTY_MEDIUM",
            defaults.penalty_medium_centi / 100,
        ) * 100,
        penalty_high_centi: env_parse("INTEGRITY_PENALTY_HIGH", defaults.penalty_high_centi / 100)
            * 100,
        escalation_after: env_parse("INTEGRITY_ESCALATION_AFTER", defaults.escalation_after),
        escalation_factor: env_parse("INTEGRITY_ESCALATION_FACTOR", defaults.escalation_factor),
        lockout_floor_centi: env_parse(
            "INTEGRITY_LOCKOUT_FLOOR",
            defaults.lockout_floor_centi / 100,
        ) * 100,
        debounce_window_ms: env_parse("INTEGRITY_DEBOUNCE_MS", defaults.debounce_window_ms),
        severity_overrides: severity_overrides_from_env(),
    }
}

/// Format: `INTEGRITY_SEVERITY_OVERRIDES="tab_switch=high,network_drop=medium"`.
/// Unknown kinds or severities abort startup rather than silently applying
/// a different policy than the operator intended.
fn severity_overrides_from_env() -> HashMap<EventKind, Severity> {
    let mut overrides = HashMap::new();
    let raw = match env::var("INTEGRITY_SEVERITY_OVERRIDES") {
        Ok(raw) => raw,
        Err(_) => return overrides,
    };
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (kind, severity) = pair
            .split_once('=')
            .unwrap_or_else(|| panic!("malformed severity override: {}", pair));
        let kind: EventKind = serde_json::from_value(serde_json::json!(kind.trim()))
            .unwrap_or_else(|_| panic!("unknown event kind in override: {}", kind));
        let severity: Severity = serde_json::from_value(serde_json::json!(severity.trim()))
            .unwrap_or_else(|_| panic!("unknown severity in override: {}", severity));
        overrides.insert(kind, severity);
    }
    overrides
}
