//! Per-tenant detection thresholds.
//!
//! A `DetectionConfig` is passed explicitly into `detection::detect` —
//! there is no ambient or global settings row. Persistence lives in
//! `store/config.rs`; a tenant that never saved a config reads the
//! defaults below.

use crate::{
    error::{SentinelError, SentinelResult},
    types::{ActorId, TenantId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_HIGH_AMOUNT_THRESHOLD_PERCENT: u32 = 200;
const DEFAULT_MIN_HIGH_AMOUNT: i64 = 500;
const DEFAULT_DUPLICATE_WINDOW_HOURS: u32 = 24;
const DEFAULT_RAPID_SUCCESSION_MINUTES: u32 = 30;
const DEFAULT_RAPID_SUCCESSION_COUNT: u32 = 3;
const DEFAULT_APPROVAL_THRESHOLD_PERCENT: u32 = 5;
const DEFAULT_THRESHOLD_LIMITS: [i64; 5] = [100, 500, 1000, 2500, 5000];
const DEFAULT_ROUND_AMOUNT_THRESHOLD: i64 = 100;
const DEFAULT_ROUND_AMOUNT_DIVISORS: [i64; 3] = [100, 500, 1000];
const DEFAULT_UNUSUAL_CATEGORY_MIN_HISTORY: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Multiplier on the category standard deviation, as a percentage
    /// (200 = mean + 2σ).
    pub high_amount_threshold_percent: u32,
    /// HighAmount never fires below this amount.
    pub min_high_amount: Decimal,
    /// Carried for config-store compatibility. The duplicate rule matches
    /// on calendar `expense_date`, not on this window.
    pub duplicate_window_hours: u32,
    pub rapid_succession_minutes: u32,
    /// Minimum cluster size, counting the expense itself.
    pub rapid_succession_count: u32,
    /// Width of the proximity band under each approval limit, in percent.
    pub approval_threshold_percent: u32,
    pub threshold_limits: Vec<Decimal>,
    pub round_amount_threshold: Decimal,
    pub round_amount_divisors: Vec<Decimal>,
    pub weekend_detection_enabled: bool,
    /// Prior submissions a submitter needs before a first-time category
    /// is flagged. 0 disables the rule.
    pub unusual_category_min_history: u32,
    /// Dispatch alerts automatically after a scan once this many High
    /// findings are pending. 0 disables auto-alerting.
    pub auto_alert_high_threshold: u32,
    /// Global kill switch.
    pub is_active: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            high_amount_threshold_percent: DEFAULT_HIGH_AMOUNT_THRESHOLD_PERCENT,
            min_high_amount: Decimal::from(DEFAULT_MIN_HIGH_AMOUNT),
            duplicate_window_hours: DEFAULT_DUPLICATE_WINDOW_HOURS,
            rapid_succession_minutes: DEFAULT_RAPID_SUCCESSION_MINUTES,
            rapid_succession_count: DEFAULT_RAPID_SUCCESSION_COUNT,
            approval_threshold_percent: DEFAULT_APPROVAL_THRESHOLD_PERCENT,
            threshold_limits: DEFAULT_THRESHOLD_LIMITS.iter().map(|&l| Decimal::from(l)).collect(),
            round_amount_threshold: Decimal::from(DEFAULT_ROUND_AMOUNT_THRESHOLD),
            round_amount_divisors: DEFAULT_ROUND_AMOUNT_DIVISORS
                .iter()
                .map(|&d| Decimal::from(d))
                .collect(),
            weekend_detection_enabled: true,
            unusual_category_min_history: DEFAULT_UNUSUAL_CATEGORY_MIN_HISTORY,
            auto_alert_high_threshold: 0,
            is_active: true,
        }
    }
}

impl DetectionConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DetectionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> SentinelResult<()> {
        positive("high_amount_threshold_percent", self.high_amount_threshold_percent)?;
        non_negative("min_high_amount", self.min_high_amount)?;
        positive("duplicate_window_hours", self.duplicate_window_hours)?;
        positive("rapid_succession_minutes", self.rapid_succession_minutes)?;
        if self.rapid_succession_count < 2 {
            return Err(invalid(
                "rapid_succession_count",
                format!("must be at least 2, got {}", self.rapid_succession_count),
            ));
        }
        if !(1..=100).contains(&self.approval_threshold_percent) {
            return Err(invalid(
                "approval_threshold_percent",
                format!("must be within 1..=100, got {}", self.approval_threshold_percent),
            ));
        }
        for limit in &self.threshold_limits {
            if *limit <= Decimal::ZERO {
                return Err(invalid("threshold_limits", format!("must be positive, got {limit}")));
            }
            if self.proximity_floor(*limit).is_none() {
                return Err(invalid(
                    "threshold_limits",
                    format!("approval band under {limit} is out of range"),
                ));
            }
        }
        non_negative("round_amount_threshold", self.round_amount_threshold)?;
        for divisor in &self.round_amount_divisors {
            if *divisor <= Decimal::ZERO {
                return Err(invalid(
                    "round_amount_divisors",
                    format!("must be positive, got {divisor}"),
                ));
            }
        }
        Ok(())
    }

    /// Limits and divisors sorted ascending with duplicates removed.
    pub fn normalized(mut self) -> Self {
        self.threshold_limits = sorted_unique(self.threshold_limits);
        self.round_amount_divisors = sorted_unique(self.round_amount_divisors);
        self
    }

    /// Lower edge of the proximity band under `limit`. `None` when the
    /// band overflows `Decimal`.
    pub fn proximity_floor(&self, limit: Decimal) -> Option<Decimal> {
        let band = limit
            .checked_mul(Decimal::from(self.approval_threshold_percent))?
            .checked_div(Decimal::ONE_HUNDRED)?;
        limit.checked_sub(band)
    }
}

fn sorted_unique(mut values: Vec<Decimal>) -> Vec<Decimal> {
    values.sort();
    values.dedup();
    values
}

fn invalid(field: &'static str, reason: String) -> SentinelError {
    SentinelError::ConfigInvalid { field, reason }
}

fn positive(field: &'static str, value: u32) -> SentinelResult<()> {
    if value == 0 {
        return Err(invalid(field, "must be positive, got 0".into()));
    }
    Ok(())
}

fn non_negative(field: &'static str, value: Decimal) -> SentinelResult<()> {
    if value < Decimal::ZERO {
        return Err(invalid(field, format!("must not be negative, got {value}")));
    }
    Ok(())
}

/// A tenant's config as held by the config store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigRecord {
    pub tenant_id: TenantId,
    pub config: DetectionConfig,
    /// 0 for a tenant that has never saved a config.
    pub version: i64,
    pub updated_by: Option<ActorId>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConfigRecord {
    pub fn default_for(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            config: DetectionConfig::default(),
            version: 0,
            updated_by: None,
            updated_at: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.version == 0
    }
}
