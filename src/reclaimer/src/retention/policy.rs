//! Retention policy resolution with company overrides.

use chrono::{DateTime, Utc};
use common::config::RetentionConfig;
use common::model::{Company, CompanyId, RetentionClass};
use std::fmt;
use thiserror::Error;

/// Where a retention interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicySource {
    /// Global default from configuration.
    Global,
    /// Company-specific override.
    Company,
}

impl fmt::Display for RetentionPolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicySource::Global => f.write_str("global"),
            RetentionPolicySource::Company => f.write_str("company"),
        }
    }
}

/// Computed retention cutoff for one company and retention class.
#[derive(Debug, Clone)]
pub struct RetentionCutoff {
    pub company_id: CompanyId,

    pub class: RetentionClass,

    /// Collections whose retention anchor is older than this are expired.
    pub cutoff: DateTime<Utc>,

    /// The interval used (after applying overrides).
    pub retention_days: u32,

    /// Source of the interval (for auditing).
    pub source: RetentionPolicySource,
}

impl RetentionCutoff {
    /// Check if a retention anchor is past the interval.
    pub fn is_expired(&self, anchor: DateTime<Utc>) -> bool {
        anchor < self.cutoff
    }

    /// Human-readable representation for logging.
    pub fn display(&self) -> String {
        format!(
            "company={}, class={}, cutoff={}, days={}, source={}",
            self.company_id,
            self.class,
            self.cutoff.to_rfc3339(),
            self.retention_days,
            self.source
        )
    }
}

/// Resolves retention intervals.
///
/// Resolution order:
/// 1. Company override (if set)
/// 2. Global default (if set)
///
/// When neither is set the class is never reclaimed by age.
#[derive(Debug, Clone)]
pub struct RetentionPolicyResolver {
    config: RetentionConfig,
}

impl RetentionPolicyResolver {
    /// Create a new resolver from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured global interval is zero.
    pub fn new(config: RetentionConfig) -> Result<Self, RetentionPolicyError> {
        config
            .validate()
            .map_err(|e| RetentionPolicyError::InvalidConfiguration(e.to_string()))?;
        Ok(Self { config })
    }

    /// Compute the cutoff for `company` and `class` relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the company override is zero or the cutoff
    /// underflows the representable time range.
    pub fn compute_cutoff(
        &self,
        company: &Company,
        class: RetentionClass,
        now: DateTime<Utc>,
    ) -> Result<Option<RetentionCutoff>, RetentionPolicyError> {
        let Some((retention_days, source)) = self.resolve_retention_days(company, class)? else {
            return Ok(None);
        };

        let cutoff = now
            .checked_sub_signed(chrono::Duration::days(i64::from(retention_days)))
            .ok_or(RetentionPolicyError::CutoffUnderflow {
                company_id: company.id,
                class,
                retention_days,
            })?;

        Ok(Some(RetentionCutoff {
            company_id: company.id,
            class,
            cutoff,
            retention_days,
            source,
        }))
    }

    fn resolve_retention_days(
        &self,
        company: &Company,
        class: RetentionClass,
    ) -> Result<Option<(u32, RetentionPolicySource)>, RetentionPolicyError> {
        let company_override = match class {
            RetentionClass::Signed => company.signed_retention_days,
            RetentionClass::Unsigned => company.unsigned_retention_days,
        };

        if let Some(days) = company_override {
            if days == 0 {
                return Err(RetentionPolicyError::InvalidCompanyOverride {
                    company_id: company.id,
                    class,
                });
            }
            return Ok(Some((days, RetentionPolicySource::Company)));
        }

        let global = match class {
            RetentionClass::Signed => self.config.signed_days,
            RetentionClass::Unsigned => self.config.unsigned_days,
        };
        Ok(global.map(|days| (days, RetentionPolicySource::Global)))
    }
}

/// Errors that can occur during retention policy resolution.
#[derive(Error, Debug)]
pub enum RetentionPolicyError {
    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Company {company_id} has a zero-day {class} retention override")]
    InvalidCompanyOverride {
        company_id: CompanyId,
        class: RetentionClass,
    },

    #[error("Cutoff underflow for company {company_id} ({class}) with {retention_days} days")]
    CutoffUnderflow {
        company_id: CompanyId,
        class: RetentionClass,
        retention_days: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::model::EntityStatus;

    fn company(signed: Option<u32>, unsigned: Option<u32>) -> Company {
        Company {
            id: CompanyId(7),
            name: "Acme".to_string(),
            status: EntityStatus::Active,
            signed_retention_days: signed,
            unsigned_retention_days: unsigned,
            groups: Vec::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_global_default() {
        let resolver = RetentionPolicyResolver::new(RetentionConfig::default()).unwrap();

        let cutoff = resolver
            .compute_cutoff(&company(None, None), RetentionClass::Signed, now())
            .unwrap()
            .unwrap();

        assert_eq!(cutoff.source, RetentionPolicySource::Global);
        assert_eq!(cutoff.retention_days, 365);
        assert_eq!(cutoff.cutoff, now() - chrono::Duration::days(365));
        assert_eq!(cutoff.company_id, CompanyId(7));
    }

    #[test]
    fn test_company_override_wins() {
        let resolver = RetentionPolicyResolver::new(RetentionConfig::default()).unwrap();

        let signed = resolver
            .compute_cutoff(&company(Some(30), None), RetentionClass::Signed, now())
            .unwrap()
            .unwrap();
        assert_eq!(signed.source, RetentionPolicySource::Company);
        assert_eq!(signed.retention_days, 30);

        // The override only applies to its own class
        let unsigned = resolver
            .compute_cutoff(&company(Some(30), None), RetentionClass::Unsigned, now())
            .unwrap()
            .unwrap();
        assert_eq!(unsigned.source, RetentionPolicySource::Global);
        assert_eq!(unsigned.retention_days, 90);
    }

    #[test]
    fn test_unset_interval_means_never() {
        let config = RetentionConfig {
            signed_days: None,
            unsigned_days: Some(10),
        };
        let resolver = RetentionPolicyResolver::new(config).unwrap();

        let cutoff = resolver
            .compute_cutoff(&company(None, None), RetentionClass::Signed, now())
            .unwrap();
        assert!(cutoff.is_none());
    }

    #[test]
    fn test_zero_override_is_rejected() {
        let resolver = RetentionPolicyResolver::new(RetentionConfig::default()).unwrap();

        let err = resolver
            .compute_cutoff(&company(None, Some(0)), RetentionClass::Unsigned, now())
            .unwrap_err();
        assert!(matches!(
            err,
            RetentionPolicyError::InvalidCompanyOverride { .. }
        ));
    }

    #[test]
    fn test_invalid_global_config() {
        let config = RetentionConfig {
            signed_days: Some(0),
            unsigned_days: None,
        };
        assert!(matches!(
            RetentionPolicyResolver::new(config),
            Err(RetentionPolicyError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_is_expired() {
        let resolver = RetentionPolicyResolver::new(RetentionConfig::default()).unwrap();
        let cutoff = resolver
            .compute_cutoff(&company(Some(30), None), RetentionClass::Signed, now())
            .unwrap()
            .unwrap();

        assert!(cutoff.is_expired(now() - chrono::Duration::days(40)));
        assert!(!cutoff.is_expired(now() - chrono::Duration::days(10)));
        // Exactly at the cutoff is not expired
        assert!(!cutoff.is_expired(cutoff.cutoff));
    }
}
