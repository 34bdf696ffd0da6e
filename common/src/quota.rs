use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, warn};

use crate::error::AppError;
use crate::principal::Principal;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::usage_counter::UsageCounter;
use crate::utils::config::AppConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Per-principal daily message quota. The usage counter row in the database
/// is the single authority; this type holds no counts in memory.
pub struct QuotaLimiter {
    db: Arc<SurrealDbClient>,
    user_limit: u32,
    ip_limit: u32,
    timezone: Tz,
    fail_open_authed: bool,
}

impl QuotaLimiter {
    pub fn new(db: Arc<SurrealDbClient>, config: &AppConfig) -> Self {
        Self {
            db,
            user_limit: config.daily_limit_user,
            ip_limit: config.daily_limit_ip,
            timezone: config.reference_timezone(),
            fail_open_authed: config.rate_limit_fail_open_authed,
        }
    }

    fn limit_for(&self, principal: &Principal) -> u32 {
        match principal {
            Principal::User(_) => self.user_limit,
            Principal::Ip(_) => self.ip_limit,
        }
    }

    /// Day key and next reset instant in the service reference time zone.
    fn current_day(&self) -> (String, DateTime<Utc>) {
        let local_now = Utc::now().with_timezone(&self.timezone);
        let day = local_now.format("%Y-%m-%d").to_string();

        let next_midnight = (local_now.date_naive() + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        let reset_at = self
            .timezone
            .from_local_datetime(&next_midnight)
            .earliest()
            .map_or_else(|| Utc::now() + Duration::days(1), |dt| dt.with_timezone(&Utc));

        (day, reset_at)
    }

    /// Admit or deny one message for the principal. Counting is a single
    /// atomic conditional increment, so concurrent callers cannot overshoot
    /// the limit. When the counter store is unreachable the decision follows
    /// the configured fail-open/fail-closed policy.
    pub async fn admit(&self, principal: &Principal) -> Admission {
        let limit = self.limit_for(principal);
        let (day, reset_at) = self.current_day();

        match UsageCounter::try_increment(principal.kind(), principal.id(), &day, limit, &self.db)
            .await
        {
            Ok(Some(count)) => Admission {
                allowed: true,
                remaining: limit.saturating_sub(count),
                reset_at,
            },
            Ok(None) => Admission {
                allowed: false,
                remaining: 0,
                reset_at,
            },
            Err(e) => {
                error!(error = %e, principal = %principal, "Usage counter unreachable");
                let allowed = match principal {
                    Principal::User(_) => self.fail_open_authed,
                    Principal::Ip(_) => false,
                };
                if allowed {
                    warn!(principal = %principal, "Admitting without a counter (fail-open)");
                }
                Admission {
                    allowed,
                    remaining: 0,
                    reset_at,
                }
            }
        }
    }
}
