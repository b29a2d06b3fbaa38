//! Credential pool manager (C3): owns the daily reset boundary, selects a credential
//! with remaining quota for a given search type, and records usage.

use crate::clock::Clock;
use crate::db;
use crate::error::PoolError;
use crate::models::{Credential, CredentialLimits, CredentialUsage, KindUsage, SearchType};
use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rand::seq::IndexedRandom;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CredentialPool {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    reset_hour: u32,
}

impl CredentialPool {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, timezone: Tz, reset_hour: u32) -> Self {
        Self {
            pool,
            clock,
            timezone,
            reset_hour,
        }
    }

    /// Today's reset boundary in the configured timezone, converted to UTC. Falls
    /// back to yesterday's boundary if the current local time hasn't reached it yet,
    /// so a credential reset near midnight doesn't fire twice in one rollover.
    fn reset_boundary(&self) -> DateTime<Utc> {
        let now_local = self.clock.now_in(self.timezone);
        let today_boundary = self
            .timezone
            .from_local_datetime(
                &now_local
                    .date_naive()
                    .and_time(NaiveTime::from_hms_opt(self.reset_hour, 0, 0).unwrap()),
            )
            .single()
            .expect("reset hour is an unambiguous local time");

        let boundary = if now_local < today_boundary {
            today_boundary - chrono::Duration::days(1)
        } else {
            today_boundary
        };
        boundary.with_timezone(&Utc)
    }

    /// Resets usage counters for every credential due for a reset, then picks one
    /// at random among those with remaining quota for `search_type`.
    pub async fn acquire(&self, search_type: SearchType) -> Result<Credential, PoolError> {
        let boundary = self.reset_boundary();
        let now = self.clock.now();
        let reset_count = db::credentials::reset_expired(&self.pool, boundary, now).await?;
        if reset_count > 0 {
            debug!(reset_count, "reset credential usage counters");
        }

        let candidates = db::credentials::eligible(&self.pool, search_type).await?;
        candidates
            .choose(&mut rand::rng())
            .cloned()
            .ok_or(PoolError::Exhausted(search_type))
    }

    pub async fn record_success(&self, credential_id: i32, search_type: SearchType) -> Result<(), PoolError> {
        db::credentials::increment_usage(&self.pool, credential_id, search_type).await?;
        Ok(())
    }

    /// Marks a credential exhausted for `search_type` immediately, e.g. after an
    /// upstream "quota exceeded" response, rather than waiting for natural increments
    /// to reach the limit.
    pub async fn record_exhausted(&self, credential_id: i32, search_type: SearchType) -> Result<(), PoolError> {
        warn!(credential_id, %search_type, "marking credential exhausted for search type");
        db::credentials::mark_exhausted(&self.pool, credential_id, search_type).await?;
        Ok(())
    }

    pub async fn disable(&self, credential_id: i32, reason: &str) -> Result<(), PoolError> {
        db::credentials::disable(&self.pool, credential_id, reason).await?;
        Ok(())
    }

    /// The current hour of the day in the configured timezone, used by the
    /// scheduler's hour-of-day concurrency cap.
    pub fn local_hour(&self) -> u32 {
        self.clock.now_in(self.timezone).hour()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub async fn update_limits(&self, credential_id: i32, limits: &CredentialLimits) -> Result<(), PoolError> {
        db::credentials::find_by_id(&self.pool, credential_id)
            .await?
            .ok_or(PoolError::NotFound(credential_id))?;
        db::credentials::update_limits(&self.pool, credential_id, limits).await?;
        Ok(())
    }

    pub async fn get_usage(&self, credential_id: i32) -> Result<CredentialUsage, PoolError> {
        let credential = db::credentials::find_by_id(&self.pool, credential_id)
            .await?
            .ok_or(PoolError::NotFound(credential_id))?;
        Ok(CredentialUsage {
            keyword: kind_usage(&credential, SearchType::Keyword),
            around: kind_usage(&credential, SearchType::Around),
            polygon: kind_usage(&credential, SearchType::Polygon),
        })
    }
}

fn kind_usage(credential: &Credential, search_type: SearchType) -> KindUsage {
    KindUsage {
        used: credential.used(search_type),
        limit: credential.limit(search_type),
        remaining: credential.remaining(search_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::TimeZone as _;

    fn shanghai() -> Tz {
        chrono_tz::Asia::Shanghai
    }

    #[test]
    fn reset_boundary_uses_todays_hour_after_it_passes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 3, 0, 0).unwrap(); // 11:00 Shanghai
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(now));
        let pool = CredentialPoolTestHarness::boundary(clock, shanghai(), 1);
        let expected = shanghai()
            .with_ymd_and_hms(2026, 3, 5, 1, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(pool, expected);
    }

    #[test]
    fn reset_boundary_falls_back_to_yesterday_before_hour_passes() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 16, 30, 0).unwrap(); // 00:30 Shanghai next day
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(now));
        let pool = CredentialPoolTestHarness::boundary(clock, shanghai(), 1);
        let expected = shanghai()
            .with_ymd_and_hms(2026, 3, 4, 1, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(pool, expected);
    }

    /// Exposes `reset_boundary`'s pure math without requiring a database pool.
    struct CredentialPoolTestHarness;

    impl CredentialPoolTestHarness {
        fn boundary(clock: Arc<dyn Clock>, timezone: Tz, reset_hour: u32) -> DateTime<Utc> {
            let now_local = clock.now_in(timezone);
            let today_boundary = timezone
                .from_local_datetime(
                    &now_local
                        .date_naive()
                        .and_time(NaiveTime::from_hms_opt(reset_hour, 0, 0).unwrap()),
                )
                .single()
                .unwrap();
            let boundary = if now_local < today_boundary {
                today_boundary - chrono::Duration::days(1)
            } else {
                today_boundary
            };
            boundary.with_timezone(&Utc)
        }
    }
}
