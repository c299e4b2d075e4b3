use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::Platform;
use crate::models::free_game::FreeGame;
use crate::models::steam::SteamApp;

/// Interval tiers, in days.
const DAILY: f64 = 1.0;
const WEEKLY: f64 = 7.0;
const MONTHLY: f64 = 30.0;

/// Skew amplitude per tier: weekly entries spread over roughly three
/// days, monthly entries over roughly six.
const WEEKLY_SKEW: f64 = WEEKLY * 0.2;
const MONTHLY_SKEW: f64 = MONTHLY * 0.1;

/// External signals the scheduler folds into its decision, gathered by
/// the update cycle before any fetching starts.
#[derive(Debug, Clone, Default)]
pub struct RefreshSignals {
    /// Publish time of the newest video referencing this entity.
    pub latest_video_reference: Option<DateTime<Utc>>,
    /// Secondary platforms whose store carries a back-link to this
    /// entity. A platform listed here but absent from the entity's own
    /// links is an asymmetric link needing repair.
    pub reported_free_links: Vec<Platform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    New,
    FullRefreshRequested,
    CrossLinkRepair,
    OverdueRelease,
    RecentReference,
    Scheduled,
}

impl RefreshReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::FullRefreshRequested => "full refresh requested",
            Self::CrossLinkRepair => "cross-link repair",
            Self::OverdueRelease => "overdue release",
            Self::RecentReference => "recent reference",
            Self::Scheduled => "scheduled",
        }
    }
}

impl std::fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Skip,
    Fetch(RefreshReason),
}

impl RefreshDecision {
    #[must_use]
    pub const fn should_fetch(self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

/// Decides, per entity and cycle, whether a re-fetch is due.
///
/// Pure over its inputs: constructed with the cycle's `now`, it reads
/// only stored fields and the supplied signals, so replaying it
/// against unchanged state reproduces the same decisions.
#[derive(Debug, Clone, Copy)]
pub struct RefreshScheduler {
    now: DateTime<Utc>,
}

impl RefreshScheduler {
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Trigger checks in priority order; the first hit wins.
    #[must_use]
    pub fn decide(&self, app: Option<&SteamApp>, signals: &RefreshSignals) -> RefreshDecision {
        let Some(app) = app else {
            return RefreshDecision::Fetch(RefreshReason::New);
        };
        let Some(last_updated) = app.last_updated else {
            return RefreshDecision::Fetch(RefreshReason::New);
        };

        if app.needs_full_refresh {
            return RefreshDecision::Fetch(RefreshReason::FullRefreshRequested);
        }

        if signals
            .reported_free_links
            .iter()
            .any(|platform| !app.free_links.contains_key(platform))
        {
            return RefreshDecision::Fetch(RefreshReason::CrossLinkRepair);
        }

        if app.is_coming_soon()
            && let Some(date) = &app.release_date
            && date.is_exact_day()
            && let Some(planned) = date.earliest()
            && planned < self.today()
        {
            return RefreshDecision::Fetch(RefreshReason::OverdueRelease);
        }

        if let Some(referenced) = signals.latest_video_reference
            && referenced > last_updated
        {
            return RefreshDecision::Fetch(RefreshReason::RecentReference);
        }

        if self.age_days(last_updated) > self.effective_interval_days(app) {
            return RefreshDecision::Fetch(RefreshReason::Scheduled);
        }

        RefreshDecision::Skip
    }

    /// Staleness decision for a free-platform listing. Free platforms
    /// publish no release dates, so the tier table collapses to
    /// weekly, with the stub and skew rules shared with the catalog.
    #[must_use]
    pub fn decide_free(&self, game: Option<&FreeGame>) -> RefreshDecision {
        let Some(game) = game else {
            return RefreshDecision::Fetch(RefreshReason::New);
        };
        let Some(last_updated) = game.last_updated else {
            return RefreshDecision::Fetch(RefreshReason::New);
        };

        let base = if game.is_stub { MONTHLY } else { WEEKLY };
        let interval = apply_skew(base, game.last_updated);
        if self.age_days(last_updated) > interval {
            return RefreshDecision::Fetch(RefreshReason::Scheduled);
        }
        RefreshDecision::Skip
    }

    /// Base interval tier for a catalog entity, in days, before skew.
    #[must_use]
    pub fn interval_days(&self, app: &SteamApp) -> f64 {
        if app.is_stub {
            // Known-dead ids; no point hammering them.
            return MONTHLY;
        }

        if app.is_coming_soon() {
            let Some(earliest) = app.release_date.as_ref().and_then(|d| d.earliest()) else {
                return MONTHLY;
            };
            let until = (earliest - self.today()).num_days();
            let tier = if until <= 3 {
                DAILY
            } else if until <= 33 {
                WEEKLY
            } else {
                MONTHLY
            };
            // A quarter/year/month-only date cannot justify daily polls.
            let exact = app.release_date.as_ref().is_some_and(|d| d.is_exact_day());
            if !exact && tier < WEEKLY {
                return WEEKLY;
            }
            return tier;
        }

        let Some(released) = app.release_date.as_ref().and_then(|d| d.earliest()) else {
            return WEEKLY;
        };
        let age = (self.today() - released).num_days();
        if age <= 1 {
            0.0
        } else if age < 14 {
            DAILY
        } else if age < 365 {
            WEEKLY
        } else {
            MONTHLY
        }
    }

    /// Interval with deterministic skew applied. Weekly tiers get
    /// ±20%, monthly ±10%; the result never drops below one day except
    /// for the every-cycle tier of just-released games.
    #[must_use]
    pub fn effective_interval_days(&self, app: &SteamApp) -> f64 {
        apply_skew(self.interval_days(app), app.last_updated)
    }

    fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    #[allow(clippy::cast_precision_loss)]
    fn age_days(&self, last_updated: DateTime<Utc>) -> f64 {
        (self.now - last_updated).num_seconds() as f64 / 86_400.0
    }
}

fn apply_skew(base: f64, last_updated: Option<DateTime<Utc>>) -> f64 {
    let amplitude = if base == WEEKLY {
        WEEKLY_SKEW
    } else if base == MONTHLY {
        MONTHLY_SKEW
    } else {
        return base;
    };
    let Some(last_updated) = last_updated else {
        return base;
    };
    let skewed = base + amplitude * skew_unit(&last_updated.to_rfc3339());
    skewed.max(1.0)
}

/// Map a timestamp string onto [-1, 1] via FNV-1a mod 1000.
///
/// The hash is fixed here rather than taken from the standard library
/// so the due-date of every entity is reproducible across runs and
/// runtimes, while entities refreshed in the same cycle still land on
/// different days.
fn skew_unit(timestamp: &str) -> f64 {
    let bucket = fnv1a64(timestamp.as_bytes()) % 1000;
    #[allow(clippy::cast_precision_loss)]
    let unit = (bucket as f64 / 999.0).mul_add(2.0, -1.0);
    unit
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::steam::{ReleaseDate, ReleaseState};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn scheduler() -> RefreshScheduler {
        RefreshScheduler::new(now())
    }

    fn released_app(days_ago: i64) -> SteamApp {
        let mut app = SteamApp::new("10", "Game");
        app.release_date = Some(ReleaseDate::exact(
            now().date_naive() - chrono::Duration::days(days_ago),
        ));
        app.last_updated = Some(now() - chrono::Duration::days(1));
        app
    }

    fn coming_soon_app(date: ReleaseDate) -> SteamApp {
        let mut app = SteamApp::new("10", "Game");
        app.release_state = ReleaseState::ComingSoon;
        app.release_date = Some(date);
        app.last_updated = Some(now() - chrono::Duration::days(1));
        app
    }

    #[test]
    fn released_tiers() {
        let s = scheduler();
        assert_eq!(s.interval_days(&released_app(0)), 0.0);
        assert_eq!(s.interval_days(&released_app(1)), 0.0);
        assert_eq!(s.interval_days(&released_app(5)), 1.0);
        assert_eq!(s.interval_days(&released_app(100)), 7.0);
        assert_eq!(s.interval_days(&released_app(400)), 30.0);
    }

    #[test]
    fn unreleased_tiers_by_proximity() {
        let s = scheduler();
        let in_days = |d: i64| {
            ReleaseDate::exact(now().date_naive() + chrono::Duration::days(d))
        };
        assert_eq!(s.interval_days(&coming_soon_app(in_days(2))), 1.0);
        assert_eq!(s.interval_days(&coming_soon_app(in_days(20))), 7.0);
        assert_eq!(s.interval_days(&coming_soon_app(in_days(200))), 30.0);
    }

    #[test]
    fn imprecise_dates_never_poll_daily() {
        let s = scheduler();
        // Q3 2026 starts Jul 1, already inside the 3-day window when
        // "now" is Aug 1, but quarter precision floors to weekly.
        let app = coming_soon_app(ReleaseDate::quarter(2026, 3));
        assert_eq!(s.interval_days(&app), 7.0);
    }

    #[test]
    fn stub_and_dateless_tiers() {
        let s = scheduler();
        let mut stub = released_app(5);
        stub.is_stub = true;
        assert_eq!(s.interval_days(&stub), 30.0);

        let mut no_date = SteamApp::new("10", "Game");
        no_date.release_state = ReleaseState::ComingSoon;
        assert_eq!(s.interval_days(&no_date), 30.0);
        no_date.release_state = ReleaseState::Released;
        assert_eq!(s.interval_days(&no_date), 7.0);
    }

    #[test]
    fn skew_is_deterministic_and_bounded() {
        let s = scheduler();
        let app = released_app(100);
        let first = s.effective_interval_days(&app);
        let second = s.effective_interval_days(&app);
        assert!((first - second).abs() < f64::EPSILON);
        assert!((first - 7.0).abs() <= 1.4 + f64::EPSILON);
        assert!(first >= 1.0);

        let monthly = released_app(400);
        let skewed = s.effective_interval_days(&monthly);
        assert!((skewed - 30.0).abs() <= 3.0 + f64::EPSILON);
    }

    #[test]
    fn skew_varies_across_timestamps() {
        let s = scheduler();
        let mut a = released_app(100);
        let mut b = released_app(100);
        a.last_updated = Some(now() - chrono::Duration::seconds(1));
        b.last_updated = Some(now() - chrono::Duration::seconds(2));
        // Not guaranteed for every pair, but these two differ.
        assert!(
            (s.effective_interval_days(&a) - s.effective_interval_days(&b)).abs()
                > f64::EPSILON
        );
    }

    #[test]
    fn decide_priority_order() {
        let s = scheduler();
        let signals = RefreshSignals::default();

        assert_eq!(
            s.decide(None, &signals),
            RefreshDecision::Fetch(RefreshReason::New)
        );

        let fresh = released_app(100);
        assert_eq!(s.decide(Some(&fresh), &signals), RefreshDecision::Skip);

        let forced = fresh.clone().with_needs_full_refresh();
        assert_eq!(
            s.decide(Some(&forced), &signals),
            RefreshDecision::Fetch(RefreshReason::FullRefreshRequested)
        );

        let link_signals = RefreshSignals {
            reported_free_links: vec![Platform::Itch],
            ..RefreshSignals::default()
        };
        assert_eq!(
            s.decide(Some(&fresh), &link_signals),
            RefreshDecision::Fetch(RefreshReason::CrossLinkRepair)
        );

        let linked = fresh.clone().with_free_link(Platform::Itch, "https://a.itch.io/b");
        assert_eq!(s.decide(Some(&linked), &link_signals), RefreshDecision::Skip);
    }

    #[test]
    fn overdue_release_triggers_fetch() {
        let s = scheduler();
        let overdue = coming_soon_app(ReleaseDate::exact(
            now().date_naive() - chrono::Duration::days(3),
        ));
        assert_eq!(
            s.decide(Some(&overdue), &RefreshSignals::default()),
            RefreshDecision::Fetch(RefreshReason::OverdueRelease)
        );

        // Imprecise overdue dates do not count as overdue.
        let vague = coming_soon_app(ReleaseDate::quarter(2026, 2));
        assert_eq!(
            s.decide(Some(&vague), &RefreshSignals::default()),
            RefreshDecision::Skip
        );
    }

    #[test]
    fn newer_video_reference_triggers_fetch() {
        let s = scheduler();
        let app = released_app(100);
        let newer = RefreshSignals {
            latest_video_reference: Some(now() - chrono::Duration::hours(1)),
            ..RefreshSignals::default()
        };
        assert_eq!(
            s.decide(Some(&app), &newer),
            RefreshDecision::Fetch(RefreshReason::RecentReference)
        );

        let older = RefreshSignals {
            latest_video_reference: Some(now() - chrono::Duration::days(10)),
            ..RefreshSignals::default()
        };
        assert_eq!(s.decide(Some(&app), &older), RefreshDecision::Skip);
    }

    #[test]
    fn stale_entity_is_rescheduled() {
        let s = scheduler();
        let mut stale = released_app(100);
        stale.last_updated = Some(now() - chrono::Duration::days(20));
        assert_eq!(
            s.decide(Some(&stale), &RefreshSignals::default()),
            RefreshDecision::Fetch(RefreshReason::Scheduled)
        );
    }

    #[test]
    fn free_listing_staleness() {
        let s = scheduler();
        assert_eq!(
            s.decide_free(None),
            RefreshDecision::Fetch(RefreshReason::New)
        );

        let mut game =
            crate::models::free_game::FreeGame::new("https://a.itch.io/b", Platform::Itch, "B");
        game.last_updated = Some(now() - chrono::Duration::days(2));
        assert_eq!(s.decide_free(Some(&game)), RefreshDecision::Skip);

        game.last_updated = Some(now() - chrono::Duration::days(10));
        assert_eq!(
            s.decide_free(Some(&game)),
            RefreshDecision::Fetch(RefreshReason::Scheduled)
        );
    }
}
