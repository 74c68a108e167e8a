/// Entitlement records and the trial/premium/free state machine
///
/// An entitlement is the subscription state for one account, keyed by email.
/// The role transitions (trial expiry, premium expiry) are implemented as a
/// pure function over the record so they can be tested without a store.
pub mod cache;
pub mod store;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use cache::EntitlementCache;
pub use store::EntitlementStore;

/// Account role, closed enum
///
/// Unrecognized stored values decode to `Free` rather than failing: an
/// authenticated user is never rejected over a bad role string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Trial,
    Premium,
    #[serde(other)]
    Free,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Trial => "trial",
            Role::Premium => "premium",
            Role::Free => "free",
        }
    }

    /// Decode a stored role string, treating anything unknown as free
    pub fn from_db(s: &str) -> Self {
        match s {
            "trial" => Role::Trial,
            "premium" => Role::Premium,
            _ => Role::Free,
        }
    }
}

/// Subscription/trial state for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub email: String,
    pub user_id: String,
    pub role: Role,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub subscription_start: Option<DateTime<Utc>>,
    /// Absent means non-expiring (e.g. lifetime)
    pub subscription_end: Option<DateTime<Utc>>,
    pub subscription_type: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub seen_on_web: bool,
    pub exports_today: u32,
    pub last_export_date: NaiveDate,
}

impl Entitlement {
    /// Derive the stable entitlement id from the identity id
    ///
    /// Deterministic so concurrent first-contact creations converge on one
    /// record instead of racing to insert two.
    pub fn derive_id(user_id: &str) -> String {
        let digest = Sha256::digest(user_id.as_bytes());
        format!("ent_{}", &hex::encode(digest)[..32])
    }

    /// New trial entitlement for an email never seen before
    pub fn new_trial(user_id: &str, email: &str, now: DateTime<Utc>, trial_days: i64) -> Self {
        Self {
            id: Self::derive_id(user_id),
            email: email.to_string(),
            user_id: user_id.to_string(),
            role: Role::Trial,
            trial_start: Some(now),
            trial_end: Some(now + Duration::days(trial_days)),
            subscription_start: None,
            subscription_end: None,
            subscription_type: None,
            last_seen: Some(now),
            seen_on_web: false,
            exports_today: 0,
            last_export_date: now.date_naive(),
        }
    }

    /// Project this record onto the free role, clearing trial and
    /// subscription fields
    pub fn downgraded_to_free(&self) -> Self {
        Self {
            role: Role::Free,
            trial_start: None,
            trial_end: None,
            subscription_start: None,
            subscription_end: None,
            subscription_type: None,
            ..self.clone()
        }
    }

    /// Derived status string surfaced by /auth/me
    pub fn subscription_status(&self) -> &'static str {
        self.role.as_str()
    }
}

/// Outcome of evaluating an entitlement's role at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleCheck {
    /// Trial still running; attach as-is
    ActiveTrial,
    /// Trial window has closed; downgrade to free before proceeding
    TrialExpired,
    /// Premium with no end date or an end date still in the future
    ActivePremium,
    /// Premium with a set, past end date; downgrade to free
    PremiumExpired,
    /// Already free (including unknown roles decoded as free)
    Free,
}

/// Pure role state machine: what should this entitlement look like at `now`?
///
/// An active trial is decided before anything else so it never falls through
/// to a free default. A trial record with no end date is treated as expired
/// rather than open-ended.
pub fn evaluate(entitlement: &Entitlement, now: DateTime<Utc>) -> RoleCheck {
    match entitlement.role {
        Role::Trial => match entitlement.trial_end {
            Some(end) if now < end => RoleCheck::ActiveTrial,
            _ => RoleCheck::TrialExpired,
        },
        Role::Premium => match entitlement.subscription_end {
            Some(end) if now >= end => RoleCheck::PremiumExpired,
            _ => RoleCheck::ActivePremium,
        },
        Role::Free => RoleCheck::Free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entitlement(role: Role) -> Entitlement {
        let now = Utc::now();
        Entitlement {
            id: Entitlement::derive_id("user-1"),
            email: "dj@example.com".to_string(),
            user_id: "user-1".to_string(),
            role,
            trial_start: None,
            trial_end: None,
            subscription_start: None,
            subscription_end: None,
            subscription_type: None,
            last_seen: Some(now),
            seen_on_web: false,
            exports_today: 0,
            last_export_date: now.date_naive(),
        }
    }

    #[test]
    fn test_derived_id_is_deterministic() {
        let a = Entitlement::derive_id("user-abc");
        let b = Entitlement::derive_id("user-abc");
        assert_eq!(a, b);
        assert!(a.starts_with("ent_"));
        assert_ne!(a, Entitlement::derive_id("user-def"));
    }

    #[test]
    fn test_new_trial_window() {
        let now = Utc::now();
        let e = Entitlement::new_trial("user-1", "dj@example.com", now, 7);
        assert_eq!(e.role, Role::Trial);
        assert_eq!(e.trial_start, Some(now));
        assert_eq!(e.trial_end, Some(now + Duration::days(7)));
        assert_eq!(e.exports_today, 0);
        assert_eq!(e.last_export_date, now.date_naive());
    }

    #[test]
    fn test_active_trial_checked_before_free_default() {
        let now = Utc::now();
        let mut e = entitlement(Role::Trial);
        e.trial_end = Some(now + Duration::hours(1));
        assert_eq!(evaluate(&e, now), RoleCheck::ActiveTrial);
    }

    #[test]
    fn test_trial_expiry() {
        let now = Utc::now();
        let mut e = entitlement(Role::Trial);
        e.trial_end = Some(now - Duration::seconds(1));
        assert_eq!(evaluate(&e, now), RoleCheck::TrialExpired);

        // Crossing the boundary exactly counts as expired
        e.trial_end = Some(now);
        assert_eq!(evaluate(&e, now), RoleCheck::TrialExpired);
    }

    #[test]
    fn test_trial_without_end_is_expired() {
        let e = entitlement(Role::Trial);
        assert_eq!(evaluate(&e, Utc::now()), RoleCheck::TrialExpired);
    }

    #[test]
    fn test_lifetime_premium_never_expires() {
        let mut e = entitlement(Role::Premium);
        e.subscription_type = Some("lifetime".to_string());
        assert_eq!(evaluate(&e, Utc::now()), RoleCheck::ActivePremium);
    }

    #[test]
    fn test_premium_expiry() {
        let now = Utc::now();
        let mut e = entitlement(Role::Premium);
        e.subscription_end = Some(now - Duration::days(1));
        assert_eq!(evaluate(&e, now), RoleCheck::PremiumExpired);

        e.subscription_end = Some(now + Duration::days(1));
        assert_eq!(evaluate(&e, now), RoleCheck::ActivePremium);
    }

    #[test]
    fn test_downgrade_clears_fields() {
        let now = Utc::now();
        let mut e = entitlement(Role::Premium);
        e.subscription_start = Some(now - Duration::days(30));
        e.subscription_end = Some(now - Duration::days(1));
        e.subscription_type = Some("monthly".to_string());
        e.exports_today = 1;

        let downgraded = e.downgraded_to_free();
        assert_eq!(downgraded.role, Role::Free);
        assert!(downgraded.subscription_start.is_none());
        assert!(downgraded.subscription_end.is_none());
        assert!(downgraded.subscription_type.is_none());
        assert!(downgraded.trial_start.is_none());
        assert!(downgraded.trial_end.is_none());
        // Quota bookkeeping survives the downgrade
        assert_eq!(downgraded.exports_today, 1);
        assert_eq!(downgraded.email, e.email);
    }

    #[test]
    fn test_unknown_role_decodes_as_free() {
        assert_eq!(Role::from_db("enterprise"), Role::Free);
        assert_eq!(Role::from_db(""), Role::Free);
        assert_eq!(Role::from_db("premium"), Role::Premium);
        assert_eq!(Role::from_db("trial"), Role::Trial);

        let role: Role = serde_json::from_str("\"gold\"").unwrap();
        assert_eq!(role, Role::Free);
    }
}
