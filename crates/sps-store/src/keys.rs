//! Persisted key layout. All values are strings; JSON where noted.

/// JSON account profile, including cached `remainingTime` / `isActivated`.
pub const USER: &str = "user";
/// Integer balance.
pub const POINTS: &str = "points";
/// Epoch-ms absolute subscription end. Authoritative for boot restoration.
pub const SUBSCRIPTION_END_TIME: &str = "subscriptionEndTime";
/// Whole minutes remaining. Display cache only; never read for restoration.
pub const REMAINING_TIME: &str = "remainingTime";
/// `"true"` / `"false"`.
pub const IS_SUBSCRIBED: &str = "isSubscribed";
/// JSON `{grantedAt, expiresAt, durationMinutes, accessLevel, grantedBy}`.
pub const ADMIN_GRANTED_ACCESS: &str = "adminGrantedAccess";
/// JSON array of permanently unlocked channel ids.
pub const UNLOCKED_CHANNELS: &str = "unlockedChannels";
/// JSON array, capped.
pub const WATCH_HISTORY: &str = "watchHistory";
/// JSON array, capped.
pub const POINTS_HISTORY: &str = "pointsHistory";
/// `"true"` / `"false"`.
pub const HAS_USED_TRIAL: &str = "hasUsedTrial";

/// Every key the engine owns, in boot batch-read order.
pub const ALL: &[&str] = &[
    USER,
    POINTS,
    SUBSCRIPTION_END_TIME,
    REMAINING_TIME,
    IS_SUBSCRIBED,
    ADMIN_GRANTED_ACCESS,
    UNLOCKED_CHANNELS,
    WATCH_HISTORY,
    POINTS_HISTORY,
    HAS_USED_TRIAL,
];

/// Keys removed by the session-expired transition.
pub const SESSION: &[&str] = &[
    SUBSCRIPTION_END_TIME,
    REMAINING_TIME,
    IS_SUBSCRIBED,
    ADMIN_GRANTED_ACCESS,
];
