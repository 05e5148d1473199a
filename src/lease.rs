//! Lease records and the lease state machine.
//!
//! A lease binds one IP address on one network to a hardware address until
//! its expiration, or reserves the address without an owner (a hold).
//!
//! # States
//!
//! - [`LeaseState::Absent`]: no record for the (network, IP) key
//! - [`LeaseState::Active`]: record bound to a hardware address, unexpired
//! - [`LeaseState::Held`]: record with no owner, unexpired
//! - [`LeaseState::Expired`]: record whose expiration has passed
//!
//! Absent and Expired are equivalent starting points for a new lease.
//!
//! The transition functions in this module are pure: they inspect the
//! current record and return the [`Transition`] to commit. Providers call
//! them inside one atomic read-modify-write step so that at most one
//! `create` wins per unexpired key.
//!
//! # Idempotency
//!
//! `create` by the current owner succeeds when the requested expiration is
//! not earlier than the stored one, and extends the lease. Re-submitting
//! identical parameters therefore returns `true` without creating a second
//! binding. A request that would shorten the owner's lease is rejected.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hwaddr::HardwareAddr;
use crate::model::Scope;

/// A lease or hold on one IP address of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub network: String,

    pub ip: IpAddr,

    /// Owning hardware address, or `None` for a hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<HardwareAddr>,

    /// When this lease or hold expires (UTC).
    pub expiration: DateTime<Utc>,

    /// When the address was first bound by the current owner (UTC).
    pub created_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a lease bound to `addr`.
    pub fn bound(
        network: impl Into<String>,
        ip: IpAddr,
        addr: HardwareAddr,
        expiration: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            network: network.into(),
            ip,
            addr: Some(addr),
            expiration,
            created_at: now,
        }
    }

    /// Creates an ownerless hold.
    pub fn held(
        network: impl Into<String>,
        ip: IpAddr,
        expiration: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            network: network.into(),
            ip,
            addr: None,
            expiration,
            created_at: now,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::Lease {
            network: self.network.clone(),
            ip: self.ip,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration
    }

    pub fn is_held(&self) -> bool {
        self.addr.is_none()
    }

    /// Returns true if the lease is owned by `addr`, regardless of expiration.
    pub fn is_bound_to(&self, addr: &HardwareAddr) -> bool {
        self.addr.as_ref() == Some(addr)
    }

    pub fn state(&self, now: DateTime<Utc>) -> LeaseState {
        if self.is_expired(now) {
            LeaseState::Expired
        } else if self.is_held() {
            LeaseState::Held
        } else {
            LeaseState::Active
        }
    }

    /// Returns seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expiration - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Absent,
    Active,
    Expired,
    Held,
}

impl LeaseState {
    pub fn of(lease: Option<&Lease>, now: DateTime<Utc>) -> Self {
        lease.map_or(LeaseState::Absent, |lease| lease.state(now))
    }

    /// Returns true if a new lease or hold may be placed on the address.
    pub fn is_available(self) -> bool {
        matches!(self, LeaseState::Absent | LeaseState::Expired)
    }
}

/// The change a lease operation wants to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Store this record under the lease key.
    Put(Lease),
    /// Delete the record under the lease key.
    Remove,
    /// Leave the store untouched and report `false` to the caller.
    Reject,
}

impl Transition {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Transition::Reject)
    }
}

/// Absent/Expired → Active, or extension by the current owner.
pub fn create(
    current: Option<&Lease>,
    network: &str,
    ip: IpAddr,
    addr: &HardwareAddr,
    expiration: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Transition {
    match (current, LeaseState::of(current, now)) {
        (_, state) if state.is_available() => {
            Transition::Put(Lease::bound(network, ip, addr.clone(), expiration, now))
        }
        (Some(lease), LeaseState::Active) if lease.is_bound_to(addr) => {
            if lease.expiration > expiration {
                Transition::Reject
            } else {
                Transition::Put(Lease {
                    expiration,
                    ..lease.clone()
                })
            }
        }
        _ => Transition::Reject,
    }
}

/// Active (same owner) → Active with a new expiration.
pub fn renew(
    current: Option<&Lease>,
    addr: &HardwareAddr,
    expiration: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Transition {
    match current {
        Some(lease) if lease.state(now) == LeaseState::Active && lease.is_bound_to(addr) => {
            Transition::Put(Lease {
                expiration,
                ..lease.clone()
            })
        }
        _ => Transition::Reject,
    }
}

/// Active or Expired (same owner) → Absent.
///
/// Holds have no owner and cannot be released by a client.
pub fn release(current: Option<&Lease>, addr: &HardwareAddr) -> Transition {
    match current {
        Some(lease) if lease.is_bound_to(addr) => Transition::Remove,
        _ => Transition::Reject,
    }
}

/// Absent/Expired → Held.
pub fn hold(
    current: Option<&Lease>,
    network: &str,
    ip: IpAddr,
    expiration: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Transition {
    if LeaseState::of(current, now).is_available() {
        Transition::Put(Lease::held(network, ip, expiration, now))
    } else {
        Transition::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
    }

    fn addr(last: u8) -> HardwareAddr {
        HardwareAddr::from([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    fn active(owner: u8, now: DateTime<Utc>, seconds: i64) -> Lease {
        Lease::bound("wen", ip(), addr(owner), now + TimeDelta::seconds(seconds), now)
    }

    #[test]
    fn test_lease_struct() {
        let now = Utc::now();
        let lease = active(1, now, 3600);
        assert_eq!(lease.state(now), LeaseState::Active);
        assert_eq!(lease.remaining_seconds(now), 3600);

        let later = now + TimeDelta::seconds(3601);
        assert_eq!(lease.state(later), LeaseState::Expired);
        assert_eq!(lease.remaining_seconds(later), 0);

        let held = Lease::held("wen", ip(), now + TimeDelta::seconds(60), now);
        assert_eq!(held.state(now), LeaseState::Held);
        assert_eq!(LeaseState::of(None, now), LeaseState::Absent);
    }

    #[test]
    fn test_create_on_absent_and_expired() {
        let now = Utc::now();
        let expiration = now + TimeDelta::seconds(600);
        assert!(create(None, "wen", ip(), &addr(1), expiration, now).is_accepted());

        let stale = active(2, now - TimeDelta::seconds(7200), 3600);
        match create(Some(&stale), "wen", ip(), &addr(1), expiration, now) {
            Transition::Put(lease) => {
                assert!(lease.is_bound_to(&addr(1)));
                assert_eq!(lease.created_at, now);
            }
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn test_create_conflicts() {
        let now = Utc::now();
        let current = active(1, now, 3600);
        let expiration = now + TimeDelta::seconds(7200);

        assert_eq!(
            create(Some(&current), "wen", ip(), &addr(2), expiration, now),
            Transition::Reject
        );

        let held = Lease::held("wen", ip(), now + TimeDelta::seconds(60), now);
        assert_eq!(
            create(Some(&held), "wen", ip(), &addr(1), expiration, now),
            Transition::Reject
        );
    }

    #[test]
    fn test_create_by_owner() {
        let now = Utc::now();
        let current = active(1, now, 3600);

        let same = create(Some(&current), "wen", ip(), &addr(1), current.expiration, now);
        assert_eq!(same, Transition::Put(current.clone()));

        let shorter = now + TimeDelta::seconds(10);
        assert_eq!(
            create(Some(&current), "wen", ip(), &addr(1), shorter, now),
            Transition::Reject
        );
    }

    #[test]
    fn test_renew() {
        let now = Utc::now();
        let current = active(1, now, 60);
        let expiration = now + TimeDelta::seconds(3600);

        match renew(Some(&current), &addr(1), expiration, now) {
            Transition::Put(lease) => assert_eq!(lease.expiration, expiration),
            other => panic!("unexpected transition: {:?}", other),
        }
        assert_eq!(renew(Some(&current), &addr(2), expiration, now), Transition::Reject);
        assert_eq!(renew(None, &addr(1), expiration, now), Transition::Reject);

        let later = now + TimeDelta::seconds(61);
        assert_eq!(renew(Some(&current), &addr(1), expiration, later), Transition::Reject);
    }

    #[test]
    fn test_release() {
        let now = Utc::now();
        let current = active(1, now, 60);
        assert_eq!(release(Some(&current), &addr(1)), Transition::Remove);
        assert_eq!(release(Some(&current), &addr(2)), Transition::Reject);
        assert_eq!(release(None, &addr(1)), Transition::Reject);

        let held = Lease::held("wen", ip(), now + TimeDelta::seconds(60), now);
        assert_eq!(release(Some(&held), &addr(1)), Transition::Reject);
    }

    #[test]
    fn test_hold() {
        let now = Utc::now();
        let expiration = now + TimeDelta::seconds(60);
        match hold(None, "wen", ip(), expiration, now) {
            Transition::Put(lease) => assert!(lease.is_held()),
            other => panic!("unexpected transition: {:?}", other),
        }

        let current = active(1, now, 60);
        assert_eq!(hold(Some(&current), "wen", ip(), expiration, now), Transition::Reject);

        let held = Lease::held("wen", ip(), expiration, now);
        assert_eq!(hold(Some(&held), "wen", ip(), expiration, now), Transition::Reject);
    }
}
