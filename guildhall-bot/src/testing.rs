//! In-memory fakes for the capability traits, shared across unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guildhall_core::{GraceUser, Subscriber};
use serenity::model::id::{ChannelId, MessageId, UserId};

use crate::backend::{BackendError, SubscriptionSource};
use crate::notify::Notifier;
use crate::roles::{RoleDirectory, RoleError};
use crate::starboard::{BoardError, BoardHost, MirrorPost};

pub(crate) fn subscriber(user_id: &str, discord_id: u64) -> Subscriber {
    Subscriber {
        user_id: user_id.to_string(),
        discord_id: discord_id.to_string(),
        expires_at: None,
        is_active: true,
    }
}

pub(crate) fn grace_user(user_id: &str, discord_id: u64, ends_at: DateTime<Utc>) -> GraceUser {
    GraceUser {
        user_id: user_id.to_string(),
        discord_id: discord_id.to_string(),
        grace_ends_at: ends_at,
        dm_enabled: true,
    }
}

// ---------------------------------------------------------------------------
// Subscription source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockSource {
    subscribers: Mutex<Vec<Subscriber>>,
    grace: Mutex<Vec<GraceUser>>,
    ended: Mutex<Vec<String>>,
    expired: Mutex<Vec<String>>,
    fail_fetches: Mutex<bool>,
}

impl MockSource {
    pub fn set_subscribers(&self, subs: Vec<Subscriber>) {
        *self.subscribers.lock().unwrap() = subs;
    }

    pub fn set_grace(&self, grace: Vec<GraceUser>) {
        *self.grace.lock().unwrap() = grace;
    }

    pub fn fail_fetches(&self) {
        *self.fail_fetches.lock().unwrap() = true;
    }

    pub fn ended_records(&self) -> Vec<String> {
        self.ended.lock().unwrap().clone()
    }

    pub fn expired_records(&self) -> Vec<String> {
        self.expired.lock().unwrap().clone()
    }

    fn fetch_error() -> BackendError {
        BackendError::Api {
            status: 503,
            message: "backend down".to_string(),
        }
    }
}

#[async_trait]
impl SubscriptionSource for MockSource {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>, BackendError> {
        if *self.fail_fetches.lock().unwrap() {
            return Err(Self::fetch_error());
        }
        Ok(self.subscribers.lock().unwrap().clone())
    }

    async fn grace_period_users(&self) -> Result<Vec<GraceUser>, BackendError> {
        if *self.fail_fetches.lock().unwrap() {
            return Err(Self::fetch_error());
        }
        Ok(self.grace.lock().unwrap().clone())
    }

    async fn end_grace_period(&self, user_id: &str, _discord_id: &str) -> Result<(), BackendError> {
        self.ended.lock().unwrap().push(user_id.to_string());
        Ok(())
    }

    async fn expire_grace_period(
        &self,
        user_id: &str,
        _discord_id: &str,
    ) -> Result<(), BackendError> {
        self.expired.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Role directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockRoles {
    holders: Mutex<HashSet<UserId>>,
    failing: Mutex<HashSet<UserId>>,
}

impl MockRoles {
    pub fn set_holders(&self, ids: &[u64]) {
        let mut holders = self.holders.lock().unwrap();
        holders.clear();
        holders.extend(ids.iter().map(|id| UserId::new(*id)));
    }

    /// Every mutation for this user fails with a platform error.
    pub fn fail_for(&self, id: u64) {
        self.failing.lock().unwrap().insert(UserId::new(id));
    }

    pub fn is_holder(&self, id: u64) -> bool {
        self.holders.lock().unwrap().contains(&UserId::new(id))
    }

    pub fn granted_contains(&self, id: u64) -> bool {
        self.is_holder(id)
    }

    pub fn holder_count(&self) -> usize {
        self.holders.lock().unwrap().len()
    }

    fn check_failing(&self, user: UserId) -> Result<(), RoleError> {
        if self.failing.lock().unwrap().contains(&user) {
            return Err(RoleError::Platform("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for MockRoles {
    async fn has_subscriber_role(&self, user: UserId) -> Result<bool, RoleError> {
        Ok(self.holders.lock().unwrap().contains(&user))
    }

    async fn grant_subscriber_role(&self, user: UserId, _reason: &str) -> Result<(), RoleError> {
        self.check_failing(user)?;
        self.holders.lock().unwrap().insert(user);
        Ok(())
    }

    async fn revoke_subscriber_role(&self, user: UserId, _reason: &str) -> Result<(), RoleError> {
        self.check_failing(user)?;
        self.holders.lock().unwrap().remove(&user);
        Ok(())
    }

    async fn subscriber_role_holders(&self) -> Result<Vec<UserId>, RoleError> {
        let mut holders: Vec<UserId> = self.holders.lock().unwrap().iter().copied().collect();
        holders.sort();
        Ok(holders)
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockNotifier {
    confirmed: Mutex<Vec<UserId>>,
    reminders: Mutex<Vec<(UserId, i64)>>,
    expired: Mutex<Vec<UserId>>,
}

impl MockNotifier {
    pub fn confirmed(&self) -> Vec<UserId> {
        self.confirmed.lock().unwrap().clone()
    }

    pub fn reminders(&self) -> Vec<(UserId, i64)> {
        self.reminders.lock().unwrap().clone()
    }

    pub fn expired(&self) -> Vec<UserId> {
        self.expired.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn subscription_confirmed(&self, user: UserId) {
        self.confirmed.lock().unwrap().push(user);
    }

    async fn grace_reminder(&self, user: UserId, days_remaining: i64) {
        self.reminders.lock().unwrap().push((user, days_remaining));
    }

    async fn subscription_expired(&self, user: UserId) {
        self.expired.lock().unwrap().push(user);
    }
}

// ---------------------------------------------------------------------------
// Board host
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockBoardHost {
    reactors: Mutex<std::collections::HashMap<MessageId, Vec<UserId>>>,
    fetches: AtomicUsize,
    fail_fetch: Mutex<bool>,
    fail_edit_not_found: Mutex<bool>,
    created: Mutex<Vec<(MessageId, u32)>>,
    edits: Mutex<Vec<(MessageId, u32)>>,
    deleted: Mutex<Vec<MessageId>>,
    next_mirror_id: AtomicUsize,
}

impl MockBoardHost {
    pub fn set_reactors(&self, message: MessageId, users: &[u64]) {
        self.reactors
            .lock()
            .unwrap()
            .insert(message, users.iter().map(|id| UserId::new(*id)).collect());
    }

    pub fn fail_next_reactor_fetch(&self) {
        *self.fail_fetch.lock().unwrap() = true;
    }

    pub fn fail_next_edit_not_found(&self) {
        *self.fail_edit_not_found.lock().unwrap() = true;
    }

    pub fn reactor_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn edit_count(&self) -> usize {
        self.edits.lock().unwrap().len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    /// Star count carried by the most recent create or edit.
    pub fn last_post_stars(&self) -> Option<u32> {
        let edits = self.edits.lock().unwrap();
        if let Some((_, stars)) = edits.last() {
            return Some(*stars);
        }
        self.created.lock().unwrap().last().map(|(_, stars)| *stars)
    }
}

#[async_trait]
impl BoardHost for MockBoardHost {
    async fn star_reactors(
        &self,
        _channel: ChannelId,
        message: MessageId,
    ) -> Result<Vec<UserId>, BoardError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut *self.fail_fetch.lock().unwrap()) {
            return Err(BoardError::Platform("injected fetch failure".to_string()));
        }
        Ok(self
            .reactors
            .lock()
            .unwrap()
            .get(&message)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_mirror(
        &self,
        _board: ChannelId,
        post: &MirrorPost,
    ) -> Result<MessageId, BoardError> {
        let id = MessageId::new(5000 + self.next_mirror_id.fetch_add(1, Ordering::SeqCst) as u64);
        self.created.lock().unwrap().push((id, post.star_count));
        Ok(id)
    }

    async fn edit_mirror(
        &self,
        _board: ChannelId,
        mirror: MessageId,
        post: &MirrorPost,
    ) -> Result<(), BoardError> {
        if std::mem::take(&mut *self.fail_edit_not_found.lock().unwrap()) {
            return Err(BoardError::NotFound);
        }
        self.edits.lock().unwrap().push((mirror, post.star_count));
        Ok(())
    }

    async fn delete_mirror(&self, _board: ChannelId, mirror: MessageId) -> Result<(), BoardError> {
        self.deleted.lock().unwrap().push(mirror);
        Ok(())
    }
}
