//! In-memory doubles for the identity provider and the secret store.
//!
//! The store models eventual consistency: created items stay invisible for
//! a configurable number of lookups and rotated passwords keep returning the
//! old value for a configurable number of reads.

#![allow(dead_code)]

use async_trait::async_trait;
use credential_rotator::clients::{Identity, IdentityProvider, Password, RecordRef, SecretStore};
use credential_rotator::engine::{CancelSignal, PollPolicy, RunSettings};
use credential_rotator::error::{Result, RotationError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Lag value meaning "never becomes visible".
pub const NEVER: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Item {
    id: String,
    title: String,
    username: String,
    password: Option<String>,
    /// Lookups or reads left before the item becomes visible.
    hidden_remaining: u32,
    pending: Option<String>,
    stale_reads_remaining: u32,
}

impl Item {
    fn observe(&mut self) -> bool {
        if self.hidden_remaining == 0 {
            return true;
        }
        if self.hidden_remaining != NEVER {
            self.hidden_remaining -= 1;
        }
        false
    }
}

#[derive(Default)]
pub struct FakeStore {
    items: Mutex<Vec<Item>>,
    next_id: AtomicU32,
    generated: AtomicU32,

    /// Lookups a freshly created item stays hidden for, per title.
    pub create_lag: Mutex<HashMap<String, u32>>,
    /// Reads that still see the old password after a rotate, per item title.
    pub rotate_lag: Mutex<HashMap<String, u32>>,
    pub return_id_on_create: bool,
    pub fail_create_for: Mutex<HashSet<String>>,
    pub fail_rotate_for: Mutex<HashSet<String>>,
    pub deny_access: Option<RotationError>,
    /// Tripped from inside `rotate_password`, to cancel mid-rotation.
    pub cancel_on_rotate: Option<CancelSignal>,
    pub find_delay: Option<Duration>,
    /// Panic inside `find_record` for these titles.
    pub panic_on_find_for: Mutex<HashSet<String>>,
    /// Title and time of every `find_record` call, in call order.
    pub lookups: Mutex<Vec<(String, Instant)>>,

    pub creates: AtomicU32,
    pub rotates: AtomicU32,
    pub finds: AtomicU32,
    pub verifies: AtomicU32,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing, fully visible item.
    pub fn with_item(self, title: &str, password: &str) -> Self {
        let id = format!("item-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.items.lock().unwrap().push(Item {
            id,
            title: title.to_string(),
            username: String::new(),
            password: Some(password.to_string()),
            hidden_remaining: 0,
            pending: None,
            stale_reads_remaining: 0,
        });
        self
    }

    pub fn set_create_lag(&self, title: &str, lag: u32) {
        self.create_lag.lock().unwrap().insert(title.to_string(), lag);
    }

    pub fn set_rotate_lag(&self, title: &str, lag: u32) {
        self.rotate_lag.lock().unwrap().insert(title.to_string(), lag);
    }

    pub fn mutations(&self) -> u32 {
        self.creates.load(Ordering::SeqCst) + self.rotates.load(Ordering::SeqCst)
    }

    pub fn item_count(&self, title: &str) -> usize {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.title == title)
            .count()
    }

    pub fn item_id(&self, title: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.title == title)
            .map(|i| i.id.clone())
    }

    /// When each title was first looked up.
    pub fn first_lookups(&self) -> Vec<(String, Instant)> {
        let mut seen = HashSet::new();
        self.lookups
            .lock()
            .unwrap()
            .iter()
            .filter(|(title, _)| seen.insert(title.clone()))
            .cloned()
            .collect()
    }

    /// The value a fully converged read would return.
    pub fn settled_password(&self, title: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.title == title)
            .and_then(|i| i.pending.clone().or_else(|| i.password.clone()))
    }

    fn generate(&self) -> String {
        format!("gen-{}", self.generated.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn verify_access(&self) -> Result<()> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        match self.deny_access {
            Some(ref e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn find_record(&self, title: &str) -> Result<Option<RecordRef>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.lookups
            .lock()
            .unwrap()
            .push((title.to_string(), Instant::now()));
        let should_panic = self.panic_on_find_for.lock().unwrap().contains(title);
        if should_panic {
            panic!("store exploded looking up {title}");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.find_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut items = self.items.lock().unwrap();
        let found = items
            .iter_mut()
            .filter(|i| i.title == title)
            .find_map(|i| {
                i.observe().then(|| RecordRef {
                    item_id: i.id.clone(),
                    title: i.title.clone(),
                })
            });
        Ok(found)
    }

    async fn create_record(&self, title: &str, username: &str) -> Result<Option<String>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create_for.lock().unwrap().contains(title) {
            return Err(RotationError::Client {
                status: 400,
                body: "title rejected".into(),
            });
        }
        let id = format!("item-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let lag = self.create_lag.lock().unwrap().get(title).copied().unwrap_or(0);
        self.items.lock().unwrap().push(Item {
            id: id.clone(),
            title: title.to_string(),
            username: username.to_string(),
            password: Some(self.generate()),
            hidden_remaining: lag,
            pending: None,
            stale_reads_remaining: 0,
        });
        Ok(self.return_id_on_create.then_some(id))
    }

    async fn rotate_password(&self, item_id: &str) -> Result<()> {
        self.rotates.fetch_add(1, Ordering::SeqCst);
        if let Some(ref cancel) = self.cancel_on_rotate {
            cancel.cancel();
        }
        let fresh = self.generate();
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| RotationError::NotFound(item_id.to_string()))?;
        if self.fail_rotate_for.lock().unwrap().contains(&item.title) {
            return Err(RotationError::network("connect unavailable"));
        }
        let lag = self
            .rotate_lag
            .lock()
            .unwrap()
            .get(&item.title)
            .copied()
            .unwrap_or(0);
        item.pending = Some(fresh);
        item.stale_reads_remaining = lag;
        Ok(())
    }

    async fn read_password(&self, item_id: &str) -> Result<Password> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| RotationError::NotFound(item_id.to_string()))?;
        if !item.observe() {
            return Err(RotationError::NotFound(item_id.to_string()));
        }
        if item.pending.is_some() {
            if item.stale_reads_remaining == 0 {
                item.password = item.pending.take();
            } else if item.stale_reads_remaining != NEVER {
                item.stale_reads_remaining -= 1;
            }
        }
        item.password
            .clone()
            .map(Password::new)
            .ok_or_else(|| RotationError::FieldMissing(item_id.to_string()))
    }

    fn name(&self) -> &str {
        "fake-store"
    }
}

#[derive(Default)]
pub struct FakeIdp {
    pub members: Vec<Identity>,
    pub list_error: Option<RotationError>,
    pub fail_set_for: HashMap<String, RotationError>,
    pub passwords: Mutex<HashMap<String, Password>>,
    pub set_calls: AtomicU32,
}

impl FakeIdp {
    pub fn with_members(members: Vec<Identity>) -> Self {
        Self {
            members,
            ..Self::default()
        }
    }

    pub fn password_of(&self, identity_id: &str) -> Option<String> {
        self.passwords
            .lock()
            .unwrap()
            .get(identity_id)
            .map(|p| p.expose().to_string())
    }
}

#[async_trait]
impl IdentityProvider for FakeIdp {
    async fn list_group_members(&self, _group_id: &str) -> Result<Vec<Identity>> {
        match self.list_error {
            Some(ref e) => Err(e.clone()),
            None => Ok(self.members.clone()),
        }
    }

    async fn set_password(&self, identity_id: &str, password: &Password) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.fail_set_for.get(identity_id) {
            return Err(e.clone());
        }
        self.passwords
            .lock()
            .unwrap()
            .insert(identity_id.to_string(), password.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "fake-idp"
    }
}

pub fn settings(concurrency: usize) -> RunSettings {
    RunSettings {
        group_id: "group-1".to_string(),
        concurrency,
        pacing: Duration::ZERO,
        deadline: None,
        poll: PollPolicy::fixed(5, Duration::from_millis(2)),
    }
}
