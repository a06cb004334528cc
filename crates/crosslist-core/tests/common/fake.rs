//! In-memory list system with failure injection

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use crosslist_core::{ExternalError, ListSystem, RemoteItem};

#[derive(Default)]
struct FakeState {
    /// list name -> list id
    lists: BTreeMap<String, String>,
    /// list id -> items
    items: BTreeMap<String, Vec<RemoteItem>>,
    next_id: u64,
    fail_create: HashSet<String>,
    reject_auth: bool,
    creates: Vec<String>,
    updates: Vec<(String, bool)>,
}

/// A list system held in memory. `stamps` controls whether items carry timestamps.
pub struct FakeSystem {
    prefix: String,
    stamps: bool,
    state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new(prefix: &str, stamps: bool) -> Self {
        Self {
            prefix: prefix.to_string(),
            stamps,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn add_list(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("{}-list-{}", self.prefix, state.lists.len() + 1);
        state.lists.insert(name.to_string(), id.clone());
        state.items.entry(id.clone()).or_default();
        id
    }

    /// Add an item directly, as a user of the system would
    pub fn add_item(&self, list: &str, name: &str, checked: bool) -> String {
        let timestamp = self.stamps.then(Utc::now);
        self.insert(list, name, checked, timestamp)
    }

    pub fn add_item_at(
        &self,
        list: &str,
        name: &str,
        checked: bool,
        timestamp: DateTime<Utc>,
    ) -> String {
        self.insert(list, name, checked, Some(timestamp))
    }

    fn insert(
        &self,
        list: &str,
        name: &str,
        checked: bool,
        timestamp: Option<DateTime<Utc>>,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        let list_id = state.lists[list].clone();
        let external_id = self.next_external_id(&mut state);
        let mut item = RemoteItem::new(external_id.clone(), name, checked);
        item.timestamp = timestamp;
        state.items.entry(list_id).or_default().push(item);
        external_id
    }

    fn next_external_id(&self, state: &mut FakeState) -> String {
        state.next_id += 1;
        format!("{}-{}", self.prefix, state.next_id)
    }

    /// Toggle an item as a user would
    pub fn set_checked(&self, external_id: &str, checked: bool) {
        let mut state = self.state.lock().unwrap();
        let stamps = self.stamps;
        let item = state
            .items
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|i| i.external_id == external_id)
            .expect("item exists");
        item.checked = checked;
        if stamps {
            item.timestamp = Some(Utc::now());
        }
    }

    pub fn remove_item(&self, external_id: &str) {
        let mut state = self.state.lock().unwrap();
        for items in state.items.values_mut() {
            items.retain(|i| i.external_id != external_id);
        }
    }

    pub fn fail_create_for(&self, name: &str) {
        self.state.lock().unwrap().fail_create.insert(name.to_string());
    }

    pub fn reject_auth(&self) {
        self.state.lock().unwrap().reject_auth = true;
    }

    pub fn items(&self, list: &str) -> Vec<RemoteItem> {
        let state = self.state.lock().unwrap();
        let list_id = &state.lists[list];
        state.items[list_id].clone()
    }

    pub fn item_named(&self, list: &str, name: &str) -> Option<RemoteItem> {
        self.items(list).into_iter().find(|i| i.name == name)
    }

    /// Names passed to `create_item`, in call order
    pub fn creates(&self) -> Vec<String> {
        self.state.lock().unwrap().creates.clone()
    }

    /// `(external_id, checked)` passed to `update_item`, in call order
    pub fn updates(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().updates.clone()
    }
}

impl ListSystem for FakeSystem {
    fn find_list(&self, list_name: &str) -> Result<Option<String>, ExternalError> {
        let state = self.state.lock().unwrap();
        if state.reject_auth {
            return Err(ExternalError::Authentication("token rejected".to_string()));
        }
        Ok(state.lists.get(list_name).cloned())
    }

    fn fetch_items(&self, list_id: &str) -> Result<Vec<RemoteItem>, ExternalError> {
        let state = self.state.lock().unwrap();
        if state.reject_auth {
            return Err(ExternalError::Authentication("token rejected".to_string()));
        }
        state
            .items
            .get(list_id)
            .cloned()
            .ok_or_else(|| ExternalError::ListNotFound(list_id.to_string()))
    }

    fn create_item(
        &self,
        list_id: &str,
        name: &str,
        checked: bool,
    ) -> Result<String, ExternalError> {
        let mut state = self.state.lock().unwrap();
        state.creates.push(name.to_string());
        if state.fail_create.contains(name) {
            return Err(ExternalError::Request(format!("create rejected for {}", name)));
        }
        let external_id = self.next_external_id(&mut state);
        let mut item = RemoteItem::new(external_id.clone(), name, checked);
        if self.stamps {
            item.timestamp = Some(Utc::now());
        }
        state.items.entry(list_id.to_string()).or_default().push(item);
        Ok(external_id)
    }

    fn update_item(
        &self,
        external_id: &str,
        checked: bool,
        name: Option<&str>,
    ) -> Result<(), ExternalError> {
        let mut state = self.state.lock().unwrap();
        state.updates.push((external_id.to_string(), checked));
        let stamps = self.stamps;
        let item = state
            .items
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|i| i.external_id == external_id)
            .ok_or_else(|| ExternalError::Request(format!("no item {}", external_id)))?;
        item.checked = checked;
        if let Some(name) = name {
            item.name = name.to_string();
        }
        if stamps {
            item.timestamp = Some(Utc::now());
        }
        Ok(())
    }
}
