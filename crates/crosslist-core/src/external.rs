//! Capabilities the core needs from each external list system
//!
//! Transport, authentication handshakes and pagination live behind this trait;
//! the engine only ever sees whole lists and single-item writes.

use crate::error::ExternalError;
use crate::model::RemoteItem;

/// Read/write access to one external list system.
pub trait ListSystem: Send + Sync {
    /// Look up a list by its display name, returning the system's list id.
    fn find_list(&self, list_name: &str) -> Result<Option<String>, ExternalError>;

    /// Fetch the full current contents of a list.
    fn fetch_items(&self, list_id: &str) -> Result<Vec<RemoteItem>, ExternalError>;

    /// Create an item and return its external id.
    fn create_item(&self, list_id: &str, name: &str, checked: bool)
        -> Result<String, ExternalError>;

    /// Set an item's checked state, optionally renaming it.
    fn update_item(
        &self,
        external_id: &str,
        checked: bool,
        name: Option<&str>,
    ) -> Result<(), ExternalError>;
}

impl<T: ListSystem + ?Sized> ListSystem for &T {
    fn find_list(&self, list_name: &str) -> Result<Option<String>, ExternalError> {
        (**self).find_list(list_name)
    }

    fn fetch_items(&self, list_id: &str) -> Result<Vec<RemoteItem>, ExternalError> {
        (**self).fetch_items(list_id)
    }

    fn create_item(
        &self,
        list_id: &str,
        name: &str,
        checked: bool,
    ) -> Result<String, ExternalError> {
        (**self).create_item(list_id, name, checked)
    }

    fn update_item(
        &self,
        external_id: &str,
        checked: bool,
        name: Option<&str>,
    ) -> Result<(), ExternalError> {
        (**self).update_item(external_id, checked, name)
    }
}

impl<T: ListSystem + ?Sized> ListSystem for std::sync::Arc<T> {
    fn find_list(&self, list_name: &str) -> Result<Option<String>, ExternalError> {
        (**self).find_list(list_name)
    }

    fn fetch_items(&self, list_id: &str) -> Result<Vec<RemoteItem>, ExternalError> {
        (**self).fetch_items(list_id)
    }

    fn create_item(
        &self,
        list_id: &str,
        name: &str,
        checked: bool,
    ) -> Result<String, ExternalError> {
        (**self).create_item(list_id, name, checked)
    }

    fn update_item(
        &self,
        external_id: &str,
        checked: bool,
        name: Option<&str>,
    ) -> Result<(), ExternalError> {
        (**self).update_item(external_id, checked, name)
    }
}
