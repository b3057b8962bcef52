//! Shared test helpers for integration tests
//!
//! Builds managers over in-memory stores and a small bike product used by
//! most scenarios.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use plm::core::{
    AccessPolicy, Action, ConfigurationItemKey, Event, InMemoryBlobStore, Notifier, PlmError,
    ProductManager, RevisionKey,
};
use plm::entities::part::{PartUsageLink, UsageLinkSpec};
use plm::entities::Revision;

/// Manager over a fresh in-memory store
pub fn manager() -> ProductManager {
    ProductManager::open_in_memory().unwrap()
}

/// Manager whose blob content can be inspected by the test
pub fn manager_with_blobs() -> (ProductManager, Arc<InMemoryBlobStore>) {
    let blobs = Arc::new(InMemoryBlobStore::new());
    let pm = manager().with_blob_store(blobs.clone());
    (pm, blobs)
}

/// Notifier keeping every delivered event
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Policy refusing every mutation to one user
pub struct DenyUser(pub &'static str);

impl AccessPolicy for DenyUser {
    fn check(&self, user: &str, action: Action, key: &str) -> plm::Result<()> {
        if user == self.0 {
            return Err(PlmError::AccessDenied {
                user: user.to_string(),
                action: action.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

/// Create a part master and check its first iteration in
pub fn leaf_part(pm: &ProductManager, id: &str) -> RevisionKey {
    let key = pm.create_part_master("ws", id, None, "alice").unwrap().key;
    pm.checkin(&key, "alice", None).unwrap();
    key
}

/// A bike: frame, wheel with an XL substitute, and an optional bell
pub struct Bike {
    pub ci: ConfigurationItemKey,
    pub bike: RevisionKey,
    pub frame: RevisionKey,
    pub wheel: RevisionKey,
    pub wheel_xl: RevisionKey,
    pub bell: RevisionKey,
    pub frame_link: PartUsageLink,
    pub wheel_link: PartUsageLink,
    pub bell_link: PartUsageLink,
}

impl Bike {
    pub fn frame_path(&self) -> String {
        self.frame_link.full_id()
    }

    pub fn wheel_path(&self) -> String {
        self.wheel_link.full_id()
    }

    pub fn wheel_xl_path(&self) -> String {
        self.wheel_link.substitutes[0].full_id()
    }

    pub fn bell_path(&self) -> String {
        self.bell_link.full_id()
    }
}

/// Build the bike product with everything checked in
pub fn bike(pm: &ProductManager) -> Bike {
    let frame = leaf_part(pm, "FRAME");
    let wheel = leaf_part(pm, "WHEEL");
    let wheel_xl = leaf_part(pm, "WHEEL_XL");
    let bell = leaf_part(pm, "BELL");

    let bike = pm.create_part_master("ws", "BIKE", Some("Bike"), "alice").unwrap().key;
    let frame_link = pm
        .add_usage_link(&bike, "alice", &UsageLinkSpec::new("FRAME"))
        .unwrap();
    let wheel_link = pm
        .add_usage_link(
            &bike,
            "alice",
            &UsageLinkSpec::new("WHEEL").amount(2.0).with_substitute("WHEEL_XL"),
        )
        .unwrap();
    let bell_link = pm
        .add_usage_link(&bike, "alice", &UsageLinkSpec::new("BELL").optional())
        .unwrap();
    pm.checkin(&bike, "alice", None).unwrap();

    let ci = ConfigurationItemKey::new("ws", "BIKE-CI");
    pm.create_configuration_item(&ci, "BIKE", Some("City bike"), "alice")
        .unwrap();

    Bike {
        ci,
        bike,
        frame,
        wheel,
        wheel_xl,
        bell,
        frame_link,
        wheel_link,
        bell_link,
    }
}

/// Usage link of the trailing iteration of `revision` placing `component`
pub fn link_to(revision: &Revision, component: &str) -> PartUsageLink {
    revision
        .last_iteration()
        .unwrap()
        .components
        .iter()
        .find(|l| l.component == component)
        .cloned()
        .unwrap()
}
