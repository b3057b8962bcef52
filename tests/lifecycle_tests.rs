//! Revision lifecycle tests - checkout discipline, status and deletion

mod common;

use std::sync::Arc;

use common::{bike, leaf_part, manager, manager_with_blobs, DenyUser, RecordingNotifier};
use plm::core::{BlobStore, Denial, Event, Iterated, MasterKey, RevisionStatus};
use plm::entities::{AttributeValue, BaselineType, Revision, SelectionPolicy};

fn assert_iteration_invariants(revision: &Revision) {
    let numbers: Vec<u32> = revision.iterations.iter().map(|i| i.number()).collect();
    let expected: Vec<u32> = (1..=numbers.len() as u32).collect();
    assert_eq!(numbers, expected, "iterations of {} not contiguous", revision.key);

    let open = revision
        .iterations
        .iter()
        .filter(|i| i.checkin_date.is_none())
        .count();
    assert!(open <= 1, "{} has {} working copies", revision.key, open);
    if open == 1 {
        assert!(revision.checkout.holder().is_some());
        assert!(revision.iterations.last().unwrap().checkin_date.is_none());
    }
}

// ============================================================================
// Checkout discipline
// ============================================================================

#[test]
fn test_iterations_stay_contiguous() {
    let pm = manager();
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;

    let steps: [(&str, bool); 9] = [
        ("checkin", true),
        ("checkout", true),
        ("undo", true),
        ("checkout", true),
        ("checkin", true),
        ("undo", false),
        ("checkout", true),
        ("checkout", false),
        ("checkin", true),
    ];
    for (step, ok) in steps {
        let result = match step {
            "checkout" => pm.checkout(&key, "alice"),
            "checkin" => pm.checkin(&key, "alice", None),
            _ => pm.undo_checkout(&key, "alice"),
        };
        assert_eq!(result.is_ok(), ok, "step {}", step);
        assert_iteration_invariants(&pm.get_revision(&key).unwrap());
    }

    let revision = pm.get_revision(&key).unwrap();
    assert_eq!(revision.last_iteration_number(), 3);
    assert!(revision.checkout.is_free());
}

#[test]
fn test_checked_in_iteration_is_immutable() {
    let pm = manager();
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    pm.set_attribute(&key, "alice", "mass", AttributeValue::Number(1.5))
        .unwrap();
    pm.checkin(&key, "alice", Some("first")).unwrap();

    let before = serde_json::to_value(pm.get_revision(&key).unwrap()).unwrap();

    let err = pm
        .set_attribute(&key, "alice", "mass", AttributeValue::Number(2.0))
        .unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::IterationFrozen { iteration: 1 })
    );
    assert!(pm.checkin(&key, "alice", None).unwrap_err().is_not_allowed());
    assert!(pm.add_file(&key, "alice", "a.step", b"solid").is_err());

    let after = serde_json::to_value(pm.get_revision(&key).unwrap()).unwrap();
    assert_eq!(before, after);

    pm.checkout(&key, "alice").unwrap();
    pm.set_attribute(&key, "alice", "mass", AttributeValue::Number(2.0))
        .unwrap();
    pm.checkin(&key, "alice", None).unwrap();

    let revision = pm.get_revision(&key).unwrap();
    assert_eq!(
        serde_json::to_value(&revision.iterations[0]).unwrap(),
        before["iterations"][0]
    );
    assert_eq!(
        revision.iterations[1].attribute("mass").map(|a| &a.value),
        Some(&AttributeValue::Number(2.0))
    );
}

#[test]
fn test_checkout_conflicts() {
    let pm = manager();
    let key = leaf_part(&pm, "P1");

    pm.checkout(&key, "alice").unwrap();
    let err = pm.checkout(&key, "bob").unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::AlreadyCheckedOut {
            holder: "alice".to_string()
        })
    );

    let err = pm.checkin(&key, "bob", None).unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::CheckedOutByOther {
            holder: "alice".to_string()
        })
    );
    assert!(pm.undo_checkout(&key, "bob").unwrap_err().is_not_allowed());
    pm.undo_checkout(&key, "alice").unwrap();
}

#[test]
fn test_undo_checkout_restores_prior_state() {
    let (pm, blobs) = manager_with_blobs();
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    let kept = pm.add_file(&key, "alice", "drawing.pdf", b"v1").unwrap();
    pm.checkin(&key, "alice", None).unwrap();
    let before = pm.get_revision(&key).unwrap();

    let revision = pm.checkout(&key, "alice").unwrap();
    let copied = &revision.working_copy().unwrap().files[0];
    assert_ne!(copied.full_name, kept.full_name);
    assert!(blobs.exists(&copied.full_name).unwrap());
    let extra = pm.add_file(&key, "alice", "notes.txt", b"draft").unwrap();

    let restored = pm.undo_checkout(&key, "alice").unwrap();
    assert_eq!(restored, before);
    assert!(restored.checkout.is_free());
    assert!(blobs.exists(&kept.full_name).unwrap());
    assert!(!blobs.exists(&copied.full_name).unwrap());
    assert!(!blobs.exists(&extra.full_name).unwrap());
    assert_eq!(blobs.names().unwrap(), vec![kept.full_name.clone()]);
}

#[test]
fn test_first_iteration_cannot_be_undone() {
    let pm = manager();
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    let err = pm.undo_checkout(&key, "alice").unwrap_err();
    assert_eq!(err.denial(), Some(&Denial::FirstIteration));
    assert_eq!(pm.get_revision(&key).unwrap().iterations.len(), 1);
}

#[test]
fn test_only_latest_revision_checks_out() {
    let pm = manager();
    let a = leaf_part(&pm, "P1");
    let b = pm.create_revision(&a.master, "alice").unwrap().key;
    assert_eq!(b.version, "B");

    let err = pm.checkout(&a, "alice").unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::NotLatestRevision {
            latest: "B".to_string()
        })
    );

    let err = pm.create_revision(&a.master, "alice").unwrap_err();
    assert!(matches!(
        err.denial(),
        Some(Denial::PredecessorCheckedOut { .. })
    ));
}

#[test]
fn test_new_revision_copies_last_checked_in_iteration() {
    let pm = manager();
    let a = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    pm.set_attribute(&a, "alice", "colour", AttributeValue::Text("red".into()))
        .unwrap();
    pm.checkin(&a, "alice", None).unwrap();
    pm.checkout(&a, "alice").unwrap();
    pm.set_attribute(&a, "alice", "colour", AttributeValue::Text("blue".into()))
        .unwrap();

    let err = pm.create_revision(&a.master, "alice").unwrap_err();
    assert!(err.is_not_allowed());
    pm.undo_checkout(&a, "alice").unwrap();

    let b = pm.create_revision(&a.master, "bob").unwrap();
    assert!(b.checkout.is_held_by("bob"));
    let first = b.working_copy().unwrap();
    assert_eq!(first.number(), 1);
    assert_eq!(
        first.attribute("colour").map(|a| &a.value),
        Some(&AttributeValue::Text("red".into()))
    );
}

// ============================================================================
// Status transitions
// ============================================================================

#[test]
fn test_release_and_obsolete() {
    let pm = manager();
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;

    let err = pm.release(&key, "alice").unwrap_err();
    assert!(matches!(err.denial(), Some(Denial::CheckedOut { .. })));
    let err = pm.mark_obsolete(&key, "alice").unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::InvalidTransition {
            from: RevisionStatus::Wip,
            to: RevisionStatus::Obsolete
        })
    );

    pm.checkin(&key, "alice", None).unwrap();
    let released = pm.release(&key, "alice").unwrap();
    assert_eq!(released.status, RevisionStatus::Released);
    assert_eq!(released.released.as_ref().map(|c| c.by.as_str()), Some("alice"));

    let err = pm.checkout(&key, "alice").unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::RevisionNotWip {
            status: RevisionStatus::Released
        })
    );
    assert!(pm.release(&key, "alice").unwrap_err().is_not_allowed());

    let obsolete = pm.mark_obsolete(&key, "bob").unwrap();
    assert_eq!(obsolete.status, RevisionStatus::Obsolete);
    assert!(pm.mark_obsolete(&key, "bob").unwrap_err().is_not_allowed());
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn test_delete_revision_pinned_by_baseline() {
    let pm = manager();
    let bike = bike(&pm);
    pm.create_baseline(
        &bike.ci,
        "alice",
        "B1",
        BaselineType::Latest,
        None,
        &SelectionPolicy::new(),
    )
    .unwrap();

    let frame_b = pm.create_revision(&bike.frame.master, "alice").unwrap().key;
    pm.checkin(&frame_b, "alice", None).unwrap();
    pm.delete_revision(&frame_b, "alice").unwrap();

    let before = pm.get_revision(&bike.frame).unwrap();
    let err = pm.delete_revision(&bike.frame, "alice").unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(pm.get_revision(&bike.frame).unwrap(), before);
}

#[test]
fn test_delete_revision_used_in_structure() {
    let pm = manager();
    let bike = bike(&pm);

    let err = pm.delete_revision(&bike.bell, "alice").unwrap_err();
    assert!(err.is_constraint_violation());
    let err = pm.delete_revision(&bike.bike, "alice").unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(pm.where_used(&bike.bell.master).unwrap(), vec![bike.bike.clone()]);
}

#[test]
fn test_delete_last_revision_removes_master() {
    let pm = manager();
    let doc = pm.create_document_master("ws", "SPEC-1", None, "alice").unwrap().key;
    pm.checkin(&doc, "alice", None).unwrap();
    let part = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    pm.add_document_link(&part, "alice", &doc, Some("drawing")).unwrap();
    pm.checkin(&part, "alice", None).unwrap();

    assert!(pm.delete_revision(&doc, "alice").unwrap_err().is_constraint_violation());

    pm.delete_revision(&part, "alice").unwrap();
    assert!(pm.get_master(&part.master).unwrap_err().is_not_found());
    pm.delete_revision(&doc, "alice").unwrap();
    assert!(pm
        .get_master(&MasterKey::document("ws", "SPEC-1"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_checked_out_revision_cannot_be_deleted() {
    let pm = manager();
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    let err = pm.delete_revision(&key, "alice").unwrap_err();
    assert!(matches!(err.denial(), Some(Denial::CheckedOut { .. })));
}

// ============================================================================
// Collaborators
// ============================================================================

#[test]
fn test_events_follow_commits_only() {
    let notifier = Arc::new(RecordingNotifier::default());
    let pm = manager().with_notifier(notifier.clone());
    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    pm.checkin(&key, "alice", None).unwrap();
    pm.checkout(&key, "alice").unwrap();
    let delivered = notifier.events().len();

    assert!(pm.checkout(&key, "bob").is_err());
    assert_eq!(notifier.events().len(), delivered);

    pm.checkin(&key, "alice", None).unwrap();
    assert_eq!(
        notifier.events().last(),
        Some(&Event::CheckedIn {
            revision: key.to_string(),
            user: "alice".to_string(),
            iteration: 2
        })
    );
    assert!(matches!(
        notifier.events().first(),
        Some(Event::MasterCreated { .. })
    ));
}

#[test]
fn test_access_policy_consulted_before_mutation() {
    let pm = manager().with_access_policy(Arc::new(DenyUser("mallory")));
    let err = pm
        .create_part_master("ws", "P1", None, "mallory")
        .unwrap_err();
    assert!(matches!(err, plm::PlmError::AccessDenied { .. }));
    assert!(pm.get_master(&MasterKey::part("ws", "P1")).unwrap_err().is_not_found());

    let key = pm.create_part_master("ws", "P1", None, "alice").unwrap().key;
    assert!(matches!(
        pm.checkin(&key, "mallory", None).unwrap_err(),
        plm::PlmError::AccessDenied { .. }
    ));
}
