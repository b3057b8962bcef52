//! Baseline tests - capture, selections and frozen resolution

mod common;

use common::{bike, link_to, manager};
use plm::core::{ConfigurationItemKey, Denial, PartFilter};
use plm::entities::{BaselineType, SelectionPolicy};

#[test]
fn test_substitute_selection_is_recorded_as_deviation() {
    let pm = manager();
    let bike = bike(&pm);
    let selection = SelectionPolicy::new().select_substitute(bike.wheel_xl_path());

    let baseline = pm
        .create_baseline(
            &bike.ci,
            "alice",
            "XL build",
            BaselineType::Latest,
            Some("large wheels"),
            &selection,
        )
        .unwrap();

    let snapshot = &baseline.snapshot;
    assert_eq!(
        snapshot.selection.substitute_paths.iter().collect::<Vec<_>>(),
        vec![&bike.wheel_xl_path()]
    );
    assert!(!snapshot.selection.substitute_paths.contains(&bike.wheel_path()));
    assert!(snapshot.selection.optional_paths.is_empty());

    assert_eq!(snapshot.part("WHEEL_XL"), Some(&bike.wheel_xl.iteration(1)));
    assert_eq!(snapshot.part("WHEEL"), None);
    assert_eq!(snapshot.part("BELL"), None);
    assert_eq!(snapshot.parts.len(), 3);
}

#[test]
fn test_baseline_stays_frozen() {
    let pm = manager();
    let bike = bike(&pm);
    let baseline = pm
        .create_baseline(
            &bike.ci,
            "alice",
            "B1",
            BaselineType::Latest,
            None,
            &SelectionPolicy::new().retain_optional(bike.bell_path()),
        )
        .unwrap();

    pm.checkout(&bike.bike, "alice").unwrap();
    let working = pm.get_revision(&bike.bike).unwrap();
    pm.remove_usage_link(&bike.bike, "alice", link_to(&working, "BELL").id)
        .unwrap();
    pm.checkin(&bike.bike, "alice", None).unwrap();

    let live = pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &SelectionPolicy::new())
        .unwrap();
    assert_eq!(live.root().unwrap().part, bike.bike.iteration(2));
    assert!(live.excluded_optionals.is_empty());

    let frozen = pm.resolve_baseline_structure(&bike.ci, baseline.id).unwrap();
    assert_eq!(frozen.root().unwrap().part, bike.bike.iteration(1));
    assert!(frozen.contains_path(&bike.bell_path()));
    assert_eq!(frozen.parts(), baseline.snapshot.pinned_parts());
    assert_eq!(pm.get_baseline(&bike.ci, baseline.id).unwrap(), baseline);
}

#[test]
fn test_links_outside_selection_are_left_out() {
    let pm = manager();
    let bike = bike(&pm);
    pm.create_path_to_path_link(
        &bike.ci,
        "alice",
        "mate",
        &bike.frame_path(),
        &bike.wheel_path(),
        None,
    )
    .unwrap();
    pm.create_path_to_path_link(
        &bike.ci,
        "alice",
        "mate",
        &bike.frame_path(),
        &bike.wheel_xl_path(),
        None,
    )
    .unwrap();

    let default = pm
        .create_baseline(&bike.ci, "alice", "STD", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap();
    let xl = pm
        .create_baseline(
            &bike.ci,
            "alice",
            "XL",
            BaselineType::Latest,
            None,
            &SelectionPolicy::new().select_substitute(bike.wheel_xl_path()),
        )
        .unwrap();

    let targets = |links: &[plm::entities::PathToPathLink]| -> Vec<String> {
        links.iter().map(|l| l.target_path.clone()).collect()
    };
    assert_eq!(targets(&default.snapshot.path_to_path_links), vec![bike.wheel_path()]);
    assert_eq!(targets(&xl.snapshot.path_to_path_links), vec![bike.wheel_xl_path()]);

    // later edits to the live links leave the snapshot alone
    let live = pm.list_path_to_path_links(&bike.ci).unwrap();
    for link in &live {
        pm.delete_path_to_path_link(&bike.ci, "alice", link.id).unwrap();
    }
    let reloaded = pm.get_baseline(&bike.ci, default.id).unwrap();
    assert_eq!(reloaded.snapshot.path_to_path_links, default.snapshot.path_to_path_links);
}

#[test]
fn test_linked_documents_are_captured() {
    let pm = manager();
    let bike = bike(&pm);
    let manual = pm.create_document_master("ws", "MANUAL", None, "alice").unwrap().key;
    pm.checkin(&manual, "alice", None).unwrap();

    pm.checkout(&bike.frame, "alice").unwrap();
    pm.add_document_link(&bike.frame, "alice", &manual, None).unwrap();
    pm.checkin(&bike.frame, "alice", None).unwrap();

    let baseline = pm
        .create_baseline(&bike.ci, "alice", "B1", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap();
    assert_eq!(baseline.snapshot.documents, vec![manual.iteration(1)]);
    assert_eq!(baseline.snapshot.part("FRAME"), Some(&bike.frame.iteration(2)));

    assert!(pm.delete_revision(&manual, "alice").unwrap_err().is_constraint_violation());
}

#[test]
fn test_released_baseline() {
    let pm = manager();
    let bike = bike(&pm);
    for key in [&bike.bike, &bike.frame, &bike.wheel] {
        pm.release(key, "alice").unwrap();
    }
    pm.create_revision(&bike.frame.master, "alice").unwrap();

    let baseline = pm
        .create_baseline(&bike.ci, "alice", "R1", BaselineType::Released, None, &SelectionPolicy::new())
        .unwrap();
    assert_eq!(baseline.baseline_type, BaselineType::Released);
    assert_eq!(baseline.snapshot.part("FRAME"), Some(&bike.frame.iteration(1)));
}

#[test]
fn test_working_copies_are_never_captured() {
    let pm = manager();
    let bike = bike(&pm);
    let spare = pm.create_part_master("ws", "SPARE", None, "alice").unwrap().key;

    pm.checkout(&bike.bike, "alice").unwrap();
    pm.add_usage_link(
        &bike.bike,
        "alice",
        &plm::entities::UsageLinkSpec::new("SPARE"),
    )
    .unwrap();

    let baseline = pm
        .create_baseline(&bike.ci, "alice", "B1", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap();
    assert_eq!(baseline.snapshot.part("BIKE"), Some(&bike.bike.iteration(1)));
    assert_eq!(baseline.snapshot.part("SPARE"), None);

    pm.checkin(&bike.bike, "alice", None).unwrap();
    let err = pm
        .create_baseline(&bike.ci, "alice", "B2", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(pm.list_baselines(&bike.ci).unwrap().len(), 1);
    pm.checkin(&spare, "alice", None).unwrap();
}

#[test]
fn test_only_optional_paths_can_be_retained() {
    let pm = manager();
    let bike = bike(&pm);
    let selection = SelectionPolicy::new().retain_optional(bike.frame_path());
    let err = pm
        .create_baseline(&bike.ci, "alice", "B1", BaselineType::Latest, None, &selection)
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(pm.list_baselines(&bike.ci).unwrap().is_empty());
}

#[test]
fn test_baseline_lookup_is_scoped_to_its_item() {
    let pm = manager();
    let bike = bike(&pm);
    let baseline = pm
        .create_baseline(&bike.ci, "alice", "B1", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap();

    let frame_ci = ConfigurationItemKey::new("ws", "FRAME-CI");
    pm.create_configuration_item(&frame_ci, "FRAME", None, "alice").unwrap();
    assert!(pm.get_baseline(&frame_ci, baseline.id).unwrap_err().is_not_found());
    assert!(pm
        .delete_baseline(&frame_ci, "alice", baseline.id)
        .unwrap_err()
        .is_not_found());

    let frame_baseline = pm
        .create_baseline(&frame_ci, "alice", "B1", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap();
    let err = pm
        .create_product_instance(&bike.ci, "alice", "SN-1", frame_baseline.id)
        .unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::ForeignBaseline {
            baseline: frame_baseline.id
        })
    );
}

#[test]
fn test_delete_baseline() {
    let pm = manager();
    let bike = bike(&pm);
    let baseline = pm
        .create_baseline(&bike.ci, "alice", "B1", BaselineType::Latest, None, &SelectionPolicy::new())
        .unwrap();
    pm.create_product_instance(&bike.ci, "alice", "SN-1", baseline.id)
        .unwrap();

    let err = pm.delete_baseline(&bike.ci, "alice", baseline.id).unwrap_err();
    assert!(err.is_constraint_violation());

    pm.delete_product_instance(&plm::core::ProductInstanceKey::new(bike.ci.clone(), "SN-1"), "alice")
        .unwrap();
    pm.delete_baseline(&bike.ci, "alice", baseline.id).unwrap();
    assert!(pm.list_baselines(&bike.ci).unwrap().is_empty());

    // nothing pins the parts any more
    let frame_b = pm.create_revision(&bike.frame.master, "alice").unwrap().key;
    pm.checkin(&frame_b, "alice", None).unwrap();
    pm.delete_revision(&bike.frame, "alice").unwrap();
}
