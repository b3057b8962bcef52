//! Product structure tests - resolution, selections, decoding and edits

mod common;

use common::{bike, leaf_part, link_to, manager};
use plm::core::{Denial, LinkId, PartFilter};
use plm::entities::{SelectionPolicy, SubstituteSpec, UsageLinkSpec};

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_default_tree_excludes_optionals() {
    let pm = manager();
    let bike = bike(&pm);

    let tree = pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &SelectionPolicy::new())
        .unwrap();

    let paths: Vec<&str> = tree.nodes.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(paths, vec![String::new(), bike.frame_path(), bike.wheel_path()]);
    assert_eq!(tree.root().unwrap().part, bike.bike.iteration(1));
    assert_eq!(tree.node(&bike.wheel_path()).unwrap().part, bike.wheel.iteration(1));
    assert_eq!(tree.excluded_optionals, vec![bike.bell_path()]);
    assert!(tree.applied_substitutes.is_empty());
    assert!(tree.selection().substitute_paths.is_empty());
}

#[test]
fn test_selected_substitute_replaces_component() {
    let pm = manager();
    let bike = bike(&pm);
    let selection = SelectionPolicy::new()
        .select_substitute(bike.wheel_xl_path())
        .retain_optional(bike.bell_path());

    let tree = pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &selection)
        .unwrap();

    assert!(!tree.contains_path(&bike.wheel_path()));
    let xl = tree.node(&bike.wheel_xl_path()).unwrap();
    assert!(xl.substituted);
    assert_eq!(xl.part, bike.wheel_xl.iteration(1));
    assert_eq!(xl.link, Some(LinkId::Substitute(bike.wheel_link.substitutes[0].id)));

    let bell = tree.node(&bike.bell_path()).unwrap();
    assert!(bell.optional);
    assert!(tree.excluded_optionals.is_empty());
    assert_eq!(tree.selection(), selection);
    assert!(!tree.parts().contains_key("WHEEL"));
}

#[test]
fn test_unknown_selection_path_is_rejected() {
    let pm = manager();
    let bike = bike(&pm);

    let selection = SelectionPolicy::new().select_substitute("s999");
    let err = pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &selection)
        .unwrap_err();
    assert!(err.is_not_found());

    // a usage path is not a substitute path
    let selection = SelectionPolicy::new().select_substitute(bike.wheel_path());
    assert!(pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &selection)
        .is_err());
}

#[test]
fn test_two_substitutes_for_one_link_conflict() {
    let pm = manager();
    let bike = bike(&pm);
    leaf_part(&pm, "WHEEL_XS");

    let working = pm.checkout(&bike.bike, "alice").unwrap();
    let wheel = link_to(&working, "WHEEL");
    let xs = pm
        .add_substitute(&bike.bike, "alice", wheel.id, &SubstituteSpec::new("WHEEL_XS"))
        .unwrap();
    pm.checkin(&bike.bike, "alice", None).unwrap();

    let selection = SelectionPolicy::new()
        .select_substitute(wheel.substitutes[0].full_id())
        .select_substitute(xs.full_id());
    let err = pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &selection)
        .unwrap_err();
    assert_eq!(
        err.denial(),
        Some(&Denial::ConflictingSubstitutes {
            link: wheel.full_id()
        })
    );
}

#[test]
fn test_nested_paths_chain_link_ids() {
    let pm = manager();
    let bike = bike(&pm);
    leaf_part(&pm, "SPOKE");

    pm.checkout(&bike.wheel, "alice").unwrap();
    let spoke = pm
        .add_usage_link(&bike.wheel, "alice", &UsageLinkSpec::new("SPOKE").amount(32.0))
        .unwrap();
    pm.checkin(&bike.wheel, "alice", None).unwrap();

    let tree = pm
        .resolve_structure(&bike.ci, &PartFilter::LatestCheckedIn, &SelectionPolicy::new())
        .unwrap();
    let spoke_path = format!("{}-{}", bike.wheel_path(), spoke.full_id());
    let node = tree.node(&spoke_path).unwrap();
    assert_eq!(node.depth, 2);
    assert_eq!(node.part.master().id, "SPOKE");
    assert_eq!(tree.node(&bike.wheel_path()).unwrap().part, bike.wheel.iteration(2));

    let decoded = pm
        .decode_path(&bike.ci, &spoke_path, &PartFilter::LatestCheckedIn)
        .unwrap();
    assert_eq!(&decoded, node);
}

#[test]
fn test_latest_filter_shows_own_working_copy() {
    let pm = manager();
    let bike = bike(&pm);
    leaf_part(&pm, "BASKET");

    pm.checkout(&bike.bike, "alice").unwrap();
    let basket = pm
        .add_usage_link(&bike.bike, "alice", &UsageLinkSpec::new("BASKET"))
        .unwrap();

    let mine = PartFilter::Latest {
        user: "alice".to_string(),
    };
    let theirs = PartFilter::Latest {
        user: "bob".to_string(),
    };
    let selection = SelectionPolicy::new();
    assert!(pm
        .resolve_structure(&bike.ci, &mine, &selection)
        .unwrap()
        .contains_path(&basket.full_id()));
    assert!(!pm
        .resolve_structure(&bike.ci, &theirs, &selection)
        .unwrap()
        .contains_path(&basket.full_id()));
}

#[test]
fn test_released_filter_needs_released_parts() {
    let pm = manager();
    let bike = bike(&pm);

    let err = pm
        .resolve_structure(&bike.ci, &PartFilter::Released, &SelectionPolicy::new())
        .unwrap_err();
    assert!(err.is_not_found());

    for key in [&bike.bike, &bike.frame, &bike.wheel] {
        pm.release(key, "alice").unwrap();
    }
    let tree = pm
        .resolve_structure(&bike.ci, &PartFilter::Released, &SelectionPolicy::new())
        .unwrap();
    assert_eq!(tree.nodes.len(), 3);
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_decode_path() {
    let pm = manager();
    let bike = bike(&pm);
    let filter = PartFilter::LatestCheckedIn;

    let root = pm.decode_path(&bike.ci, "", &filter).unwrap();
    assert_eq!(root.part, bike.bike.iteration(1));

    // optional and substitute paths decode regardless of any selection
    let bell = pm.decode_path(&bike.ci, &bike.bell_path(), &filter).unwrap();
    assert!(bell.optional);
    let xl = pm.decode_path(&bike.ci, &bike.wheel_xl_path(), &filter).unwrap();
    assert_eq!(xl.part, bike.wheel_xl.iteration(1));

    let missing = format!("{}-u9999", bike.wheel_path());
    assert!(pm.decode_path(&bike.ci, &missing, &filter).unwrap_err().is_not_found());
    assert!(matches!(
        pm.decode_path(&bike.ci, "u1-x2", &filter).unwrap_err(),
        plm::PlmError::InvalidPath { .. }
    ));
}

// ============================================================================
// Editing
// ============================================================================

#[test]
fn test_structure_edits_need_the_checkout() {
    let pm = manager();
    let bike = bike(&pm);

    let err = pm
        .add_usage_link(&bike.bike, "alice", &UsageLinkSpec::new("BELL"))
        .unwrap_err();
    assert_eq!(err.denial(), Some(&Denial::IterationFrozen { iteration: 1 }));

    pm.checkout(&bike.bike, "alice").unwrap();
    let err = pm
        .add_usage_link(&bike.bike, "bob", &UsageLinkSpec::new("BELL"))
        .unwrap_err();
    assert!(matches!(
        err.denial(),
        Some(Denial::CheckedOutByOther { .. })
    ));
}

#[test]
fn test_remove_usage_link() {
    let pm = manager();
    let bike = bike(&pm);

    let working = pm.checkout(&bike.bike, "alice").unwrap();
    let bell = link_to(&working, "BELL");
    pm.remove_usage_link(&bike.bike, "alice", bell.id).unwrap();
    assert!(pm
        .remove_usage_link(&bike.bike, "alice", bell.id)
        .unwrap_err()
        .is_not_found());
    pm.checkin(&bike.bike, "alice", None).unwrap();

    let revision = pm.get_revision(&bike.bike).unwrap();
    let components: Vec<&str> = revision.iterations[1]
        .components
        .iter()
        .map(|l| l.component.as_str())
        .collect();
    assert_eq!(components, vec!["FRAME", "WHEEL"]);
    assert_eq!(revision.iterations[0].components.len(), 3);
}

#[test]
fn test_replaced_link_keeps_its_slot() {
    let pm = manager();
    let bike = bike(&pm);
    leaf_part(&pm, "FRAME_CARBON");

    let working = pm.checkout(&bike.bike, "alice").unwrap();
    let frame = link_to(&working, "FRAME");
    let (created, _) = pm
        .replace_usage_links(
            &bike.bike,
            "alice",
            &[(frame.id, UsageLinkSpec::new("FRAME_CARBON"))],
        )
        .unwrap();
    pm.checkin(&bike.bike, "alice", None).unwrap();

    let revision = pm.get_revision(&bike.bike).unwrap();
    let components: Vec<&str> = revision.iterations[1]
        .components
        .iter()
        .map(|l| l.component.as_str())
        .collect();
    assert_eq!(components, vec!["FRAME_CARBON", "WHEEL", "BELL"]);
    assert_eq!(revision.iterations[1].components[0].id, created[0].id);
}

#[test]
fn test_where_used() {
    let pm = manager();
    let bike = bike(&pm);
    assert_eq!(pm.where_used(&bike.wheel.master).unwrap(), vec![bike.bike.clone()]);
    assert_eq!(pm.where_used(&bike.wheel_xl.master).unwrap(), vec![bike.bike.clone()]);
    assert!(pm.where_used(&bike.bike.master).unwrap().is_empty());
}

#[test]
fn test_configuration_items() {
    let pm = manager();
    let bike = bike(&pm);

    let item = pm.get_configuration_item(&bike.ci).unwrap();
    assert_eq!(item.design_item, "BIKE");
    assert!(pm
        .create_configuration_item(&bike.ci, "BIKE", None, "alice")
        .unwrap_err()
        .is_already_exists());

    let ghost = plm::core::ConfigurationItemKey::new("ws", "GHOST-CI");
    assert!(pm
        .create_configuration_item(&ghost, "GHOST", None, "alice")
        .unwrap_err()
        .is_not_found());
    assert_eq!(pm.list_configuration_items("ws").unwrap(), vec![bike.ci.clone()]);
}
