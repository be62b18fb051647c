#![forbid(unsafe_code)]

mod common;

use common::{
    Fixture, add, assert_all_trees_valid, channel, child_titles, ctx, file, fixture, item,
    refresh, resource, shape_profile, topic,
};
use ct_core::{CountingProgress, Node, Position, ProgressTracker, new_hex_id};
use ct_storage::{CopyOptions, CopyReport, LocalBlobStore, StoreError, TreeStore};
use rusqlite::params;
use serde_json::json;
use std::sync::Arc;

fn copy(
    store: &TreeStore,
    node: &Node,
    target: Option<&Node>,
    options: &CopyOptions,
) -> Result<CopyReport, StoreError> {
    store.copy_node_with_report(&ctx(), node, target, Position::LastChild, options, None)
}

fn batch(size: usize) -> CopyOptions {
    CopyOptions {
        batch_size: Some(size),
        ..CopyOptions::default()
    }
}

fn landing(store: &TreeStore) -> Node {
    let (_, root) = channel(store, "Target");
    add(store, &root, topic("Landing"))
}

/// Files, tags and an assessment item spread over the fixture.
fn decorate(store: &TreeStore, fx: &Fixture) {
    let m1 = &fx.leaves[0];
    let o1 = &fx.leaves[3];
    let d1 = &fx.leaves[6];
    store.add_file(&m1.id, file("aa11")).expect("file");
    store.add_file(&o1.id, file("bb22")).expect("file");

    let bio = store.ensure_tag("bio", Some(&fx.channel.id)).expect("tag");
    store.tag_node(&m1.id, &bio).expect("tag m1");
    store.tag_node(&o1.id, &bio).expect("tag o1");
    let cells = store.ensure_tag("cells", None).expect("global tag");
    store.tag_node(&fx.top.id, &cells).expect("tag top");

    let question = store.add_assessment_item(&d1.id, item("q1")).expect("item");
    store
        .add_assessment_item_file(&question.id, file("cc33"))
        .expect("item file");
}

#[test]
fn small_subtree_is_copied_in_one_batch_with_dependents() {
    let store = common::store();
    let fx = fixture(&store);
    decorate(&store, &fx);
    let target = landing(&store);
    store
        .connection()
        .execute("UPDATE nodes SET changed = 0", [])
        .expect("reset changed");
    let before = store.node_count().expect("count");

    let report = copy(&store, &fx.top, Some(&target), &CopyOptions::default()).expect("copy");

    assert_eq!(report.node_map.len(), 12);
    assert_eq!(store.node_count().expect("count"), before + 12);
    assert_eq!(report.deep_batches, 1);
    assert_eq!(report.shallow_nodes, 0);
    assert_eq!(report.roots.len(), 1);
    assert!(refresh(&store, &target).changed);
    assert_all_trees_valid(&store);

    let copy_top = &report.roots[0];
    assert_eq!(copy_top.parent_id.as_deref(), Some(target.id.as_str()));
    assert_eq!(shape_profile(&store, &copy_top.id), shape_profile(&store, &fx.top.id));
    let copied = store.subtree(&copy_top.id).expect("copied subtree");
    let sources = store.subtree(&fx.top.id).expect("source subtree");
    for (copy, source) in copied.iter().zip(&sources) {
        assert_ne!(copy.id, source.id);
        assert_ne!(copy.node_id, source.node_id);
        assert_eq!(copy.content_id, source.content_id);
        assert_eq!(report.node_map[&source.id], copy.id);
        assert_eq!(copy.lineage.cloned_source_id.as_deref(), Some(source.id.as_str()));
        assert_eq!(copy.lineage.source_node_id.as_deref(), Some(source.node_id.as_str()));
        assert_eq!(copy.lineage.source_channel_id.as_deref(), Some(fx.channel.id.as_str()));
        assert_eq!(copy.lineage.original_channel_id.as_deref(), Some(fx.channel.id.as_str()));
        assert_eq!(
            copy.lineage.original_source_node_id.as_deref(),
            Some(source.node_id.as_str())
        );
        assert!(copy.changed);
        assert!(!copy.published);
        assert!(copy.attributes.freeze_authoring_data);
    }

    let m1_copy = &report.node_map[&fx.leaves[0].id];
    let files = store.files_for_node(m1_copy).expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].checksum, "aa11");
    assert_ne!(
        files[0].id,
        store.files_for_node(&fx.leaves[0].id).expect("files")[0].id
    );

    let tags: Vec<(String, bool)> = store
        .tags_for_node(m1_copy)
        .expect("tags")
        .into_iter()
        .map(|tag| (tag.tag_name.clone(), tag.is_global()))
        .collect();
    assert_eq!(tags, [("bio".to_string(), true)]);
    assert_eq!(report.replicated.tags_created, 1);
    assert_eq!(report.replicated.tag_links, 3);

    let d1_copy = &report.node_map[&fx.leaves[6].id];
    let items = store.assessment_items_for_node(d1_copy).expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].assessment_id, "q1");
    let item_files = store.files_for_assessment_item(&items[0].id).expect("item files");
    assert_eq!(item_files.len(), 1);
    assert_eq!(item_files[0].checksum, "cc33");
    assert_eq!(report.replicated.assessment_items, 1);
    assert_eq!(report.replicated.assessment_files, 1);
}

#[test]
fn legacy_lineage_is_backfilled_from_the_original_node() {
    let store = common::store();
    let fx = fixture(&store);
    let (archive, archive_root) = channel(&store, "Archive");
    let origin = add(&store, &archive_root, topic("Mitosis"));
    let legacy = &fx.leaves[6];
    store
        .connection()
        .execute(
            "UPDATE nodes SET original_channel_id = NULL, original_source_node_id = NULL, \
             original_node_id = ?2 WHERE id = ?1",
            params![legacy.id, origin.id],
        )
        .expect("strip lineage");
    let legacy = refresh(&store, legacy);
    let target = landing(&store);

    let first = copy(&store, &legacy, Some(&target), &CopyOptions::default())
        .expect("first copy")
        .roots
        .remove(0);
    assert_eq!(first.lineage.original_channel_id.as_deref(), Some(archive.id.as_str()));
    assert_eq!(
        first.lineage.original_source_node_id.as_deref(),
        Some(origin.node_id.as_str())
    );
    assert_eq!(first.lineage.original_node_id.as_deref(), Some(origin.id.as_str()));
    assert_eq!(first.lineage.source_node_id.as_deref(), Some(legacy.node_id.as_str()));
    assert_eq!(first.lineage.source_channel_id.as_deref(), Some(fx.channel.id.as_str()));
    let resolved = store
        .get_node_by_node_id(&archive.id, &origin.node_id)
        .expect("origin by node id");
    assert_eq!(resolved.id, origin.id);

    let (_, mirror_root) = channel(&store, "Mirror");
    let second = copy(&store, &first, Some(&mirror_root), &CopyOptions::default())
        .expect("second copy")
        .roots
        .remove(0);
    assert_eq!(second.lineage.original_channel_id.as_deref(), Some(archive.id.as_str()));
    assert_eq!(
        second.lineage.original_source_node_id.as_deref(),
        Some(origin.node_id.as_str())
    );
    assert_eq!(second.lineage.source_node_id.as_deref(), Some(first.node_id.as_str()));
    assert_eq!(second.lineage.cloned_source_id.as_deref(), Some(first.id.as_str()));
    assert_all_trees_valid(&store);
}

#[test]
fn width_equal_to_batch_size_takes_the_shallow_path() {
    let store = common::store();
    let fx = fixture(&store);
    let target = landing(&store);
    assert_eq!(fx.top.subtree_width(), 23);

    let report = copy(&store, &fx.top, Some(&target), &batch(23)).expect("copy");
    assert_eq!(report.shallow_nodes, 1);
    assert_eq!(report.deep_batches, 3);
    assert_eq!(report.node_map.len(), 12);

    let report = copy(&store, &fx.top, Some(&target), &batch(24)).expect("copy");
    assert_eq!(report.shallow_nodes, 0);
    assert_eq!(report.deep_batches, 1);
    assert_all_trees_valid(&store);
}

#[test]
fn oversized_batch_copies_a_wide_subtree_in_one_window() {
    let store = common::store();
    let (_, root) = channel(&store, "Catalogue");
    let top = add(&store, &root, topic("Entries"));
    for index in 0..850 {
        add(&store, &top, resource(&format!("entry {index:03}")));
    }
    let top = refresh(&store, &top);
    let target = landing(&store);

    let report = copy(&store, &top, Some(&target), &batch(usize::MAX)).expect("copy");
    assert_eq!(report.deep_batches, 1);
    assert_eq!(report.shallow_nodes, 0);
    assert_eq!(report.node_map.len(), 851);
    assert_eq!(
        child_titles(&store, &report.roots[0].id),
        child_titles(&store, &top.id)
    );
    assert_all_trees_valid(&store);
}

#[test]
fn node_by_node_copy_preserves_shape_and_order() {
    let store = common::store();
    let fx = fixture(&store);
    decorate(&store, &fx);
    let target = landing(&store);

    let report = copy(&store, &fx.top, Some(&target), &batch(1)).expect("copy");
    assert_eq!(report.shallow_nodes, 12);
    assert_eq!(report.deep_batches, 0);
    assert_eq!(
        shape_profile(&store, &report.roots[0].id),
        shape_profile(&store, &fx.top.id)
    );
    assert_eq!(report.replicated.files, 2);
    assert_eq!(report.replicated.tags_created, 1);
    assert_all_trees_valid(&store);
}

#[test]
fn overrides_respect_source_channel_permissions() {
    let store = common::store();
    let fx = fixture(&store);
    store
        .connection()
        .execute(
            "UPDATE nodes SET license_id = 'CC BY' WHERE id = ?1",
            params![fx.top.id],
        )
        .expect("license");
    let target = landing(&store);
    let overrides = json!({"license_id": "CC0", "title": "Renamed"})
        .as_object()
        .cloned()
        .expect("object");

    let viewer = CopyOptions {
        overrides: Some(overrides.clone()),
        ..CopyOptions::default()
    };
    let report = copy(&store, &fx.top, Some(&target), &viewer).expect("copy");
    let copy_top = &report.roots[0];
    assert_eq!(copy_top.attributes.license_id.as_deref(), Some("CC BY"));
    assert_eq!(copy_top.attributes.title, "Renamed");
    assert!(copy_top.attributes.freeze_authoring_data);
    assert_eq!(
        child_titles(&store, &copy_top.id),
        ["Membranes", "Organelles", "Division"]
    );

    let editor = CopyOptions {
        overrides: Some(overrides),
        can_edit_source_channel: true,
        ..CopyOptions::default()
    };
    let report = copy(&store, &fx.top, Some(&target), &editor).expect("copy");
    let copy_top = &report.roots[0];
    assert_eq!(copy_top.attributes.license_id.as_deref(), Some("CC0"));
    assert!(!copy_top.attributes.freeze_authoring_data);
}

#[test]
fn tag_dedup_creates_at_most_one_global_tag() {
    let store = common::store();
    let fx = fixture(&store);
    decorate(&store, &fx);
    let target = landing(&store);

    let first = copy(&store, &fx.top, Some(&target), &CopyOptions::default()).expect("copy");
    assert_eq!(first.replicated.tags_created, 1);
    assert_eq!(store.tag_count("bio").expect("count"), 2);

    let second = copy(&store, &fx.top, Some(&target), &CopyOptions::default()).expect("copy");
    assert_eq!(second.replicated.tags_created, 0);
    assert_eq!(store.tag_count("bio").expect("count"), 2);
    assert_eq!(store.tag_count("cells").expect("count"), 1);
}

#[test]
fn existing_global_tag_is_reused() {
    let store = common::store();
    let fx = fixture(&store);
    decorate(&store, &fx);
    let global = store.ensure_tag("bio", None).expect("global");
    let target = landing(&store);

    let report = copy(&store, &fx.top, Some(&target), &CopyOptions::default()).expect("copy");
    assert_eq!(report.replicated.tags_created, 0);
    let m1_copy = &report.node_map[&fx.leaves[0].id];
    let tags = store.tags_for_node(m1_copy).expect("tags");
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id, global.id);
}

#[test]
fn excluded_descendants_drop_whole_subtrees() {
    let store = common::store();
    let fx = fixture(&store);
    let target = landing(&store);
    let organelles = &fx.sections[1];
    let mut progress = CountingProgress::default();
    let options = CopyOptions {
        excluded_descendants: [organelles.node_id.clone()].into_iter().collect(),
        batch_size: Some(5),
        ..CopyOptions::default()
    };

    let report = store
        .copy_node_with_report(
            &ctx(),
            &fx.top,
            Some(&target),
            Position::LastChild,
            &options,
            Some(&mut progress as &mut dyn ProgressTracker),
        )
        .expect("copy");

    assert_eq!(report.node_map.len(), 8);
    assert!(!report.node_map.contains_key(&organelles.id));
    assert_eq!(child_titles(&store, &report.roots[0].id), ["Membranes", "Division"]);
    assert_eq!(progress.total, 8);
    assert_eq!(progress.done, 8);
    assert_all_trees_valid(&store);
}

#[test]
fn excluding_the_top_node_copies_nothing() {
    let store = common::store();
    let fx = fixture(&store);
    let target = landing(&store);
    let before = store.node_count().expect("count");
    let options = CopyOptions {
        excluded_descendants: [fx.top.node_id.clone()].into_iter().collect(),
        ..CopyOptions::default()
    };

    let roots = store
        .copy_node(&ctx(), &fx.top, Some(&target), Position::LastChild, &options, None)
        .expect("copy");
    assert!(roots.is_empty());
    assert_eq!(store.node_count().expect("count"), before);
}

#[test]
fn progress_reports_once_per_batch_or_node() {
    let store = common::store();
    let fx = fixture(&store);
    let target = landing(&store);

    let mut deep = CountingProgress::default();
    store
        .copy_node(
            &ctx(),
            &fx.top,
            Some(&target),
            Position::LastChild,
            &CopyOptions::default(),
            Some(&mut deep as &mut dyn ProgressTracker),
        )
        .expect("copy");
    assert_eq!((deep.total, deep.done, deep.reports), (12, 12, 1));

    let mut shallow = CountingProgress::default();
    store
        .copy_node(
            &ctx(),
            &fx.top,
            Some(&target),
            Position::LastChild,
            &batch(1),
            Some(&mut shallow as &mut dyn ProgressTracker),
        )
        .expect("copy");
    assert_eq!((shallow.total, shallow.done, shallow.reports), (12, 12, 12));
    assert!((shallow.percent() - 100.0).abs() < f64::EPSILON);
}

#[test]
fn missing_blob_aborts_the_whole_copy() {
    let blobs_dir = tempfile::tempdir().expect("temp dir");
    let blobs = LocalBlobStore::new(blobs_dir.path());
    let store = common::store().with_blob_store(Arc::new(blobs.clone()));
    let fx = fixture(&store);
    decorate(&store, &fx);
    let target = landing(&store);
    let before = store.node_count().expect("count");
    let target_rows = store.tree_rows(target.tree_id).expect("rows");

    let err = copy(&store, &fx.top, Some(&target), &batch(5)).expect_err("missing blob");
    assert!(matches!(err, StoreError::Io(_)), "{err:?}");
    assert_eq!(store.node_count().expect("count"), before);
    assert_eq!(store.tree_rows(target.tree_id).expect("rows"), target_rows);
    assert_eq!(store.tag_count("bio").expect("count"), 1);

    for checksum in ["aa11", "bb22", "cc33"] {
        let path = blobs.path_for(checksum, "mp4").expect("path");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("blob dir");
        std::fs::write(&path, b"blob").expect("blob");
    }
    let report = copy(&store, &fx.top, Some(&target), &batch(5)).expect("copy");
    assert_eq!(report.node_map.len(), 12);
    assert_eq!(report.replicated.files, 2);
}

#[test]
fn prerequisites_are_remapped_and_dangling_rows_removed() {
    let store = common::store();
    let fx = fixture(&store);
    let (m1, m2, m3) = (&fx.leaves[0], &fx.leaves[1], &fx.leaves[2]);
    store.add_prerequisite(&m2.id, &m1.id).expect("prerequisite");
    store.add_prerequisite(&m3.id, &new_hex_id()).expect("dangling");
    let target = landing(&store);

    let report = copy(&store, &fx.top, Some(&target), &CopyOptions::default()).expect("copy");
    assert_eq!(report.prerequisites, 1);
    assert_eq!(report.dangling_prerequisites_removed, 1);
    assert_eq!(
        store
            .prerequisites_for_node(&report.node_map[&m2.id])
            .expect("copied prerequisites"),
        [report.node_map[&m1.id].clone()]
    );
    assert!(store.prerequisites_for_node(&m3.id).expect("cleaned").is_empty());
    assert_eq!(
        store.prerequisites_for_node(&m2.id).expect("source kept"),
        [m1.id.clone()]
    );
}

#[test]
fn copy_into_own_subtree_and_to_new_root() {
    let store = common::store();
    let fx = fixture(&store);
    let membranes = &fx.sections[0];

    // The second pass also copies the first copy, which now sits inside the source.
    for (size, expected) in [(100, 4), (1, 8)] {
        let membranes = refresh(&store, membranes);
        let report = copy(&store, &membranes, Some(&membranes), &batch(size)).expect("copy");
        assert_eq!(report.node_map.len(), expected);
        assert_all_trees_valid(&store);
    }
    assert_eq!(
        child_titles(&store, &membranes.id),
        ["m1", "m2", "m3", "Membranes", "Membranes"]
    );

    let pk = new_hex_id();
    let options = CopyOptions {
        pk: Some(pk.clone()),
        ..CopyOptions::default()
    };
    let report = copy(&store, &refresh(&store, &fx.top), None, &options).expect("copy");
    let root = &report.roots[0];
    assert_eq!(root.id, pk);
    assert!(root.is_root());
    assert_ne!(root.tree_id, fx.top.tree_id);
    assert_eq!((root.lft, root.level), (1, 0));
    assert_all_trees_valid(&store);
}
