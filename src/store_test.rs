use super::*;
use crate::placement::DEFAULT_GRID_COLUMNS;
use serde_json::json;

fn store() -> ItemStore {
    ItemStore::new(DEFAULT_GRID_COLUMNS)
}

fn record(id: &str, kind: ItemKind, x: u32, y: u32, w: u32, h: u32) -> RemoteItem {
    RemoteItem { id: id.into(), kind, payload: json!({}), x: Some(x), y: Some(y), w: Some(w), h: Some(h) }
}

// =============================================================
// add
// =============================================================

#[test]
fn add_assigns_fresh_local_ids_and_unsaved_state() {
    let mut store = store();
    let a = store.add(ItemKind::Chart, json!({"title": "a"}));
    let b = store.add(ItemKind::Chart, json!({"title": "b"}));

    assert_ne!(a.local_id, b.local_id);
    assert_eq!(a.state, LifecycleState::Unsaved);
    assert_eq!(a.server_id, None);
    assert_eq!(a.persisted_placement, None);
    assert_eq!(store.len(), 2);
}

#[test]
fn add_stacks_below_existing_items() {
    let mut store = store();
    let chart = store.add(ItemKind::Chart, json!({}));
    assert_eq!(chart.placement, Placement::new(0, 0, 6, 4));

    let kpi = store.add(ItemKind::Kpi, json!({}));
    assert_eq!(kpi.placement, Placement::new(0, 4, 3, 2));
}

#[test]
fn text_block_lands_below_rows_zero_to_three_at_full_width() {
    let mut store = store();
    store.load(vec![record("c1", ItemKind::Chart, 0, 0, 6, 4)]);

    let block = store.add(ItemKind::Header, json!({"text": "Summary"}));
    assert_eq!(block.placement.y, 4);
    assert_eq!(block.placement.x, 0);
    assert_eq!(block.placement.w, DEFAULT_GRID_COLUMNS);
}

#[test]
fn insertion_order_is_preserved() {
    let mut store = store();
    let ids: Vec<_> = (0..4)
        .map(|_| store.add(ItemKind::Kpi, json!({})).local_id)
        .collect();
    let listed: Vec<_> = store.items().iter().map(|i| i.local_id).collect();
    assert_eq!(ids, listed);
}

// =============================================================
// load
// =============================================================

#[test]
fn load_marks_records_persisted() {
    let mut store = store();
    store.add(ItemKind::Kpi, json!({}));
    store.load(vec![record("c1", ItemKind::Table, 6, 0, 6, 4)]);

    assert_eq!(store.len(), 1);
    let item = &store.items()[0];
    assert_eq!(item.server_id.as_deref(), Some("c1"));
    assert_eq!(item.state, LifecycleState::Persisted);
    assert_eq!(item.persisted_placement, Some(item.placement));
    assert_eq!(item.placement, Placement::new(6, 0, 6, 4));
}

#[test]
fn load_fills_missing_sizes_with_defaults() {
    let mut store = store();
    store.load(vec![RemoteItem {
        id: "k1".into(),
        kind: ItemKind::Kpi,
        payload: json!({}),
        x: None,
        y: Some(2),
        w: None,
        h: Some(0),
    }]);
    assert_eq!(store.items()[0].placement, Placement::new(0, 2, 3, 2));
}

#[test]
fn find_by_server_id_after_load() {
    let mut store = store();
    store.load(vec![record("c1", ItemKind::Chart, 0, 0, 6, 4), record("c2", ItemKind::Kpi, 6, 0, 3, 2)]);
    let found = store.find_by_server_id("c2").unwrap();
    assert_eq!(found.kind, ItemKind::Kpi);
    assert!(store.find_by_server_id("missing").is_none());
}

// =============================================================
// apply_server_id
// =============================================================

#[test]
fn apply_server_id_twice_is_a_noop() {
    let mut store = store();
    let item = store.add(ItemKind::Chart, json!({}));

    assert_eq!(store.apply_server_id(&item.local_id, "abc".into()), Ok(true));
    assert_eq!(store.apply_server_id(&item.local_id, "abc".into()), Ok(false));

    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&item.local_id).unwrap().server_id.as_deref(), Some("abc"));
}

#[test]
fn apply_server_id_refuses_a_different_id() {
    let mut store = store();
    let item = store.add(ItemKind::Chart, json!({}));
    store.apply_server_id(&item.local_id, "abc".into()).unwrap();

    let err = store.apply_server_id(&item.local_id, "xyz".into()).unwrap_err();
    assert!(matches!(err, CanvasError::Validation(_)));
    assert_eq!(store.get(&item.local_id).unwrap().server_id.as_deref(), Some("abc"));
}

#[test]
fn apply_server_id_unknown_item() {
    let mut store = store();
    let id = Uuid::new_v4();
    assert_eq!(store.apply_server_id(&id, "abc".into()), Err(CanvasError::NotFound(id)));
}

// =============================================================
// remove, revert, layout
// =============================================================

#[test]
fn remove_takes_item_out() {
    let mut store = store();
    let a = store.add(ItemKind::Kpi, json!({}));
    let b = store.add(ItemKind::Kpi, json!({}));

    let removed = store.remove(&a.local_id).unwrap();
    assert_eq!(removed.local_id, a.local_id);
    assert!(store.get(&a.local_id).is_none());
    assert!(store.get(&b.local_id).is_some());
    assert!(store.remove(&a.local_id).is_none());
}

#[test]
fn revert_restores_persisted_and_keeps_unsaved() {
    let mut store = store();
    store.load(vec![record("c1", ItemKind::Chart, 0, 0, 6, 4)]);
    let persisted = store.items()[0].local_id;
    let fresh = store.add(ItemKind::Kpi, json!({}));

    store.set_placement(&persisted, Placement::new(6, 2, 6, 4));
    store.set_placement(&fresh.local_id, Placement::new(9, 9, 3, 2));
    store.revert_unpersisted_moves();

    assert_eq!(store.get(&persisted).unwrap().placement, Placement::new(0, 0, 6, 4));
    assert_eq!(store.get(&fresh.local_id).unwrap().placement, Placement::new(9, 9, 3, 2));
}

#[test]
fn layout_carries_bounds_and_lock() {
    let mut store = store();
    let kpi = store.add(ItemKind::Kpi, json!({}));

    let unlocked = store.layout(false);
    assert_eq!(unlocked.len(), 1);
    assert_eq!(unlocked[0].id, kpi.local_id);
    assert_eq!((unlocked[0].min_w, unlocked[0].min_h, unlocked[0].max_h), (2, 2, 4));
    assert!(!unlocked[0].is_static);

    assert!(store.layout(true)[0].is_static);
}

#[test]
fn setters_report_unknown_items() {
    let mut store = store();
    let id = Uuid::new_v4();
    assert!(!store.set_state(&id, LifecycleState::Failed));
    assert!(!store.set_placement(&id, Placement::default()));
}
