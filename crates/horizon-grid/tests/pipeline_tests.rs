//! End-to-end pipeline scenarios through the public façade.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use horizon_grid::{
    AggregationModel, CellValue, ColumnDef, ColumnType, FilterItem, FilterModel, FilterResult, GridApi, GridConfig, GridError,
    GridEvent, GridState, GridWarning, GroupingModel, InitialState, LogicOperator, PageRange, PaginationModel,
    PipelineStage, ProcessedRows, ProcessingContext, RowId, RowNodeKind, RowProcessor, SortItem, SortModel,
    TreeDataSource, TreeKind, ViewportState,
};

fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("age", ColumnType::Number),
        ColumnDef::new("company", ColumnType::String),
    ]
}

fn people() -> Vec<Value> {
    vec![
        json!({"id": 1, "age": 30, "company": "A"}),
        json!({"id": 2, "age": 25, "company": "A"}),
        json!({"id": 3, "age": 25, "company": "B"}),
    ]
}

fn grid(config: GridConfig) -> GridApi {
    let api = GridApi::new(columns(), config);
    api.set_rows(people()).unwrap();
    api
}

fn ids(values: &[i64]) -> Vec<RowId> {
    values.iter().copied().map(RowId::from).collect()
}

fn record_events(api: &GridApi) -> Arc<Mutex<Vec<GridEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    api.subscribe_events(move |event| sink.lock().push(event.clone()));
    events
}

#[test]
fn test_stable_sort_by_age() {
    let api = grid(GridConfig::default());
    api.set_sort_model(SortModel::new(vec![SortItem::asc("age")]));
    assert_eq!(api.visible_rows(), ids(&[2, 3, 1]));

    api.set_sort_model(SortModel::new(vec![SortItem::desc("age")]));
    assert_eq!(api.visible_rows(), ids(&[1, 2, 3]));
}

#[test]
fn test_filter_greater_than() {
    let api = grid(GridConfig::default());
    api.set_filter_model(FilterModel::new(
        vec![FilterItem::new("age", ">", json!(26))],
        LogicOperator::And,
    ));
    assert_eq!(api.visible_rows(), ids(&[1]));
    assert_eq!(api.processed_rows().filter.passing(), ids(&[1]).as_slice());
}

#[test]
fn test_filter_model_from_json() {
    let api = grid(GridConfig::default());

    let and: FilterModel = serde_json::from_value(json!({
        "items": [{"field": "age", "operator": ">", "value": 26}],
        "linkOperator": "AND",
    }))
    .unwrap();
    assert_eq!(and.logic_operator, LogicOperator::And);
    api.set_filter_model(and);
    assert_eq!(api.visible_rows(), ids(&[1]));

    let or: FilterModel = serde_json::from_value(json!({
        "items": [
            {"field": "age", "operator": ">", "value": 26},
            {"field": "age", "operator": "<", "value": 26},
        ],
        "linkOperator": "OR",
    }))
    .unwrap();
    assert_eq!(or.logic_operator, LogicOperator::Or);
    api.set_filter_model(or);
    assert_eq!(api.visible_rows(), ids(&[1, 2, 3]));

    let native: FilterModel = serde_json::from_value(json!({"items": [], "logicOperator": "or"})).unwrap();
    assert_eq!(native.logic_operator, LogicOperator::Or);
}

#[test]
fn test_second_page_over_sorted_rows() {
    let api = grid(GridConfig::default().with_pagination(true));
    api.batch(|| {
        api.set_sort_model(SortModel::new(vec![SortItem::asc("age")]));
        api.set_pagination_model(PaginationModel::new(1, 2));
    });
    assert_eq!(api.visible_rows(), ids(&[1]));
    assert_eq!(
        api.processed_rows().page_range,
        Some(PageRange {
            first_row_index: 2,
            last_row_index: 2
        })
    );
    assert_eq!(api.pagination_meta().page_count, 2);
}

#[test]
fn test_group_by_company() {
    let api = grid(GridConfig::default());
    api.set_grouping_model(GroupingModel::new(["company"]));

    let processed = api.processed_rows();
    let tree = &processed.tree;
    assert_eq!(tree.kind(), TreeKind::Grouping);
    let groups = tree.top_level();
    assert_eq!(groups.len(), 2);

    let counts: Vec<usize> = groups
        .iter()
        .map(|id| {
            let node = tree.get(id).unwrap();
            assert_eq!(node.depth, 1);
            assert_eq!(node.kind, RowNodeKind::Group);
            node.children_ids.len()
        })
        .collect();
    assert_eq!(counts, vec![2, 1]);
}

#[test]
fn test_group_keys_with_separators_and_mixed_kinds() {
    let api = GridApi::new(
        vec![
            ColumnDef::new("company", ColumnType::String),
            ColumnDef::new("team", ColumnType::String),
        ],
        GridConfig::default(),
    );
    api.set_rows(vec![
        json!({"id": 1, "company": "A-team/y", "team": "z"}),
        json!({"id": 2, "company": "A", "team": "y"}),
        json!({"id": 3, "company": 7, "team": "y"}),
        json!({"id": 4, "company": "7", "team": "y"}),
    ])
    .unwrap();
    api.set_grouping_model(GroupingModel::new(["company", "team"]));

    let processed = api.processed_rows();
    let tree = &processed.tree;
    assert!(tree.validate().is_ok());
    assert_eq!(tree.top_level().len(), 4);
    for id in 1..=4 {
        assert_eq!(tree.get(&RowId::from(id)).unwrap().depth, 3);
    }
}

#[test]
fn test_group_aggregates_and_footers() {
    let api = grid(GridConfig::default().with_group_footers(true));
    api.batch(|| {
        api.set_grouping_model(GroupingModel::new(["company"]));
        api.set_aggregation_model(AggregationModel::new([("age", "sum"), ("company", "count")]));
    });

    let group_a = RowId::from("auto-generated-row-company/A");
    assert_eq!(api.aggregate(&group_a, "age"), Some(CellValue::Number(55.0)));
    assert_eq!(api.aggregate(&group_a, "company"), Some(CellValue::Number(2.0)));
    assert_eq!(api.aggregate(&RowId::root(), "age"), Some(CellValue::Number(80.0)));

    let footer = api.row_node(&group_a).and_then(|node| node.footer_id).unwrap();
    assert_eq!(api.aggregate(&footer, "age"), Some(CellValue::Number(55.0)));
}

#[test]
fn test_expanding_a_group_shows_its_rows() {
    let api = grid(GridConfig::default());
    api.set_grouping_model(GroupingModel::new(["company"]));
    assert_eq!(api.visible_rows().len(), 2);

    let group_b = RowId::from("auto-generated-row-company/B");
    api.set_row_children_expansion(&group_b, true).unwrap();
    assert_eq!(api.visible_rows(), vec![RowId::from("auto-generated-row-company/A"), group_b.clone(), RowId::from(3)]);

    api.set_row_children_expansion(&group_b, false).unwrap();
    assert_eq!(api.visible_rows().len(), 2);
}

#[test]
fn test_expand_all_by_default() {
    let api = grid(GridConfig::default().with_default_group_expansion_depth(-1));
    api.set_grouping_model(GroupingModel::new(["company"]));
    assert_eq!(api.visible_rows().len(), 5);
}

#[test]
fn test_tree_data_cycle_is_reported() {
    let api = GridApi::new(columns(), GridConfig::default().with_tree_data(true));
    api.set_tree_data(TreeDataSource::parent_id(|row| row.get("parent").and_then(RowId::from_json)))
        .unwrap();
    let events = record_events(&api);

    let err = api
        .set_rows(vec![
            json!({"id": 1}),
            json!({"id": 2, "parent": 3}),
            json!({"id": 3, "parent": 2}),
        ])
        .unwrap_err();
    assert!(matches!(err, GridError::CyclicTreeData { .. }));

    // The rows are registered; the cycle is left out of the tree.
    assert_eq!(api.state().rows.len(), 3);
    assert_eq!(api.visible_rows(), ids(&[1]));
    assert!(events.lock().iter().any(|e| matches!(e, GridEvent::TreeDataError(_))));
}

#[test]
fn test_tree_data_by_path() {
    let api = GridApi::new(
        columns(),
        GridConfig::default()
            .with_tree_data(true)
            .with_default_group_expansion_depth(-1),
    );
    api.set_tree_data(TreeDataSource::path(|row| {
        row["path"]
            .as_array()
            .map(|p| p.iter().filter_map(|s| s.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }))
    .unwrap();
    api.set_rows(vec![
        json!({"id": 1, "path": ["Sarah"]}),
        json!({"id": 2, "path": ["Sarah", "Tom"]}),
        json!({"id": 3, "path": ["Jane", "Kim"]}),
    ])
    .unwrap();

    let processed = api.processed_rows();
    assert_eq!(processed.tree.kind(), TreeKind::TreeData);
    assert_eq!(processed.tree.top_level().len(), 2);
    assert_eq!(api.visible_rows().len(), 4);
}

#[test]
fn test_unknown_sort_field_warns_and_continues() {
    let api = grid(GridConfig::default());
    let events = record_events(&api);
    api.set_sort_model(SortModel::new(vec![SortItem::asc("missing"), SortItem::desc("age")]));

    assert_eq!(api.visible_rows(), ids(&[1, 2, 3]));
    let events = events.lock();
    assert!(events.iter().any(|e| matches!(
        e,
        GridEvent::Warning(GridWarning::UnknownField { field, .. }) if field == "missing"
    )));
    assert!(events.iter().any(|e| matches!(e, GridEvent::SortModelChanged(_))));
}

#[test]
fn test_row_updates() {
    let api = grid(GridConfig::default());
    api.set_sort_model(SortModel::new(vec![SortItem::asc("age")]));
    api.update_rows(vec![
        horizon_grid::RowUpdate::Upsert(json!({"id": 1, "age": 10})),
        horizon_grid::RowUpdate::Delete(RowId::from(3)),
        horizon_grid::RowUpdate::Upsert(json!({"id": 4, "age": 50, "company": "C"})),
    ])
    .unwrap();
    assert_eq!(api.visible_rows(), ids(&[1, 2, 4]));
    assert_eq!(api.row(&RowId::from(1)).unwrap()["company"], json!("A"));
}

#[test]
fn test_initial_state_round_trip() {
    let initial = InitialState::from_json(
        r#"{"sortModel": [{"field": "age", "sort": "asc"}], "paginationModel": {"page": 0, "pageSize": 2}}"#,
    )
    .unwrap();
    let api = GridApi::with_initial_state(columns(), GridConfig::default().with_pagination(true), &initial);
    api.set_rows(people()).unwrap();
    assert_eq!(api.visible_rows(), ids(&[2, 3]));
    assert_eq!(api.export_state(), initial);
}

#[derive(Debug)]
struct OnlyCompanyA;

impl RowProcessor for OnlyCompanyA {
    fn dependencies(&self, state: &GridState) -> Vec<horizon_grid_core::DepKey> {
        vec![horizon_grid_core::DepKey::of(&state.rows)]
    }

    fn process(&self, input: &ProcessedRows, state: &GridState, _ctx: &mut ProcessingContext) -> ProcessedRows {
        let kept: Vec<RowId> = input
            .filter
            .passing()
            .iter()
            .filter(|id| state.rows.get(id).is_some_and(|row| row["company"] == "A"))
            .cloned()
            .collect();
        ProcessedRows {
            filter: Arc::new(FilterResult::all(&kept)),
            ..input.clone()
        }
    }
}

#[test]
fn test_custom_processor() {
    let api = grid(GridConfig::default());
    api.register_processor(PipelineStage::Filter, "onlyA", Arc::new(OnlyCompanyA));
    assert_eq!(api.visible_rows(), ids(&[1, 2]));
    assert!(api.processor_ids(PipelineStage::Filter).contains(&"onlyA".to_string()));

    assert!(api.unregister_processor(PipelineStage::Filter, "onlyA"));
    assert_eq!(api.visible_rows(), ids(&[1, 2, 3]));
}

#[test]
fn test_viewport_events() {
    let config = GridConfig::default().with_row_height(10.0).with_buffers(1, 0);
    let api = GridApi::new(columns(), config);
    let rows: Vec<Value> = (0..100).map(|i| json!({"id": i, "age": i})).collect();
    api.set_rows(rows).unwrap();
    let events = record_events(&api);

    api.set_viewport(ViewportState::new(200.0, 50.0));
    let context = api.render_context();
    assert_eq!(context.first_row_index(), Some(0));
    assert_eq!(context.last_row_index(), Some(5));
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, GridEvent::RenderedRowsIntervalChange(_))));

    api.scroll_to(950.0, 0.0);
    assert_eq!(api.render_context().last_row_index(), Some(99));
    let scroll_ends = events
        .lock()
        .iter()
        .filter(|e| matches!(e, GridEvent::RowsScrollEnd { .. }))
        .count();
    assert_eq!(scroll_ends, 1);

    // Staying at the end does not announce it again.
    api.scroll_to(960.0, 0.0);
    let scroll_ends = events
        .lock()
        .iter()
        .filter(|e| matches!(e, GridEvent::RowsScrollEnd { .. }))
        .count();
    assert_eq!(scroll_ends, 1);
}

#[test]
fn test_per_row_heights() {
    let config = GridConfig::default().with_row_height(10.0).with_buffers(0, 0);
    let api = GridApi::new(columns(), config);
    let rows: Vec<Value> = (0..20).map(|i| json!({"id": i, "age": i, "tall": i < 2})).collect();
    api.set_rows(rows).unwrap();
    api.set_viewport(ViewportState::new(200.0, 50.0));
    assert_eq!(api.render_context().last_row_index(), Some(4));

    api.set_row_height_getter(|row| row["tall"].as_bool().filter(|tall| *tall).map(|_| 50.0));
    assert_eq!(api.render_context().first_row_index(), Some(0));
    assert_eq!(api.render_context().last_row_index(), Some(0));

    api.scroll_to_index(2);
    assert_eq!(api.state().viewport.scroll_top, 100.0);
    assert_eq!(api.render_context().first_row_index(), Some(2));
    assert_eq!(api.render_context().last_row_index(), Some(6));

    api.clear_row_height_getter();
    api.scroll_to_index(2);
    assert_eq!(api.state().viewport.scroll_top, 20.0);
}
