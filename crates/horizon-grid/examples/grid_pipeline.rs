//! Row pipeline walkthrough.
//!
//! Loads a small table, then filters, sorts, groups, aggregates, pages and
//! scrolls it, printing what the grid would render after each step.
//!
//! Run with: RUST_LOG=horizon_grid=debug cargo run -p horizon-grid --example grid_pipeline

use horizon_grid::{
    AggregationModel, ColumnDef, ColumnType, FilterItem, FilterModel, GridApi, GridConfig, GridEvent,
    GroupingModel, LogicOperator, PaginationModel, RowTreeDebug, SortItem, SortModel, ViewportState,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn print_rows(api: &GridApi, title: &str) {
    println!("{title}");
    for id in api.visible_rows() {
        match api.row(&id) {
            Some(row) => println!("  {id}: {} ({}), {}", row["name"], row["age"], row["company"]),
            None => println!("  {id}"),
        }
    }
    println!();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let api = GridApi::new(
        vec![
            ColumnDef::new("name", ColumnType::String).with_width(160.0),
            ColumnDef::new("age", ColumnType::Number),
            ColumnDef::new("company", ColumnType::String).with_flex(1.0),
        ],
        GridConfig::default().with_row_height(32.0),
    );
    api.subscribe_events(|event: &GridEvent| match event {
        GridEvent::Warning(warning) => println!("warning: {warning}"),
        GridEvent::RenderedRowsIntervalChange(context) => println!("render window: {:?}", context.rows),
        _ => {}
    });

    api.set_rows(vec![
        json!({"id": 1, "name": "Ada", "age": 36, "company": "Analytical"}),
        json!({"id": 2, "name": "Grace", "age": 45, "company": "Navy"}),
        json!({"id": 3, "name": "Alan", "age": 41, "company": "Bletchley"}),
        json!({"id": 4, "name": "Joan", "age": 33, "company": "Bletchley"}),
        json!({"id": 5, "name": "Edsger", "age": 42, "company": "Eindhoven"}),
        json!({"id": 6, "name": "Barbara", "age": 39, "company": "Navy"}),
    ])?;
    print_rows(&api, "All rows:");

    api.set_filter_model(FilterModel::new(
        vec![FilterItem::new("age", ">", json!(35))],
        LogicOperator::And,
    ));
    api.set_sort_model(SortModel::new(vec![SortItem::desc("age")]));
    print_rows(&api, "Older than 35, oldest first:");

    api.batch(|| {
        api.set_filter_model(FilterModel::default());
        api.set_grouping_model(GroupingModel::new(["company"]));
        api.set_aggregation_model(AggregationModel::new([("age", "avg")]));
    });
    let processed = api.processed_rows();
    println!("{}", RowTreeDebug::new(&processed.tree));
    for id in processed.tree.top_level() {
        println!("  {id}: avg age {:?}", api.aggregate(id, "age"));
    }
    println!();

    api.batch(|| {
        api.set_grouping_model(GroupingModel::default());
        api.set_config(GridConfig::default().with_row_height(32.0).with_pagination(true));
        api.set_pagination_model(PaginationModel::new(1, 4));
    });
    print_rows(&api, "Page 2 of size 4:");

    api.set_viewport(ViewportState::new(400.0, 64.0));
    api.scroll_to(32.0, 0.0);
    println!("pagination: {:?}", api.pagination_meta());
    println!("exported state: {}", api.export_state().to_json()?);
    Ok(())
}
