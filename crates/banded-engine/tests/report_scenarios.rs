//! End-to-end report runs driven through the public API.

use std::sync::Arc;

use banded_engine::{CompiledReport, ConfigError, ReportRun, RunOutcome, TreeEvaluator};
use banded_model::{
    BinaryOp, Expr, Group, GroupLevel, Record, ReportDefinition, ResetPolicy, Value, Variable,
    VariableKind,
};
use pretty_assertions::assert_eq;

fn compile(definition: ReportDefinition) -> Arc<CompiledReport> {
    Arc::new(CompiledReport::compile(definition).unwrap())
}

fn sales(region: &str, amount: f64) -> Record {
    Record::from_iter([
        ("region", Value::from(region)),
        ("amount", Value::from(amount)),
    ])
}

#[test]
fn derived_variables_fold_in_dependency_order() {
    // base feeds tax feeds total; declaration order happens to match, but
    // the resolved order is what guarantees same-record consistency.
    let definition = ReportDefinition::new(
        vec![
            Variable::new(
                "base",
                VariableKind::Sum,
                Expr::field("amount"),
                ResetPolicy::Report,
            ),
            Variable::new(
                "tax",
                VariableKind::Custom,
                Expr::binary(BinaryOp::Mul, Expr::variable("base"), Expr::literal(0.1)),
                ResetPolicy::Report,
            ),
            Variable::new(
                "total",
                VariableKind::Custom,
                Expr::binary(BinaryOp::Add, Expr::variable("base"), Expr::variable("tax")),
                ResetPolicy::Report,
            ),
        ],
        vec![],
    );
    let compiled = compile(definition);
    assert_eq!(compiled.order().names(), ["base", "tax", "total"]);

    let mut run = ReportRun::new(compiled, TreeEvaluator);
    let source: Vec<Result<Record, std::convert::Infallible>> =
        vec![Ok(sales("W", 100.0)), Ok(sales("W", 50.0))];
    let summary = run.run(source).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.values["base"], Value::from(150.0));
    assert_eq!(summary.values["tax"], Value::from(15.0));
    assert_eq!(summary.values["total"], Value::from(165.0));
}

#[test]
fn group_scoped_count_resets_on_the_break() {
    let definition = ReportDefinition::new(
        vec![Variable::new(
            "regional_count",
            VariableKind::Count,
            Expr::field("amt"),
            ResetPolicy::Group(GroupLevel(1)),
        )],
        vec![Group::new("region", 1, Expr::field("region"))],
    );
    let mut run = ReportRun::new(compile(definition), TreeEvaluator);

    let rec = |region: &str, amt: f64| {
        Record::from_iter([("region", Value::from(region)), ("amt", Value::from(amt))])
    };

    run.process_record(&rec("W", 10.0));
    assert_eq!(
        run.accumulator().value("regional_count"),
        Some(&Value::from(1.0))
    );
    let change = run.process_record(&rec("W", 5.0));
    assert!(change.groups.is_empty());
    assert_eq!(
        run.accumulator().value("regional_count"),
        Some(&Value::from(2.0))
    );
    let change = run.process_record(&rec("E", 7.0));
    assert!(change.contains_group(GroupLevel(1)));
    assert_eq!(
        run.accumulator().value("regional_count"),
        Some(&Value::from(1.0))
    );
}

#[test]
fn cycle_between_two_variables_fails_compilation() {
    let definition = ReportDefinition::new(
        vec![
            Variable::new(
                "a",
                VariableKind::Custom,
                Expr::variable("b"),
                ResetPolicy::Report,
            ),
            Variable::new(
                "b",
                VariableKind::Custom,
                Expr::variable("a"),
                ResetPolicy::Report,
            ),
        ],
        vec![],
    );
    let err = CompiledReport::compile(definition).unwrap_err();
    let ConfigError::Cycle(cycle) = err else {
        panic!("expected a cycle error, got {err}");
    };
    assert!(cycle.path.iter().any(|n| n == "a"));
    assert!(cycle.path.iter().any(|n| n == "b"));
}

#[test]
fn one_failing_variable_does_not_poison_the_rest() {
    let definition = ReportDefinition::new(
        vec![
            Variable::new(
                "x",
                VariableKind::Sum,
                Expr::field("sometimes_there"),
                ResetPolicy::Report,
            ),
            Variable::new(
                "y",
                VariableKind::Count,
                Expr::field("amount"),
                ResetPolicy::Report,
            ),
        ],
        vec![],
    );
    let mut run = ReportRun::new(compile(definition), TreeEvaluator);

    run.process_record(&Record::from_iter([
        ("amount", Value::from(1.0)),
        ("sometimes_there", Value::from(10.0)),
    ]));
    // Second record is missing x's field: x faults, y still counts.
    run.process_record(&Record::from_iter([("amount", Value::from(1.0))]));
    assert_eq!(run.accumulator().value("x"), Some(&Value::from(10.0)));
    assert_eq!(run.accumulator().value("y"), Some(&Value::from(2.0)));
    assert_eq!(run.faults().len(), 1);
    assert_eq!(run.faults()[0].record_index, 1);

    // The next record processes normally again.
    run.process_record(&Record::from_iter([
        ("amount", Value::from(1.0)),
        ("sometimes_there", Value::from(2.0)),
    ]));
    assert_eq!(run.accumulator().value("x"), Some(&Value::from(12.0)));
    assert_eq!(run.accumulator().value("y"), Some(&Value::from(3.0)));
    assert_eq!(run.faults().len(), 1);
}

#[test]
fn two_level_report_with_cascading_resets() {
    let rec = |region: &str, city: &str, amount: f64| {
        Record::from_iter([
            ("region", Value::from(region)),
            ("city", Value::from(city)),
            ("amount", Value::from(amount)),
        ])
    };
    let definition = ReportDefinition::new(
        vec![
            Variable::new(
                "city_total",
                VariableKind::Sum,
                Expr::field("amount"),
                ResetPolicy::Group(GroupLevel(2)),
            ),
            Variable::new(
                "region_total",
                VariableKind::Sum,
                Expr::field("amount"),
                ResetPolicy::Group(GroupLevel(1)),
            ),
            Variable::new(
                "grand_total",
                VariableKind::Sum,
                Expr::field("amount"),
                ResetPolicy::Report,
            ),
        ],
        vec![
            Group::new("region", 1, Expr::field("region")),
            Group::new("city", 2, Expr::field("city")),
        ],
    );
    let mut run = ReportRun::new(compile(definition), TreeEvaluator);
    let value = |run: &ReportRun<TreeEvaluator>, name: &str| {
        run.accumulator().value(name).cloned().unwrap()
    };

    run.process_record(&rec("W", "Portland", 10.0));
    run.process_record(&rec("W", "Portland", 15.0));
    run.process_record(&rec("W", "Salem", 4.0));

    assert_eq!(value(&run, "city_total"), Value::from(4.0));
    assert_eq!(value(&run, "region_total"), Value::from(29.0));

    // Region change closes both levels even though the city name repeats.
    let change = run.process_record(&rec("E", "Salem", 7.0));
    assert_eq!(
        change.groups.as_slice(),
        [GroupLevel(1), GroupLevel(2)]
    );
    assert_eq!(value(&run, "city_total"), Value::from(7.0));
    assert_eq!(value(&run, "region_total"), Value::from(7.0));
    assert_eq!(value(&run, "grand_total"), Value::from(36.0));

    assert_eq!(run.tracker().breaks_at(GroupLevel(2)), 2);
    assert_eq!(run.tracker().breaks_at(GroupLevel(1)), 1);
    assert_eq!(run.tracker().group_instances(GroupLevel(1)), 2);
}

#[test]
fn page_scoped_average_restarts_on_page_boundaries() {
    let definition = ReportDefinition::new(
        vec![Variable::new(
            "page_avg",
            VariableKind::Average,
            Expr::field("amount"),
            ResetPolicy::Page,
        )],
        vec![],
    );
    let mut run = ReportRun::new(compile(definition), TreeEvaluator);

    run.process_record(&sales("W", 10.0));
    run.process_record(&sales("W", 20.0));
    assert_eq!(run.accumulator().value("page_avg"), Some(&Value::from(15.0)));

    run.notify_page_break();
    run.process_record(&sales("W", 50.0));
    assert_eq!(run.accumulator().value("page_avg"), Some(&Value::from(50.0)));
}

#[test]
fn summary_serializes_for_host_consumption() {
    let definition = ReportDefinition::new(
        vec![Variable::new(
            "total",
            VariableKind::Sum,
            Expr::field("amount"),
            ResetPolicy::Report,
        )],
        vec![],
    );
    let mut run = ReportRun::new(compile(definition), TreeEvaluator);
    let source: Vec<Result<Record, std::convert::Infallible>> = vec![Ok(sales("W", 2.5))];
    let summary = run.run(source).unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["outcome"], "completed");
    assert_eq!(json["records_processed"], 1);
    assert_eq!(json["values"]["total"]["type"], "number");
}
