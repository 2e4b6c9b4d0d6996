// ABOUTME: Integration tests for scenario replay
// ABOUTME: Exercises cross-session cache coherence through the scenario runner

use pgcat::scenario::{Scenario, ScenarioRunner};
use pgcat_core::loader::SymbolTable;
use pgcat_core::origin::{BasePlugin, PLUGIN_INIT_SYMBOL};
use pgcat_core::text_output;
use std::path::Path;

fn loader() -> SymbolTable {
    SymbolTable::new().with(
        text_output::MODULE,
        PLUGIN_INIT_SYMBOL,
        text_output::plugin_init,
    )
}

fn base() -> BasePlugin {
    BasePlugin {
        module: text_output::MODULE.to_string(),
        symbol: PLUGIN_INIT_SYMBOL.to_string(),
    }
}

#[test]
fn test_bundled_coherence_scenario_passes() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/coherence.toml");
    let scenario = Scenario::load(&path).unwrap();

    let loader = loader();
    let report = ScenarioRunner::new(&loader, base()).run(&scenario).unwrap();

    for outcome in &report.outcomes {
        assert!(outcome.matched, "{}", outcome);
    }
    assert_eq!(report.outcomes.len(), scenario.steps.len());

    let output = &report.output["walsender"];
    assert_eq!(output.len(), 3);
    assert!(output[1].contains("'new'"));
    assert!(output.iter().all(|line| !line.contains("replayed")));
}

#[test]
fn test_alter_without_accept_is_invisible_until_safe_point() {
    let scenario = Scenario::from_toml(
        r#"
        [[steps]]
        session = "a"
        action = "create"
        relation = "public.orders"

        [[steps]]
        session = "a"
        action = "check"
        relation = "public.orders"
        expect = false

        [[steps]]
        session = "a"
        action = "mark"
        relation = "public.orders"

        [[steps]]
        session = "a"
        action = "commit"

        [[steps]]
        session = "b"
        action = "alter"
        relation = "public.orders"

        [[steps]]
        session = "b"
        action = "commit"

        [[steps]]
        session = "a"
        action = "accept"

        [[steps]]
        session = "a"
        action = "check"
        relation = "public.orders"
        expect = false
        "#,
    )
    .unwrap();

    let loader = loader();
    let report = ScenarioRunner::new(&loader, base()).run(&scenario).unwrap();
    assert_eq!(report.mismatches(), 0);
    assert_eq!(report.outcomes[6].result, "accepted 1 message(s)");
}

#[test]
fn test_mismatched_expectation_is_reported() {
    let scenario = Scenario::from_toml(
        r#"
        [[steps]]
        session = "a"
        action = "create"
        relation = "public.orders"

        [[steps]]
        session = "a"
        action = "check"
        relation = "public.orders"
        expect = true
        "#,
    )
    .unwrap();

    let loader = loader();
    let report = ScenarioRunner::new(&loader, base()).run(&scenario).unwrap();
    assert_eq!(report.mismatches(), 1);
    assert!(report.outcomes[1].to_string().contains("MISMATCH"));
}

#[test]
fn test_missing_base_plugin_fails_decode() {
    let scenario = Scenario::from_toml(
        r#"
        [[steps]]
        session = "walsender"
        action = "decode"
        origin = 0
        "#,
    )
    .unwrap();

    let loader = SymbolTable::new();
    let err = ScenarioRunner::new(&loader, base())
        .run(&scenario)
        .unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("Failed to initialize output plugin text_output"));
}
