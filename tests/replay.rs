use autodag::fixture::{self, FixtureSpec, HostCall};
use autodag::{GroupId, Outcome, SkipReason};
use pretty_assertions::assert_eq;

fn load_demo() -> FixtureSpec {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/sites.json");
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn demo_fixture_replays_every_branch() {
    let validated = load_demo().validate_and_build().unwrap();
    let report = fixture::replay(&validated);

    let outcomes: Vec<&Outcome> = report.events.iter().map(|e| &e.outcome).collect();
    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes[0], &Outcome::Assigned { from: None, to: GroupId(7) });
    assert_eq!(
        outcomes[1],
        &Outcome::Skipped { reason: SkipReason::FieldNotOnInstrument }
    );
    assert_eq!(
        outcomes[2],
        &Outcome::Assigned { from: Some(GroupId(8)), to: GroupId(7) }
    );
    assert_eq!(outcomes[3], &Outcome::EmptyValue);
    assert!(matches!(outcomes[4], Outcome::Failed { kind, .. } if kind == "group-resolution"));

    let notifications = report
        .calls
        .iter()
        .filter(|c| matches!(c, HostCall::SendNotification { .. }))
        .count();
    assert_eq!(notifications, 1);

    assert_eq!(report.record_groups.get("101"), Some(&Some(GroupId(7))));
    assert_eq!(report.record_groups.get("102"), Some(&Some(GroupId(7))));
    assert_eq!(report.record_groups.get("103"), Some(&None));
}

#[test]
fn demo_fixture_passes_check() {
    let spec = load_demo();
    let validated = spec.validate_and_build().unwrap();
    let instruments: Vec<&str> = spec.instruments.keys().map(String::as_str).collect();

    let problems = fixture::check(&validated.host, &instruments);
    assert!(problems.is_empty(), "unexpected problems: {problems:?}");
}

#[test]
fn report_serializes_outcome_inline() {
    let validated = load_demo().validate_and_build().unwrap();
    let report = fixture::replay(&validated);
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["events"][0]["record"], "101");
    assert_eq!(json["events"][0]["outcome"], "assigned");
    assert_eq!(json["events"][0]["to"], 7);
    assert_eq!(json["calls"][0]["call"], "set-record-group");
}
