/// Chemistry logging job: append-only test history with range alerts
///
/// Run with: cargo test --test chemistry_logging

mod common;

use common::{ALERTS, FakeChemistry, RecordingNotifier, channels, chemistry_config, open_store};
use poolmon_service::alert::Tier;
use poolmon_service::jobs::{self, JobContext};
use poolmon_service::model::SOURCE_CHEM_IN_STORE;
use poolmon_service::store::ReadingStore;
use serde_json::json;

fn june_test() -> serde_json::Value {
    json!({
        "test_date": "06/09/2024",
        "free_chlorine": "2.5",
        "ph": 8.0,
        "cyanuric_acid": 120,
        "phosphates": "N/A",
        "salt": 3000,
        "in_store": true
    })
}

fn tier_of(tiers: &[(String, Tier)], metric: &str) -> Tier {
    tiers
        .iter()
        .find(|(m, _)| m == metric)
        .map(|(_, t)| *t)
        .unwrap_or_else(|| panic!("no tier for {}", metric))
}

#[test]
fn test_new_test_is_logged_and_classified() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = chemistry_config(dir.path());
    let notifier = RecordingNotifier::default();
    let ctx = JobContext::new(&cfg, &notifier, channels());
    let mut store = open_store(&cfg);

    let outcome = jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(june_test()), &mut store)
        .unwrap();

    assert_eq!(outcome.counts.appended, 11, "ten fields plus the in-store flag");
    assert_eq!(outcome.counts.rejected, 0);
    assert_eq!(tier_of(&outcome.tiers, "free_chlorine"), Tier::Ok);
    assert_eq!(tier_of(&outcome.tiers, "ph"), Tier::Caution);
    assert_eq!(tier_of(&outcome.tiers, "cyanuric_acid"), Tier::Alert);
    assert_eq!(tier_of(&outcome.tiers, "phosphates"), Tier::Ok, "N/A logs as 0");
    assert_eq!(tier_of(&outcome.tiers, "iron"), Tier::Unknown, "absent field");

    let alerts = notifier.messages_to(ALERTS);
    assert_eq!(alerts.len(), 2, "one alert plus one caution summary: {:?}", alerts);
    assert!(alerts[0].starts_with("🚨") && alerts[0].contains("`cyanuric_acid` = 120"));
    assert!(alerts[1].starts_with("⚠️ *Outside target range*"));
    assert!(alerts[1].contains("`ph` = 8"), "{}", alerts[1]);

    let phosphates = store.load_all("phosphates").unwrap();
    assert_eq!(phosphates[0].value, Some(0.0));
    let iron = store.load_all("iron").unwrap();
    assert_eq!(iron[0].value, None, "absent field is a missing reading");
    assert_eq!(store.load_all(SOURCE_CHEM_IN_STORE).unwrap()[0].value, Some(1.0));
}

#[test]
fn test_rerun_with_same_test_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = chemistry_config(dir.path());
    let notifier = RecordingNotifier::default();
    let ctx = JobContext::new(&cfg, &notifier, channels());
    let mut store = open_store(&cfg);

    jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(june_test()), &mut store).unwrap();
    let sent_after_first = notifier.sent.borrow().len();
    let again = jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(june_test()), &mut store)
        .unwrap();

    assert_eq!(again.counts.appended, 0);
    assert_eq!(again.counts.already_logged, 11);
    assert!(again.tiers.is_empty());
    assert_eq!(notifier.sent.borrow().len(), sent_after_first, "no repeat alerts");
    assert_eq!(store.load_all("ph").unwrap().len(), 1);
}

#[test]
fn test_conflicting_retest_is_rejected_per_field() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = chemistry_config(dir.path());
    let notifier = RecordingNotifier::default();
    let ctx = JobContext::new(&cfg, &notifier, channels());
    let mut store = open_store(&cfg);

    jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(june_test()), &mut store).unwrap();
    let mut retest = june_test();
    retest["ph"] = json!(7.4);
    let outcome =
        jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(retest), &mut store).unwrap();

    assert_eq!(outcome.counts.rejected, 1);
    assert_eq!(outcome.counts.already_logged, 10);
    assert_eq!(store.load_all("ph").unwrap()[0].value, Some(8.0), "history is not rewritten");
}

#[test]
fn test_next_day_test_appends() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = chemistry_config(dir.path());
    let notifier = RecordingNotifier::default();
    let ctx = JobContext::new(&cfg, &notifier, channels());
    let mut store = open_store(&cfg);

    jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(june_test()), &mut store).unwrap();
    let mut next = june_test();
    next["test_date"] = json!("06/10/2024");
    next["ph"] = json!(7.5);
    jobs::run_chemistry_log(&ctx, &mut FakeChemistry::new(next), &mut store).unwrap();

    let ph: Vec<Option<f64>> = store.load_all("ph").unwrap().iter().map(|r| r.value).collect();
    assert_eq!(ph, vec![Some(8.0), Some(7.5)]);
}
