//! Immediate and delayed option changes

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod support;

use std::time::Duration;

use alertr_model::*;
use alertsrv::hub::OptionChange;
use alertsrv::storage::Storage;
use support::*;

fn change(value: f64, delay: Option<u64>) -> OptionChangeMsg {
    OptionChangeMsg {
        option_type: OPTION_ALERT_SYSTEM_ACTIVE.into(),
        value,
        delay,
    }
}

#[tokio::test]
async fn test_immediate_change_is_mirrored() {
    let t = TestHub::with_update(&base_update()).await;

    let outcome = t.hub.handle_option_change(SENSOR_NODE, &change(0.0, None)).await;
    assert_eq!(outcome, OptionChange::Applied { previous: None });
    assert_eq!(
        t.hub.store().option_value(OPTION_ALERT_SYSTEM_ACTIVE),
        Some(0.0)
    );

    let options = t.storage.get_all_of_kind(EntityKind::Option).await.unwrap();
    assert_eq!(options.len(), 1);

    let outcome = t.hub.handle_option_change(SENSOR_NODE, &change(1.0, Some(0))).await;
    assert_eq!(outcome, OptionChange::Applied { previous: Some(0.0) });
}

#[tokio::test]
async fn test_delayed_change_applies_later() {
    let t = TestHub::with_update(&base_update()).await;

    let outcome = t.hub.handle_option_change(SENSOR_NODE, &change(0.0, Some(1))).await;
    assert_eq!(outcome, OptionChange::Scheduled { delay_secs: 1 });
    assert_eq!(t.hub.store().option_value(OPTION_ALERT_SYSTEM_ACTIVE), None);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        t.hub.store().option_value(OPTION_ALERT_SYSTEM_ACTIVE),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_delayed_change_dropped_on_shutdown() {
    let t = TestHub::with_update(&base_update()).await;

    t.hub.handle_option_change(SENSOR_NODE, &change(0.0, Some(1))).await;
    t.cancel.cancel();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(t.hub.store().option_value(OPTION_ALERT_SYSTEM_ACTIVE), None);
}
