/// Channel manager tests
///
/// Reference-counted channel reuse and listener cleanup.
/// Run with: cargo test --test channel_tests

use opscache::channel::ChannelState;
use opscache::{ChangeEvent, ChangeHandlers, ChannelManager, MemoryBackend, RawRow, TableName};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn row(value: serde_json::Value) -> RawRow {
    value.as_object().cloned().unwrap()
}

fn counting() -> (Arc<AtomicUsize>, ChangeHandlers) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    let handlers = ChangeHandlers::new().on_change(move |_: &ChangeEvent| {
        inner.fetch_add(1, Ordering::SeqCst);
    });
    (count, handlers)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_identical_subscriptions_share_one_channel() {
    let backend = MemoryBackend::new();
    let manager = ChannelManager::new(Arc::new(backend.clone()), false);

    let (first_count, first) = counting();
    let (second_count, second) = counting();
    let (third_count, third) = counting();
    let mut a = manager.subscribe(TableName::Guests, None, first).unwrap();
    let mut b = manager.subscribe(TableName::Guests, None, second).unwrap();
    let mut c = manager.subscribe(TableName::Guests, None, third).unwrap();
    a.ready().await.unwrap();
    b.ready().await.unwrap();
    c.ready().await.unwrap();

    assert_eq!(backend.opened_feeds(), 1);
    assert_eq!(manager.channel_count(), 1);
    assert_eq!(manager.listener_count(TableName::Guests, None), 3);

    // Fewer unsubscribes than subscribes keeps the channel open
    a.unsubscribe();
    drop(b);
    assert_eq!(manager.channel_count(), 1);
    assert_eq!(c.state(), ChannelState::Open);

    backend
        .remote_insert(TableName::Guests, row(json!({"first_name": "Ana", "last_name": "Ruiz"})))
        .unwrap();
    settle().await;

    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 0);
    assert_eq!(third_count.load(Ordering::SeqCst), 1);
    assert_eq!(backend.active_feeds(), 1);
}

#[tokio::test]
async fn test_filters_get_their_own_channel() {
    let backend = MemoryBackend::new();
    let manager = ChannelManager::new(Arc::new(backend.clone()), true);

    let (all_count, all) = counting();
    let (g1_count, g1) = counting();
    let mut unfiltered = manager.subscribe(TableName::GuestWarnings, None, all).unwrap();
    let mut filtered = manager
        .subscribe(TableName::GuestWarnings, Some("guest_id=eq.g1"), g1)
        .unwrap();
    unfiltered.ready().await.unwrap();
    filtered.ready().await.unwrap();

    assert_eq!(manager.channel_count(), 2);
    assert_eq!(backend.opened_feeds(), 2);
    assert_eq!(manager.listener_count(TableName::GuestWarnings, Some("guest_id=eq.g1")), 1);

    for guest in ["g1", "g2", "g2"] {
        backend
            .remote_insert(TableName::GuestWarnings, row(json!({"guest_id": guest, "message": "m"})))
            .unwrap();
    }
    settle().await;

    assert_eq!(all_count.load(Ordering::SeqCst), 3);
    assert_eq!(g1_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_callbacks_after_everyone_unsubscribes() {
    let backend = MemoryBackend::new();
    let manager = ChannelManager::new(Arc::new(backend.clone()), false);

    let (first_count, first) = counting();
    let (second_count, second) = counting();
    let mut a = manager.subscribe(TableName::DailyNotes, None, first).unwrap();
    let b = manager.subscribe(TableName::DailyNotes, None, second).unwrap();
    a.ready().await.unwrap();

    a.unsubscribe();
    b.unsubscribe();
    assert_eq!(manager.channel_count(), 0);

    backend
        .remote_insert(
            TableName::DailyNotes,
            row(json!({"note_date": "2024-06-01", "service": "meals", "body": "late"})),
        )
        .unwrap();
    settle().await;

    assert_eq!(first_count.load(Ordering::SeqCst), 0);
    assert_eq!(second_count.load(Ordering::SeqCst), 0);
    assert_eq!(backend.active_feeds(), 0);
}

#[tokio::test]
async fn test_resubscribe_opens_a_new_channel() {
    let backend = MemoryBackend::new();
    let manager = ChannelManager::new(Arc::new(backend.clone()), false);

    let mut first = manager
        .subscribe(TableName::BlockedSlots, None, ChangeHandlers::new())
        .unwrap();
    first.ready().await.unwrap();
    first.unsubscribe();

    let (count, handlers) = counting();
    let mut second = manager.subscribe(TableName::BlockedSlots, None, handlers).unwrap();
    second.ready().await.unwrap();
    assert_eq!(backend.opened_feeds(), 2);
    assert_eq!(manager.opened_total(), 2);

    backend
        .remote_insert(
            TableName::BlockedSlots,
            row(json!({"service_type": "shower", "slot_date": "2024-06-01", "slot_time": "08:00"})),
        )
        .unwrap();
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_closes_every_channel() {
    let backend = MemoryBackend::new();
    let manager = ChannelManager::new(Arc::new(backend.clone()), false);

    let mut guests = manager
        .subscribe(TableName::Guests, None, ChangeHandlers::new())
        .unwrap();
    let mut meals = manager
        .subscribe(TableName::MealAttendance, None, ChangeHandlers::new())
        .unwrap();
    guests.ready().await.unwrap();
    meals.ready().await.unwrap();

    manager.shutdown();
    settle().await;

    assert_eq!(manager.channel_count(), 0);
    assert_eq!(guests.state(), ChannelState::Closed);
    assert_eq!(backend.active_feeds(), 0);

    // Handles outliving the channel drop quietly
    drop(guests);
    drop(meals);
}
