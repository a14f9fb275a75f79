//! Integration tests for new-message banners

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{row, settle, Backend, FakeProfiles};
use thread_sync::{FeedEvent, NewMessageNotifier};

#[tokio::test(start_paused = true)]
async fn test_banners_skip_the_open_thread() {
    let backend = Backend::new();
    let (notifier, mut banners) =
        NewMessageNotifier::start("alice", backend.hub.as_ref(), Arc::new(FakeProfiles));
    notifier.set_active_peer("bob");
    assert_eq!(notifier.active_peer().as_deref(), Some("bob"));

    let from_carol = row("m2", "carol", "alice", "hello there", Utc::now());
    backend
        .hub
        .publish_row(&FeedEvent::insert(&row("m1", "bob", "alice", "in thread", Utc::now())))
        .unwrap();
    backend.hub.publish_row(&FeedEvent::insert(&from_carol)).unwrap();
    backend
        .hub
        .publish_row(&FeedEvent::insert(&row("m3", "alice", "carol", "mine", Utc::now())))
        .unwrap();
    backend.hub.publish_row(&FeedEvent::insert(&from_carol)).unwrap();
    settle().await;

    let banner = banners.try_recv().unwrap();
    assert_eq!(banner.message_id, "m2");
    assert_eq!(banner.from_user_id, "carol");
    assert_eq!(banner.display_name, "Carol");
    assert_eq!(banner.preview, "hello there");
    assert!(banners.try_recv().is_err());

    notifier.clear_active_peer();
    backend
        .hub
        .publish_row(&FeedEvent::insert(&row("m4", "bob", "alice", "now?", Utc::now())))
        .unwrap();
    settle().await;
    assert_eq!(banners.try_recv().unwrap().display_name, "Bob");
}

#[tokio::test(start_paused = true)]
async fn test_updates_do_not_raise_banners() {
    let backend = Backend::new();
    let (_notifier, mut banners) =
        NewMessageNotifier::start("alice", backend.hub.as_ref(), Arc::new(FakeProfiles));

    backend
        .hub
        .publish_row(&FeedEvent::update(&row("m1", "bob", "alice", "edited", Utc::now())))
        .unwrap();
    settle().await;
    assert!(banners.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_subscription() {
    let backend = Backend::new();
    let (notifier, mut banners) =
        NewMessageNotifier::start("alice", backend.hub.as_ref(), Arc::new(FakeProfiles));
    assert_eq!(backend.hub.row_subscribers("alice"), 1);

    notifier.stop();
    settle().await;
    assert_eq!(backend.hub.row_subscribers("alice"), 0);

    backend
        .hub
        .publish_row(&FeedEvent::insert(&row("m1", "bob", "alice", "hi", Utc::now())))
        .unwrap();
    settle().await;
    assert!(banners.try_recv().is_err());
}
