mod support;

use std::sync::Arc;
use std::time::Duration;

use boardsync::connectivity::{NoBackgroundSync, ReconnectTrigger};
use boardsync::dispatcher::Backoff;
use boardsync::error::Error;
use boardsync::history::HistoryFilter;
use boardsync::model::{EntityKind, MutationAction, NewCategory, NewNote, NewTask, TaskPatch};
use boardsync::queue::Mutation;
use boardsync::storage::FileStore;
use support::TestBoard;
use tempfile::TempDir;

fn rename(title: &str) -> TaskPatch {
    TaskPatch {
        title: Some(title.to_string()),
        ..TaskPatch::default()
    }
}

#[tokio::test]
async fn offline_create_is_applied_exactly_once_after_restart() {
    let dir = TempDir::new().unwrap();
    let local = Arc::new(FileStore::new(dir.path()));
    let t = TestBoard::with_local(false, local);

    let outcome = t
        .board
        .tasks()
        .create(NewTask::new("Buy milk", "home", "todo"))
        .await
        .unwrap();
    let operation_id = outcome.operation_id().unwrap().to_string();
    assert_eq!(t.remote.writes(), 0);

    let queued = t.board.queue().list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, operation_id);
    assert_eq!(queued[0].mutation.kind(), EntityKind::Task);
    assert_eq!(queued[0].mutation.action(), MutationAction::Create);

    // Same on-disk queue, fresh process.
    let board = t.restart(true);
    let summary = board.dispatcher().replay().await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(board.queue().is_empty().unwrap());

    // Draining again is a no-op.
    let summary = board.dispatcher().replay().await.unwrap();
    assert_eq!(summary.succeeded, 0);

    let tasks = t.all_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Buy milk");
    assert_eq!(tasks[0].position, 0);
}

#[tokio::test]
async fn direct_write_failure_is_saved_offline() {
    let t = TestBoard::new(true);
    let task = t.create(NewTask::new("Call mum", "home", "todo")).await;

    t.remote.set_failing(true);
    let outcome = t
        .board
        .tasks()
        .update(&task.id, rename("Call mum back"))
        .await
        .unwrap();
    assert!(outcome.is_offline());
    assert_eq!(t.board.queue().len().unwrap(), 1);

    t.remote.set_failing(false);
    assert_eq!(t.task(&task.id).await.title, "Call mum");
    t.board.dispatcher().replay().await.unwrap();
    assert_eq!(t.task(&task.id).await.title, "Call mum back");
}

#[tokio::test]
async fn validation_failure_is_neither_sent_nor_queued() {
    let t = TestBoard::new(false);
    let mut new = NewTask::new("Tidy", "home", "todo");
    new.tags.insert("two words".to_string());

    let err = t.board.tasks().create(new).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(t.board.queue().is_empty().unwrap());

    let err = t
        .board
        .tasks()
        .update("t1", TaskPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(t.board.queue().is_empty().unwrap());
}

#[tokio::test]
async fn blank_ids_are_rejected_before_queueing() {
    let t = TestBoard::new(false);

    let err = t.board.notes().delete(" ").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = t.board.categories().delete("").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(t.board.queue().is_empty().unwrap());
}

#[tokio::test]
async fn delete_saved_offline_leaves_no_deleted_entry() {
    let t = TestBoard::new(true);
    let task = t.create(NewTask::new("Pay rent", "home", "todo")).await;
    t.remote.fail_write(1);

    let outcome = t.board.tasks().delete(&task.id).await.unwrap();
    assert!(outcome.is_offline());
    assert_eq!(t.task(&task.id).await.title, "Pay rent");

    let summaries: Vec<String> = t
        .board
        .history()
        .recent(&HistoryFilter::default(), None)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.summary)
        .collect();
    assert_eq!(summaries, vec!["created \"Pay rent\"".to_string()]);
}

#[tokio::test]
async fn replaying_update_twice_matches_replaying_once() {
    let t = TestBoard::new(true);
    let task = t.create(NewTask::new("Plan trip", "home", "todo")).await;

    let queue = t.board.queue();
    queue.enqueue(Mutation::task_update(&task.id, rename("Plan Lisbon trip"))).unwrap();
    t.board.dispatcher().replay().await.unwrap();
    let once = t.task(&task.id).await;

    queue.enqueue(Mutation::task_update(&task.id, rename("Plan Lisbon trip"))).unwrap();
    t.board.dispatcher().replay().await.unwrap();
    let twice = t.task(&task.id).await;

    assert_eq!(once, twice);
}

#[tokio::test]
async fn replaying_delete_twice_matches_replaying_once() {
    let t = TestBoard::new(true);
    let keep = t.create(NewTask::new("Keep", "home", "todo")).await;
    let gone = t.create(NewTask::new("Gone", "home", "todo")).await;

    let queue = t.board.queue();
    queue.enqueue(Mutation::task_delete(&gone.id)).unwrap();
    queue.enqueue(Mutation::task_delete(&gone.id)).unwrap();
    let summary = t.board.dispatcher().replay().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    let ids: Vec<String> = t.all_tasks().await.into_iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![keep.id]);
}

#[tokio::test]
async fn replaying_same_create_twice_produces_two_records() {
    let t = TestBoard::new(false);
    let new = NewTask::new("Water plants", "home", "todo");
    t.board.tasks().create(new.clone()).await.unwrap();
    t.board.tasks().create(new).await.unwrap();
    assert_eq!(t.board.queue().len().unwrap(), 2);

    t.restart(true).dispatcher().replay().await.unwrap();

    let tasks = t.all_tasks().await;
    assert_eq!(tasks.len(), 2);
    assert_ne!(tasks[0].id, tasks[1].id);
    assert!(tasks.iter().all(|task| task.title == "Water plants"));
}

#[tokio::test]
async fn rapid_offline_edits_are_not_compacted() {
    let t = TestBoard::new(true);
    let task = t.create(NewTask::new("Draft", "work", "todo")).await;

    let offline = t.restart(false);
    for title in ["Draft 1", "Draft 2", "Draft 3"] {
        offline.tasks().update(&task.id, rename(title)).await.unwrap();
    }
    assert_eq!(offline.queue().len().unwrap(), 3);

    t.board.dispatcher().replay().await.unwrap();
    assert_eq!(t.task(&task.id).await.title, "Draft 3");
}

#[tokio::test]
async fn failed_replay_keeps_operations_in_order() {
    let t = TestBoard::new(false);
    t.board
        .notes()
        .create(NewNote::new("Groceries"))
        .await
        .unwrap();
    t.board
        .categories()
        .create(NewCategory::new("Garden"))
        .await
        .unwrap();

    let online = t.restart(true);
    t.remote.set_failing(true);
    let summary = online.dispatcher().replay().await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 2);
    assert_eq!(online.queue().len().unwrap(), 2);

    t.remote.set_failing(false);
    let summary = online.dispatcher().replay().await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(online.notes().list().await.unwrap()[0].title, "Groceries");
    assert_eq!(online.categories().list().await.unwrap()[0].name, "Garden");
}

#[tokio::test]
async fn poll_loop_drains_after_reconnect() {
    let t = TestBoard::new(false);
    t.board
        .tasks()
        .create(NewTask::new("Pack", "trip", "todo"))
        .await
        .unwrap();

    let handle = t.board.dispatcher().start(
        &NoBackgroundSync,
        false,
        Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(t.board.queue().len().unwrap(), 1);

    t.board.connectivity().set_online(true);
    wait_until_drained(&t).await;
    handle.shutdown().await;

    assert_eq!(t.all_tasks().await.len(), 1);
}

#[tokio::test]
async fn background_trigger_drains_after_reconnect() {
    let t = TestBoard::new(false);
    t.board
        .tasks()
        .create(NewTask::new("Pack", "trip", "todo"))
        .await
        .unwrap();

    let trigger = ReconnectTrigger::new(t.board.connectivity().clone());
    let handle = t.board.start_sync(&trigger);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(t.board.queue().len().unwrap(), 1);

    t.board.connectivity().set_online(true);
    wait_until_drained(&t).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn loop_retries_until_remote_recovers() {
    let t = TestBoard::new(true);
    t.board
        .queue()
        .enqueue(Mutation::task_delete("t-missing"))
        .unwrap();
    t.remote.set_failing(true);

    let handle = t.board.dispatcher().start(
        &NoBackgroundSync,
        false,
        Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(t.board.queue().len().unwrap(), 1);

    t.remote.set_failing(false);
    wait_until_drained(&t).await;
    handle.shutdown().await;
}

async fn wait_until_drained(t: &TestBoard) {
    for _ in 0..200 {
        if t.board.queue().is_empty().unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain");
}
