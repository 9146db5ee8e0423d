use std::time::UNIX_EPOCH;

use downloader_core::models::{Task, TaskHeaders, TaskId, TaskStatus, TransferSessionId};
use downloader_core::registry::TaskRegistry;

fn task(id: u64, status: TaskStatus, session: Option<&str>) -> Task {
    Task {
        id: TaskId(id),
        url: format!("https://example.com/{id}"),
        saved_dir: "/tmp".to_string(),
        filename: None,
        headers: TaskHeaders::new(),
        status,
        progress: 0,
        resumable: false,
        time_created: UNIX_EPOCH,
        allow_cellular: true,
        save_in_public_storage: false,
        requires_storage_access: false,
        show_notification: false,
        open_file_from_notification: false,
        mime_type: None,
        native_session_id: session.map(TransferSessionId::new),
        failure_reason: None,
    }
}

#[test]
fn upsert_is_last_writer_wins_and_get_returns_copies() {
    let registry = TaskRegistry::new();
    registry.upsert(task(1, TaskStatus::Enqueued, None));
    registry.upsert(task(1, TaskStatus::Running, Some("s-1")));

    let mut copy = registry.get(TaskId(1)).expect("entry exists");
    assert_eq!(copy.status, TaskStatus::Running);
    copy.status = TaskStatus::Failed;
    assert_eq!(
        registry.get(TaskId(1)).map(|task| task.status),
        Some(TaskStatus::Running)
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn session_index_follows_upserts_and_removal() {
    let registry = TaskRegistry::new();
    registry.upsert(task(1, TaskStatus::Running, Some("s-1")));
    let session = TransferSessionId::new("s-1");
    assert_eq!(
        registry.find_by_session(&session).map(|task| task.id),
        Some(TaskId(1))
    );

    registry.upsert(task(1, TaskStatus::Running, Some("s-2")));
    assert!(registry.find_by_session(&session).is_none());
    assert!(
        registry
            .find_by_session(&TransferSessionId::new("s-2"))
            .is_some()
    );

    registry.upsert(task(1, TaskStatus::Complete, None));
    assert!(
        registry
            .find_by_session(&TransferSessionId::new("s-2"))
            .is_none()
    );

    registry.upsert(task(2, TaskStatus::Running, Some("s-3")));
    assert!(registry.remove(TaskId(2)).is_some());
    assert!(
        registry
            .find_by_session(&TransferSessionId::new("s-3"))
            .is_none()
    );
    assert!(registry.remove(TaskId(2)).is_none());
}

#[test]
fn get_all_is_sorted_and_counts_by_status() {
    let registry = TaskRegistry::new();
    registry.upsert(task(3, TaskStatus::Running, Some("c")));
    registry.upsert(task(1, TaskStatus::Enqueued, None));
    registry.upsert(task(2, TaskStatus::Running, Some("b")));

    let ids: Vec<u64> = registry.get_all().iter().map(|task| task.id.0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(registry.count_by_status(TaskStatus::Running), 2);
    assert_eq!(registry.count_by_status(TaskStatus::Paused), 0);
}

#[test]
fn hydrate_replaces_previous_entries() {
    let registry = TaskRegistry::new();
    registry.upsert(task(9, TaskStatus::Running, Some("stale")));

    registry.hydrate(vec![
        task(1, TaskStatus::Enqueued, None),
        task(2, TaskStatus::Running, Some("fresh")),
    ]);

    assert_eq!(registry.len(), 2);
    assert!(registry.get(TaskId(9)).is_none());
    assert!(
        registry
            .find_by_session(&TransferSessionId::new("stale"))
            .is_none()
    );
    assert!(
        registry
            .find_by_session(&TransferSessionId::new("fresh"))
            .is_some()
    );
}

#[test]
fn clones_share_entries_across_threads() {
    let registry = TaskRegistry::new();
    let writer = registry.clone();
    std::thread::spawn(move || writer.upsert(task(5, TaskStatus::Paused, None)))
        .join()
        .expect("writer thread");

    assert!(!registry.is_empty());
    assert_eq!(
        registry.get(TaskId(5)).map(|task| task.status),
        Some(TaskStatus::Paused)
    );
}
