use chrono::{TimeZone, Utc};
use forum_core::db::{open_db, DatabaseOptions};
use forum_core::repo::Repository;
use forum_core::{
    CancellationToken, Category, FixedUser, ManualClock, PersistenceError, PersistenceSession,
    UnitOfWork, UnitOfWorkState, User,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn open_uow(path: &Path, user: i64) -> UnitOfWork {
    open_uow_with(path, user, &DatabaseOptions::default())
}

fn open_uow_with(path: &Path, user: i64, options: &DatabaseOptions) -> UnitOfWork {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap(),
    ));
    let conn = open_db(path, options).unwrap();
    let session = PersistenceSession::new(conn, Arc::new(FixedUser(user)))
        .unwrap()
        .with_clock(clock);
    UnitOfWork::new(session)
}

fn category_count(path: &Path) -> u64 {
    let uow = open_uow(path, 0);
    uow.categories()
        .unwrap()
        .all()
        .unwrap()
        .including_deleted()
        .count()
        .unwrap()
}

#[test]
fn commit_makes_every_write_visible_with_shared_stamps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut uow = open_uow(&path, 5);
    uow.begin_transaction(&cancel).unwrap();
    assert_eq!(uow.state(), UnitOfWorkState::InTransaction);
    let categories = uow.categories().unwrap();
    let x = categories.add(Category::new("News", "news")).unwrap();
    let y = categories.add(Category::new("Support", "support")).unwrap();
    uow.commit_transaction(&cancel).unwrap();
    assert_eq!(uow.state(), UnitOfWorkState::Committed);

    let reader = open_uow(&path, 0);
    let categories = reader.categories().unwrap();
    let x = categories.get_by_id(x.id().unwrap()).unwrap().unwrap();
    let y = categories.get_by_id(y.id().unwrap()).unwrap().unwrap();
    assert_eq!(x.audit.created_at, y.audit.created_at);
    assert_eq!(x.audit.updated_at, y.audit.updated_at);
    assert_eq!(x.audit.created_user_id, Some(5));
    assert_eq!(y.audit.created_user_id, Some(5));
}

#[test]
fn failed_commit_rolls_back_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut uow = open_uow(&path, 1);
    uow.begin_transaction(&cancel).unwrap();
    let categories = uow.categories().unwrap();
    let a = categories.add(Category::new("Alpha", "alpha")).unwrap();
    uow.save_changes(&cancel).unwrap();
    assert!(a.id().is_some());

    categories.add(Category::new("Beta", "alpha")).unwrap();
    let err = uow.commit_transaction(&cancel).unwrap_err();
    assert!(matches!(err, PersistenceError::ConstraintViolation { .. }));
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
    assert!(a.id().is_none(), "flushed entity must revert on rollback");
    drop(uow);

    assert_eq!(category_count(&path), 0);
}

#[test]
fn explicit_rollback_discards_flushed_and_pending_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut uow = open_uow(&path, 1);
    uow.begin_transaction(&cancel).unwrap();
    let categories = uow.categories().unwrap();
    categories.add(Category::new("Flushed", "flushed")).unwrap();
    uow.save_changes(&cancel).unwrap();
    categories.add(Category::new("Pending", "pending")).unwrap();

    uow.rollback_transaction(&cancel).unwrap();
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
    assert_eq!(uow.session().lock().pending_count(), 0);
    assert!(matches!(
        uow.save_changes(&cancel),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
    drop(uow);

    assert_eq!(category_count(&path), 0);
}

#[test]
fn second_begin_is_rejected_without_touching_pending_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut uow = open_uow(&path, 1);
    uow.begin_transaction(&cancel).unwrap();
    let categories = uow.categories().unwrap();
    categories.add(Category::new("Kept", "kept")).unwrap();

    let err = uow.begin_transaction(&cancel).unwrap_err();
    assert!(matches!(err, PersistenceError::AlreadyInTransaction));
    assert_eq!(uow.state(), UnitOfWorkState::InTransaction);
    assert_eq!(categories.pending().len(), 1);

    uow.commit_transaction(&cancel).unwrap();
    drop(uow);
    assert_eq!(category_count(&path), 1);
}

#[test]
fn repositories_are_memoized_per_unit_of_work() {
    let dir = tempfile::tempdir().unwrap();
    let uow = open_uow(&dir.path().join("forum.sqlite3"), 1);

    let first = uow.users().unwrap();
    let second = uow.users().unwrap();
    let generic: Arc<Repository<User>> = uow.repository().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &generic));
    assert!(first.shares_session_with(&*uow.posts().unwrap()));

    first.add(User::new("ada", "ada@example.com", "h1")).unwrap();
    let seen = second.pending();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].entity.get().username, "ada");
}

#[test]
fn dropping_an_open_transaction_rolls_it_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    {
        let mut uow = open_uow(&path, 1);
        uow.begin_transaction(&cancel).unwrap();
        uow.categories()
            .unwrap()
            .add(Category::new("Ghost", "ghost"))
            .unwrap();
        uow.save_changes(&cancel).unwrap();
    }

    assert_eq!(category_count(&path), 0);
}

#[test]
fn committed_unit_of_work_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let mut uow = open_uow(&dir.path().join("forum.sqlite3"), 1);
    let categories = uow.categories().unwrap();
    uow.begin_transaction(&cancel).unwrap();
    uow.commit_transaction(&cancel).unwrap();

    assert!(matches!(uow.users(), Err(PersistenceError::UnitOfWorkClosed)));
    assert!(matches!(
        uow.begin_transaction(&cancel),
        Err(PersistenceError::UnitOfWorkClosed)
    ));

    uow.dispose();
    assert!(matches!(
        categories.add(Category::new("Late", "late")),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
    assert!(matches!(
        categories.get_by_id(1),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
}

#[test]
fn cancellation_inside_transaction_forces_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut uow = open_uow(&path, 1);
    uow.begin_transaction(&cancel).unwrap();
    uow.categories()
        .unwrap()
        .add(Category::new("Cancelled", "cancelled"))
        .unwrap();

    cancel.cancel();
    let err = uow.save_changes(&cancel).unwrap_err();
    assert!(matches!(err, PersistenceError::Cancelled));
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
    drop(uow);

    assert_eq!(category_count(&path), 0);
}

#[test]
fn terminal_states_close_the_shared_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut committed = open_uow(&path, 1);
    let categories = committed.categories().unwrap();
    committed.begin_transaction(&cancel).unwrap();
    categories.add(Category::new("Kept", "kept")).unwrap();
    committed.commit_transaction(&cancel).unwrap();

    assert!(committed.session().lock().is_closed());
    assert!(matches!(
        categories.add(Category::new("Late", "late")),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
    assert!(matches!(
        committed.session().lock().flush(&cancel),
        Err(PersistenceError::UnitOfWorkClosed)
    ));

    let mut rolled_back = open_uow(&path, 1);
    let categories = rolled_back.categories().unwrap();
    rolled_back.begin_transaction(&cancel).unwrap();
    rolled_back.rollback_transaction(&cancel).unwrap();

    assert!(rolled_back.session().lock().is_closed());
    assert!(matches!(
        categories.add(Category::new("Orphan", "orphan")),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
    drop(committed);
    drop(rolled_back);

    assert_eq!(category_count(&path), 1);
}

#[test]
fn failed_save_closes_the_shared_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();

    let mut uow = open_uow(&path, 1);
    let categories = uow.categories().unwrap();
    uow.begin_transaction(&cancel).unwrap();
    categories.add(Category::new("One", "same")).unwrap();
    categories.add(Category::new("Two", "same")).unwrap();
    assert!(uow.save_changes(&cancel).is_err());
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);

    assert!(matches!(
        categories.add(Category::new("Three", "three")),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
    assert!(matches!(
        uow.session().lock().flush(&cancel),
        Err(PersistenceError::UnitOfWorkClosed)
    ));
    drop(uow);

    assert_eq!(category_count(&path), 0);
}

#[test]
fn cancelling_mid_statement_interrupts_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let conn = open_db(&path, &DatabaseOptions::default()).unwrap();
    // Each category insert scans a 2000^3 cross join before it returns.
    conn.execute_batch(
        "CREATE TABLE ballast (n INTEGER NOT NULL);
         WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 2000)
         INSERT INTO ballast (n) SELECT n FROM seq;
         CREATE TRIGGER slow_category_insert AFTER INSERT ON categories
         BEGIN
             SELECT count(*) FROM ballast a, ballast b, ballast c;
         END;",
    )
    .unwrap();
    let session = PersistenceSession::new(conn, Arc::new(FixedUser(1))).unwrap();
    let mut uow = UnitOfWork::new(session);
    let cancel = CancellationToken::new();

    uow.begin_transaction(&cancel).unwrap();
    uow.categories()
        .unwrap()
        .add(Category::new("Slow", "slow"))
        .unwrap();

    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        remote.cancel();
    });
    let started = Instant::now();
    let err = uow.save_changes(&cancel).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, PersistenceError::Cancelled));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
    drop(uow);

    assert_eq!(category_count(&path), 0);
}

#[test]
fn cancellation_while_idle_keeps_pending_work() {
    let dir = tempfile::tempdir().unwrap();
    let mut uow = open_uow(&dir.path().join("forum.sqlite3"), 1);
    uow.categories()
        .unwrap()
        .add(Category::new("Later", "later"))
        .unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        uow.save_changes(&cancelled),
        Err(PersistenceError::Cancelled)
    ));
    assert_eq!(uow.state(), UnitOfWorkState::Idle);

    assert_eq!(uow.save_changes(&CancellationToken::new()).unwrap(), 1);
}

#[test]
fn locked_store_surfaces_store_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forum.sqlite3");
    let cancel = CancellationToken::new();
    let impatient = DatabaseOptions {
        busy_timeout: Duration::from_millis(50),
        foreign_keys: true,
    };

    let mut holder = open_uow(&path, 1);
    let mut contender = open_uow_with(&path, 2, &impatient);
    holder.begin_transaction(&cancel).unwrap();

    contender
        .categories()
        .unwrap()
        .add(Category::new("Blocked", "blocked"))
        .unwrap();
    let err = contender.save_changes(&cancel).unwrap_err();
    assert!(matches!(err, PersistenceError::StoreUnavailable { .. }));
    assert_eq!(contender.session().lock().pending_count(), 1);

    holder.rollback_transaction(&cancel).unwrap();
    assert_eq!(contender.save_changes(&cancel).unwrap(), 1);
}
