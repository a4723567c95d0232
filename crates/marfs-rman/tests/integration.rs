//! End-to-end tests: stream walks with real reclamation, crash recovery,
//! and multi-rank runs over in-memory namespaces.

mod common;

use common::{init_tracing, namespace, StreamFixture};
use marfs_rman::memory::{FileSpec, StreamBuilder};
use marfs_rman::{run_rank, DataState, LocalGroup, RmanConfig, RmanError, SkipMarker};

const T: bool = true;
const F: bool = false;

#[test]
fn test_interior_run_reclaimed() {
    init_tracing();
    let fx = StreamFixture::new(&[T, T, T, F, F, F, F, T, T, T]);
    let quota = fx.walk(false).unwrap();

    assert_eq!(quota.file_count, 6);
    assert_eq!(quota.bytes, 6000);
    assert_eq!(quota.refs_reclaimed, 4);
    assert_eq!(quota.objects_reclaimed, 4);
    for i in 3..7 {
        assert!(!fx.ref_exists(i));
        assert!(!fx.object_exists(i));
    }
    for i in [0, 1, 2, 7, 8, 9] {
        assert!(fx.ref_exists(i));
        assert!(fx.object_exists(i));
    }
    assert_eq!(fx.marker(2), SkipMarker::committed(4, false));
}

#[test]
fn test_second_walk_is_a_no_op() {
    let fx = StreamFixture::new(&[T, F, F, T, F, T, F, F]);
    let first = fx.walk(false).unwrap();
    assert_eq!(first.file_count, 3);
    assert_eq!(first.refs_reclaimed, 5);

    let unlinked = fx.meta.unlinked().len();
    let deleted = fx.objects.deleted().len();
    let second = fx.walk(false).unwrap();
    assert_eq!(second.file_count, 3);
    assert_eq!(second.refs_reclaimed, 0);
    assert_eq!(second.objects_reclaimed, 0);
    assert_eq!(fx.meta.unlinked().len(), unlinked);
    assert_eq!(fx.objects.deleted().len(), deleted);
    assert_eq!(fx.marker(5), SkipMarker::committed(-1, false));
}

#[test]
fn test_dry_run_changes_nothing() {
    let fx = StreamFixture::new(&[T, F, F, T]);
    let quota = fx.walk(true).unwrap();
    assert_eq!(quota.refs_reclaimed, 2);
    assert_eq!(quota.objects_reclaimed, 2);
    assert_eq!(fx.meta.ref_count(), 4);
    assert_eq!(fx.objects.len(), 4);
    assert_eq!(fx.marker(0), SkipMarker::Absent);
}

#[test]
fn test_crash_mid_unlink_recovers_on_next_walk() {
    init_tracing();
    let fx = StreamFixture::new(&[T, T, T, F, F, F, F, T]);

    fx.meta.fail_unlinks_after(2);
    assert!(fx.walk(false).is_err());
    assert!(fx.marker(2).is_in_progress());
    // Highest references go first, so the survivors are a prefix.
    assert!(fx.ref_exists(3));
    assert!(fx.ref_exists(4));
    assert!(!fx.ref_exists(5));
    assert!(!fx.ref_exists(6));

    fx.meta.clear_faults();
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.file_count, 4);
    assert_eq!(quota.refs_reclaimed, 2);
    for i in 3..7 {
        assert!(!fx.ref_exists(i));
    }
    assert_eq!(fx.marker(2), SkipMarker::committed(4, false));
}

#[test]
fn test_crash_at_every_unlink_converges() {
    for budget in 0..4 {
        let fx = StreamFixture::new(&[T, F, F, F, T, F, F]);
        fx.meta.fail_unlinks_after(budget);
        let _ = fx.walk(false);
        fx.meta.clear_faults();
        let quota = fx.walk(false).unwrap();
        assert_eq!(quota.file_count, 2, "budget {}", budget);
        assert_eq!(fx.meta.ref_count(), 2, "budget {}", budget);
        assert!(fx.ref_exists(0) && fx.ref_exists(4));
        assert_eq!(fx.objects.len(), 2);
    }
}

#[test]
fn test_dead_zero_is_retained_as_anchor() {
    let fx = StreamFixture::new(&[F, F, T, T]);
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.file_count, 2);
    assert_eq!(quota.refs_reclaimed, 1);
    assert_eq!(quota.objects_reclaimed, 2);
    assert!(fx.ref_exists(0));
    assert!(!fx.ref_exists(1));
    assert!(!fx.object_exists(0));
    assert_eq!(fx.marker(0), SkipMarker::committed(1, true));

    let again = fx.walk(false).unwrap();
    assert_eq!(again.file_count, 2);
    assert_eq!(again.refs_reclaimed + again.objects_reclaimed, 0);
}

#[test]
fn test_zero_anchor_extends_when_more_files_die() {
    let fx = StreamFixture::new(&[F, F, T, T]);
    fx.walk(false).unwrap();

    fx.kill(2);
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.file_count, 1);
    assert_eq!(quota.refs_reclaimed, 1);
    assert_eq!(quota.objects_reclaimed, 1);
    assert!(!fx.ref_exists(2));
    assert_eq!(fx.marker(0), SkipMarker::committed(2, true));
}

#[test]
fn test_later_deletions_extend_existing_skip() {
    let fx = StreamFixture::new(&[T, F, F, T, T, T]);
    fx.walk(false).unwrap();
    assert_eq!(fx.marker(0), SkipMarker::committed(2, false));

    fx.kill(3);
    fx.kill(4);
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.file_count, 2);
    assert_eq!(quota.refs_reclaimed, 2);
    assert_eq!(fx.marker(0), SkipMarker::committed(4, false));
    assert!(fx.ref_exists(5));
}

#[test]
fn test_fully_dead_stream_disappears() {
    let fx = StreamFixture::new(&[F, F, F]);
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.file_count, 0);
    assert_eq!(quota.refs_reclaimed, 3);
    assert_eq!(fx.meta.ref_count(), 0);
    assert!(fx.objects.is_empty());
}

#[test]
fn test_dead_tail_marks_end_of_stream() {
    let fx = StreamFixture::new(&[T, T, F, F]);
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.refs_reclaimed, 2);
    assert_eq!(fx.marker(1), SkipMarker::committed(-1, false));
    assert_eq!(fx.walk(false).unwrap().file_count, 2);
}

#[test]
fn test_interrupted_stream_deletion_finishes() {
    let fx = StreamFixture::new(&[F, F, F, F]);
    // Let refs 3 and 2 go, then fail on 1.
    fx.meta.fail_unlinks_after(2);
    assert!(fx.walk(false).is_err());
    assert_eq!(fx.marker(0), SkipMarker::in_progress(-4, true));

    fx.meta.clear_faults();
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.refs_reclaimed, 2);
    assert_eq!(fx.meta.ref_count(), 0);
}

#[test]
fn test_tail_crash_behind_committed_skip_recovers() {
    init_tracing();
    let fx = StreamFixture::new(&[T, F, T, T]);
    fx.walk(false).unwrap();
    assert_eq!(fx.marker(0), SkipMarker::committed(1, false));

    // The new dead tail starts past the gap left by reference 1.
    fx.kill(2);
    fx.kill(3);
    fx.meta.fail_unlinks_after(1);
    assert!(fx.walk(false).is_err());
    assert_eq!(fx.marker(0), SkipMarker::in_progress(-4, false));
    assert!(fx.ref_exists(2));
    assert!(!fx.ref_exists(3));

    fx.meta.clear_faults();
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.file_count, 1);
    assert_eq!(quota.refs_reclaimed, 1);
    assert!(!fx.ref_exists(2));
    assert_eq!(fx.meta.ref_count(), 1);
    assert_eq!(fx.marker(0), SkipMarker::committed(-1, false));

    let again = fx.walk(false).unwrap();
    assert_eq!(again.file_count, 1);
    assert_eq!(again.refs_reclaimed, 0);
}

#[test]
fn test_stream_crash_behind_zero_anchor_recovers() {
    let fx = StreamFixture::new(&[F, F, T, T]);
    fx.walk(false).unwrap();
    assert_eq!(fx.marker(0), SkipMarker::committed(1, true));

    fx.kill(2);
    fx.kill(3);
    fx.meta.fail_unlinks_after(1);
    assert!(fx.walk(false).is_err());
    assert_eq!(fx.marker(0), SkipMarker::in_progress(-4, true));
    assert!(fx.ref_exists(0));
    assert!(fx.ref_exists(2));

    fx.meta.clear_faults();
    let quota = fx.walk(false).unwrap();
    assert_eq!(quota.refs_reclaimed, 2);
    assert_eq!(fx.meta.ref_count(), 0);
    assert!(fx.objects.is_empty());
}

fn spec(bytes: u64, live: bool, state: DataState) -> FileSpec {
    FileSpec {
        bytes,
        live,
        ctime: 0,
        state,
    }
}

#[test]
fn test_unfinalized_reference_ends_walk() {
    let builder = StreamBuilder::new("stream")
        .file(T)
        .file(F)
        .file_with(spec(1000, T, DataState::Sized))
        .file(T)
        .file(F)
        .end_of_stream(false);
    let fx = StreamFixture::from_builder(builder, 0);
    let quota = fx.walk(false).unwrap();

    assert_eq!(quota.file_count, 2);
    assert_eq!(quota.bytes, 2000);
    assert_eq!(quota.refs_reclaimed, 1);
    assert_eq!(quota.objects_reclaimed, 1);
    assert!(!fx.ref_exists(1));
    assert!(!fx.object_exists(1));
    // Nothing past the open file is visited.
    for i in [2, 3, 4] {
        assert!(fx.ref_exists(i));
        assert!(fx.object_exists(i));
    }
    assert_eq!(fx.marker(2), SkipMarker::Absent);
}

#[test]
fn test_dead_unfinalized_tail_is_left_in_place() {
    let builder = StreamBuilder::new("stream")
        .file(T)
        .file(F)
        .file_with(spec(0, F, DataState::Init))
        .end_of_stream(false);
    let fx = StreamFixture::from_builder(builder, 0);
    let quota = fx.walk(false).unwrap();

    assert_eq!(quota.file_count, 1);
    assert_eq!(quota.refs_reclaimed, 1);
    assert!(!fx.ref_exists(1));
    assert!(fx.ref_exists(2));
    assert!(fx.object_exists(2));
    assert_eq!(fx.marker(0), SkipMarker::committed(1, false));

    let again = fx.walk(false).unwrap();
    assert_eq!(again.file_count, 1);
    assert_eq!(again.refs_reclaimed + again.objects_reclaimed, 0);
    assert!(fx.ref_exists(2));
}

#[test]
fn test_recovery_header_bounds_shared_objects() {
    // 1024 - 24 - 100 = 900 data bytes per object. File 0 ends in object 2,
    // which file 1 shares; only object 3 belongs to file 1 alone.
    let builder = StreamBuilder::new("stream")
        .file_with(spec(1850, T, DataState::Finalized))
        .file_with(spec(2000, F, DataState::Finalized))
        .file_with(spec(10, T, DataState::Finalized));
    let fx = StreamFixture::from_builder(builder, 100);
    let quota = fx.walk(false).unwrap();

    assert_eq!(quota.file_count, 2);
    assert_eq!(quota.objects_reclaimed, 1);
    assert_eq!(quota.refs_reclaimed, 1);
    assert!(!fx.object_exists(3));
    for objno in [0, 1, 2, 4] {
        assert!(fx.object_exists(objno), "object {} removed", objno);
    }
    assert!(!fx.ref_exists(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_rank_round_robin() {
    init_tracing();
    let a = namespace("a", 2, &[T, F, T]);
    let b = namespace("b", 1, &[T, T]);
    let c = namespace("c", 3, &[F, T]);
    let d = namespace("d", 1, &[T]);
    let root = namespace("root", 1, &[T, F]);
    let root = root
        .ns
        .with_subspace(a.ns.with_subspace(b.ns))
        .with_subspace(c.ns)
        .with_subspace(d.ns);

    let config = RmanConfig {
        producers: 2,
        consumers: 2,
        recent_threshold_secs: 0,
        iteration: Some("iter-1".to_string()),
        ..Default::default()
    };

    let ranks = LocalGroup::new(3).unwrap();
    let mut tasks = Vec::new();
    for rank in ranks {
        let root = root.clone();
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            run_rank(&rank, &root, &config).await
        }));
    }
    let mut reports = Vec::new();
    for task in tasks {
        reports.push(task.await.unwrap().unwrap());
    }

    // Depth-first order: /, /a, /a/b, /c, /d
    let scanned: Vec<Vec<String>> = reports
        .iter()
        .map(|r| r.local.iter().map(|s| s.namespace.clone()).collect())
        .collect();
    assert_eq!(scanned[0], vec!["/", "/c"]);
    assert_eq!(scanned[1], vec!["/a", "/d"]);
    assert_eq!(scanned[2], vec!["/a/b"]);

    let zero = &reports[0];
    assert!(reports.iter().all(|r| r.iteration == "iter-1"));
    assert_eq!(zero.total_namespaces, 5);
    assert_eq!(zero.collected.len(), 5);
    assert_eq!(zero.status(), 5);
    assert!(reports[1].collected.is_empty());

    let lines = zero.summary_lines();
    assert!(lines.iter().all(|l| l.contains("Eligible for GC")));
    let c_line = lines.iter().find(|l| l.contains("NS: \"/c\"")).unwrap();
    assert!(c_line.contains("Count: 3"));
    assert!(c_line.contains("(Objs: 3 Refs: 0)"));
    assert_eq!(c.meta.ref_count(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_explicit_target_runs_on_rank_zero_only() {
    let child = namespace("proj", 2, &[T, F, F, T]);
    let root = namespace("root", 1, &[T]);
    let tree = root.ns.clone().with_subspace(child.ns.clone());

    let config = RmanConfig {
        dry_run: false,
        recent_threshold_secs: 0,
        namespace_target: Some("proj".to_string()),
        ..Default::default()
    };

    let ranks = LocalGroup::new(2).unwrap();
    let mut tasks = Vec::new();
    for rank in ranks {
        let tree = tree.clone();
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            run_rank(&rank, &tree, &config).await
        }));
    }
    let mut reports = Vec::new();
    for task in tasks {
        reports.push(task.await.unwrap().unwrap());
    }

    assert_eq!(reports[0].collected.len(), 1);
    assert_eq!(reports[0].total_namespaces, 1);
    assert!(reports[1].local.is_empty());
    let summary = &reports[0].collected[0];
    assert_eq!(summary.namespace, "/proj");
    assert!(summary.to_string().contains("Deleted: (Objs: 4 Refs: 4)"));
    assert_eq!(child.meta.usage(), (Some(4000), Some(4)));
    assert_eq!(root.meta.usage(), (None, None));
}

#[tokio::test]
async fn test_missing_target_fails() {
    let root = namespace("root", 1, &[T]);
    let config = RmanConfig {
        namespace_target: Some("nope".to_string()),
        ..Default::default()
    };
    let rank = LocalGroup::new(1).unwrap().pop().unwrap();
    let err = run_rank(&rank, &root.ns, &config).await.unwrap_err();
    assert!(matches!(err, RmanError::NamespaceNotFound(name) if name == "nope"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_namespace_still_reports() {
    let good = namespace("good", 1, &[T, T]);
    let bad = namespace("bad", 2, &[T, F, T]);
    bad.meta.fail_path(&bad.streams[1][1]);

    let root = namespace("root", 0, &[]);
    let tree = root
        .ns
        .with_subspace(good.ns.clone())
        .with_subspace(bad.ns.clone());
    let config = RmanConfig {
        recent_threshold_secs: 0,
        ..Default::default()
    };
    let rank = LocalGroup::new(1).unwrap().pop().unwrap();
    let report = run_rank(&rank, &tree, &config).await.unwrap();

    assert_eq!(report.collected.len(), 3);
    assert!(!report.is_success());
    assert_eq!(report.status(), -1);
    let failed: Vec<&str> = report
        .collected
        .iter()
        .filter(|s| !s.succeeded())
        .map(|s| s.namespace.as_str())
        .collect();
    assert_eq!(failed, vec!["/bad"]);
    assert_eq!(good.meta.usage(), (Some(2000), Some(2)));
    assert_eq!(bad.meta.usage(), (None, None));
}
