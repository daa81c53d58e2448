mod common;

use common::*;
use plotspool::spooler::SpoolerPolicy;
use std::path::Path;
use tokio::sync::mpsc;

async fn enqueue(spooler: &std::sync::Arc<plotspool::Spooler>, client: &str) {
    let (tx, _rx) = mpsc::unbounded_channel();
    spooler
        .enqueue(client, sample_payload(client, client), tx)
        .await
        .expect("enqueue");
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn enqueued_jobs_are_written_with_position_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    enqueue(&spooler, "alice").await;
    enqueue(&spooler, "bob").await;

    let names = listing(&dir.path().join("waiting"));
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("001_") && names[0].contains("alice"));
    assert!(names[1].starts_with("002_") && names[1].contains("bob"));

    // the spool file is the document itself
    let content = std::fs::read_to_string(dir.path().join("waiting").join(&names[0])).unwrap();
    assert_eq!(content, sample_payload("alice", "alice"));
}

#[tokio::test]
async fn moving_a_job_renames_its_spool_files() {
    let dir = tempfile::tempdir().unwrap();
    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    enqueue(&spooler, "alice").await;
    enqueue(&spooler, "bob").await;
    enqueue(&spooler, "carol").await;

    spooler.move_job("carol", 1).await.unwrap();

    let names = listing(&dir.path().join("waiting"));
    assert_eq!(names.len(), 3);
    assert!(names[0].starts_with("001_") && names[0].contains("carol"));
    assert!(names[1].starts_with("002_") && names[1].contains("alice"));
    assert!(names[2].starts_with("003_") && names[2].contains("bob"));
}

#[tokio::test]
async fn canceled_job_moves_to_the_canceled_folder() {
    let dir = tempfile::tempdir().unwrap();
    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    enqueue(&spooler, "alice").await;
    enqueue(&spooler, "bob").await;

    spooler.cancel("bob", false).await.unwrap();

    let waiting = listing(&dir.path().join("waiting"));
    assert_eq!(waiting.len(), 1);
    assert!(waiting[0].contains("alice"));
    let canceled = listing(&dir.path().join("canceled"));
    assert_eq!(canceled.len(), 1);
    assert!(canceled[0].contains("bob"));
}

#[tokio::test]
async fn restart_restores_queue_in_filename_order() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
        enqueue(&spooler, "alice").await;
        enqueue(&spooler, "bob").await;
        enqueue(&spooler, "carol").await;
        spooler.move_job("carol", 1).await.unwrap();
        // process dies here; disk is all that's left
    }

    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    assert_eq!(spooler.resume_from_disk().await, 3);

    let jobs = spooler.jobs();
    assert_eq!(
        jobs.iter().map(|j| j.client.as_str()).collect::<Vec<_>>(),
        vec!["carol", "alice", "bob"]
    );
    assert_eq!(jobs.iter().map(|j| j.position).collect::<Vec<_>>(), vec![1, 2, 3]);

    // each reconstructed job's hash matches one recomputed from its file
    for (name, job) in listing(&dir.path().join("waiting")).iter().zip(&jobs) {
        let short = name.split('_').nth(3).expect("hash field");
        assert!(job.hash.starts_with(short));
    }
}

#[tokio::test]
async fn corrupt_spool_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
        enqueue(&spooler, "alice").await;
    }
    let waiting = dir.path().join("waiting");
    std::fs::write(waiting.join("000_garbage.svg"), "not a document").unwrap();
    std::fs::write(waiting.join("notes.txt"), "operator scribbles").unwrap();

    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    assert_eq!(spooler.resume_from_disk().await, 1);
    assert_eq!(spooler.jobs()[0].client, "alice");
}

#[tokio::test]
async fn duplicate_clients_on_disk_keep_only_the_first_file() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
        enqueue(&spooler, "alice").await;
    }
    // a stale copy of the same client from an older run
    let waiting = dir.path().join("waiting");
    let original = listing(&waiting)[0].clone();
    std::fs::copy(
        waiting.join(&original),
        waiting.join(format!("009{}", &original[3..])),
    )
    .unwrap();

    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    assert_eq!(spooler.resume_from_disk().await, 1);
    assert_eq!(spooler.queue_size(), 1);
}

#[tokio::test]
async fn unchanged_jobs_are_not_rewritten_on_sync() {
    let dir = tempfile::tempdir().unwrap();
    let (spooler, _driver) = spooler_with(dir.path(), SpoolerPolicy::default(), &[]);
    enqueue(&spooler, "alice").await;
    enqueue(&spooler, "bob").await;

    let waiting = dir.path().join("waiting");
    let before = listing(&waiting);
    // a move that resolves to a no-op keeps every file in place
    spooler.move_job("bob", 2).await.unwrap();
    assert_eq!(listing(&waiting), before);
}
