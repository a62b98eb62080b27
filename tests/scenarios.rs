//! End-to-end scenarios against the public `Repository` façade.

use cd_core::json_patch;
use centraldogma::{
    Change, EntityPath, EntityType, EntryContent, JsonPatchOp, Markup, PatchMode, Repository,
    RepositoryConfig, Revision,
};
use serde_json::json;

fn repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let config = RepositoryConfig::default();
    let repo = Repository::open(dir.path(), "repo", config).unwrap();
    (dir, repo)
}

async fn push(
    repo: &Repository,
    summary: &str,
    changes: Vec<Change>,
) -> u64 {
    repo.commit(
        Revision::new(0),
        "tester <tester@example.com>".to_owned(),
        0,
        summary.to_owned(),
        String::new(),
        Markup::Plaintext,
        changes,
        false,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn initial_empty_repository_then_first_commit() {
    let (_dir, repo) = repo();

    assert!(repo
        .find(Revision::new(1), "/**", Default::default())
        .await
        .unwrap()
        .is_empty());

    let revision = push(
        &repo,
        "add hello",
        vec![Change::UpsertText {
            path: EntityPath::new("/hello.txt").unwrap(),
            text: "hi".to_owned(),
        }],
    )
    .await;
    assert_eq!(revision, 2);

    let found = repo
        .find(Revision::new(2), "/hello.txt", Default::default())
        .await
        .unwrap();
    let entry = found.get("/hello.txt").unwrap();
    assert_eq!(entry.entry_type, EntityType::Text);
    assert_eq!(entry.content, EntryContent::Text("hi\n".to_owned()));
}

#[tokio::test]
async fn json_patch_idempotence_is_redundant_on_replay() {
    let (_dir, repo) = repo();

    push(
        &repo,
        "add a",
        vec![Change::UpsertJson {
            path: EntityPath::new("/a.json").unwrap(),
            json: json!({"a": 1}),
        }],
    )
    .await;

    let err = repo
        .commit(
            Revision::new(0),
            "tester <tester@example.com>".to_owned(),
            0,
            "replace a with itself".to_owned(),
            String::new(),
            Markup::Plaintext,
            vec![Change::ApplyJsonPatch {
                path: EntityPath::new("/a.json").unwrap(),
                patch: vec![JsonPatchOp::Replace {
                    path: "/a".to_owned(),
                    value: json!(1),
                }],
            }],
            false,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, centraldogma::CentralDogmaError::RedundantChange));
}

#[tokio::test]
async fn directory_rename_moves_every_entry() {
    let (_dir, repo) = repo();

    push(
        &repo,
        "seed /d",
        vec![
            Change::UpsertText {
                path: EntityPath::new("/d/x.txt").unwrap(),
                text: "x".to_owned(),
            },
            Change::UpsertText {
                path: EntityPath::new("/d/y.txt").unwrap(),
                text: "y".to_owned(),
            },
        ],
    )
    .await;

    let revision = push(
        &repo,
        "rename d to e",
        vec![Change::Rename {
            old_path: EntityPath::new("/d").unwrap(),
            new_path: EntityPath::new("/e").unwrap(),
        }],
    )
    .await;

    let revision = Revision::new(revision as i64);
    let moved = repo.find(revision, "/e/**", Default::default()).await.unwrap();
    assert_eq!(moved.len(), 2);
    assert!(moved.contains_key("/e/x.txt"));
    assert!(moved.contains_key("/e/y.txt"));

    let gone = repo.find(revision, "/d/**", Default::default()).await.unwrap();
    assert!(gone.is_empty());
}

#[tokio::test]
async fn watch_coalesces_to_the_first_matching_revision_then_resolves_immediately() {
    let (_dir, repo) = repo();

    // Revision 2: unrelated seed commit, so the watch below starts at 2.
    push(
        &repo,
        "seed",
        vec![Change::UpsertText {
            path: EntityPath::new("/seed.txt").unwrap(),
            text: "seed".to_owned(),
        }],
    )
    .await;

    let waiter_repo = repo.clone();
    let waiter = tokio::spawn(async move { waiter_repo.watch(2, "/**", false).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Revision 3.
    push(
        &repo,
        "change at 3",
        vec![Change::UpsertText {
            path: EntityPath::new("/a.txt").unwrap(),
            text: "a".to_owned(),
        }],
    )
    .await;
    // Revision 4.
    push(
        &repo,
        "change at 4",
        vec![Change::UpsertText {
            path: EntityPath::new("/b.txt").unwrap(),
            text: "b".to_owned(),
        }],
    )
    .await;

    let first = waiter.await.unwrap().unwrap();
    assert_eq!(first, 3);

    let second = repo.watch(3, "/**", false).await.unwrap();
    assert_eq!(second, 4);
}

#[test]
fn generated_patch_with_copy_reuses_an_unchanged_sibling() {
    let source = json!({"a": {"x": 1}, "b": {"x": 1}});
    let target = json!({"b": {"x": 1}, "c": {"x": 1}});

    let patch = json_patch::generate(&source, &target, PatchMode::Rfc6902);
    assert_eq!(
        patch,
        vec![
            JsonPatchOp::Remove {
                path: "/a".to_owned()
            },
            JsonPatchOp::Copy {
                from: "/b".to_owned(),
                path: "/c".to_owned()
            },
        ]
    );
}

#[tokio::test]
async fn compaction_boundary_retires_old_revisions_but_keeps_the_new_first_revision_readable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RepositoryConfig::default();
    config.rolling.commit_threshold = 3;
    let repo = Repository::open(dir.path(), "repo", config).unwrap();

    let mut last = 1;
    for i in 0..6 {
        last = push(
            &repo,
            "churn",
            vec![Change::UpsertText {
                path: EntityPath::new(format!("/f{i}.txt")).unwrap(),
                text: format!("v{i}"),
            }],
        )
        .await;
    }
    assert!(last > 1);

    let err = repo
        .history(Revision::new(1), Revision::new(last as i64), "/**", 100)
        .await
        .unwrap_err();
    assert!(matches!(err, centraldogma::CentralDogmaError::RevisionNotFound { .. }));

    let retained = repo
        .find(Revision::new(last as i64), "/**", Default::default())
        .await
        .unwrap();
    assert!(!retained.is_empty());
}
