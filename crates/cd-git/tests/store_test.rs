use cd_git::{EntryKind, GixRepo, ObjectStore, RefName, TreeEdit};

fn open_store() -> (tempfile::TempDir, GixRepo) {
    let dir = tempfile::tempdir().unwrap();
    let repo = GixRepo::init(dir.path()).unwrap();
    (dir, repo)
}

#[test]
fn write_and_read_blob_roundtrips() {
    let (_dir, repo) = open_store();
    let id = repo.write_blob(b"{\"a\":1}").unwrap();
    assert!(repo.exists(id));
    assert_eq!(repo.read_blob(id).unwrap(), b"{\"a\":1}");
}

#[test]
fn edit_tree_builds_nested_paths() {
    let (_dir, repo) = open_store();
    let base = repo.write_empty_tree().unwrap();
    let blob = repo.write_blob(b"hello").unwrap();

    let tree = repo
        .edit_tree(
            base,
            &[TreeEdit::Upsert {
                path: "a/b/c.json".to_owned(),
                id: blob,
            }],
        )
        .unwrap();

    let root = repo.read_tree(tree).unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].name, "a");
    assert_eq!(root[0].kind, EntryKind::Tree);
}

#[test]
fn commit_roundtrips_metadata() {
    let (_dir, repo) = open_store();
    let tree = repo.write_empty_tree().unwrap();
    let commit_id = repo
        .create_commit(tree, None, "{\"summary\":\"init\"}", "Foo <foo@example.com>", 1_700_000_000_000)
        .unwrap();

    let info = repo.read_commit(commit_id).unwrap();
    assert_eq!(info.tree_id, tree);
    assert_eq!(info.parent, None);
    assert_eq!(info.author, "Foo <foo@example.com>");
    assert_eq!(info.message, "{\"summary\":\"init\"}");
}

#[test]
fn head_ref_cas_rejects_stale_expectation() {
    use cd_git::ObjectId;

    let (_dir, repo) = open_store();
    let name = RefName::new("refs/centraldogma/main").unwrap();
    let tree = repo.write_empty_tree().unwrap();
    let c1 = repo
        .create_commit(tree, None, "{}", "Foo <foo@example.com>", 0)
        .unwrap();

    repo.cas_update_head(&name, c1, ObjectId::ZERO, "init")
        .unwrap();
    assert_eq!(repo.read_head(&name).unwrap(), Some(c1));

    let c2 = repo
        .create_commit(tree, Some(c1), "{}", "Foo <foo@example.com>", 1)
        .unwrap();
    let stale = ObjectId::ZERO;
    assert!(repo.cas_update_head(&name, c2, stale, "stale").is_err());
    assert_eq!(repo.read_head(&name).unwrap(), Some(c1));
}

#[test]
fn diff_trees_reports_added_modified_deleted() {
    let (_dir, repo) = open_store();
    let base = repo.write_empty_tree().unwrap();
    let a = repo.write_blob(b"a").unwrap();
    let b = repo.write_blob(b"b").unwrap();
    let b2 = repo.write_blob(b"b2").unwrap();

    let old_tree = repo
        .edit_tree(
            base,
            &[
                TreeEdit::Upsert { path: "keep.txt".into(), id: a },
                TreeEdit::Upsert { path: "change.txt".into(), id: b },
            ],
        )
        .unwrap();

    let new_tree = repo
        .edit_tree(
            old_tree,
            &[
                TreeEdit::Remove { path: "keep.txt".into() },
                TreeEdit::Upsert { path: "change.txt".into(), id: b2 },
                TreeEdit::Upsert { path: "new.txt".into(), id: a },
            ],
        )
        .unwrap();

    let diffs = repo.diff_trees(Some(old_tree), new_tree).unwrap();
    let paths: Vec<&str> = diffs.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, vec!["change.txt", "keep.txt", "new.txt"]);
}
