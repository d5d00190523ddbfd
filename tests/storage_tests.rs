use portfolio_storefront::storage::{LocalStorage, STAGING_DIR, StorageService, sanitize_key};
use tempfile::TempDir;

fn entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|it| {
            it.filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn test_staged_file_is_private_until_committed() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    storage.ensure_root().await.unwrap();

    let staged = storage.stage(b"bytes", "png").await.unwrap();
    let name = staged.file_name().to_string();
    assert_eq!(staged.public_path(), format!("/uploads/{name}"));
    assert!(entries(dir.path()).is_empty());
    assert_eq!(entries(&dir.path().join(STAGING_DIR)), [name.clone()]);
    assert_eq!(storage.read(&name).await.unwrap(), None);

    let committed = storage.commit(staged).await.unwrap();
    assert_eq!(committed, name);
    assert_eq!(entries(dir.path()), [name.clone()]);
    assert!(entries(&dir.path().join(STAGING_DIR)).is_empty());
    assert_eq!(
        storage.read(&format!("/uploads/{name}")).await.unwrap(),
        Some(b"bytes".to_vec())
    );
}

#[tokio::test]
async fn test_dropping_a_staged_upload_discards_it() {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());

    let staged = storage.stage(b"bytes", "webp").await.unwrap();
    assert_eq!(entries(&dir.path().join(STAGING_DIR)).len(), 1);
    drop(staged);

    assert!(entries(&dir.path().join(STAGING_DIR)).is_empty());
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_ensure_root_sweeps_leftover_staged_files() {
    let dir = TempDir::new().unwrap();
    let staging = dir.path().join(STAGING_DIR);
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("crashed.png"), b"x").unwrap();
    std::fs::write(dir.path().join("kept.png"), b"y").unwrap();

    LocalStorage::new(dir.path()).ensure_root().await.unwrap();

    assert!(staging.is_dir());
    assert!(entries(&staging).is_empty());
    assert_eq!(entries(dir.path()), ["kept.png".to_string()]);
}

#[tokio::test]
async fn test_remove_is_idempotent_and_accepts_public_paths() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.png"), b"x").unwrap();
    let storage = LocalStorage::new(dir.path());

    storage.remove("/uploads/a.png").await.unwrap();
    storage.remove("/uploads/a.png").await.unwrap();

    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_read_cannot_escape_root() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("uploads");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(outer.path().join("secret.txt"), b"secret").unwrap();
    let storage = LocalStorage::new(&root);

    assert_eq!(storage.read("../secret.txt").await.unwrap(), None);
    assert_eq!(storage.read("").await.unwrap(), None);
}

#[test]
fn test_sanitize_key_keeps_nested_paths() {
    assert_eq!(sanitize_key("shops/jane/cover.png"), "shops/jane/cover.png");
    assert_eq!(sanitize_key("/../shops/./cover.png"), "shops/cover.png");
}
