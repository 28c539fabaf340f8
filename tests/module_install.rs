//! Repository setup and plugin installation driven through the admin dialogs.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use swiftbot::kernel::{Database, Incoming, ModuleContext, Reply, Router};
use swiftbot::modules::module_manager::ModuleManager;

const ADMIN: i64 = 1;

fn setup(dir: &Path) -> (Router, Arc<ModuleContext>) {
    let ctx = Arc::new(ModuleContext::new(
        Database::in_memory().unwrap(),
        [ADMIN],
        &dir.join("data"),
        Duration::from_secs(60),
    ));
    let mut router = Router::new(ctx.clone());
    router.register(Arc::new(ModuleManager::new(&ctx))).unwrap();
    (router, ctx)
}

/// A `file://` repository with one plugin in it.
fn local_repo(dir: &Path, version: &str) -> String {
    let repo = dir.join("repo");
    let plugin = repo.join("modules").join("echo");
    std::fs::create_dir_all(&plugin).unwrap();
    std::fs::write(
        repo.join("index.json"),
        format!(r#"{{"modules":[{{"name":"echo","version":"{version}","description":"Repeats messages"}}]}}"#),
    )
    .unwrap();
    std::fs::write(
        plugin.join("manifest.json"),
        format!(r#"{{"name":"echo","version":"{version}","description":"Repeats messages"}}"#),
    )
    .unwrap();
    std::fs::write(plugin.join("module.py"), "def handle(text):\n    return text\n").unwrap();
    format!("file://{}", repo.display())
}

async fn add_repo(router: &Router, name: &str, url: &str) -> Vec<Reply> {
    let out = router.handle_callback(ADMIN, ADMIN, "admin", "repo:add").await;
    assert!(out[0].body().contains("Send a name"));
    let out = router.handle_message(Incoming::private(ADMIN, name)).await;
    assert!(out[0].body().contains("repository URL"));
    router.handle_message(Incoming::private(ADMIN, url)).await
}

#[tokio::test]
async fn test_add_repository_install_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let url = local_repo(dir.path(), "1.0.0");
    let (router, ctx) = setup(dir.path());

    // a bad URL re-prompts instead of ending the dialog
    let out = add_repo(&router, "local", "ftp://example.com").await;
    assert!(out[0].body().contains("must start with"));
    let out = router.handle_message(Incoming::private(ADMIN, &url)).await;
    assert!(out[0].body().contains("Repository <b>local</b> added"));
    assert!(ctx.pending.peek(ADMIN, ADMIN).is_none());

    let out = router.handle_message(Incoming::private(ADMIN, "/modules")).await;
    assert!(out[0].body().contains("echo"));

    let out = router.handle_message(Incoming::private(ADMIN, "/install echo")).await;
    assert!(out[0].body().contains("✅ Module <b>echo</b> v1.0.0 installed"));
    let installed = ctx.plugins_dir.join("echo");
    assert!(installed.join("module.py").is_file());

    let out = router.handle_message(Incoming::private(ADMIN, "/install echo")).await;
    assert!(out[0].body().contains("already installed"));

    let out = router.handle_callback(ADMIN, ADMIN, "admin", "module:delete:echo").await;
    assert_eq!(out[0], Reply::notice("echo deleted"));
    assert!(!installed.exists());
}

#[tokio::test]
async fn test_install_dialog_for_unknown_module() {
    let dir = tempfile::tempdir().unwrap();
    let (router, ctx) = setup(dir.path());

    router.handle_message(Incoming::private(ADMIN, "/install")).await;
    assert!(ctx.pending.peek(ADMIN, ADMIN).is_some());
    let out = router.handle_message(Incoming::private(ADMIN, "ghost")).await;
    assert!(out[0].body().contains("was not found"));
    assert!(!ctx.plugins_dir.join("ghost").exists());
}

#[tokio::test]
async fn test_update_all_from_http_repository() {
    let mut server = mockito::Server::new_async().await;
    let index = server
        .mock("GET", "/index.json")
        .with_status(200)
        .with_body(r#"{"modules":[{"name":"echo","version":"2.0.0"}]}"#)
        .create_async()
        .await;

    let mut archive = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut archive);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("manifest.json", options).unwrap();
        zip.write_all(br#"{"name":"echo","version":"2.0.0"}"#).unwrap();
        zip.start_file("module.py", options).unwrap();
        zip.write_all(b"def handle(text):\n    return text.upper()\n").unwrap();
        zip.finish().unwrap();
    }
    let package = server
        .mock("GET", "/modules/echo/echo.zip")
        .with_status(200)
        .with_body(archive.into_inner())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (router, ctx) = setup(dir.path());

    // an older copy is already on disk
    let old = ctx.plugins_dir.join("echo");
    std::fs::create_dir_all(&old).unwrap();
    std::fs::write(old.join("manifest.json"), r#"{"name":"echo","version":"1.0.0"}"#).unwrap();
    std::fs::write(old.join("module.py"), "def handle(text):\n    return text\n").unwrap();

    let out = add_repo(&router, "remote", &server.url()).await;
    assert!(out[0].body().contains("added"));

    let out = router.handle_callback(ADMIN, ADMIN, "admin", "module:update_all").await;
    assert!(out[0].body().contains("echo → 2.0.0"));
    let manifest = std::fs::read_to_string(old.join("manifest.json")).unwrap();
    assert!(manifest.contains("2.0.0"));
    assert!(std::fs::read_to_string(old.join("module.py")).unwrap().contains("upper"));
    index.assert_async().await;
    package.assert_async().await;
}

#[tokio::test]
async fn test_non_admin_cannot_press_manager_buttons() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _ctx) = setup(dir.path());
    let out = router.handle_callback(5, 5, "user", "repo:add").await;
    assert_eq!(out, vec![Reply::alert("🚫 Admins only.")]);
    let out = router.handle_message(Incoming::private(5, "/repos")).await;
    assert!(out[0].body().contains("don't have access"));
}
