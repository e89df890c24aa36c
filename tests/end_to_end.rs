use std::path::{Path, PathBuf};

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use image::{Rgba, RgbaImage};
use restcase::config::DbSection;
use restcase::storage::{Row, SqliteStorage, Storage, sort_by_id};
use restcase::testing::parse_cases;
use restcase::{ExpectedRow, Harness, HarnessConfig, TableSpec, TestCase, not};
use serde_json::{Value, json};

// ---- API under test ----

#[derive(Clone)]
struct AppState {
    storage: SqliteStorage,
    upload_dir: PathBuf,
}

async fn list_items(State(state): State<AppState>) -> Result<Json<Vec<Row>>, StatusCode> {
    let mut rows = state
        .storage
        .fetch_all("items")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    sort_by_id(&mut rows);
    Ok(Json(rows))
}

async fn create_item(
    State(state): State<AppState>,
    Json(row): Json<Row>,
) -> Result<(StatusCode, Json<Row>), StatusCode> {
    let stored = state
        .storage
        .insert("items", row)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn create_user(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Row>), StatusCode> {
    let mut row = Row::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "avatar" {
            let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            std::fs::write(state.upload_dir.join("avatar.png"), &bytes)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            row.insert("avatar".into(), json!("avatar.png"));
        } else {
            let text = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            row.insert(name, Value::String(text));
        }
    }
    let stored = state
        .storage
        .insert("users", row)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

fn create_test_app(state: AppState) -> Router {
    Router::new()
        .route("/api/items", get(list_items).post(create_item))
        .route("/api/users", post(create_user))
        .with_state(state)
}

// ---- Test Harness ----

struct Fixture {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    harness: Harness,
}

fn create_test_schema(db: &Path) {
    SqliteStorage::open(db)
        .unwrap()
        .execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
             CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, avatar TEXT);",
        )
        .unwrap();
}

async fn start() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    let db = root.join("app.db");
    let upload_dir = root.join("uploads");
    create_test_schema(&db);

    let state = AppState {
        storage: SqliteStorage::open(&db).unwrap(),
        upload_dir: upload_dir.clone(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_test_app(state)).await.unwrap();
    });

    let config = HarnessConfig::new(format!("http://{addr}/api"))
        .with_upload_dir(&upload_dir)
        .with_log_dir(root.join("logs"))
        .with_db(DbSection {
            host: Some("localhost".into()),
            name: Some(db.to_string_lossy().into_owned()),
            user: Some("restcase".into()),
            password: Some("restcase".into()),
        });
    Fixture {
        _tmp: tmp,
        root,
        harness: Harness::new(config).unwrap(),
    }
}

fn png(path: &Path, colour: [u8; 4]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbaImage::from_pixel(8, 8, Rgba(colour)).save(path).unwrap();
}

// ---- Scenarios ----

#[tokio::test]
async fn seeded_rows_are_listed() {
    let fixture = start().await;
    let case = TestCase::get("/items")
        .resdata(json!([{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }]))
        .table(TableSpec::new("items").mock_rows([json!({ "name": "a" }), json!({ "name": "b" })]));

    fixture.harness.test([case]).await.assert_all_passed();
}

#[tokio::test]
async fn created_item_is_persisted() {
    let fixture = start().await;
    let case = TestCase::post("/items")
        .json(json!({ "name": "widget" }))
        .status(201)
        .resdata(json!({ "id": 2, "name": "widget" }))
        .table(
            TableSpec::new("items")
                .mock_row(json!({ "name": "first" }))
                .expect_rows([
                    ExpectedRow::new().field("id", 1).field("name", "first"),
                    ExpectedRow::new().field("id", 2).field("name", not(["first"])),
                ]),
        );

    // Twice: the reset before each run restores the same starting state.
    let report = fixture.harness.test([case.clone(), case]).await;
    report.assert_all_passed();
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn uploaded_avatar_matches_reference() {
    let fixture = start().await;
    let reference = fixture.root.join("fixtures/avatar.png");
    png(&reference, [40, 120, 200, 255]);

    let case = TestCase::post("/users")
        .form(json!({ "name": "ann" }))
        .upload("avatar", &reference)
        .status(201)
        .table(
            TableSpec::new("users")
                .expect_row(ExpectedRow::new().field("name", "ann").field("avatar", "avatar.png"))
                .expect_upload("avatar.png", &reference),
        );

    fixture.harness.test([case]).await.assert_all_passed();
}

#[tokio::test]
async fn differing_avatar_leaves_diagnostics() {
    let fixture = start().await;
    let sent = fixture.root.join("fixtures/sent.png");
    let reference = fixture.root.join("fixtures/reference.png");
    png(&sent, [255, 255, 255, 255]);
    png(&reference, [0, 0, 0, 255]);

    let case = TestCase::post("/users")
        .form(json!({ "name": "ann" }))
        .upload("avatar", &sent)
        .status(201)
        .table(TableSpec::new("users").expect_upload("avatar.png", &reference));

    let report = fixture.harness.test([case]).await;
    assert_eq!(report.failed, 1);
    let logs = fixture.root.join("logs/users");
    assert!(logs.join("uploaded/avatar.png").exists());
    assert!(logs.join("expected/reference.png").exists());
    assert!(logs.join("diff/avatar.png").exists());
}

#[tokio::test]
async fn cases_from_a_file_report_each_outcome() {
    let fixture = start().await;
    let cases = parse_cases(
        r#"[
            {
                "url": "/items",
                "method": "POST",
                "reqformat": "JSON",
                "reqdata": { "name": "gadget" },
                "status": 201,
                "db": { "tablename": "items", "result": { "data": { "name": "gadget" } } }
            },
            {
                "url": "/items",
                "method": "POST",
                "reqformat": "JSON",
                "reqdata": { "name": "gadget" },
                "db": { "tablename": "items" }
            },
            {
                "url": "/items",
                "method": "GET",
                "resdata": [],
                "db": [{ "tablename": "items", "result": { "data": [] } }]
            }
        ]"#,
    )
    .unwrap();

    let report = fixture.harness.test(cases).await;
    assert_eq!((report.passed, report.failed), (2, 1));
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.title, "POST /items should return 200 (posting in JSON format)");
    assert!(report.render_text().contains("expected status 200, observed 201"));
}
