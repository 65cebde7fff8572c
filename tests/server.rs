// tests/server.rs

use std::{fs, path::Path, sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use stem_splitter_server::{
    server::app_router, write_audio, AudioData, Isolation, PublicEndpoint, RequestOrchestrator,
    SeparationEngine, SplitError, StemMode, TargetFormat, Transcoder, UrlSynthesizer,
    WorkspaceManager,
};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

const BOUNDARY: &str = "----stem-splitter-test";
const BASE: &str = "http://127.0.0.1:8000";

struct CopyEngine {
    stems: Vec<&'static str>,
}

impl SeparationEngine for CopyEngine {
    fn separate(
        &self,
        input: &Path,
        _mode: StemMode,
        output_root: &Path,
    ) -> stem_splitter_server::Result<()> {
        let dir = output_root.join(input.file_stem().unwrap());
        fs::create_dir_all(&dir)?;
        for stem in &self.stems {
            write_audio(
                dir.join(format!("{stem}.wav")),
                &AudioData {
                    samples: vec![0.25; 4_410 * 2],
                    sample_rate: 44_100,
                    channels: 2,
                },
            )?;
        }
        Ok(())
    }
}

struct BrokenEngine;

impl SeparationEngine for BrokenEngine {
    fn separate(&self, _: &Path, _: StemMode, _: &Path) -> stem_splitter_server::Result<()> {
        Err(SplitError::Separation("model not found".into()))
    }
}

fn app(engine: impl SeparationEngine + 'static, mode: StemMode, max_bytes: usize) -> (Router, TempDir) {
    let tmp = tempdir().unwrap();
    let output = tmp.path().join("output");
    fs::create_dir_all(&output).unwrap();
    let orch = RequestOrchestrator::new(
        WorkspaceManager::new(
            tmp.path().join("uploads"),
            &output,
            Isolation::Shared,
            Duration::from_secs(60),
        ),
        Box::new(engine),
        Transcoder::new(TargetFormat::Wav, 0),
        UrlSynthesizer::new(
            PublicEndpoint {
                scheme: "http".into(),
                host: "127.0.0.1".into(),
                port: 8000,
            },
            "/output",
            &output,
        ),
        mode,
    );
    (app_router(Arc::new(orch), max_bytes), tmp)
}

fn multipart(field: &str, file_name: Option<&str>, data: &[u8]) -> Request<Body> {
    let disposition = match file_name {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/split")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn split_returns_urls_that_the_server_serves() {
    let (app, _tmp) = app(
        CopyEngine {
            stems: vec!["vocals", "accompaniment"],
        },
        StemMode::Two,
        1024 * 1024,
    );

    let resp = app
        .clone()
        .oneshot(multipart("file", Some("My Song.wav"), b"fake audio"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert_eq!(json["message"], "File processed successfully!");
    let vocals = json["vocals_url"].as_str().unwrap().to_string();
    assert_eq!(vocals, format!("{BASE}/output/My_Song/vocals.wav"));
    assert_eq!(
        json["instrumental_url"],
        format!("{BASE}/output/My_Song/accompaniment.wav")
    );
    assert_eq!(json["stems"]["vocals"]["status"], "ready");

    let path = vocals.strip_prefix(BASE).unwrap().to_string();
    let resp = app
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..4], b"RIFF");
}

#[tokio::test]
async fn four_stem_response_keeps_every_field() {
    let (app, _tmp) = app(
        CopyEngine {
            stems: vec!["vocals", "bass"],
        },
        StemMode::Four,
        1024 * 1024,
    );

    let resp = app
        .oneshot(multipart("file", Some("take%1.mp3"), b"x"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert!(json["vocals_url"]
        .as_str()
        .unwrap()
        .ends_with("/output/take_1/vocals.wav"));
    assert!(json["bass_url"].as_str().unwrap().ends_with("/bass.wav"));
    assert_eq!(json["drums_url"], "");
    assert_eq!(json["other_url"], "");
    assert_eq!(json["stems"]["other"]["status"], "missing");
}

#[tokio::test]
async fn missing_file_field_is_a_bad_request() {
    let (app, _tmp) = app(CopyEngine { stems: vec![] }, StemMode::Four, 1024 * 1024);

    let resp = app
        .oneshot(multipart("comment", None, b"hello"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert!(json["error"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn empty_upload_is_a_bad_request() {
    let (app, _tmp) = app(CopyEngine { stems: vec![] }, StemMode::Four, 1024 * 1024);

    let resp = app
        .oneshot(multipart("file", Some("empty.wav"), b""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let (app, _tmp) = app(CopyEngine { stems: vec![] }, StemMode::Four, 1024);

    let resp = app
        .oneshot(multipart("file", Some("big.wav"), &[0u8; 4096]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(json_body(resp).await["error"].is_string());
}

#[tokio::test]
async fn non_multipart_body_is_rejected() {
    let (app, _tmp) = app(CopyEngine { stems: vec![] }, StemMode::Four, 1024 * 1024);

    let req = Request::builder()
        .method("POST")
        .uri("/split")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn engine_failure_is_a_server_error() {
    let (app, _tmp) = app(BrokenEngine, StemMode::Four, 1024 * 1024);

    let resp = app
        .oneshot(multipart("file", Some("song.wav"), b"data"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(resp).await;
    assert!(json["error"].as_str().unwrap().contains("model not found"));
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _tmp) = app(CopyEngine { stems: vec![] }, StemMode::Two, 1024);

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "ok");
}
