mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::*;
use flate2::Compression;
use flate2::write::GzEncoder;
use http_body_util::BodyExt;
use serde_json::Value;
use std::io::Write;
use tower::ServiceExt;

const WADO: &str = "http://pacs.example/wado";

fn stow_request(uri: &str, accept: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, related_content_type(BOUNDARY));
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn sequence_len(doc: &Value, tag: &str) -> usize {
    doc[tag]["Value"].as_array().map(Vec::len).unwrap_or(0)
}

#[tokio::test]
async fn test_study_constraint_mismatch_is_partial() {
    let gateway = TestGateway::new(Some(WADO));
    let body = multipart_body(
        BOUNDARY,
        &[
            Part::dicom(dicom_instance("1.2.3.1", "1.2.3", "1.2.3.9")),
            Part::dicom(dicom_instance("1.2.3.2", "1.2.3", "1.2.3.9")),
            Part::dicom(dicom_instance("1.2.3.3", "1.2.3", "1.2.3.9")),
            Part::dicom(dicom_instance("4.5.6.1", "4.5.6", "4.5.6.9")),
        ],
    );

    let response = gateway
        .app
        .clone()
        .oneshot(stow_request("/studies/1.2.3", None, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert!(response.headers().contains_key("x-request-id"));
    let doc = json_body(response).await;

    assert_eq!(sequence_len(&doc, "00081199"), 3);
    assert_eq!(sequence_len(&doc, "00081198"), 1);
    let failed = &doc["00081198"]["Value"][0];
    assert_eq!(failed["00081155"]["Value"][0], "4.5.6.1");
    assert_eq!(failed["00081197"]["Value"][0], 0x0910);
    assert_eq!(doc["00081190"]["Value"][0], format!("{}/studies/1.2.3", WADO));
    assert_eq!(
        doc["00081199"]["Value"][0]["00081190"]["Value"][0],
        format!("{}/studies/1.2.3/series/1.2.3.9/instances/1.2.3.1", WADO)
    );

    let (storage, staging) = gateway.shutdown().await;
    assert_eq!(
        storage.keys(),
        vec![
            "edge-01/1.2.3/1.2.3.9/1.2.3.1.dcm".to_string(),
            "edge-01/1.2.3/1.2.3.9/1.2.3.2.dcm".to_string(),
            "edge-01/1.2.3/1.2.3.9/1.2.3.3.dcm".to_string(),
        ]
    );
    assert_eq!(
        storage.files.lock().unwrap()["edge-01/1.2.3/1.2.3.9/1.2.3.2.dcm"],
        dicom_instance("1.2.3.2", "1.2.3", "1.2.3.9")
    );
    // uploaded and rejected files are both gone
    assert!(staged_files(staging.path()).is_empty());
}

#[tokio::test]
async fn test_all_instances_accepted() {
    let gateway = TestGateway::new(None);
    let body = multipart_body(
        BOUNDARY,
        &[
            Part::dicom(dicom_instance("1.2.3.1", "1.2.3", "1.2.3.9")),
            Part::dicom(dicom_instance("7.8.1", "7.8", "7.8.9")),
        ],
    );

    let response = gateway
        .app
        .clone()
        .oneshot(stow_request("/studies", Some("application/dicom+json"), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert_eq!(sequence_len(&doc, "00081199"), 2);
    assert_eq!(doc["00081198"], serde_json::json!({ "vr": "SQ" }));
    // no base URL configured
    assert!(doc.get("00081190").is_none());
    assert!(doc["00081199"]["Value"][0].get("00081190").is_none());

    let (storage, _staging) = gateway.shutdown().await;
    assert_eq!(storage.keys().len(), 2);
}

#[tokio::test]
async fn test_nothing_accepted_is_bad_request() {
    let gateway = TestGateway::new(Some(WADO));
    let body = multipart_body(
        BOUNDARY,
        &[
            Part::dicom(b"this is not a DICOM file".to_vec()),
            Part::dicom(dicom_instance("1.1", "1", "1.1")).header("Content-Encoding", "br"),
        ],
    );

    let response = gateway
        .app
        .clone()
        .oneshot(stow_request("/studies", None, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let doc = json_body(response).await;
    assert_eq!(sequence_len(&doc, "00081199"), 0);
    let reasons: Vec<_> = doc["00081198"]["Value"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["00081197"]["Value"][0].as_u64().unwrap())
        .collect();
    assert_eq!(reasons, vec![0x0110, 0xC000]);

    let (storage, staging) = gateway.shutdown().await;
    assert!(storage.keys().is_empty());
    assert!(staged_files(staging.path()).is_empty());
}

#[tokio::test]
async fn test_zero_parts_is_bad_request() {
    let gateway = TestGateway::new(Some(WADO));
    let body = format!("--{}--\r\n", BOUNDARY).into_bytes();

    let response = gateway
        .app
        .clone()
        .oneshot(stow_request("/studies", None, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let doc = json_body(response).await;
    assert_eq!(sequence_len(&doc, "00081198"), 0);
    assert_eq!(sequence_len(&doc, "00081199"), 0);
}

#[tokio::test]
async fn test_xml_response() {
    let gateway = TestGateway::new(Some(WADO));
    let body = multipart_body(
        BOUNDARY,
        &[Part::dicom(dicom_instance("1.2.3.1", "1.2.3", "1.2.3.9"))],
    );

    let response = gateway
        .app
        .clone()
        .oneshot(stow_request("/studies", Some("application/DICOM+xml"), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/xml"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("<NativeDicomModel"));
    assert!(xml.contains("keyword=\"ReferencedSOPSequence\""));
    assert!(xml.contains("<Value number=\"1\">1.2.3.1</Value>"));
    assert!(xml.contains(&format!("<Value number=\"1\">{}/studies/1.2.3</Value>", WADO)));
}

#[tokio::test]
async fn test_base64_gzip_part_is_decoded() {
    use base64::Engine;

    let gateway = TestGateway::new(None);
    let original = dicom_instance("1.2.3.1", "1.2.3", "1.2.3.9");
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&original).unwrap();
    let encoded = base64::engine::general_purpose::STANDARD.encode(gz.finish().unwrap());
    // wrapped at 76 columns like a mail encoder would
    let wrapped: Vec<u8> = encoded
        .as_bytes()
        .chunks(76)
        .collect::<Vec<_>>()
        .join(&b"\r\n"[..]);

    let body = multipart_body(
        BOUNDARY,
        &[Part::dicom(wrapped)
            .header("Content-Transfer-Encoding", "base64")
            .header("Content-Encoding", "gzip")],
    );

    let response = gateway
        .app
        .clone()
        .oneshot(stow_request("/studies", None, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (storage, _staging) = gateway.shutdown().await;
    assert_eq!(
        storage.files.lock().unwrap()["edge-01/1.2.3/1.2.3.9/1.2.3.1.dcm"],
        original
    );
}

#[tokio::test]
async fn test_invalid_content_type() {
    let gateway = TestGateway::new(None);

    for content_type in [
        "application/dicom",
        "multipart/related; type=\"application/dicom\"",
    ] {
        let response = gateway
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/studies")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from("ignored"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let doc = json_body(response).await;
        assert!(doc["error"].is_string());
    }

    let response = gateway
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/studies")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let gateway = TestGateway::new(None);
    let response = gateway
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert_eq!(doc["status"], "ok");
    assert_eq!(doc["pending_uploads"], 0);
}
