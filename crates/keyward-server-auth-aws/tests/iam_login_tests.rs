// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! IAM caller identity login against a mocked STS endpoint.

mod support;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyward_server_auth::{AuthError, Backend};
use serde_json::{json, Value};
use support::Harness;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";

fn caller_identity(arn: &str) -> String {
	format!(
		r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>{arn}</Arn>
    <UserId>AROAEXAMPLEID:ci-run</UserId>
    <Account>123456789012</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata>
    <RequestId>c6104cbe-af31-11e0-8154-cbc7ccf896c7</RequestId>
  </ResponseMetadata>
</GetCallerIdentityResponse>"#
	)
}

fn login_data(signed_headers: &str, extra_headers: &[(&str, &str)]) -> Value {
	let mut headers = serde_json::Map::new();
	headers.insert(
		"Authorization".to_string(),
		json!(format!(
			"AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240301/us-east-1/sts/aws4_request, \
			 SignedHeaders={signed_headers}, Signature=deadbeef"
		)),
	);
	headers.insert(
		"Content-Type".to_string(),
		json!("application/x-www-form-urlencoded; charset=utf-8"),
	);
	headers.insert("X-Amz-Date".to_string(), json!("20240301T120000Z"));
	for (name, value) in extra_headers {
		headers.insert(name.to_string(), json!(value));
	}
	json!({
		"role": "deploy",
		"iam_http_request_method": "POST",
		"iam_request_url": STANDARD.encode("https://sts.amazonaws.com/"),
		"iam_request_body": STANDARD.encode(BODY),
		"iam_request_headers": STANDARD.encode(Value::Object(headers).to_string()),
	})
}

async fn harness_with_sts(server: &MockServer) -> Harness {
	let harness = Harness::new().await;
	harness
		.write("config/client", json!({"sts_endpoint": server.uri()}))
		.await
		.unwrap();
	harness
		.write(
			"role/deploy",
			json!({
				"auth_type": "iam",
				"bound_iam_principal_arn": "arn:aws:iam::123456789012:role/Deployer",
				"policies": ["deploy"],
			}),
		)
		.await
		.unwrap();
	harness
}

#[tokio::test]
async fn test_iam_login_with_assumed_role() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/"))
		.and(body_string(BODY))
		.and(header("x-amz-date", "20240301T120000Z"))
		.respond_with(ResponseTemplate::new(200).set_body_string(caller_identity(
			"arn:aws:sts::123456789012:assumed-role/Deployer/ci-run",
		)))
		.expect(1)
		.mount(&server)
		.await;
	let harness = harness_with_sts(&server).await;

	let auth = harness
		.write("login", login_data("content-type;host;x-amz-date", &[]))
		.await
		.unwrap()
		.auth
		.unwrap();
	assert_eq!(auth.policies, vec!["default", "deploy"]);
	assert_eq!(auth.display_name, "Deployer");
	assert_eq!(
		auth.metadata.get("canonical_arn").map(String::as_str),
		Some("arn:aws:iam::123456789012:role/Deployer")
	);
	assert_eq!(
		auth.metadata.get("client_arn").map(String::as_str),
		Some("arn:aws:sts::123456789012:assumed-role/Deployer/ci-run")
	);
	assert_eq!(auth.metadata.get("auth_type").map(String::as_str), Some("iam"));

	let renewed = harness.backend.renew(&auth).await.unwrap();
	assert_eq!(renewed.policies, auth.policies);
}

#[tokio::test]
async fn test_iam_login_rejects_other_principal() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200).set_body_string(caller_identity(
			"arn:aws:sts::123456789012:assumed-role/Intruder/ci-run",
		)))
		.mount(&server)
		.await;
	let harness = harness_with_sts(&server).await;

	let err = harness
		.write("login", login_data("content-type;host;x-amz-date", &[]))
		.await
		.unwrap_err();
	assert!(
		matches!(err, AuthError::BindingMismatch { ref attribute } if attribute == "bound_iam_principal_arn")
	);
}

#[tokio::test]
async fn test_iam_login_surfaces_sts_rejection() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(403).set_body_string("SignatureDoesNotMatch"))
		.mount(&server)
		.await;
	let harness = harness_with_sts(&server).await;

	let err = harness
		.write("login", login_data("content-type;host;x-amz-date", &[]))
		.await
		.unwrap_err();
	assert_eq!(
		err.user_message(),
		"sts rejected the request: SignatureDoesNotMatch"
	);
}

#[tokio::test]
async fn test_server_id_header_must_be_signed() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(header("x-keyward-aws-iam-server-id", "vault.example.com"))
		.respond_with(ResponseTemplate::new(200).set_body_string(caller_identity(
			"arn:aws:sts::123456789012:assumed-role/Deployer/ci-run",
		)))
		.mount(&server)
		.await;
	let harness = harness_with_sts(&server).await;
	harness
		.write(
			"config/client",
			json!({"iam_server_id_header_value": "vault.example.com"}),
		)
		.await
		.unwrap();

	let err = harness
		.write("login", login_data("content-type;host;x-amz-date", &[]))
		.await
		.unwrap_err();
	assert_eq!(err.user_message(), "missing server id header");

	let err = harness
		.write(
			"login",
			login_data(
				"content-type;host;x-amz-date",
				&[("X-Keyward-AWS-IAM-Server-ID", "vault.example.com")],
			),
		)
		.await
		.unwrap_err();
	assert_eq!(err.user_message(), "server id header is not signed");

	harness
		.write(
			"login",
			login_data(
				"content-type;host;x-amz-date;x-keyward-aws-iam-server-id",
				&[("X-Keyward-AWS-IAM-Server-ID", "vault.example.com")],
			),
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn test_ec2_role_refuses_iam_login() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200).set_body_string(caller_identity(
			"arn:aws:iam::123456789012:user/web",
		)))
		.mount(&server)
		.await;
	let harness = harness_with_sts(&server).await;
	harness
		.write("role/web", json!({"bound_ami_id": "ami-1"}))
		.await
		.unwrap();

	let mut data = login_data("content-type;host;x-amz-date", &[]);
	data["role"] = json!("web");
	let err = harness.write("login", data).await.unwrap_err();
	assert!(matches!(err, AuthError::BadRequest(_)));
}
