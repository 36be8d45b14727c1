// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! EC2 instance identity login through the backend's paths.
//!
//! Tests cover:
//! - Login against an AMI binding and the resulting auth
//! - Region, instance, VPC and subnet bindings
//! - Replay handling: nonce reuse, stale documents, migration, single use
//! - Role tags: creation, narrowed policies, tampering, blacklisting
//! - Renewal and the whitelist entry it extends

mod support;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use keyward_server_auth::{AuthError, Backend, ReplayError};
use serde_json::json;
use std::time::Duration;
use support::{keys, running_instance, Harness, AMI_ID, INSTANCE_ID, SUBNET_ID, VPC_ID};

fn launched() -> chrono::DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

async fn ami_role(harness: &Harness, extra: serde_json::Value) {
	let mut data = json!({
		"bound_ami_id": AMI_ID,
		"policies": "dev,ops",
		"max_ttl": "2h",
	});
	if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
		data.extend(extra.clone());
	}
	harness.write("role/web", data).await.unwrap();
}

#[tokio::test]
async fn test_login_issues_auth_and_records_identity() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;

	let response = harness
		.ec2_login("web", launched(), Some("client-nonce-1"))
		.await
		.unwrap();
	let auth = response.auth.expect("login returns auth");
	assert_eq!(auth.policies, vec!["default", "dev", "ops"]);
	assert_eq!(auth.metadata.get("role").map(String::as_str), Some("web"));
	assert_eq!(
		auth.metadata.get("instance_id").map(String::as_str),
		Some(INSTANCE_ID)
	);
	assert_eq!(auth.metadata.get("auth_type").map(String::as_str), Some("ec2"));
	assert_eq!(auth.max_ttl, Duration::from_secs(7200));
	assert_eq!(auth.display_name, INSTANCE_ID);
	assert!(auth.renewable);

	let listed = harness.list("identity-whitelist/").await.unwrap();
	assert_eq!(keys(&listed), vec![INSTANCE_ID.to_string()]);

	let entry = harness
		.read(&format!("identity-whitelist/{INSTANCE_ID}"))
		.await
		.unwrap();
	assert_eq!(entry.field("role"), Some(&json!("web")));
	assert!(entry.field("client_nonce").is_none());
}

#[tokio::test]
async fn test_login_rejects_foreign_signature() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;

	let stranger = support::Signer::generate();
	let err = harness
		.write(
			"login",
			json!({
				"role": "web",
				"pkcs7": stranger.identity(INSTANCE_ID, launched()),
				"nonce": "n",
			}),
		)
		.await
		.unwrap_err();
	assert_eq!(err.user_message(), "signature verification failed");
}

#[tokio::test]
async fn test_login_rejects_unbound_ami() {
	let harness = Harness::new().await;
	harness
		.write("role/web", json!({"bound_ami_id": "ami-other"}))
		.await
		.unwrap();

	let err = harness
		.ec2_login("web", launched(), Some("n"))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::BindingMismatch { ref attribute } if attribute == "bound_ami_id"));
}

#[tokio::test]
async fn test_network_bindings_use_the_described_instance() {
	let harness = Harness::new().await;
	harness.aws.put_instance(running_instance(&[]));
	harness
		.write(
			"role/web",
			json!({
				"bound_region": "us-east-1",
				"bound_ec2_instance_id": INSTANCE_ID,
				"bound_vpc_id": VPC_ID,
				"bound_subnet_id": SUBNET_ID,
			}),
		)
		.await
		.unwrap();
	harness.ec2_login("web", launched(), Some("n")).await.unwrap();

	harness
		.write("role/other-vpc", json!({"bound_vpc_id": "vpc-elsewhere"}))
		.await
		.unwrap();
	let err = harness
		.ec2_login("other-vpc", launched(), Some("n"))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::BindingMismatch { ref attribute } if attribute == "bound_vpc_id"));

	harness
		.write("role/other-region", json!({"bound_region": "ap-south-1"}))
		.await
		.unwrap();
	let err = harness
		.ec2_login("other-region", launched(), Some("n"))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::BindingMismatch { ref attribute } if attribute == "bound_region"));
}

#[tokio::test]
async fn test_replayed_document_requires_the_same_nonce() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;

	harness.ec2_login("web", launched(), Some("first")).await.unwrap();
	harness.ec2_login("web", launched(), Some("first")).await.unwrap();

	let err = harness
		.ec2_login("web", launched(), Some("second"))
		.await
		.unwrap_err();
	assert!(err.is_replay(&ReplayError::NonceMismatch));

	let err = harness.ec2_login("web", launched(), None).await.unwrap_err();
	assert!(err.is_replay(&ReplayError::MissingNonce));
}

#[tokio::test]
async fn test_older_document_is_stale() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;

	harness.ec2_login("web", launched(), Some("n")).await.unwrap();
	let err = harness
		.ec2_login("web", launched() - ChronoDuration::hours(1), Some("n"))
		.await
		.unwrap_err();
	assert!(err.is_replay(&ReplayError::StaleIdentity));
}

#[tokio::test]
async fn test_migration_accepts_a_new_nonce_with_newer_document() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({"allow_instance_migration": true})).await;

	harness.ec2_login("web", launched(), Some("old-host")).await.unwrap();

	let err = harness
		.ec2_login("web", launched(), Some("new-host"))
		.await
		.unwrap_err();
	assert!(err.is_replay(&ReplayError::NonceMismatch));

	harness
		.ec2_login("web", launched() + ChronoDuration::minutes(5), Some("new-host"))
		.await
		.unwrap();
	harness
		.ec2_login("web", launched() + ChronoDuration::minutes(5), Some("new-host"))
		.await
		.unwrap();
}

#[tokio::test]
async fn test_single_use_identity_cannot_log_in_twice() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({"disallow_reauthentication": true})).await;

	harness.ec2_login("web", launched(), None).await.unwrap();
	let err = harness
		.ec2_login("web", launched() + ChronoDuration::minutes(1), Some("n"))
		.await
		.unwrap_err();
	assert!(err.is_replay(&ReplayError::ReauthDisallowed));

	harness
		.delete(&format!("identity-whitelist/{INSTANCE_ID}"))
		.await
		.unwrap();
	harness.ec2_login("web", launched(), None).await.unwrap();
}

async fn tagged_harness() -> (Harness, String) {
	let harness = Harness::new().await;
	ami_role(&harness, json!({"role_tag": "KeywardRole"})).await;

	let response = harness
		.write("role/web/tag", json!({"policies": "dev", "max_ttl": "30m"}))
		.await
		.unwrap();
	assert_eq!(response.field("tag_key"), Some(&json!("KeywardRole")));
	let value = response
		.field("tag_value")
		.and_then(|v| v.as_str())
		.unwrap()
		.to_string();
	assert!(value.len() <= 127);
	(harness, value)
}

#[tokio::test]
async fn test_role_tag_narrows_policies_and_ttl() {
	let (harness, value) = tagged_harness().await;
	harness
		.aws
		.put_instance(running_instance(&[("KeywardRole", value.as_str())]));

	let auth = harness
		.ec2_login("web", launched(), Some("n"))
		.await
		.unwrap()
		.auth
		.unwrap();
	assert_eq!(auth.policies, vec!["default", "dev"]);
	assert_eq!(auth.max_ttl, Duration::from_secs(1800));
	assert_eq!(
		auth.metadata.get("role_tag_max_ttl").map(String::as_str),
		Some("1800")
	);
	assert_eq!(auth.internal_str("role_tag_value"), Some(value.as_str()));
}

#[tokio::test]
async fn test_tampered_role_tag_is_rejected() {
	let (harness, value) = tagged_harness().await;
	let tampered = value.replacen("p=dev", "p=ops", 1);
	assert_ne!(tampered, value);
	harness
		.aws
		.put_instance(running_instance(&[("KeywardRole", tampered.as_str())]));

	let err = harness
		.ec2_login("web", launched(), Some("n"))
		.await
		.unwrap_err();
	assert!(err.to_string().starts_with("tag verification failed"));
}

#[tokio::test]
async fn test_tag_policies_must_be_held_by_the_role() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({"role_tag": "KeywardRole"})).await;
	let err = harness
		.write("role/web/tag", json!({"policies": "admin"}))
		.await
		.unwrap_err();
	assert!(matches!(err, AuthError::BadRequest(_)));
}

#[tokio::test]
async fn test_blacklisted_tag_blocks_login() {
	let (harness, value) = tagged_harness().await;
	harness
		.aws
		.put_instance(running_instance(&[("KeywardRole", value.as_str())]));

	let entry = harness
		.write(&format!("roletag-blacklist/{value}"), json!({}))
		.await
		.unwrap();
	assert!(entry.field("expiration_time").is_some());
	assert_eq!(keys(&harness.list("roletag-blacklist/").await.unwrap()).len(), 1);

	let err = harness
		.ec2_login("web", launched(), Some("n"))
		.await
		.unwrap_err();
	assert!(err.is_replay(&ReplayError::TagBlacklisted));

	harness
		.delete(&format!("roletag-blacklist/{value}"))
		.await
		.unwrap();
	harness.ec2_login("web", launched(), Some("n")).await.unwrap();
}

#[tokio::test]
async fn test_renewal_requires_running_instance_and_whitelist_entry() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;
	harness.aws.put_instance(running_instance(&[]));

	let auth = harness
		.ec2_login("web", launched(), Some("n"))
		.await
		.unwrap()
		.auth
		.unwrap();

	let renewed = harness.backend.renew(&auth).await.unwrap();
	assert_eq!(renewed.policies, auth.policies);
	assert_eq!(renewed.max_ttl, Duration::from_secs(7200));

	harness.aws.set_state(INSTANCE_ID, "stopped");
	let err = harness.backend.renew(&auth).await.unwrap_err();
	assert_eq!(err.user_message(), "instance is not in running state");

	harness.aws.set_state(INSTANCE_ID, "running");
	harness
		.delete(&format!("identity-whitelist/{INSTANCE_ID}"))
		.await
		.unwrap();
	let err = harness.backend.renew(&auth).await.unwrap_err();
	assert!(matches!(err, AuthError::NotFound(_)));
}

#[tokio::test]
async fn test_renewal_requires_a_known_auth_type() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;
	harness.aws.put_instance(running_instance(&[]));
	let auth = harness
		.ec2_login("web", launched(), Some("n"))
		.await
		.unwrap()
		.auth
		.unwrap();

	let mut untyped = auth.clone();
	untyped.internal_data.remove("auth_type");
	let err = harness.backend.renew(&untyped).await.unwrap_err();
	assert!(matches!(err, AuthError::Internal(_)));

	let mut unknown = auth;
	unknown.set_internal("auth_type", "gce");
	let err = harness.backend.renew(&unknown).await.unwrap_err();
	assert!(matches!(err, AuthError::Internal(_)));
}

#[tokio::test]
async fn test_forced_tidy_reports_a_summary() {
	let harness = Harness::new().await;
	ami_role(&harness, json!({})).await;
	harness.ec2_login("web", launched(), Some("n")).await.unwrap();

	let response = harness
		.write("tidy/identity-whitelist", json!({"safety_buffer": "1h"}))
		.await
		.unwrap();
	assert_eq!(response.field("scanned"), Some(&json!(1)));
	assert_eq!(response.field("deleted"), Some(&json!(0)));
	assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
	let harness = Harness::new().await;
	let err = harness.read("nope/at/all").await.unwrap_err();
	assert!(matches!(err, AuthError::NotFound(_)));
}
