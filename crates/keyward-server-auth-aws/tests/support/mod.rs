// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use keyward_server_auth::{
	AuthResult, Backend, InMemoryStorage, Operation, Request, Response, StaticSystemView, Storage,
};
use keyward_server_auth_aws::client_cache::ClientCacheKey;
use keyward_server_auth_aws::config::ClientConfig;
use keyward_server_auth_aws::{AwsBackend, InstanceApi, InstanceApiFactory, InstanceDescription};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::{X509NameBuilder, X509};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const INSTANCE_ID: &str = "i-0123456789abcdef0";
pub const AMI_ID: &str = "ami-0abcd1234";
pub const ACCOUNT_ID: &str = "123456789012";
pub const VPC_ID: &str = "vpc-0f00ba44";
pub const SUBNET_ID: &str = "subnet-0f00ba44";

/// A self-signed certificate standing in for the AWS signing certificate.
pub struct Signer {
	pub cert: X509,
	pub key: PKey<Private>,
}

impl Signer {
	pub fn generate() -> Self {
		let rsa = Rsa::generate(2048).unwrap();
		let key = PKey::from_rsa(rsa).unwrap();

		let mut name = X509NameBuilder::new().unwrap();
		name.append_entry_by_text("CN", "ec2-test-signer").unwrap();
		let name = name.build();

		let mut builder = X509::builder().unwrap();
		builder.set_version(2).unwrap();
		let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
		builder.set_serial_number(&serial).unwrap();
		builder.set_subject_name(&name).unwrap();
		builder.set_issuer_name(&name).unwrap();
		builder.set_pubkey(&key).unwrap();
		builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
		builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
		builder.sign(&key, MessageDigest::sha256()).unwrap();

		Self {
			cert: builder.build(),
			key,
		}
	}

	pub fn pem(&self) -> String {
		String::from_utf8(self.cert.to_pem().unwrap()).unwrap()
	}

	/// Base64 DER PKCS#7 over an identity document.
	pub fn identity(&self, instance_id: &str, pending_time: DateTime<Utc>) -> String {
		let document = json!({
			"instanceId": instance_id,
			"imageId": AMI_ID,
			"accountId": ACCOUNT_ID,
			"region": "us-east-1",
			"pendingTime": pending_time.to_rfc3339(),
			"architecture": "x86_64",
			"instanceType": "t3.micro",
		})
		.to_string();
		let extra = Stack::new().unwrap();
		let pkcs7 = Pkcs7::sign(
			&self.cert,
			&self.key,
			&extra,
			document.as_bytes(),
			Pkcs7Flags::BINARY,
		)
		.unwrap();
		STANDARD.encode(pkcs7.to_der().unwrap())
	}
}

/// Instances and instance-profile roles served to the backend.
#[derive(Default)]
pub struct FakeAws {
	pub instances: Mutex<BTreeMap<String, InstanceDescription>>,
	pub profile_roles: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeAws {
	pub fn put_instance(&self, instance: InstanceDescription) {
		self.instances
			.lock()
			.unwrap()
			.insert(instance.instance_id.clone(), instance);
	}

	pub fn set_state(&self, instance_id: &str, state: &str) {
		if let Some(instance) = self.instances.lock().unwrap().get_mut(instance_id) {
			instance.state = state.to_string();
		}
	}
}

struct FakeApi(Arc<FakeAws>);

#[async_trait]
impl InstanceApi for FakeApi {
	async fn describe_instance(&self, instance_id: &str) -> AuthResult<InstanceDescription> {
		self.0
			.instances
			.lock()
			.unwrap()
			.get(instance_id)
			.cloned()
			.ok_or_else(|| keyward_server_auth::AuthError::verification("instance not found"))
	}

	async fn instance_profile_roles(&self, profile_arn: &str) -> AuthResult<Vec<String>> {
		Ok(self
			.0
			.profile_roles
			.lock()
			.unwrap()
			.get(profile_arn)
			.cloned()
			.unwrap_or_default())
	}
}

pub struct FakeFactory(pub Arc<FakeAws>);

impl InstanceApiFactory for FakeFactory {
	fn build(&self, _key: &ClientCacheKey, _config: &ClientConfig) -> AuthResult<Arc<dyn InstanceApi>> {
		Ok(Arc::new(FakeApi(Arc::clone(&self.0))))
	}
}

pub fn running_instance(tags: &[(&str, &str)]) -> InstanceDescription {
	InstanceDescription {
		instance_id: INSTANCE_ID.to_string(),
		image_id: AMI_ID.to_string(),
		state: "running".to_string(),
		vpc_id: VPC_ID.to_string(),
		subnet_id: SUBNET_ID.to_string(),
		iam_instance_profile_arn: None,
		tags: tags
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect(),
	}
}

pub struct Harness {
	pub backend: AwsBackend,
	pub aws: Arc<FakeAws>,
	pub signer: Signer,
}

impl Harness {
	/// Backend with the test signer registered and a one-day host maximum.
	pub async fn new() -> Self {
		let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
		let system = Arc::new(StaticSystemView::new(
			Duration::from_secs(3600),
			Duration::from_secs(86400),
		));
		let aws = Arc::new(FakeAws::default());
		let backend = AwsBackend::with_factory(
			storage,
			system,
			reqwest::Client::new(),
			Arc::new(FakeFactory(Arc::clone(&aws))),
		);
		let signer = Signer::generate();
		let harness = Self {
			backend,
			aws,
			signer,
		};
		harness
			.write("config/certificate/test", json!({"aws_public_cert": harness.signer.pem()}))
			.await
			.unwrap();
		harness
	}

	pub async fn write(&self, path: &str, data: Value) -> AuthResult<Response> {
		self.backend
			.handle(Request::new(Operation::Update, path).with_data(data))
			.await
	}

	pub async fn read(&self, path: &str) -> AuthResult<Response> {
		self.backend.handle(Request::new(Operation::Read, path)).await
	}

	pub async fn list(&self, path: &str) -> AuthResult<Response> {
		self.backend.handle(Request::new(Operation::List, path)).await
	}

	pub async fn delete(&self, path: &str) -> AuthResult<Response> {
		self.backend.handle(Request::new(Operation::Delete, path)).await
	}

	pub async fn ec2_login(
		&self,
		role: &str,
		pending_time: DateTime<Utc>,
		nonce: Option<&str>,
	) -> AuthResult<Response> {
		let mut data = json!({
			"role": role,
			"pkcs7": self.signer.identity(INSTANCE_ID, pending_time),
		});
		if let Some(nonce) = nonce {
			data["nonce"] = json!(nonce);
		}
		self.write("login", data).await
	}
}

pub fn keys(response: &Response) -> Vec<String> {
	response
		.field("keys")
		.and_then(Value::as_array)
		.map(|keys| {
			keys.iter()
				.filter_map(|k| k.as_str().map(str::to_string))
				.collect()
		})
		.unwrap_or_default()
}
