// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Path routing for the AWS backend.

use chrono::{DateTime, Utc};
use keyward_server_auth::policy::{self, DEFAULT_POLICY};
use keyward_server_auth::{AuthError, AuthResult, Operation, Request, Response, TtlBounds};
use serde::Deserialize;
use serde_json::json;

use crate::backend::AwsBackend;
use crate::config::{CertificateInput, ClientConfigInput};
use crate::ledger::add_duration;
use crate::role::{AwsRoleInput, RoleTagInput};
use crate::tag::RoleTag;
use crate::tidy::{TidyConfigInput, TidyKind, TidyOutcome, TidyRunInput};

#[derive(Debug, Deserialize)]
struct StsInput {
	sts_role: String,
}

fn unsupported(request: &Request) -> AuthError {
	AuthError::not_found(format!("{:?} {}", request.operation, request.path))
}

impl AwsBackend {
	#[tracing::instrument(skip_all, fields(op = ?request.operation, path = %request.path), name = "AwsBackend::route")]
	pub(crate) async fn route(&self, request: Request) -> AuthResult<Response> {
		use Operation::*;

		let segments = request.segments();
		match (request.operation, segments.as_slice()) {
			(Create | Update, ["login"]) => self.login(&request).await,

			(Read, ["config", "client"]) => Ok(match self.trust.read_client_config().await? {
				Some(config) => Response::with_data(&config.to_response())?,
				None => Response::empty(),
			}),
			(Create | Update, ["config", "client"]) => {
				let config = self.trust.write_client_config(request.decode::<ClientConfigInput>()?).await?;
				Response::with_data(&config.to_response())
			}
			(Delete, ["config", "client"]) => {
				self.trust.delete_client_config().await?;
				Ok(Response::empty())
			}

			(List, ["config", "certificate" | "certificates"] | ["config", "certificate", ""]) => {
				Ok(Response::list(self.trust.list_certificates().await?))
			}
			(Read, ["config", "certificate", name]) => match self.trust.get_certificate(name).await? {
				Some(entry) => Response::with_data(&entry),
				None => Ok(Response::empty()),
			},
			(Create | Update, ["config", "certificate", name]) => {
				let entry = self.trust.put_certificate(name, request.decode::<CertificateInput>()?).await?;
				Response::with_data(&entry)
			}
			(Delete, ["config", "certificate", name]) => {
				self.trust.delete_certificate(name).await?;
				Ok(Response::empty())
			}

			(List, ["config", "sts"] | ["config", "sts", ""]) => Ok(Response::list(self.trust.list_sts().await?)),
			(Read, ["config", "sts", account]) => match self.trust.get_sts(account).await? {
				Some(entry) => Response::with_data(&entry),
				None => Ok(Response::empty()),
			},
			(Create | Update, ["config", "sts", account]) => {
				let input: StsInput = request.decode()?;
				let entry = self.trust.put_sts(account, &input.sts_role).await?;
				Response::with_data(&entry)
			}
			(Delete, ["config", "sts", account]) => {
				self.trust.delete_sts(account).await?;
				Ok(Response::empty())
			}

			(op, ["config", "tidy", kind]) => {
				let kind = TidyKind::from_path(kind).ok_or_else(|| unsupported(&request))?;
				match op {
					Read => Response::with_data(&self.tidy.config(kind).await?),
					Create | Update => {
						let config = self.tidy.write_config(kind, request.decode::<TidyConfigInput>()?).await?;
						Response::with_data(&config)
					}
					Delete => {
						self.tidy.delete_config(kind).await?;
						Ok(Response::empty())
					}
					List => Err(unsupported(&request)),
				}
			}

			(List, ["role" | "roles"] | ["role", ""]) => Ok(Response::list(self.roles.list().await?)),
			(Read, ["role", name]) => match self.roles.get(name).await? {
				Some(role) => Response::with_data(&role.to_response()?),
				None => Ok(Response::empty()),
			},
			(Create | Update, ["role", name]) => {
				let input: AwsRoleInput = request.decode()?;
				let (role, _) = self.roles.create_or_update(name, |role| input.apply(role)).await?;
				Response::with_data(&role.to_response()?)
			}
			(Delete, ["role", name]) => {
				self.roles.delete(name).await?;
				Ok(Response::empty())
			}
			(Create | Update, ["role", name, "tag"]) => self.create_role_tag(name, &request).await,

			(List, ["identity-whitelist"] | ["identity-whitelist", ""]) => {
				Ok(Response::list(self.ledger.list_whitelist().await?))
			}
			(Read, ["identity-whitelist", instance_id]) => {
				match self.ledger.whitelist_entry(instance_id).await? {
					Some(entry) => Response::with_data(&entry.to_response()?),
					None => Ok(Response::empty()),
				}
			}
			(Delete, ["identity-whitelist", instance_id]) => {
				self.ledger.delete_whitelist_entry(instance_id).await?;
				Ok(Response::empty())
			}

			(List, ["roletag-blacklist"] | ["roletag-blacklist", ""]) => {
				Ok(Response::list(self.ledger.list_blacklist().await?))
			}
			(Read, ["roletag-blacklist", tag]) => match self.ledger.blacklist_entry(tag).await? {
				Some(entry) => Response::with_data(&entry),
				None => Ok(Response::empty()),
			},
			(Create | Update, ["roletag-blacklist", tag]) => self.blacklist_tag(tag, Utc::now()).await,
			(Delete, ["roletag-blacklist", tag]) => {
				self.ledger.remove_blacklisted(tag).await?;
				Ok(Response::empty())
			}

			(Create | Update, ["tidy", kind]) => {
				let kind = TidyKind::from_path(kind).ok_or_else(|| unsupported(&request))?;
				let input: TidyRunInput = request.decode()?;
				match self.tidy.run(kind, input.safety_buffer, Utc::now()).await? {
					TidyOutcome::Completed(summary) => Response::with_data(&summary),
					TidyOutcome::AlreadyRunning => Ok(Response::empty().warning("tidy already running")),
				}
			}

			_ => Err(unsupported(&request)),
		}
	}

	#[tracing::instrument(skip(self, request), name = "AwsBackend::create_role_tag")]
	async fn create_role_tag(&self, name: &str, request: &Request) -> AuthResult<Response> {
		let role = self.roles.require(name).await?;
		if role.bindings.role_tag.is_empty() {
			return Err(AuthError::bad_request(format!(
				"role {} does not enable role tags",
				role.name
			)));
		}
		let input: RoleTagInput = request.decode()?;
		if input.allow_instance_migration && input.disallow_reauthentication {
			return Err(AuthError::bad_request(
				"allow_instance_migration and disallow_reauthentication are mutually exclusive",
			));
		}

		let mut tag = RoleTag::new(role.name.clone());
		if let Some(requested) = input.policies {
			let requested = policy::sanitize(&requested);
			if !policy::is_subset(&requested, &role.policies) {
				return Err(AuthError::bad_request(
					"policies on the tag must be a subset of the role's policies",
				));
			}
			let narrowed: Vec<String> = requested.into_iter().filter(|p| p != DEFAULT_POLICY).collect();
			tag.policies = if narrowed.is_empty() {
				vec![DEFAULT_POLICY.to_string()]
			} else {
				narrowed
			};
		}
		if let Some(max_ttl) = input.max_ttl {
			let host_max = self.system.max_lease_ttl();
			if !host_max.is_zero() && max_ttl > host_max {
				return Err(AuthError::bad_request(
					"max_ttl cannot be greater than the system maximum",
				));
			}
			tag.max_ttl = max_ttl;
		}
		tag.instance_id = input.instance_id;
		tag.disallow_reauthentication = input.disallow_reauthentication;
		tag.allow_instance_migration = input.allow_instance_migration;

		let value = tag.seal(&role.hmac_key()?)?;
		Response::with_data(&json!({
			"tag_key": role.bindings.role_tag,
			"tag_value": value,
		}))
	}

	/// Revoke a tag until every token it could have produced has expired.
	#[tracing::instrument(skip_all, name = "AwsBackend::blacklist_tag")]
	pub(crate) async fn blacklist_tag(&self, value: &str, now: DateTime<Utc>) -> AuthResult<Response> {
		let role_name = RoleTag::unverified_role(value)?;
		let role = self.roles.require(&role_name).await?;
		let tag = RoleTag::verify(value, &role.hmac_key()?)?;
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), role.max_ttl, Some(tag.max_ttl));
		let entry = self
			.ledger
			.blacklist(value, &role.name, add_duration(now, bounds.longest_max), now)
			.await?;
		Response::with_data(&entry)
	}
}
