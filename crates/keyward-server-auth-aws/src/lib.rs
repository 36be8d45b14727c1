// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AWS authentication for keyward.
//!
//! Two login methods share one mount:
//!
//! - **ec2**: a PKCS#7-signed instance identity document, optionally narrowed
//!   by an HMAC-signed role tag read from the instance's EC2 tags. Accepted
//!   identities are recorded in a whitelist that rejects replays.
//! - **iam**: a presigned `sts:GetCallerIdentity` request that keyward forwards
//!   to STS; the returned principal must match the role's bound ARN.
//!
//! Mount paths:
//!
//! | Path | Operations |
//! |------|------------|
//! | `login` | write |
//! | `config/client` | read, write, delete |
//! | `config/certificate/<name>` | read, write, delete |
//! | `config/certificates` | list |
//! | `config/sts/<account_id>` | list, read, write, delete |
//! | `config/tidy/<kind>` | read, write, delete |
//! | `role/<name>` | list, read, write, delete |
//! | `role/<name>/tag` | write |
//! | `identity-whitelist/<instance_id>` | list, read, delete |
//! | `roletag-blacklist/<tag>` | list, read, write, delete |
//! | `tidy/<kind>` | write |

pub mod arn;
pub mod backend;
pub mod client_cache;
pub mod config;
pub mod credentials;
pub mod enforcer;
pub mod instance;
pub mod ledger;
mod login;
mod paths;
pub mod pkcs7;
pub mod query;
pub mod role;
pub mod sigv4;
pub mod sts;
pub mod tag;
pub mod tidy;

pub use backend::AwsBackend;
pub use client_cache::{ClientCache, ClientCacheKey};
pub use config::{ClientConfig, TrustStore};
pub use instance::{InstanceApi, InstanceApiFactory, InstanceDescription};
pub use ledger::{ReplayLedger, WhitelistEntry};
pub use role::{AuthType, AwsBindings, AwsRole};
pub use tag::RoleTag;
pub use tidy::{TidyKind, TidyOutcome, TidyWorker};
