// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Azure managed identity authentication.
//!
//! A VM presents an AAD access token for its managed identity. The token is
//! verified against the tenant's OIDC key set; when the login names a VM its
//! ARM record must carry the token's object id.
//!
//! | Path | Operations |
//! |------|------------|
//! | `login` | Update: `{role, jwt, subscription_id?, resource_group_name?, vm_name?}` |
//! | `config` | Read, Update, Delete |
//! | `role/<name>` | Read, Update, Delete; `role/` List |

pub mod arm;
pub mod backend;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod oidc;
pub mod role;

pub use arm::{ArmClient, VirtualMachine};
pub use backend::AzureBackend;
pub use config::AzureConfig;
pub use error::{OidcError, OidcResult};
pub use oidc::{IdentityClaims, OidcProvider};
pub use role::{AzureBindings, AzureRole};
