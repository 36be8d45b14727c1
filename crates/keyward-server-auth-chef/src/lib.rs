// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Chef node authentication for keyward.
//!
//! A node proves its identity by signing its login request with the same
//! private key it uses against the Chef server. keyward fetches the node's
//! public key and node document from the Chef server with its own signed
//! client, then grants the union of the policies mapped to the node's
//! environment, run-list roles and tags.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod signing;
pub mod verifier;

pub use backend::ChefBackend;
pub use client::{ChefClient, ChefNode};
pub use config::ChefConfig;
pub use error::{ChefApiError, ChefApiResult};
