// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP Basic delegated authentication: a login succeeds when the configured
//! URL answers `200 OK` to a GET carrying the user's credentials.

pub mod backend;
pub mod config;
pub mod verifier;

pub use backend::HttpBasicBackend;
pub use config::HttpBasicConfig;
