// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! EC2 instance identity documents signed as PKCS#7.
//!
//! The signer certificate is looked up only among the trusted certificates
//! supplied by the caller (never among certificates embedded in the message)
//! and is not chain-verified: AWS publishes a self-signed certificate per
//! region, and registering it is what establishes trust.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use keyward_server_auth::{AuthError, AuthMethod, AuthResult, PrincipalClaim};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The AWS public certificate that signs identity documents in the standard regions.
pub const AWS_PUBLIC_CERT: &str = r"-----BEGIN CERTIFICATE-----
MIIC7TCCAq0CCQCWukjZ5V4aZzAJBgcqhkjOOAQDMFwxCzAJBgNVBAYTAlVTMRkw
FwYDVQQIExBXYXNoaW5ndG9uIFN0YXRlMRAwDgYDVQQHEwdTZWF0dGxlMSAwHgYD
VQQKExdBbWF6b24gV2ViIFNlcnZpY2VzIExMQzAeFw0xMjAxMDUxMjU2MTJaFw0z
ODAxMDUxMjU2MTJaMFwxCzAJBgNVBAYTAlVTMRkwFwYDVQQIExBXYXNoaW5ndG9u
IFN0YXRlMRAwDgYDVQQHEwdTZWF0dGxlMSAwHgYDVQQKExdBbWF6b24gV2ViIFNl
cnZpY2VzIExMQzCCAbcwggEsBgcqhkjOOAQBMIIBHwKBgQCjkvcS2bb1VQ4yt/5e
ih5OO6kK/n1Lzllr7D8ZwtQP8fOEpp5E2ng+D6Ud1Z1gYipr58Kj3nssSNpI6bX3
VyIQzK7wLclnd/YozqNNmgIyZecN7EglK9ITHJLP+x8FtUpt3QbyYXJdmVMegN6P
hviYt5JH/nYl4hh3Pa1HJdskgQIVALVJ3ER11+Ko4tP6nwvHwh6+ERYRAoGBAI1j
k+tkqMVHuAFcvAGKocTgsjJem6/5qomzJuKDmbJNu9Qxw3rAotXau8Qe+MBcJl/U
hhy1KHVpCGl9fueQ2s6IL0CaO/buycU1CiYQk40KNHCcHfNiZbdlx1E9rpUp7bnF
lRa2v1ntMX3caRVDdbtPEWmdxSCYsYFDk4mZrOLBA4GEAAKBgEbmeve5f8LIE/Gf
MNmP9CM5eovQOGx5ho8WqD+aTebs+k2tn92BBPqeZqpWRa5P/+jrdKml1qx4llHW
MXrs3IgIb6+hUIB+S8dz8/mmO0bpr76RoZVCXYab2CZedFut7qc3WUH9+EUAH5mw
vSeDCOUMYQR7R9LINYwouHIziqQYMAkGByqGSM44BAMDLwAwLAIUWXBlk40xTwSw
7HX32MxXYruse9ACFBNGmdX2ZBrVNGrN9N2f6ROk0k9K
-----END CERTIFICATE-----";

/// Fields of the identity document that authentication relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDocument {
	pub instance_id: String,
	pub image_id: String,
	pub account_id: String,
	pub region: String,
	pub pending_time: DateTime<Utc>,
}

impl IdentityDocument {
	pub fn to_claim(&self) -> PrincipalClaim {
		PrincipalClaim::new(AuthMethod::Ec2InstanceIdentity, &self.instance_id)
			.with_candidate_role(&self.image_id)
			.with_text("instance_id", &self.instance_id)
			.with_text("ami_id", &self.image_id)
			.with_text("account_id", &self.account_id)
			.with_text("region", &self.region)
			.with_text("pending_time", self.pending_time.to_rfc3339())
	}
}

/// Parse a PEM certificate, accepting it raw or base64 encoded.
pub fn parse_certificate(input: &str) -> AuthResult<X509> {
	let trimmed = input.trim();
	let pem = if trimmed.starts_with("-----BEGIN") {
		trimmed.as_bytes().to_vec()
	} else {
		STANDARD
			.decode(strip_whitespace(trimmed))
			.map_err(|_| AuthError::bad_request("certificate is neither PEM nor base64-encoded PEM"))?
	};
	X509::from_pem(&pem).map_err(|_| AuthError::bad_request("failed to parse certificate"))
}

/// The built-in certificate followed by every registered one.
pub fn trusted_certificates(registered: &[String]) -> AuthResult<Vec<X509>> {
	let mut certs = Vec::with_capacity(registered.len() + 1);
	certs.push(
		X509::from_pem(AWS_PUBLIC_CERT.as_bytes())
			.map_err(|e| AuthError::internal(format!("built-in AWS certificate: {e}")))?,
	);
	for pem in registered {
		certs.push(parse_certificate(pem)?);
	}
	Ok(certs)
}

/// Verify a base64 PKCS#7 signature and return the signed content.
pub fn verify_signed_content(encoded: &str, trusted: &[X509]) -> AuthResult<Vec<u8>> {
	let body = strip_whitespace(encoded);
	if body.is_empty() {
		return Err(AuthError::verification("no PEM body found"));
	}
	let der = STANDARD
		.decode(&body)
		.map_err(|_| AuthError::verification("no PEM body found"))?;
	if let Some(declared) = declared_length(&der) {
		if declared < der.len() {
			return Err(AuthError::verification("trailing bytes after signature"));
		}
	}
	let pkcs7 = Pkcs7::from_der(&der)
		.map_err(|_| AuthError::verification("failed to parse PKCS#7 signature"))?;

	if trusted.is_empty() {
		return Err(AuthError::verification("no trusted certificates"));
	}
	let mut certs = Stack::new().map_err(|e| AuthError::internal(e.to_string()))?;
	for cert in trusted {
		certs
			.push(cert.clone())
			.map_err(|e| AuthError::internal(e.to_string()))?;
	}
	let store = X509StoreBuilder::new()
		.map_err(|e| AuthError::internal(e.to_string()))?
		.build();

	let mut content = Vec::new();
	pkcs7
		.verify(
			&certs,
			&store,
			None,
			Some(&mut content),
			Pkcs7Flags::NOVERIFY | Pkcs7Flags::NOINTERN,
		)
		.map_err(|e| {
			debug!(error = %e, "pkcs7 verification failed");
			AuthError::verification("signature verification failed")
		})?;
	Ok(content)
}

/// Verify and decode an instance identity document.
#[tracing::instrument(skip_all, name = "pkcs7::verify_identity_document")]
pub fn verify_identity_document(encoded: &str, trusted: &[X509]) -> AuthResult<IdentityDocument> {
	let content = verify_signed_content(encoded, trusted)?;
	if content.is_empty() {
		return Err(AuthError::verification("empty identity document"));
	}
	let doc: IdentityDocument = serde_json::from_slice(&content).map_err(|e| {
		debug!(error = %e, "identity document did not decode");
		AuthError::verification("invalid identity document")
	})?;
	if doc.instance_id.is_empty() || doc.region.is_empty() {
		return Err(AuthError::verification("invalid identity document"));
	}
	debug!(instance_id = %doc.instance_id, region = %doc.region, "identity document verified");
	Ok(doc)
}

fn strip_whitespace(input: &str) -> String {
	input.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Total length of a definite-length outer DER SEQUENCE, if it can be read.
fn declared_length(der: &[u8]) -> Option<usize> {
	if der.len() < 2 || der[0] != 0x30 {
		return None;
	}
	let first = der[1];
	if first & 0x80 == 0 {
		return Some(2 + first as usize);
	}
	let count = (first & 0x7f) as usize;
	if count == 0 || count > 4 || der.len() < 2 + count {
		return None;
	}
	let len = der[2..2 + count]
		.iter()
		.fold(0usize, |acc, b| (acc << 8) | *b as usize);
	Some(2 + count + len)
}

#[cfg(test)]
mod tests {
	use super::*;

	const SIGNED_FIXTURE: &str = "MIIDVgYJKoZIhvcNAQcCoIIDRzCCA0MCAQExCTAHBgUrDgMCGjAcBgkqhkiG9w0B\
BwGgDwQNV2UgdGhlIFBlb3BsZaCCAdkwggHVMIIBQKADAgECAgRpuDctMAsGCSqG\
SIb3DQEBCzApMRAwDgYDVQQKEwdBY21lIENvMRUwEwYDVQQDEwxFZGRhcmQgU3Rh\
cmswHhcNMTUwNTA2MDQyNDQ4WhcNMTYwNTA2MDQyNDQ4WjAlMRAwDgYDVQQKEwdB\
Y21lIENvMREwDwYDVQQDEwhKb24gU25vdzCBnzANBgkqhkiG9w0BAQEFAAOBjQAw\
gYkCgYEAqr+tTF4mZP5rMwlXp1y+crRtFpuLXF1zvBZiYMfIvAHwo1ta8E1IcyEP\
J1jIiKMcwbzeo6kAmZzIJRCTezq9jwXUsKbQTvcfOH9HmjUmXBRWFXZYoQs/OaaF\
a45deHmwEeMQkuSWEtYiVKKZXtJOtflKIT3MryJEDiiItMkdybUCAwEAAaMSMBAw\
DgYDVR0PAQH/BAQDAgCgMAsGCSqGSIb3DQEBCwOBgQDK1EweZWRL+f7Z+J0kVzY8\
zXptcBaV4Lf5wGZJLJVUgp33bpLNpT3yadS++XQJ+cvtW3wADQzBSTMduyOF8Zf+\
L7TjjrQ2+F2HbNbKUhBQKudxTfv9dJHdKbD+ngCCdQJYkIy2YexsoNG0C8nQkggy\
axZd/J69xDVx6pui3Sj8sDGCATYwggEyAgEBMDEwKTEQMA4GA1UEChMHQWNtZSBD\
bzEVMBMGA1UEAxMMRWRkYXJkIFN0YXJrAgRpuDctMAcGBSsOAwIaoGEwGAYJKoZI\
hvcNAQkDMQsGCSqGSIb3DQEHATAgBgkqhkiG9w0BCQUxExcRMTUwNTA2MDAyNDQ4\
LTA0MDAwIwYJKoZIhvcNAQkEMRYEFG9D7gcTh9zfKiYNJ1lgB0yTh4sZMAsGCSqG\
SIb3DQEBAQSBgFF3sGDU9PtXty/QMtpcFa35vvIOqmWQAIZt93XAskQOnBq4OloX\
iL9Ct7t1m4pzjRm0o9nDkbaSLZe7HKASHdCqijroScGlI8M+alJ8drHSFv6ZIjnM\
FIwIf0B2Lko6nh9/6mUXq7tbbIHa3Gd1JUVire/QFFtmgRXMbXYk8SIS";

	const SIGNER_CERT: &str = r"-----BEGIN CERTIFICATE-----
MIIB1TCCAUCgAwIBAgIEabg3LTALBgkqhkiG9w0BAQswKTEQMA4GA1UEChMHQWNt
ZSBDbzEVMBMGA1UEAxMMRWRkYXJkIFN0YXJrMB4XDTE1MDUwNjA0MjQ0OFoXDTE2
MDUwNjA0MjQ0OFowJTEQMA4GA1UEChMHQWNtZSBDbzERMA8GA1UEAxMISm9uIFNu
b3cwgZ8wDQYJKoZIhvcNAQEBBQADgY0AMIGJAoGBAKq/rUxeJmT+azMJV6dcvnK0
bRabi1xdc7wWYmDHyLwB8KNbWvBNSHMhDydYyIijHMG83qOpAJmcyCUQk3s6vY8F
1LCm0E73Hzh/R5o1JlwUVhV2WKELPzmmhWuOXXh5sBHjEJLklhLWIlSimV7STrX5
SiE9zK8iRA4oiLTJHcm1AgMBAAGjEjAQMA4GA1UdDwEB/wQEAwIAoDALBgkqhkiG
9w0BAQsDgYEAytRMHmVkS/n+2fidJFc2PM16bXAWleC3+cBmSSyVVIKd926SzaU9
8mnUvvl0CfnL7Vt8AA0MwUkzHbsjhfGX/i+04460Nvhdh2zWylIQUCrncU37/XSR
3Smw/p4AgnUCWJCMtmHsbKDRtAvJ0JIIMmsWXfyevcQ1ceqbot0o/LA=
-----END CERTIFICATE-----";

	fn fixture_signer() -> Vec<X509> {
		vec![X509::from_pem(SIGNER_CERT.as_bytes()).unwrap()]
	}

	#[test]
	fn builtin_certificate_parses() {
		assert_eq!(trusted_certificates(&[]).unwrap().len(), 1);
	}

	#[test]
	fn verifies_with_registered_signer() {
		let content = verify_signed_content(SIGNED_FIXTURE, &fixture_signer()).unwrap();
		assert_eq!(content, b"We the People");
	}

	#[test]
	fn signer_must_be_trusted() {
		let builtin_only = trusted_certificates(&[]).unwrap();
		let err = verify_signed_content(SIGNED_FIXTURE, &builtin_only).unwrap_err();
		assert_eq!(err.to_string(), "signature verification failed");
	}

	#[test]
	fn registered_certificates_extend_trust() {
		let trusted = trusted_certificates(&[STANDARD.encode(SIGNER_CERT)]).unwrap();
		assert_eq!(trusted.len(), 2);
		assert!(verify_signed_content(SIGNED_FIXTURE, &trusted).is_ok());
	}

	#[test]
	fn non_json_content_is_not_an_identity_document() {
		let err = verify_identity_document(SIGNED_FIXTURE, &fixture_signer()).unwrap_err();
		assert_eq!(err.to_string(), "invalid identity document");
	}

	#[test]
	fn empty_input_is_rejected() {
		let err = verify_signed_content("  \n ", &fixture_signer()).unwrap_err();
		assert_eq!(err.to_string(), "no PEM body found");
	}

	#[test]
	fn trailing_bytes_are_rejected() {
		let mut der = STANDARD.decode(strip_whitespace(SIGNED_FIXTURE)).unwrap();
		der.extend_from_slice(&[0, 0, 0]);
		let err = verify_signed_content(&STANDARD.encode(der), &fixture_signer()).unwrap_err();
		assert_eq!(err.to_string(), "trailing bytes after signature");
	}

	#[test]
	fn garbage_is_rejected() {
		let err = verify_signed_content(&STANDARD.encode(b"not pkcs7"), &fixture_signer()).unwrap_err();
		assert_eq!(err.to_string(), "failed to parse PKCS#7 signature");
	}

	#[test]
	fn no_trust_material_is_rejected() {
		let err = verify_signed_content(SIGNED_FIXTURE, &[]).unwrap_err();
		assert_eq!(err.to_string(), "no trusted certificates");
	}

	#[test]
	fn certificate_input_accepts_pem_and_base64() {
		assert!(parse_certificate(SIGNER_CERT).is_ok());
		assert!(parse_certificate(&STANDARD.encode(SIGNER_CERT)).is_ok());
		assert!(parse_certificate("definitely not a cert").is_err());
	}
}
