// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for keyward-server.

/// Format version info for display.
pub fn format_version_info() -> String {
	format!(
		"keyward-server version: {}\n\
         Platform:               {}-{}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::ARCH,
		std::env::consts::OS,
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_info_names_binary() {
		let info = format_version_info();
		assert!(info.starts_with("keyward-server version: "));
		assert!(info.contains(std::env::consts::OS));
	}
}
