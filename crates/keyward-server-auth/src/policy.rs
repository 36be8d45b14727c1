// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy list canonicalization.
//!
//! A canonical list is trimmed, lowercased, sorted and deduplicated. `root`
//! suppresses every other name; otherwise `default` is always present.

use std::collections::BTreeSet;

pub const DEFAULT_POLICY: &str = "default";
pub const ROOT_POLICY: &str = "root";

pub fn sanitize<I, S>(policies: I) -> Vec<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut set: BTreeSet<String> = policies
		.into_iter()
		.map(|p| p.as_ref().trim().to_lowercase())
		.filter(|p| !p.is_empty())
		.collect();

	if set.contains(ROOT_POLICY) {
		return vec![ROOT_POLICY.to_string()];
	}
	set.insert(DEFAULT_POLICY.to_string());
	set.into_iter().collect()
}

/// Whether every policy of `subset` is granted by `superset`.
///
/// `root` in the superset grants everything.
pub fn is_subset(subset: &[String], superset: &[String]) -> bool {
	if superset.iter().any(|p| p == ROOT_POLICY) {
		return true;
	}
	subset.iter().all(|p| superset.contains(p))
}

/// Set equality ignoring order, duplicates and the implicit `default`.
pub fn equivalent(a: &[String], b: &[String]) -> bool {
	let strip = |list: &[String]| -> BTreeSet<String> {
		list.iter()
			.map(|p| p.trim().to_lowercase())
			.filter(|p| !p.is_empty() && p != DEFAULT_POLICY)
			.collect()
	};
	strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn v(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn sanitize_sorts_dedups_and_adds_default() {
		assert_eq!(sanitize(["q", "P", "p", " q "]), v(&["default", "p", "q"]));
		assert_eq!(sanitize(Vec::<String>::new()), v(&["default"]));
	}

	#[test]
	fn root_stands_alone() {
		assert_eq!(sanitize(["p", "root", "default"]), v(&["root"]));
	}

	#[test]
	fn subset_rules() {
		let role = v(&["default", "p", "q", "r", "s"]);
		assert!(is_subset(&v(&["default", "p", "q"]), &role));
		assert!(!is_subset(&v(&["p", "x"]), &role));
		assert!(is_subset(&v(&["anything"]), &v(&["root"])));
	}

	#[test]
	fn equivalence_ignores_default_and_order() {
		assert!(equivalent(&v(&["b", "a", "default"]), &v(&["a", "b"])));
		assert!(!equivalent(&v(&["a"]), &v(&["a", "b"])));
	}

	mod proptests {
		use super::*;
		use proptest::prelude::*;

		proptest! {
			#[test]
			fn sanitized_lists_are_canonical(input in proptest::collection::vec("[a-zA-Z ]{0,8}", 0..12)) {
				let out = sanitize(&input);
				let mut sorted = out.clone();
				sorted.sort();
				sorted.dedup();
				prop_assert_eq!(&out, &sorted);
				let has_root = out.iter().any(|p| p == ROOT_POLICY);
				let has_default = out.iter().any(|p| p == DEFAULT_POLICY);
				prop_assert!(has_default != has_root);
				if has_root {
					prop_assert_eq!(out.len(), 1);
				}
			}

			#[test]
			fn sanitize_is_idempotent(input in proptest::collection::vec("[a-z]{1,6}", 0..10)) {
				let once = sanitize(&input);
				prop_assert_eq!(sanitize(&once), once);
			}
		}
	}
}
