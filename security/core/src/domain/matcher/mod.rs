// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command;
pub mod host;
pub mod path;

pub use command::{base_command, matches_command, matches_deny};
pub use host::{matches_any_host, matches_host};
pub use path::{lexical_clean, PathPattern, PathResolver};
