// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod discover;
pub mod inspect;
pub mod load;
pub mod query;

pub use discover::discover_command;
pub use inspect::inspect_command;
pub use load::{load_all_command, load_command};
pub use query::query_command;
