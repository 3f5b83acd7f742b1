// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Re-exported store fakes for pool tests.

pub use weft_db::testing::{test_account, FakeCursor, FakeStore, StatusCall};
