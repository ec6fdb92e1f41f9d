// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-core: Core library for the Dev Warden (dw) tool
//!
//! Pure domain types shared by the supervisor, the daemon, and the CLI.
//! This crate is sync-only; anything that needs tokio lives upstream.

pub mod clock;
pub mod duration;
pub mod id;
pub mod process;
pub mod ring;
pub mod scope;
pub mod session;
pub mod task;
pub mod time_fmt;

pub use clock::{Clock, FakeClock, SystemClock};
pub use duration::{parse_signed_duration, DurationError};
pub use id::{next_code, ShortId};
pub use process::{ProcessKey, ProcessSpec, ProcessState, DEFAULT_BUFFER_SIZE};
pub use ring::RingBuffer;
pub use scope::{dir_matches, DirFilter};
pub use session::Session;
pub use task::{ScheduledTask, TaskStatus};
pub use time_fmt::{format_elapsed, format_elapsed_ms};
