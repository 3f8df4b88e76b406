// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Task graph engine
//!
//! Builder, invalidation, depend closures, the concurrent evaluator and
//! the offline/online drivers that tie them together.

pub mod builder;
pub mod closure;
pub mod driver;
pub mod evaluator;
pub mod invalidate;

pub use driver::{clean, OfflineDriver, OnlineDriver};
pub use evaluator::{Batch, ErrorDisposition, Evaluator, Program, Sequence, TaskErrorHandler};
