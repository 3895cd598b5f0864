// SPDX-License-Identifier: MIT

pub mod scratch;
pub mod stress_report;
