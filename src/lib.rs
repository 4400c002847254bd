// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

pub mod buffer;
pub mod edf;
pub mod generator;
pub mod input;
pub mod metrics;
pub mod output;
pub mod policy;
pub mod qoe;
pub mod resource;
pub mod simulation;
pub mod stream;
pub mod task;
pub mod tier1;
pub mod tier2;
pub mod tier3;

#[cfg(test)]
pub(crate) mod testing;
