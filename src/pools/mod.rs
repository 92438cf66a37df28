// SPDX-License-Identifier: MIT

pub mod workerpool;
