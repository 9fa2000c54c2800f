// SPDX-License-Identifier: Apache-2.0
pub mod config;
pub mod gate;
pub mod handlers;
pub mod logging;
pub mod pages;
pub mod proxy;
pub mod redirect;
pub mod turnstile;
pub mod visitor;
