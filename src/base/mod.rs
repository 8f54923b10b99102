//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): error codes shared by resolution and dialing,
//!   numbered after Chromium's `net_error_list.h` where a counterpart exists
//! - [`IoResultExt`](context::IoResultExt): IO error context helpers

pub mod context;
pub mod neterror;
