//! Request handlers for the JSON API.

pub mod search_status;
