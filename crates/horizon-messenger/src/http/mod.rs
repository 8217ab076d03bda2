//! Request and response pipeline.
//!
//! - [`RequestBuilder`] composes a [`RequestDescriptor`] from URL, method,
//!   headers, parameters and codecs.
//! - [`ResponseHead`] is what a transport reports when headers arrive;
//!   [`ResponseDescriptor`] is the completion-time view handed to callbacks.
//! - [`decode_response`] classifies a finished task and runs the
//!   deserializer.

mod builder;
mod decoder;
mod request;
mod response;

pub use builder::{ACCEPT, CONTENT_TYPE, RequestBuilder, accept_value};
pub use decoder::decode_response;
pub use request::{CachePolicy, Headers, HttpMethod, RequestDescriptor, find_header};
pub use response::{
    RawData, ResponseDescriptor, ResponseHead, TransferProgress, parse_cookies,
};
