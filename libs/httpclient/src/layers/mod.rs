//! Tower layers for the transport stack
//!
//! - [`DefaultHeaderLayer`] - Sets a header on requests that do not carry it
//! - [`RedirectPolicy`] - Bounded redirect following with credential stripping

mod default_header;
mod redirect;

pub use default_header::{DefaultHeaderLayer, DefaultHeaderService};
pub use redirect::RedirectPolicy;
